use anyhow::Result;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::Row;
use std::collections::BTreeMap;
use tracing::{debug, instrument, warn};

use crate::database_ops::db::Db;
use crate::reconcile::{IncomingKeys, MatchOutcome, VariantIndex};
use crate::util::time::parse_day_key;

pub const DEFAULT_CURRENCY: &str = "KRW";

fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}

// ---------------------------------------------------------------------------
// Document model

/// One ledger slot: the canonical price observed for a variant on one day.
///
/// Field shapes are deliberately loose: legacy records carry `p` instead of
/// `s`, numbers encoded as strings, or no `t` at all. Raw values are resolved
/// through [`RawPricePoint::sale_price`] / [`basis_timestamp`] exactly once
/// at read time; nothing downstream touches the raw fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RawPricePoint {
    /// Sale price (tax inclusive).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s: Option<Value>,
    /// Legacy generic price, consulted when `s` is absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p: Option<Value>,
    /// Collection timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<Value>,
}

impl RawPricePoint {
    pub fn observed(sale: f64, at: DateTime<Utc>) -> Self {
        Self {
            s: Some(Value::from(sale)),
            p: None,
            t: Some(Value::String(at.to_rfc3339())),
        }
    }

    /// Positive sale price, if one parses.
    pub fn sale_price(&self) -> Option<f64> {
        self.s.as_ref().and_then(num_from).filter(|n| *n > 0.0)
    }

    /// Sale price preferring `s`, falling back to the generic `p`.
    pub fn any_price(&self) -> Option<f64> {
        self.sale_price()
            .or_else(|| self.p.as_ref().and_then(num_from).filter(|n| *n > 0.0))
    }

    pub fn observed_at(&self) -> Option<DateTime<Utc>> {
        let raw = self.t.as_ref()?.as_str()?;
        DateTime::parse_from_rfc3339(raw)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }
}

/// Lenient numeric parse: numbers pass through, strings are stripped of
/// everything but digits, sign and decimal point before parsing.
pub fn num_from(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let cleaned: String = s
                .chars()
                .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
                .collect();
            cleaned.parse::<f64>().ok()
        }
        _ => None,
    }
}

/// Basis timestamp for retention and windowing decisions.
///
/// Precedence: parse the day key itself, then fall back to the point's
/// collection timestamp. A point with neither is undated and never pruned.
pub fn basis_timestamp(day_key: &str, point: &RawPricePoint) -> Option<DateTime<Utc>> {
    parse_day_key(day_key).or_else(|| point.observed_at())
}

/// One purchasable variant of a product, embedded in the product document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariantDoc {
    /// Upstream variant id. Unstable across refreshes; never a join key.
    #[serde(default)]
    pub sid: String,
    /// Normalized display-color key.
    #[serde(default)]
    pub c: String,
    /// Strict canonical properties serialization.
    #[serde(default)]
    pub sp: String,
    /// Loose properties comparison key.
    #[serde(default)]
    pub sp_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    #[serde(default = "default_currency")]
    pub cur: String,
    /// Day-keyed price ledger.
    #[serde(default)]
    pub pd: BTreeMap<String, RawPricePoint>,
}

/// Outcome of a single ledger write attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointWrite {
    Inserted,
    Lowered,
    Unchanged,
}

/// Lowest-of-day decision: absent day inserts, present day overwrites only
/// when the new sale price is strictly lower.
pub fn decide_point_write(existing: Option<&RawPricePoint>, sale: f64) -> PointWrite {
    match existing {
        None => PointWrite::Inserted,
        Some(point) => match point.sale_price() {
            Some(current) if current > sale => PointWrite::Lowered,
            // Unparseable stored price: keep on ambiguity.
            _ => PointWrite::Unchanged,
        },
    }
}

/// Apply the lowest-of-day rule to a variant's ledger in place.
pub fn record_point(
    variant: &mut VariantDoc,
    day_key: &str,
    sale: f64,
    observed: DateTime<Utc>,
) -> PointWrite {
    let write = decide_point_write(variant.pd.get(day_key), sale);
    if write != PointWrite::Unchanged {
        variant
            .pd
            .insert(day_key.to_string(), RawPricePoint::observed(sale, observed));
    }
    write
}

// ---------------------------------------------------------------------------
// Mutation planning

/// Normalized incoming variant, ready for matching and storage.
#[derive(Debug, Clone)]
pub struct VariantObservation {
    pub sid: String,
    pub color_key: String,
    pub sp_canonical: String,
    pub sp_compare_key: String,
    /// Raw properties payload string, kept for the legacy storage-side filter.
    pub sp_raw: String,
    pub link: Option<String>,
    pub currency: String,
    /// Tax-inclusive sale price; None when rejected by positive-number parsing.
    pub sale: Option<f64>,
}

impl VariantObservation {
    fn as_variant_doc(&self, day_key: &str, now: DateTime<Utc>) -> VariantDoc {
        let mut pd = BTreeMap::new();
        if let Some(sale) = self.sale {
            pd.insert(day_key.to_string(), RawPricePoint::observed(sale, now));
        }
        VariantDoc {
            sid: self.sid.clone(),
            c: self.color_key.clone(),
            sp: self.sp_canonical.clone(),
            sp_key: self.sp_compare_key.clone(),
            link: self.link.clone(),
            cur: self.currency.clone(),
            pd,
        }
    }

    fn identity_patch(&self) -> Value {
        let mut patch = serde_json::Map::new();
        patch.insert("sid".into(), Value::String(self.sid.clone()));
        patch.insert("c".into(), Value::String(self.color_key.clone()));
        patch.insert("sp".into(), Value::String(self.sp_canonical.clone()));
        patch.insert("sp_key".into(), Value::String(self.sp_compare_key.clone()));
        if let Some(link) = &self.link {
            patch.insert("link".into(), Value::String(link.clone()));
        }
        patch.insert("cur".into(), Value::String(self.currency.clone()));
        Value::Object(patch)
    }
}

/// Sparse top-level product fields. `None` never clobbers a stored value.
#[derive(Debug, Clone, Default)]
pub struct BasePatch {
    pub vol: Option<i64>,
    pub ps: Option<f64>,
    pub rn: Option<i64>,
    pub tt: Option<String>,
    pub pl: Option<String>,
    pub cat1: Option<i64>,
    pub cat2: Option<i64>,
}

/// A single storage mutation. Ops across products commute; within one
/// product each op addresses a disjoint sub-path.
#[derive(Debug, Clone)]
pub enum StorageOp {
    /// Upsert the product body; `insert_variants` applies only on insert.
    UpsertBase {
        product_id: String,
        patch: BasePatch,
        insert_variants: Vec<VariantDoc>,
    },
    /// Set today's ledger slot (and refresh identity fields) on the stored
    /// variant matching the observation's keys.
    UpdateVariant {
        product_id: String,
        observation: VariantObservation,
        day_key: String,
        point: RawPricePoint,
    },
    /// Append newly discovered variants to an existing document.
    PushVariants {
        product_id: String,
        variants: Vec<VariantDoc>,
    },
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PlanCounters {
    pub new_variants: usize,
    pub first_points: usize,
    pub lowered_points: usize,
    pub unchanged: usize,
    pub rejected_points: usize,
}

#[derive(Debug)]
pub struct PlannedOps {
    pub ops: Vec<StorageOp>,
    pub counters: PlanCounters,
}

/// Reconcile the incoming variant set against the stored one and produce the
/// storage mutations for this product. `stored` is `None` when the product
/// document does not exist yet.
pub fn plan_variant_ops(
    product_id: &str,
    base: BasePatch,
    stored: Option<&[VariantDoc]>,
    incoming: &[VariantObservation],
    day_key: &str,
    now: DateTime<Utc>,
) -> PlannedOps {
    let mut counters = PlanCounters::default();
    let empty: &[VariantDoc] = &[];
    let stored_variants = stored.unwrap_or(empty);
    let index = VariantIndex::build(product_id, stored_variants);

    let mut new_docs: Vec<VariantDoc> = Vec::new();
    let mut updates: Vec<StorageOp> = Vec::new();

    for obs in incoming {
        if obs.sale.is_none() {
            counters.rejected_points += 1;
        }
        let keys = IncomingKeys {
            color: obs.color_key.clone(),
            strict_props: obs.sp_canonical.clone(),
            loose_props: obs.sp_compare_key.clone(),
        };
        match index.resolve(&keys) {
            MatchOutcome::New => {
                counters.new_variants += 1;
                new_docs.push(obs.as_variant_doc(day_key, now));
            }
            MatchOutcome::Existing(idx) => {
                let Some(sale) = obs.sale else {
                    counters.unchanged += 1;
                    continue;
                };
                let write = match decide_point_write(stored_variants[idx].pd.get(day_key), sale) {
                    PointWrite::Inserted => {
                        counters.first_points += 1;
                        true
                    }
                    PointWrite::Lowered => {
                        counters.lowered_points += 1;
                        true
                    }
                    PointWrite::Unchanged => {
                        counters.unchanged += 1;
                        false
                    }
                };
                if write {
                    updates.push(StorageOp::UpdateVariant {
                        product_id: product_id.to_string(),
                        observation: obs.clone(),
                        day_key: day_key.to_string(),
                        point: RawPricePoint::observed(sale, now),
                    });
                }
            }
        }
    }

    let mut ops = Vec::with_capacity(updates.len() + 2);
    let doc_exists = stored.is_some();
    ops.push(StorageOp::UpsertBase {
        product_id: product_id.to_string(),
        patch: base,
        insert_variants: if doc_exists {
            Vec::new()
        } else {
            incoming
                .iter()
                .map(|o| o.as_variant_doc(day_key, now))
                .collect()
        },
    });
    ops.extend(updates);
    // Push only targets documents that already exist; on first insert the
    // whole variant set rides along with the upsert.
    if doc_exists && !new_docs.is_empty() {
        ops.push(StorageOp::PushVariants {
            product_id: product_id.to_string(),
            variants: new_docs,
        });
    }

    PlannedOps { ops, counters }
}

// ---------------------------------------------------------------------------
// Storage operations

#[derive(Debug, Default, Clone, Copy)]
pub struct OpsOutcome {
    pub applied: usize,
    pub failed: usize,
}

impl Db {
    /// Apply a batch of mutations unordered: a failing op is logged and
    /// counted, never blocks the rest of the batch.
    #[instrument(skip(self, ops))]
    pub async fn apply_ops(&self, ops: &[StorageOp]) -> OpsOutcome {
        let mut outcome = OpsOutcome::default();
        for op in ops {
            let res = match op {
                StorageOp::UpsertBase {
                    product_id,
                    patch,
                    insert_variants,
                } => self.upsert_base(product_id, patch, insert_variants).await,
                StorageOp::UpdateVariant {
                    product_id,
                    observation,
                    day_key,
                    point,
                } => {
                    self.update_variant_point(product_id, observation, day_key, point)
                        .await
                }
                StorageOp::PushVariants {
                    product_id,
                    variants,
                } => self.push_variants(product_id, variants).await,
            };
            match res {
                Ok(()) => outcome.applied += 1,
                Err(err) => {
                    outcome.failed += 1;
                    warn!(error = %err, "storage op failed; continuing batch");
                }
            }
        }
        outcome
    }

    async fn upsert_base(
        &self,
        product_id: &str,
        patch: &BasePatch,
        insert_variants: &[VariantDoc],
    ) -> Result<()> {
        let initial = serde_json::to_value(insert_variants)?;
        sqlx::query(
            "INSERT INTO product_details (id, vol, ps, rn, tt, pl, cat1, cat2, sku_info)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             ON CONFLICT (id) DO UPDATE SET
               vol = COALESCE(EXCLUDED.vol, product_details.vol),
               ps = COALESCE(EXCLUDED.ps, product_details.ps),
               rn = COALESCE(EXCLUDED.rn, product_details.rn),
               tt = COALESCE(EXCLUDED.tt, product_details.tt),
               pl = COALESCE(EXCLUDED.pl, product_details.pl),
               cat1 = COALESCE(EXCLUDED.cat1, product_details.cat1),
               cat2 = COALESCE(EXCLUDED.cat2, product_details.cat2),
               updated_at = now()",
        )
        .persistent(false)
        .bind(product_id)
        .bind(patch.vol)
        .bind(patch.ps)
        .bind(patch.rn)
        .bind(patch.tt.as_ref())
        .bind(patch.pl.as_ref())
        .bind(patch.cat1)
        .bind(patch.cat2)
        .bind(initial)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Array-scoped conditional update: rewrite the one variant entry whose
    /// keys match the observation, refreshing identity fields and setting the
    /// day's ledger slot. Matches on the loose key, the canonical form, or
    /// the raw payload string (legacy rows may hold any of the three).
    async fn update_variant_point(
        &self,
        product_id: &str,
        obs: &VariantObservation,
        day_key: &str,
        point: &RawPricePoint,
    ) -> Result<()> {
        let patch = obs.identity_patch();
        let point_json = serde_json::to_value(point)?;
        // Legacy rows may hold an unnormalized color; strip separators and
        // lowercase server-side before comparing, the way the comparison key
        // was built on write.
        sqlx::query(
            r#"UPDATE product_details SET sku_info = (
               SELECT COALESCE(jsonb_agg(
                 CASE WHEN (e->>'c' = $2
                            OR lower(regexp_replace(e->>'c',
                                 '[\s()\[\]{}:;,''"`·•・ㆍ\-_]+', '', 'g')) = $2)
                        AND (e->>'sp_key' = $3 OR e->>'sp' = $4 OR e->>'sp' = $5)
                      THEN (e || $6::jsonb)
                           || jsonb_build_object(
                                'pd',
                                COALESCE(e->'pd', '{}'::jsonb)
                                || jsonb_build_object($7::text, $8::jsonb))
                      ELSE e END ORDER BY ord), '[]'::jsonb)
               FROM jsonb_array_elements(COALESCE(sku_info, '[]'::jsonb))
                    WITH ORDINALITY AS elems(e, ord)
             ), updated_at = now()
             WHERE id = $1"#,
        )
        .persistent(false)
        .bind(product_id)
        .bind(&obs.color_key)
        .bind(&obs.sp_compare_key)
        .bind(&obs.sp_canonical)
        .bind(&obs.sp_raw)
        .bind(patch)
        .bind(day_key)
        .bind(point_json)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn push_variants(&self, product_id: &str, variants: &[VariantDoc]) -> Result<()> {
        let appended = serde_json::to_value(variants)?;
        sqlx::query(
            "UPDATE product_details
             SET sku_info = COALESCE(sku_info, '[]'::jsonb) || $2::jsonb, updated_at = now()
             WHERE id = $1",
        )
        .persistent(false)
        .bind(product_id)
        .bind(appended)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Ledger-only projection read. `None` means the document is absent.
    pub async fn fetch_sku_projection(&self, product_id: &str) -> Result<Option<Vec<VariantDoc>>> {
        let row = sqlx::query("SELECT sku_info FROM product_details WHERE id = $1")
            .persistent(false)
            .bind(product_id)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let raw: Value = row.try_get("sku_info")?;
        Ok(Some(parse_variants(product_id, &raw)))
    }

    /// Products assigned to a category via either foreign-key slot. The
    /// primary slot is tried first; the alternate only when it yields nothing.
    pub async fn products_in_category(&self, category_id: i64) -> Result<Vec<CandidateRow>> {
        for slot in ["cat1", "cat2"] {
            let rows = sqlx::query(&format!(
                "SELECT id, pl FROM product_details WHERE {slot} = $1"
            ))
            .persistent(false)
            .bind(category_id)
            .fetch_all(&self.pool)
            .await?;
            if !rows.is_empty() {
                return rows
                    .into_iter()
                    .map(|r| {
                        Ok(CandidateRow {
                            id: r.try_get("id")?,
                            pl: r.try_get("pl")?,
                        })
                    })
                    .collect();
            }
        }
        Ok(Vec::new())
    }

    /// Full product rows (metrics + ledger) for one category, for rankings.
    pub async fn ranked_inputs_for_category(&self, category_id: i64) -> Result<Vec<ProductRow>> {
        for slot in ["cat1", "cat2"] {
            let rows = sqlx::query(&format!(
                "SELECT id, vol, ps, rn, sku_info FROM product_details WHERE {slot} = $1"
            ))
            .persistent(false)
            .bind(category_id)
            .fetch_all(&self.pool)
            .await?;
            if !rows.is_empty() {
                return rows.into_iter().map(product_row_from_pg).collect();
            }
        }
        Ok(Vec::new())
    }

    /// Streaming cursor over every product's ledger, for retention sweeps.
    /// Never loads the whole collection into memory.
    pub fn stream_ledgers(&self) -> BoxStream<'_, Result<ProductRow>> {
        sqlx::query("SELECT id, vol, ps, rn, sku_info FROM product_details ORDER BY id")
            .persistent(false)
            .fetch(&self.pool)
            .map(|res| res.map_err(anyhow::Error::from).and_then(product_row_from_pg))
            .boxed()
    }

    /// Replace a product's whole variant list (retention rewrites).
    pub async fn replace_sku_info(&self, product_id: &str, variants: &[VariantDoc]) -> Result<()> {
        let value = serde_json::to_value(variants)?;
        sqlx::query("UPDATE product_details SET sku_info = $2, updated_at = now() WHERE id = $1")
            .persistent(false)
            .bind(product_id)
            .bind(value)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Unordered batched delete; one failing chunk doesn't stop the rest.
    pub async fn delete_products_batched(&self, ids: &[String], batch_size: usize) -> (u64, usize) {
        let mut deleted = 0u64;
        let mut failed_batches = 0usize;
        for chunk in ids.chunks(batch_size.max(1)) {
            match sqlx::query("DELETE FROM product_details WHERE id = ANY($1)")
                .persistent(false)
                .bind(chunk)
                .execute(&self.pool)
                .await
            {
                Ok(res) => deleted += res.rows_affected(),
                Err(err) => {
                    failed_batches += 1;
                    warn!(error = %err, batch = chunk.len(), "delete batch failed; continuing");
                }
            }
        }
        (deleted, failed_batches)
    }

    /// Drop products whose sales volume is below the floor.
    pub async fn delete_below_volume(&self, floor: i64) -> Result<u64> {
        let res = sqlx::query("DELETE FROM product_details WHERE vol IS NOT NULL AND vol < $1")
            .persistent(false)
            .bind(floor)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected())
    }

    pub async fn all_categories(&self) -> Result<Vec<CategoryRow>> {
        let rows =
            sqlx::query("SELECT id, ext_id, name FROM product_categories ORDER BY id")
                .persistent(false)
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter()
            .map(|r| {
                Ok(CategoryRow {
                    id: r.try_get("id")?,
                    ext_id: r.try_get("ext_id")?,
                    name: r.try_get("name")?,
                })
            })
            .collect()
    }

    pub async fn category_by_ext_id(&self, ext_id: &str) -> Result<Option<CategoryRow>> {
        let row = sqlx::query("SELECT id, ext_id, name FROM product_categories WHERE ext_id = $1")
            .persistent(false)
            .bind(ext_id)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(CategoryRow {
            id: row.try_get("id")?,
            ext_id: row.try_get("ext_id")?,
            name: row.try_get("name")?,
        }))
    }
}

#[derive(Debug, Clone)]
pub struct CandidateRow {
    pub id: String,
    pub pl: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CategoryRow {
    pub id: i64,
    pub ext_id: String,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct ProductRow {
    pub id: String,
    pub vol: Option<i64>,
    pub ps: Option<f64>,
    pub rn: Option<i64>,
    pub variants: Vec<VariantDoc>,
}

fn product_row_from_pg(row: sqlx::postgres::PgRow) -> Result<ProductRow> {
    let id: String = row.try_get("id")?;
    let raw: Value = row.try_get("sku_info")?;
    let variants = parse_variants(&id, &raw);
    Ok(ProductRow {
        vol: row.try_get("vol")?,
        ps: row.try_get("ps")?,
        rn: row.try_get("rn")?,
        variants,
        id,
    })
}

/// Tolerant per-entry parse: a malformed variant entry is skipped with a
/// debug note instead of poisoning the whole document.
pub fn parse_variants(product_id: &str, raw: &Value) -> Vec<VariantDoc> {
    let Some(arr) = raw.as_array() else {
        return Vec::new();
    };
    let mut out = Vec::with_capacity(arr.len());
    for entry in arr {
        match serde_json::from_value::<VariantDoc>(entry.clone()) {
            Ok(v) => out.push(v),
            Err(err) => {
                debug!(product_id, error = %err, "skipping malformed variant entry");
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 3, 0, 0).unwrap()
    }

    fn obs(sid: &str, color: &str, sale: Option<f64>) -> VariantObservation {
        VariantObservation {
            sid: sid.to_string(),
            color_key: color.to_string(),
            sp_canonical: String::new(),
            sp_compare_key: String::new(),
            sp_raw: String::new(),
            link: None,
            currency: DEFAULT_CURRENCY.to_string(),
            sale,
        }
    }

    #[test]
    fn record_point_keeps_lowest_of_day() {
        let mut v = VariantDoc {
            sid: "1".into(),
            c: "black".into(),
            sp: String::new(),
            sp_key: String::new(),
            link: None,
            cur: DEFAULT_CURRENCY.into(),
            pd: BTreeMap::new(),
        };
        let now = at(2025, 9, 5);
        assert_eq!(record_point(&mut v, "2025-09-05", 120.0, now), PointWrite::Inserted);
        assert_eq!(record_point(&mut v, "2025-09-05", 90.0, now), PointWrite::Lowered);
        assert_eq!(record_point(&mut v, "2025-09-05", 100.0, now), PointWrite::Unchanged);
        assert_eq!(v.pd["2025-09-05"].sale_price(), Some(90.0));
    }

    #[test]
    fn num_from_parses_decorated_strings() {
        assert_eq!(num_from(&json!("₩12,900")), Some(12900.0));
        assert_eq!(num_from(&json!(42)), Some(42.0));
        assert_eq!(num_from(&json!("n/a")), None);
        assert_eq!(num_from(&json!(null)), None);
    }

    #[test]
    fn basis_prefers_day_key_then_timestamp() {
        let point = RawPricePoint {
            s: Some(json!(10)),
            p: None,
            t: Some(json!("2025-09-20T12:00:00Z")),
        };
        // Parseable key wins over t.
        let from_key = basis_timestamp("2025-09-05", &point).unwrap();
        assert_eq!(crate::util::time::day_key(from_key), "2025-09-05");
        // Unparseable key falls back to t.
        let from_t = basis_timestamp("legacy-slot", &point).unwrap();
        assert_eq!(from_t, Utc.with_ymd_and_hms(2025, 9, 20, 12, 0, 0).unwrap());
        // Neither: undated.
        assert!(basis_timestamp("legacy-slot", &RawPricePoint::default()).is_none());
    }

    #[test]
    fn sale_price_rejects_nonpositive() {
        let point = RawPricePoint {
            s: Some(json!(0)),
            p: Some(json!(150)),
            t: None,
        };
        assert_eq!(point.sale_price(), None);
        assert_eq!(point.any_price(), Some(150.0));
    }

    #[test]
    fn variant_doc_defaults_currency() {
        let v: VariantDoc = serde_json::from_value(json!({"sid": "9", "c": "red"})).unwrap();
        assert_eq!(v.cur, DEFAULT_CURRENCY);
        assert!(v.pd.is_empty());
    }

    #[test]
    fn parse_variants_skips_malformed_entries() {
        let raw = json!([
            {"sid": "1", "c": "red"},
            42,
            {"sid": "2", "c": "blue"}
        ]);
        let parsed = parse_variants("p1", &raw);
        assert_eq!(parsed.len(), 2);
    }

    #[test]
    fn plan_declares_all_new_on_first_observation() {
        let incoming = vec![obs("1", "red", Some(100.0)), obs("2", "blue", Some(90.0))];
        let planned = plan_variant_ops("p1", BasePatch::default(), None, &incoming, "2025-09-05", at(2025, 9, 5));
        assert_eq!(planned.counters.new_variants, 2);
        assert_eq!(planned.ops.len(), 1);
        match &planned.ops[0] {
            StorageOp::UpsertBase { insert_variants, .. } => {
                assert_eq!(insert_variants.len(), 2);
                assert_eq!(
                    insert_variants[0].pd["2025-09-05"].sale_price(),
                    Some(100.0)
                );
            }
            other => panic!("expected UpsertBase, got {other:?}"),
        }
    }

    #[test]
    fn plan_emits_update_only_for_lower_price() {
        let mut stored = obs("1", "red", Some(100.0)).as_variant_doc("2025-09-05", at(2025, 9, 5));
        stored.sid = "old-id".into();
        let stored = vec![stored];

        // Same day, higher price: nothing to write.
        let higher = vec![obs("77", "red", Some(110.0))];
        let planned = plan_variant_ops(
            "p1",
            BasePatch::default(),
            Some(&stored),
            &higher,
            "2025-09-05",
            at(2025, 9, 5),
        );
        assert_eq!(planned.counters.unchanged, 1);
        assert_eq!(planned.ops.len(), 1); // base upsert only

        // Same day, lower price: lowest-of-day overwrite.
        let lower = vec![obs("77", "red", Some(95.0))];
        let planned = plan_variant_ops(
            "p1",
            BasePatch::default(),
            Some(&stored),
            &lower,
            "2025-09-05",
            at(2025, 9, 5),
        );
        assert_eq!(planned.counters.lowered_points, 1);
        assert!(matches!(planned.ops[1], StorageOp::UpdateVariant { .. }));
    }

    #[test]
    fn plan_pushes_new_variants_on_existing_doc() {
        let stored = vec![obs("1", "red", Some(100.0)).as_variant_doc("2025-09-04", at(2025, 9, 4))];
        let incoming = vec![obs("1", "red", Some(100.0)), obs("2", "blue", Some(80.0))];
        let planned = plan_variant_ops(
            "p1",
            BasePatch::default(),
            Some(&stored),
            &incoming,
            "2025-09-05",
            at(2025, 9, 5),
        );
        // red gets its first point of the day, blue is appended.
        assert_eq!(planned.counters.first_points, 1);
        assert_eq!(planned.counters.new_variants, 1);
        assert!(planned
            .ops
            .iter()
            .any(|op| matches!(op, StorageOp::PushVariants { variants, .. } if variants.len() == 1)));
    }

    #[test]
    fn plan_rejects_nonpositive_prices() {
        let incoming = vec![obs("1", "red", None)];
        let planned = plan_variant_ops("p1", BasePatch::default(), None, &incoming, "2025-09-05", at(2025, 9, 5));
        assert_eq!(planned.counters.rejected_points, 1);
        match &planned.ops[0] {
            StorageOp::UpsertBase { insert_variants, .. } => {
                // Variant is recorded, but no ledger point is stored.
                assert_eq!(insert_variants.len(), 1);
                assert!(insert_variants[0].pd.is_empty());
            }
            other => panic!("expected UpsertBase, got {other:?}"),
        }
    }
}
