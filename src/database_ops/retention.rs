//! Retention sweeps over the price-history collection.
//!
//! Three deliberately distinct knobs:
//! - point pruning (65d) bounds ledger size for products that stay live
//! - whole-product deletion (16d) reclaims catalog entries that went silent
//! - variant pruning (30d) drops discontinued variants from live products
//!
//! Sweeps stream the collection with a cursor and never load it whole; the
//! deletion sweep flushes unordered batches so one bad batch cannot block
//! the rest.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use futures::StreamExt;
use tracing::{info, warn};

use crate::database_ops::db::Db;
use crate::database_ops::products::{basis_timestamp, VariantDoc};

/// Individual points older than this are pruned while the product stays live.
pub const PRUNE_POINT_DAYS: i64 = 65;
/// A product with no point at all inside this horizon is deleted wholesale.
pub const SILENT_PRODUCT_DAYS: i64 = 16;
/// Variants whose every point is older than this are dropped.
pub const STALE_VARIANT_DAYS: i64 = 30;

#[derive(Debug, Clone)]
pub struct SweepConfig {
    pub batch_size: usize,
    pub progress_every: usize,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            batch_size: 500,
            progress_every: 1000,
        }
    }
}

// ---------------------------------------------------------------------------
// Pure helpers (also exercised by the ingest-side planner tests)

/// Drop every ledger point whose basis timestamp is older than `cutoff`.
/// Undated points are kept (conservative: keep on ambiguity). Returns the
/// number of removed points.
pub fn drop_points_older_than(variants: &mut [VariantDoc], cutoff: DateTime<Utc>) -> usize {
    let mut removed = 0usize;
    for variant in variants.iter_mut() {
        let before = variant.pd.len();
        variant.pd.retain(|day_key, point| {
            match basis_timestamp(day_key, point) {
                Some(basis) => basis >= cutoff,
                None => true,
            }
        });
        removed += before - variant.pd.len();
    }
    removed
}

/// True iff any variant has any point with basis timestamp >= `threshold`.
pub fn has_recent_point(variants: &[VariantDoc], threshold: DateTime<Utc>) -> bool {
    variants.iter().any(|variant| {
        variant
            .pd
            .iter()
            .any(|(day_key, point)| match basis_timestamp(day_key, point) {
                Some(basis) => basis >= threshold,
                None => false,
            })
    })
}

// ---------------------------------------------------------------------------
// Sweeps

#[derive(Debug, Default)]
pub struct PointPruneSummary {
    pub scanned: usize,
    pub updated: usize,
    pub removed_points: usize,
}

/// Short sweep: prune individual stale points across every variant of every
/// product. Documents are rewritten only when something was removed.
pub async fn prune_old_points(
    db: &Db,
    threshold_days: i64,
    cfg: &SweepConfig,
) -> Result<PointPruneSummary> {
    let cutoff = Utc::now() - Duration::days(threshold_days);
    info!(%cutoff, threshold_days, "point prune sweep starting");

    let mut summary = PointPruneSummary::default();
    let mut stream = db.stream_ledgers();
    while let Some(row) = stream.next().await {
        let mut row = row?;
        summary.scanned += 1;

        let removed = drop_points_older_than(&mut row.variants, cutoff);
        if removed > 0 {
            db.replace_sku_info(&row.id, &row.variants).await?;
            summary.updated += 1;
            summary.removed_points += removed;
        }

        if cfg.progress_every > 0 && summary.scanned % cfg.progress_every == 0 {
            info!(
                scanned = summary.scanned,
                updated = summary.updated,
                removed = summary.removed_points,
                "point prune progress"
            );
        }
    }

    info!(
        scanned = summary.scanned,
        updated = summary.updated,
        removed = summary.removed_points,
        "point prune sweep done"
    );
    Ok(summary)
}

#[derive(Debug, Default)]
pub struct ProductDeleteSummary {
    pub total: usize,
    pub deleted: u64,
    pub kept: usize,
    pub failed_batches: usize,
    /// First few deleted ids, for the run log.
    pub sample_deleted_ids: Vec<String>,
}

/// Strict sweep: delete every product that has gone completely silent — no
/// point at all within the horizon, across all variants.
pub async fn delete_silent_products(
    db: &Db,
    threshold_days: i64,
    cfg: &SweepConfig,
) -> Result<ProductDeleteSummary> {
    let threshold = Utc::now() - Duration::days(threshold_days);
    info!(%threshold, threshold_days, "silent-product sweep starting");

    let mut summary = ProductDeleteSummary::default();
    let mut pending: Vec<String> = Vec::new();

    {
        let mut stream = db.stream_ledgers();
        while let Some(row) = stream.next().await {
            let row = row?;
            summary.total += 1;

            if has_recent_point(&row.variants, threshold) {
                summary.kept += 1;
            } else {
                if summary.sample_deleted_ids.len() < 10 {
                    summary.sample_deleted_ids.push(row.id.clone());
                }
                pending.push(row.id);
            }

            if cfg.progress_every > 0 && summary.total % cfg.progress_every == 0 {
                info!(
                    scanned = summary.total,
                    pending_delete = pending.len() as u64 + summary.deleted,
                    kept = summary.kept,
                    "silent-product progress"
                );
            }

            if pending.len() >= cfg.batch_size {
                let batch = std::mem::take(&mut pending);
                let (deleted, failed) = db.delete_products_batched(&batch, cfg.batch_size).await;
                summary.deleted += deleted;
                summary.failed_batches += failed;
            }
        }
    }

    if !pending.is_empty() {
        let (deleted, failed) = db.delete_products_batched(&pending, cfg.batch_size).await;
        summary.deleted += deleted;
        summary.failed_batches += failed;
    }

    if summary.deleted == 0 {
        info!("no deletion candidates; every product has a recent point");
    }
    if summary.failed_batches > 0 {
        warn!(failed_batches = summary.failed_batches, "some delete batches failed");
    }
    info!(
        total = summary.total,
        deleted = summary.deleted,
        kept = summary.kept,
        sample = ?summary.sample_deleted_ids,
        "silent-product sweep done"
    );
    Ok(summary)
}

/// Variant-granular sweep, filtered server-side: keep only variants that
/// still own at least one point collected within the horizon. Runs as one
/// aggregation-style statement over the whole collection.
pub async fn prune_stale_variants(db: &Db, threshold_days: i64) -> Result<u64> {
    let cutoff = Utc::now() - Duration::days(threshold_days);
    info!(%cutoff, threshold_days, "stale-variant sweep starting");

    let res = sqlx::query(
        "UPDATE product_details SET sku_info = (
            SELECT COALESCE(jsonb_agg(v ORDER BY ord), '[]'::jsonb)
            FROM jsonb_array_elements(COALESCE(sku_info, '[]'::jsonb))
                 WITH ORDINALITY AS elems(v, ord)
            WHERE EXISTS (
                SELECT 1 FROM jsonb_each(COALESCE(v->'pd', '{}'::jsonb)) AS pp(day, point)
                WHERE (point->>'t') IS NOT NULL
                  AND (point->>'t')::timestamptz >= $1
            )
        ), updated_at = now()",
    )
    .persistent(false)
    .bind(cutoff)
    .execute(&db.pool)
    .await?;

    info!(matched = res.rows_affected(), "stale-variant sweep done");
    Ok(res.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database_ops::products::RawPricePoint;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn variant_with_days(days: &[&str]) -> VariantDoc {
        let pd: BTreeMap<String, RawPricePoint> = days
            .iter()
            .map(|d| {
                (
                    d.to_string(),
                    RawPricePoint {
                        s: Some(json!(100)),
                        p: None,
                        t: None,
                    },
                )
            })
            .collect();
        VariantDoc {
            sid: "1".into(),
            c: "black".into(),
            sp: String::new(),
            sp_key: String::new(),
            link: None,
            cur: "KRW".into(),
            pd,
        }
    }

    fn day_n_days_ago(n: i64) -> String {
        crate::util::time::day_key(Utc::now() - Duration::days(n))
    }

    #[test]
    fn prunes_66_day_points_keeps_64_day_points() {
        let old = day_n_days_ago(66);
        let recent = day_n_days_ago(64);
        let mut variants = vec![variant_with_days(&[old.as_str(), recent.as_str()])];

        let cutoff = Utc::now() - Duration::days(PRUNE_POINT_DAYS);
        let removed = drop_points_older_than(&mut variants, cutoff);
        assert_eq!(removed, 1);
        assert!(variants[0].pd.contains_key(recent.as_str()));
        assert!(!variants[0].pd.contains_key(old.as_str()));
    }

    #[test]
    fn undated_points_survive_pruning() {
        let mut variant = variant_with_days(&[]);
        variant
            .pd
            .insert("legacy-slot".into(), RawPricePoint::default());
        let mut variants = vec![variant];

        let cutoff = Utc::now() - Duration::days(PRUNE_POINT_DAYS);
        assert_eq!(drop_points_older_than(&mut variants, cutoff), 0);
        assert_eq!(variants[0].pd.len(), 1);
    }

    #[test]
    fn silent_product_detection() {
        let threshold = Utc::now() - Duration::days(SILENT_PRODUCT_DAYS);

        let silent = vec![variant_with_days(&[day_n_days_ago(30).as_str()])];
        assert!(!has_recent_point(&silent, threshold));

        let live = vec![
            variant_with_days(&[day_n_days_ago(30).as_str()]),
            variant_with_days(&[day_n_days_ago(3).as_str()]),
        ];
        assert!(has_recent_point(&live, threshold));
    }

    #[test]
    fn undated_points_do_not_count_as_recent() {
        let mut variant = variant_with_days(&[]);
        variant
            .pd
            .insert("legacy-slot".into(), RawPricePoint::default());
        let threshold = Utc::now() - Duration::days(SILENT_PRODUCT_DAYS);
        assert!(!has_recent_point(&[variant], threshold));
    }
}
