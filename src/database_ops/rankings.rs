//! Rolling-window price analytics and Top-20 list construction.
//!
//! Each run fully recomputes every list and overwrites it in place, so
//! re-running against an unchanged ledger is byte-identical. Sort orders
//! carry explicit id tie-breaks for the same reason.

use anyhow::Result;
use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use tracing::info;

use crate::database_ops::db::Db;
use crate::database_ops::products::{basis_timestamp, ProductRow, RawPricePoint, VariantDoc};

pub const TOP_N: usize = 20;
/// Pseudo-category the global lists persist under.
pub const GLOBAL_CATEGORY: &str = "All";
/// Variants whose newest observation is older than this never surface as deals.
pub const FRESHNESS_HORIZON_DAYS: i64 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowMode {
    Rolling30,
    CalendarMonth,
}

impl WindowMode {
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "calendar" | "calendar_month" | "calendarmonth" => Self::CalendarMonth,
            _ => Self::Rolling30,
        }
    }
}

/// Half-open `[start, end)` analysis window.
#[derive(Debug, Clone, Copy)]
pub struct AnalysisWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl AnalysisWindow {
    pub fn current(mode: WindowMode, now: DateTime<Utc>) -> Self {
        match mode {
            WindowMode::Rolling30 => Self {
                start: now - Duration::days(30),
                end: now,
            },
            WindowMode::CalendarMonth => {
                let tz = crate::util::time::ledger_tz();
                let local = now.with_timezone(&tz);
                let start = tz
                    .with_ymd_and_hms(local.year(), local.month(), 1, 0, 0, 0)
                    .single()
                    .map(|dt| dt.with_timezone(&Utc))
                    .unwrap_or(now - Duration::days(30));
                Self { start, end: now }
            }
        }
    }

    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        self.start <= t && t < self.end
    }
}

/// Per-variant window analysis. `None` when no in-window point carries a
/// sale price ("no signal").
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LedgerAnalysis {
    pub lowest_sale: f64,
    pub latest_sale: f64,
    /// Every in-window point shares one identical sale price.
    pub is_flat: bool,
}

pub fn analyze_ledger(
    pd: &BTreeMap<String, RawPricePoint>,
    window: &AnalysisWindow,
) -> Option<LedgerAnalysis> {
    let mut lowest: Option<f64> = None;
    let mut latest: Option<(DateTime<Utc>, f64)> = None;
    let mut sales: Vec<f64> = Vec::new();

    for (day_key, point) in pd {
        let Some(basis) = basis_timestamp(day_key, point) else {
            continue;
        };
        if !window.contains(basis) {
            continue;
        }
        let Some(sale) = point.sale_price() else {
            continue;
        };
        sales.push(sale);
        lowest = Some(lowest.map_or(sale, |cur: f64| cur.min(sale)));
        match latest {
            Some((best, _)) if basis <= best => {}
            _ => latest = Some((basis, sale)),
        }
    }

    let lowest_sale = lowest?;
    let (_, latest_sale) = latest?;

    sales.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    sales.dedup_by(|a, b| a == b);
    let is_flat = sales.len() <= 1;

    Some(LedgerAnalysis {
        lowest_sale,
        latest_sale,
        is_flat,
    })
}

/// Average sale price over the window, preferring the sale field and falling
/// back to the generic price. Only positive-parsing in-window points count.
pub fn average_sale(
    pd: &BTreeMap<String, RawPricePoint>,
    window: &AnalysisWindow,
) -> Option<f64> {
    let mut sum = 0.0;
    let mut count = 0usize;
    for (day_key, point) in pd {
        let Some(basis) = basis_timestamp(day_key, point) else {
            continue;
        };
        if !window.contains(basis) {
            continue;
        }
        let Some(price) = point.any_price() else {
            continue;
        };
        sum += price;
        count += 1;
    }
    if count == 0 {
        return None;
    }
    Some(sum / count as f64)
}

/// Most recent basis timestamp across the whole ledger (not just in-window).
pub fn newest_basis(pd: &BTreeMap<String, RawPricePoint>) -> Option<DateTime<Utc>> {
    pd.iter()
        .filter_map(|(k, p)| basis_timestamp(k, p))
        .max()
}

fn is_fresh(pd: &BTreeMap<String, RawPricePoint>, now: DateTime<Utc>) -> bool {
    newest_basis(pd)
        .map(|t| now - t <= Duration::days(FRESHNESS_HORIZON_DAYS))
        .unwrap_or(false)
}

/// Gate shared by all four rankings: in-window signal, not flat, currently
/// at the window's best price, and recently observed.
pub fn variant_passes_gates(
    variant: &VariantDoc,
    window: &AnalysisWindow,
    now: DateTime<Utc>,
) -> bool {
    let Some(analysis) = analyze_ledger(&variant.pd, window) else {
        return false;
    };
    if analysis.is_flat {
        return false;
    }
    if analysis.latest_sale != analysis.lowest_sale {
        return false;
    }
    is_fresh(&variant.pd, now)
}

/// A variant qualified for the discount ranking.
#[derive(Debug, Clone)]
pub struct DealCandidate {
    pub product_id: String,
    pub sid: String,
    pub link: Option<String>,
    pub color: String,
    pub props: String,
    pub currency: String,
    pub latest_sale: f64,
    pub avg_sale: f64,
    /// latest / window average; lower is a better deal.
    pub ratio: f64,
}

pub fn qualified_deal(
    product_id: &str,
    variant: &VariantDoc,
    window: &AnalysisWindow,
    now: DateTime<Utc>,
) -> Option<DealCandidate> {
    if !variant_passes_gates(variant, window, now) {
        return None;
    }
    // Gates passed, so analysis exists.
    let analysis = analyze_ledger(&variant.pd, window)?;
    let avg = average_sale(&variant.pd, window).filter(|a| a.is_finite() && *a > 0.0)?;
    Some(DealCandidate {
        product_id: product_id.to_string(),
        sid: variant.sid.clone(),
        link: variant.link.clone(),
        color: variant.c.clone(),
        props: variant.sp.clone(),
        currency: variant.cur.clone(),
        latest_sale: analysis.latest_sale,
        avg_sale: avg,
        ratio: analysis.latest_sale / avg,
    })
}

// ---------------------------------------------------------------------------
// List construction

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListKind {
    Popularity,
    Volume,
    Reviews,
    Discount,
}

impl ListKind {
    pub const ALL: [ListKind; 4] = [
        ListKind::Popularity,
        ListKind::Volume,
        ListKind::Reviews,
        ListKind::Discount,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ListKind::Popularity => "ps",
            ListKind::Volume => "vol",
            ListKind::Reviews => "rn",
            ListKind::Discount => "off",
        }
    }
}

/// One persisted list entry: the product id plus just enough embedded
/// variant metadata to render without a second lookup.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RankedEntry {
    pub product: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub c: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cur: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_sale: Option<f64>,
    pub metric: f64,
}

/// Cross-category accumulator threaded through the per-category loop and
/// reduced once into the global lists.
#[derive(Debug, Default)]
pub struct GlobalPools {
    pub ps: Vec<(String, f64)>,
    pub vol: Vec<(String, f64)>,
    pub rn: Vec<(String, f64)>,
    pub off: Vec<DealCandidate>,
}

impl GlobalPools {
    fn absorb(&mut self, pools: CategoryPools) {
        self.ps.extend(pools.ps);
        self.vol.extend(pools.vol);
        self.rn.extend(pools.rn);
        self.off.extend(pools.off);
    }
}

#[derive(Debug, Default)]
struct CategoryPools {
    ps: Vec<(String, f64)>,
    vol: Vec<(String, f64)>,
    rn: Vec<(String, f64)>,
    off: Vec<DealCandidate>,
}

#[derive(Debug, Default)]
pub struct CategoryLists {
    pub ps: Vec<RankedEntry>,
    pub vol: Vec<RankedEntry>,
    pub rn: Vec<RankedEntry>,
    pub off: Vec<RankedEntry>,
}

impl CategoryLists {
    pub fn get(&self, kind: ListKind) -> &[RankedEntry] {
        match kind {
            ListKind::Popularity => &self.ps,
            ListKind::Volume => &self.vol,
            ListKind::Reviews => &self.rn,
            ListKind::Discount => &self.off,
        }
    }
}

/// Metric Top-20: highest metric first, id ascending on ties, one entry per
/// product.
pub fn top_metric(mut pool: Vec<(String, f64)>) -> Vec<RankedEntry> {
    pool.sort_by(|(ida, a), (idb, b)| {
        b.partial_cmp(a)
            .unwrap_or(Ordering::Equal)
            .then_with(|| ida.cmp(idb))
    });
    pool.into_iter()
        .unique_by(|(id, _)| id.clone())
        .take(TOP_N)
        .map(|(product, metric)| RankedEntry {
            product,
            sid: None,
            c: None,
            sp: None,
            cur: None,
            latest_sale: None,
            metric,
        })
        .collect()
}

/// Discount Top-20: best (lowest) ratio first, cheaper latest price then id
/// on ties; a product contributes at most its best variant.
pub fn top_deals(mut pool: Vec<DealCandidate>) -> Vec<RankedEntry> {
    pool.sort_by(|a, b| {
        a.ratio
            .partial_cmp(&b.ratio)
            .unwrap_or(Ordering::Equal)
            .then_with(|| {
                a.latest_sale
                    .partial_cmp(&b.latest_sale)
                    .unwrap_or(Ordering::Equal)
            })
            .then_with(|| a.product_id.cmp(&b.product_id))
    });
    pool.into_iter()
        .unique_by(|c| c.product_id.clone())
        .take(TOP_N)
        .map(|c| RankedEntry {
            product: c.product_id,
            sid: Some(c.sid),
            c: Some(c.color),
            sp: Some(c.props),
            cur: Some(c.currency),
            latest_sale: Some(c.latest_sale),
            metric: c.ratio,
        })
        .collect()
}

fn build_category_lists(
    rows: &[ProductRow],
    window: &AnalysisWindow,
    now: DateTime<Utc>,
) -> (CategoryLists, CategoryPools) {
    let mut pools = CategoryPools::default();

    for row in rows {
        let mut any_qualified = false;
        for variant in &row.variants {
            if let Some(deal) = qualified_deal(&row.id, variant, window, now) {
                pools.off.push(deal);
                any_qualified = true;
            } else if variant_passes_gates(variant, window, now) {
                any_qualified = true;
            }
        }
        if !any_qualified {
            continue;
        }
        if let Some(ps) = row.ps {
            pools.ps.push((row.id.clone(), ps));
        }
        if let Some(vol) = row.vol {
            pools.vol.push((row.id.clone(), vol as f64));
        }
        if let Some(rn) = row.rn {
            pools.rn.push((row.id.clone(), rn as f64));
        }
    }

    let lists = CategoryLists {
        ps: top_metric(pools.ps.clone()),
        vol: top_metric(pools.vol.clone()),
        rn: top_metric(pools.rn.clone()),
        off: top_deals(pools.off.clone()),
    };
    (lists, pools)
}

// ---------------------------------------------------------------------------
// Driver

#[derive(Debug, Clone)]
pub struct RankingsConfig {
    pub window_mode: WindowMode,
}

impl Default for RankingsConfig {
    fn default() -> Self {
        Self {
            window_mode: WindowMode::Rolling30,
        }
    }
}

#[derive(Debug, Default)]
pub struct RankingsSummary {
    pub categories: usize,
    pub lists_written: usize,
    pub deal_candidates: usize,
}

/// Recompute every per-category list plus the global "All" lists. Each list
/// write is an idempotent overwrite keyed by `(category, kind)`.
pub async fn build_ranked_lists(db: &Db, cfg: &RankingsConfig) -> Result<RankingsSummary> {
    let now = Utc::now();
    let window = AnalysisWindow::current(cfg.window_mode, now);
    info!(start = %window.start, end = %window.end, "ranking window");

    let categories = db.all_categories().await?;
    let mut summary = RankingsSummary::default();
    let mut global = GlobalPools::default();

    for category in &categories {
        let rows = db.ranked_inputs_for_category(category.id).await?;
        let (lists, pools) = build_category_lists(&rows, &window, now);
        summary.deal_candidates += pools.off.len();
        global.absorb(pools);

        for kind in ListKind::ALL {
            db.upsert_ranked_list(&category.name, kind, lists.get(kind))
                .await?;
            summary.lists_written += 1;
        }
        info!(
            category = %category.name,
            products = rows.len(),
            ps = lists.ps.len(),
            vol = lists.vol.len(),
            rn = lists.rn.len(),
            off = lists.off.len(),
            "category lists written"
        );
        summary.categories += 1;
    }

    // Same sort/dedup/top-20 procedure over the pooled union.
    let global_lists = CategoryLists {
        ps: top_metric(global.ps),
        vol: top_metric(global.vol),
        rn: top_metric(global.rn),
        off: top_deals(global.off),
    };
    for kind in ListKind::ALL {
        db.upsert_ranked_list(GLOBAL_CATEGORY, kind, global_lists.get(kind))
            .await?;
        summary.lists_written += 1;
    }

    info!(
        categories = summary.categories,
        lists = summary.lists_written,
        "ranked lists rebuilt"
    );
    Ok(summary)
}

impl Db {
    pub async fn upsert_ranked_list(
        &self,
        category_name: &str,
        kind: ListKind,
        entries: &[RankedEntry],
    ) -> Result<()> {
        let value = serde_json::to_value(entries)?;
        sqlx::query(
            "INSERT INTO ranked_lists (category_name, list_kind, entries, generated_at)
             VALUES ($1, $2, $3, now())
             ON CONFLICT (category_name, list_kind)
             DO UPDATE SET entries = EXCLUDED.entries, generated_at = now()",
        )
        .persistent(false)
        .bind(category_name)
        .bind(kind.as_str())
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn fetch_ranked_list(
        &self,
        category_name: &str,
        kind: ListKind,
    ) -> Result<Option<Vec<RankedEntry>>> {
        use sqlx::Row;
        let row = sqlx::query(
            "SELECT entries FROM ranked_lists WHERE category_name = $1 AND list_kind = $2",
        )
        .persistent(false)
        .bind(category_name)
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let raw: serde_json::Value = row.try_get("entries")?;
        let entries: Vec<RankedEntry> = serde_json::from_value(raw)?;
        Ok(Some(entries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn window() -> AnalysisWindow {
        AnalysisWindow {
            start: Utc.with_ymd_and_hms(2025, 9, 1, 0, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2025, 10, 1, 0, 0, 0).unwrap(),
        }
    }

    fn ledger(points: &[(&str, f64)]) -> BTreeMap<String, RawPricePoint> {
        points
            .iter()
            .map(|(day, sale)| {
                (
                    day.to_string(),
                    RawPricePoint {
                        s: Some(json!(sale)),
                        p: None,
                        t: None,
                    },
                )
            })
            .collect()
    }

    fn variant(sid: &str, points: &[(&str, f64)]) -> VariantDoc {
        VariantDoc {
            sid: sid.to_string(),
            c: "black".into(),
            sp: String::new(),
            sp_key: String::new(),
            link: None,
            cur: "KRW".into(),
            pd: ledger(points),
        }
    }

    // "now" two days after the last example point, so freshness passes.
    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 9, 30, 12, 0, 0).unwrap()
    }

    #[test]
    fn analyzes_spec_example_window() {
        let pd = ledger(&[("2025-09-05", 100.0), ("2025-09-20", 90.0), ("2025-09-29", 90.0)]);
        let a = analyze_ledger(&pd, &window()).unwrap();
        assert_eq!(a.lowest_sale, 90.0);
        assert_eq!(a.latest_sale, 90.0);
        assert!(!a.is_flat);
    }

    #[test]
    fn no_in_window_points_is_no_signal() {
        let pd = ledger(&[("2025-07-01", 100.0)]);
        assert!(analyze_ledger(&pd, &window()).is_none());
    }

    #[test]
    fn flat_window_is_detected_and_gated() {
        let v = variant("1", &[("2025-09-20", 90.0), ("2025-09-29", 90.0)]);
        let a = analyze_ledger(&v.pd, &window()).unwrap();
        assert!(a.is_flat);
        assert!(!variant_passes_gates(&v, &window(), now()));
    }

    #[test]
    fn discount_gate_requires_current_price_at_window_low() {
        // Touched 100 earlier but sits at 120 now: never a deal.
        let v = variant("1", &[("2025-09-10", 100.0), ("2025-09-29", 120.0)]);
        assert!(!variant_passes_gates(&v, &window(), now()));
        assert!(qualified_deal("p1", &v, &window(), now()).is_none());
    }

    #[test]
    fn freshness_gate_excludes_stale_listings() {
        let v = variant("1", &[("2025-09-05", 100.0), ("2025-09-10", 90.0)]);
        // newest point is 20 days before "now"
        assert!(!variant_passes_gates(&v, &window(), now()));
    }

    #[test]
    fn qualified_deal_computes_ratio_against_window_average() {
        let v = variant("1", &[("2025-09-27", 110.0), ("2025-09-29", 90.0)]);
        let deal = qualified_deal("p1", &v, &window(), now()).unwrap();
        assert_eq!(deal.latest_sale, 90.0);
        assert!((deal.avg_sale - 100.0).abs() < 1e-9);
        assert!((deal.ratio - 0.9).abs() < 1e-9);
    }

    #[test]
    fn average_falls_back_to_generic_price() {
        let mut pd = ledger(&[("2025-09-29", 90.0)]);
        pd.insert(
            "2025-09-27".into(),
            RawPricePoint {
                s: None,
                p: Some(json!(110)),
                t: None,
            },
        );
        let avg = average_sale(&pd, &window()).unwrap();
        assert!((avg - 100.0).abs() < 1e-9);
    }

    #[test]
    fn top_deals_dedups_by_product_keeping_lower_ratio() {
        let mk = |sid: &str, ratio: f64, latest: f64| DealCandidate {
            product_id: "p1".into(),
            sid: sid.into(),
            link: None,
            color: "black".into(),
            props: String::new(),
            currency: "KRW".into(),
            latest_sale: latest,
            avg_sale: latest / ratio,
            ratio,
        };
        let out = top_deals(vec![mk("worse", 0.95, 100.0), mk("better", 0.80, 100.0)]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].sid.as_deref(), Some("better"));
    }

    #[test]
    fn top_metric_orders_desc_and_truncates() {
        let pool: Vec<(String, f64)> = (0..30).map(|i| (format!("p{i:02}"), i as f64)).collect();
        let out = top_metric(pool);
        assert_eq!(out.len(), TOP_N);
        assert_eq!(out[0].product, "p29");
        assert_eq!(out[0].metric, 29.0);
        // Deterministic tie-break by id.
        let tied = top_metric(vec![("b".into(), 5.0), ("a".into(), 5.0)]);
        assert_eq!(tied[0].product, "a");
    }

    #[test]
    fn rebuild_is_deterministic_for_same_inputs() {
        let rows = vec![ProductRow {
            id: "p1".into(),
            vol: Some(500),
            ps: Some(4.5),
            rn: Some(120),
            variants: vec![variant("1", &[("2025-09-27", 110.0), ("2025-09-29", 90.0)])],
        }];
        let (first, _) = build_category_lists(&rows, &window(), now());
        let (second, _) = build_category_lists(&rows, &window(), now());
        for kind in ListKind::ALL {
            assert_eq!(
                serde_json::to_string(first.get(kind)).unwrap(),
                serde_json::to_string(second.get(kind)).unwrap()
            );
        }
    }
}
