pub mod catalog;
pub mod cli;
pub mod database_ops;
pub mod logging;
pub mod normalization;
pub mod reconcile;

pub mod util {
    pub mod env;
    pub mod retry;
    pub mod time;
}

// Ingest refresh pipeline (library function, not a bin).
// Walks the category set, merges listing candidates with stored products,
// and reconciles each product's variants under bounded fan-out.

use anyhow::{Context, Result};
use chrono::Utc;
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use catalog::{compact_share_link, ListingItem, VariantSource};
use database_ops::db::Db;
use database_ops::products::{
    plan_variant_ops, BasePatch, CandidateRow, OpsOutcome, PlanCounters, VariantObservation,
};
use normalization::strip_for_compare;
use util::env::{env_parse, env_parse_opt};
use util::time::day_key;

#[derive(Debug, Clone)]
pub struct IngestOptions {
    /// Concurrency ceiling for in-flight product workups.
    pub concurrency: usize,
    /// Listing candidates below this sales volume are skipped.
    pub min_volume: i64,
    /// Process shard `shard_index` of `shard_count` of the category list.
    pub shard_index: usize,
    pub shard_count: usize,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            concurrency: 10,
            min_volume: 170,
            shard_index: 0,
            shard_count: 1,
        }
    }
}

impl IngestOptions {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            concurrency: env_parse("DEALTRACK_CONCURRENCY", defaults.concurrency),
            min_volume: env_parse("DEALTRACK_MIN_VOLUME", defaults.min_volume),
            shard_index: env_parse_opt("DEALTRACK_SHARD_INDEX").unwrap_or(defaults.shard_index),
            shard_count: env_parse_opt("DEALTRACK_SHARD_COUNT")
                .filter(|n| *n > 0)
                .unwrap_or(defaults.shard_count),
        }
    }
}

/// Defaulted-fallback counters. These are diagnostics, never errors: a
/// malformed record defaults locally so the batch keeps going.
#[derive(Debug, Default, Clone, Copy)]
pub struct IngestDiagnostics {
    pub volume_defaulted: usize,
    pub link_defaulted: usize,
    pub props_defaulted: usize,
}

impl IngestDiagnostics {
    fn absorb(&mut self, other: IngestDiagnostics) {
        self.volume_defaulted += other.volume_defaulted;
        self.link_defaulted += other.link_defaulted;
        self.props_defaulted += other.props_defaulted;
    }
}

#[derive(Debug, Default)]
pub struct IngestSummary {
    pub categories: usize,
    pub candidates: usize,
    pub processed: usize,
    pub ops_applied: usize,
    pub ops_failed: usize,
    pub counters: PlanCounters,
    pub diagnostics: IngestDiagnostics,
    /// Products whose workup failed, by id. Partial success is the
    /// expected steady state; these are reported, not fatal.
    pub failed_ids: Vec<String>,
}

/// Split `items` into `shard_count` contiguous shards, spreading the
/// remainder across the first shards.
pub fn split_shards<T>(mut items: Vec<T>, shard_count: usize) -> Vec<Vec<T>> {
    let shard_count = shard_count.max(1);
    let total = items.len();
    let base = total / shard_count;
    let mut remainder = total % shard_count;

    let mut shards = Vec::with_capacity(shard_count);
    for _ in 0..shard_count {
        let extra = if remainder > 0 { 1 } else { 0 };
        remainder = remainder.saturating_sub(1);
        let take = (base + extra).min(items.len());
        let rest = items.split_off(take);
        shards.push(std::mem::replace(&mut items, rest));
    }
    shards
}

/// One merged workup candidate: a product seen in the listing feed, already
/// stored under the category, or both.
#[derive(Debug, Clone)]
struct Candidate {
    id: String,
    volume: Option<i64>,
    listing_link: Option<String>,
    stored_link: Option<String>,
}

impl Candidate {
    fn from_listing(item: ListingItem) -> Self {
        Self {
            id: item.id,
            volume: item.volume.filter(|v| *v != 0),
            listing_link: item.promotion_link,
            stored_link: None,
        }
    }

    fn from_stored(row: CandidateRow) -> Self {
        Self {
            id: row.id,
            volume: None,
            listing_link: None,
            stored_link: row.pl,
        }
    }
}

/// Full ingest refresh: fetch per-category candidates, merge with storage,
/// then reconcile every candidate product under bounded fan-out. Each
/// worker is failure-isolated; one product's failure never aborts siblings.
pub async fn ingest_refresh_pipeline(
    db: &Db,
    source: &dyn VariantSource,
    opts: &IngestOptions,
) -> Result<IngestSummary> {
    let mut summary = IngestSummary::default();

    let categories = db.all_categories().await.context("loading categories")?;
    if categories.is_empty() {
        warn!("no categories in storage; nothing to ingest");
        return Ok(summary);
    }
    let shards = split_shards(categories, opts.shard_count);
    let shard = shards
        .into_iter()
        .nth(opts.shard_index)
        .unwrap_or_default();
    info!(
        shard_index = opts.shard_index,
        shard_count = opts.shard_count,
        categories = shard.len(),
        "ingest shard selected"
    );

    // Candidate gathering: listing items above the volume floor, then
    // products already stored under the category. Listing entries win the
    // id-level dedup so fresh volume/link data is preferred.
    let mut candidates: Vec<Candidate> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    for category in &shard {
        summary.categories += 1;
        let listed = match source.category_listing(&category.ext_id).await {
            Ok(items) => items,
            Err(err) => {
                warn!(category = %category.name, error = %err, "category listing failed; skipping");
                continue;
            }
        };
        let listed_total = listed.len();
        let mut kept = 0usize;
        for item in listed {
            if item.volume.unwrap_or(0) < opts.min_volume {
                continue;
            }
            kept += 1;
            if seen.insert(item.id.clone()) {
                candidates.push(Candidate::from_listing(item));
            }
        }

        let stored = db.products_in_category(category.id).await?;
        let stored_total = stored.len();
        for row in stored {
            if seen.insert(row.id.clone()) {
                candidates.push(Candidate::from_stored(row));
            }
        }
        info!(
            category = %category.name,
            listed = listed_total,
            above_floor = kept,
            stored = stored_total,
            "category candidates gathered"
        );
    }
    summary.candidates = candidates.len();
    info!(candidates = summary.candidates, "deduplicated candidate set ready");

    // Bounded fan-out over the merged candidate set.
    let semaphore = Arc::new(Semaphore::new(opts.concurrency.max(1)));
    let mut tasks = FuturesUnordered::new();
    for candidate in candidates {
        let sem = semaphore.clone();
        tasks.push(async move {
            let _permit = sem.acquire().await;
            let id = candidate.id.clone();
            let res = workup_product(db, source, candidate).await;
            (id, res)
        });
    }

    while let Some((id, res)) = tasks.next().await {
        match res {
            Ok(outcome) => {
                summary.processed += 1;
                summary.ops_applied += outcome.ops.applied;
                summary.ops_failed += outcome.ops.failed;
                summary.counters.new_variants += outcome.counters.new_variants;
                summary.counters.first_points += outcome.counters.first_points;
                summary.counters.lowered_points += outcome.counters.lowered_points;
                summary.counters.unchanged += outcome.counters.unchanged;
                summary.counters.rejected_points += outcome.counters.rejected_points;
                summary.diagnostics.absorb(outcome.diagnostics);
            }
            Err(err) => {
                warn!(product_id = %id, error = %err, "product workup failed");
                summary.failed_ids.push(id);
            }
        }
    }

    info!(
        processed = summary.processed,
        failed = summary.failed_ids.len(),
        new_variants = summary.counters.new_variants,
        first_points = summary.counters.first_points,
        lowered_points = summary.counters.lowered_points,
        rejected_points = summary.counters.rejected_points,
        ops_applied = summary.ops_applied,
        ops_failed = summary.ops_failed,
        "ingest refresh done"
    );
    if !summary.failed_ids.is_empty() {
        info!(failed_ids = ?summary.failed_ids, "failed product ids");
    }
    Ok(summary)
}

struct WorkupOutcome {
    counters: PlanCounters,
    ops: OpsOutcome,
    diagnostics: IngestDiagnostics,
}

/// Sequential per-product work: fetch detail, resolve category refs, build
/// the sparse base patch, reconcile variants, apply mutations as one
/// unordered batch.
async fn workup_product(
    db: &Db,
    source: &dyn VariantSource,
    candidate: Candidate,
) -> Result<WorkupOutcome> {
    let mut diagnostics = IngestDiagnostics::default();
    let product_id = candidate.id.clone();

    let detail = source.sku_detail(&product_id).await?;

    let mut patch = BasePatch::default();
    if let Some(cat1) = &detail.info.category_l1 {
        patch.cat1 = db.category_by_ext_id(cat1).await?.map(|c| c.id);
    }
    if let Some(cat2) = &detail.info.category_l2 {
        patch.cat2 = db.category_by_ext_id(cat2).await?.map(|c| c.id);
    }
    if let Some(title) = &detail.info.title {
        if !strip_for_compare(title).is_empty() {
            patch.tt = Some(title.clone());
        }
    }
    patch.ps = detail.info.product_score.filter(|v| *v != 0.0);
    patch.rn = detail.info.review_number.filter(|v| *v != 0);

    // Volume: listing value when present, otherwise the by-id brief.
    patch.vol = candidate.volume;
    if patch.vol.is_none() {
        match source.product_brief(&product_id).await {
            Ok(Some(brief)) => patch.vol = brief.volume.filter(|v| *v > 0),
            Ok(None) => {}
            Err(err) => {
                warn!(product_id = %product_id, error = %err, "volume brief failed; leaving volume unset");
            }
        }
        if patch.vol.is_none() {
            diagnostics.volume_defaulted += 1;
        }
    }

    // Promotion link: listing, then stored, then the by-id brief.
    patch.pl = candidate
        .listing_link
        .as_deref()
        .and_then(compact_share_link)
        .or_else(|| {
            candidate
                .stored_link
                .as_deref()
                .and_then(compact_share_link)
        });
    if patch.pl.is_none() {
        match source.product_brief(&product_id).await {
            Ok(Some(brief)) => {
                patch.pl = brief.promotion_link.as_deref().and_then(compact_share_link);
            }
            Ok(None) => {}
            Err(err) => {
                warn!(product_id = %product_id, error = %err, "link brief failed; leaving link unset");
            }
        }
        if patch.pl.is_none() {
            diagnostics.link_defaulted += 1;
        }
    }

    let stored = db.fetch_sku_projection(&product_id).await?;

    let observations: Vec<VariantObservation> = detail
        .variants
        .iter()
        .map(|rec| {
            let obs = rec.to_observation();
            if obs.sp_canonical.is_empty() && !obs.sp_raw.is_empty() {
                diagnostics.props_defaulted += 1;
            }
            obs
        })
        .collect();

    let now = Utc::now();
    let today = day_key(now);
    let planned = plan_variant_ops(
        &product_id,
        patch,
        stored.as_deref(),
        &observations,
        &today,
        now,
    );
    let ops = db.apply_ops(&planned.ops).await;

    Ok(WorkupOutcome {
        counters: planned.counters,
        ops,
        diagnostics,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shards_split_evenly_with_remainder_up_front() {
        let items: Vec<u32> = (0..31).collect();
        let shards = split_shards(items, 14);
        assert_eq!(shards.len(), 14);
        let sizes: Vec<usize> = shards.iter().map(|s| s.len()).collect();
        // 31 = 14*2 + 3: three shards get an extra item, all up front.
        assert_eq!(sizes[..3], [3, 3, 3]);
        assert!(sizes[3..].iter().all(|s| *s == 2));
        let total: usize = sizes.iter().sum();
        assert_eq!(total, 31);
        // Order is preserved across the split.
        assert_eq!(shards[0], vec![0, 1, 2]);
        assert_eq!(shards[1], vec![3, 4, 5]);
    }

    #[test]
    fn shard_count_one_keeps_everything() {
        let shards = split_shards(vec![1, 2, 3], 1);
        assert_eq!(shards, vec![vec![1, 2, 3]]);
    }

    #[test]
    fn more_shards_than_items_yields_empties() {
        let shards = split_shards(vec![1], 3);
        assert_eq!(shards[0], vec![1]);
        assert!(shards[1].is_empty());
        assert!(shards[2].is_empty());
    }
}
