use anyhow::Result;
use tracing::info;

use crate::database_ops::retention::{delete_silent_products, SweepConfig, SILENT_PRODUCT_DAYS};
use crate::util::env::env_parse;

#[derive(Debug, Clone, Default)]
pub struct PruneProductsConfig {
    /// Optional override for the Postgres connection string.
    pub database_url: Option<String>,
    /// Silence horizon in days (defaults to env or 16).
    pub days: Option<i64>,
    /// Delete batch size (defaults to env or 500).
    pub batch_size: Option<usize>,
}

pub async fn run(cfg: PruneProductsConfig) -> Result<()> {
    let db = super::connect(cfg.database_url.clone()).await?;
    let days = cfg
        .days
        .unwrap_or_else(|| env_parse("DEALTRACK_SILENT_PRODUCT_DAYS", SILENT_PRODUCT_DAYS));
    let sweep = SweepConfig {
        batch_size: cfg
            .batch_size
            .unwrap_or_else(|| env_parse("DEALTRACK_DELETE_BATCH_SIZE", 500usize)),
        progress_every: env_parse("DEALTRACK_PROGRESS_EVERY", 1000usize),
    };

    let summary = delete_silent_products(&db, days, &sweep).await?;
    info!(
        total = summary.total,
        deleted = summary.deleted,
        kept = summary.kept,
        failed_batches = summary.failed_batches,
        sample = ?summary.sample_deleted_ids,
        "silent-product prune job complete"
    );
    Ok(())
}
