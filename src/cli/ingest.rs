use anyhow::Result;
use tracing::{info, warn};

use crate::catalog::CatalogClient;
use crate::{ingest_refresh_pipeline, IngestOptions};

#[derive(Debug, Clone, Default)]
pub struct IngestJobConfig {
    /// Optional override for the Postgres connection string.
    pub database_url: Option<String>,
    pub concurrency: Option<usize>,
    pub min_volume: Option<i64>,
    pub shard_index: Option<usize>,
    pub shard_count: Option<usize>,
}

pub async fn run(cfg: IngestJobConfig) -> Result<()> {
    let db = super::connect(cfg.database_url.clone()).await?;
    let client = CatalogClient::from_env()?;

    let mut opts = IngestOptions::from_env();
    if let Some(v) = cfg.concurrency {
        opts.concurrency = v;
    }
    if let Some(v) = cfg.min_volume {
        opts.min_volume = v;
    }
    if let Some(v) = cfg.shard_index {
        opts.shard_index = v;
    }
    if let Some(v) = cfg.shard_count.filter(|n| *n > 0) {
        opts.shard_count = v;
    }

    let summary = ingest_refresh_pipeline(&db, &client, &opts).await?;
    info!(
        categories = summary.categories,
        candidates = summary.candidates,
        processed = summary.processed,
        new_variants = summary.counters.new_variants,
        "ingest job complete"
    );
    if !summary.failed_ids.is_empty() {
        warn!(count = summary.failed_ids.len(), ids = ?summary.failed_ids, "failed products");
    }
    Ok(())
}
