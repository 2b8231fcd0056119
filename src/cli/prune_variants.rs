use anyhow::Result;
use tracing::info;

use crate::database_ops::retention::{prune_stale_variants, STALE_VARIANT_DAYS};
use crate::util::env::env_parse;

#[derive(Debug, Clone, Default)]
pub struct PruneVariantsConfig {
    /// Optional override for the Postgres connection string.
    pub database_url: Option<String>,
    /// Staleness horizon in days (defaults to env or 30).
    pub days: Option<i64>,
}

pub async fn run(cfg: PruneVariantsConfig) -> Result<()> {
    let db = super::connect(cfg.database_url.clone()).await?;
    let days = cfg
        .days
        .unwrap_or_else(|| env_parse("DEALTRACK_STALE_VARIANT_DAYS", STALE_VARIANT_DAYS));

    let matched = prune_stale_variants(&db, days).await?;
    info!(matched, "stale-variant prune job complete");
    Ok(())
}
