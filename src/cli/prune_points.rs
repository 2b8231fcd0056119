use anyhow::Result;
use tracing::info;

use crate::database_ops::retention::{prune_old_points, SweepConfig, PRUNE_POINT_DAYS};
use crate::util::env::env_parse;

#[derive(Debug, Clone, Default)]
pub struct PrunePointsConfig {
    /// Optional override for the Postgres connection string.
    pub database_url: Option<String>,
    /// Age threshold in days (defaults to env or 65).
    pub days: Option<i64>,
}

pub async fn run(cfg: PrunePointsConfig) -> Result<()> {
    let db = super::connect(cfg.database_url.clone()).await?;
    let days = cfg
        .days
        .unwrap_or_else(|| env_parse("DEALTRACK_POINT_PRUNE_DAYS", PRUNE_POINT_DAYS));
    let sweep = SweepConfig {
        progress_every: env_parse("DEALTRACK_PROGRESS_EVERY", 1000usize),
        ..SweepConfig::default()
    };

    let summary = prune_old_points(&db, days, &sweep).await?;
    info!(
        scanned = summary.scanned,
        updated = summary.updated,
        removed_points = summary.removed_points,
        "point prune job complete"
    );
    Ok(())
}
