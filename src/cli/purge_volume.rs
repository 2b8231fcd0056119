use anyhow::Result;
use tracing::info;

use crate::util::env::env_parse;

#[derive(Debug, Clone, Default)]
pub struct PurgeVolumeConfig {
    /// Optional override for the Postgres connection string.
    pub database_url: Option<String>,
    /// Products with volume below this floor are deleted (defaults to env or 160).
    pub floor: Option<i64>,
}

pub async fn run(cfg: PurgeVolumeConfig) -> Result<()> {
    let db = super::connect(cfg.database_url.clone()).await?;
    let floor = cfg
        .floor
        .unwrap_or_else(|| env_parse("DEALTRACK_VOLUME_FLOOR", 160i64));

    let deleted = db.delete_below_volume(floor).await?;
    info!(floor, deleted, "low-volume purge complete");
    Ok(())
}
