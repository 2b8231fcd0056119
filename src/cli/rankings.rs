use anyhow::Result;
use tracing::info;

use crate::database_ops::rankings::{build_ranked_lists, RankingsConfig, WindowMode};

#[derive(Debug, Clone, Default)]
pub struct RankingsJobConfig {
    /// Optional override for the Postgres connection string.
    pub database_url: Option<String>,
    /// Window selection: "rolling30" (default) or "calendar_month".
    pub window: Option<String>,
}

pub async fn run(cfg: RankingsJobConfig) -> Result<()> {
    let db = super::connect(cfg.database_url.clone()).await?;

    let window_label = cfg
        .window
        .clone()
        .or_else(|| crate::util::env::env_opt("DEALTRACK_RANKING_WINDOW"));
    let window_mode = window_label
        .as_deref()
        .map(WindowMode::from_label)
        .unwrap_or(WindowMode::Rolling30);

    let summary = build_ranked_lists(&db, &RankingsConfig { window_mode }).await?;
    info!(
        categories = summary.categories,
        lists = summary.lists_written,
        deal_candidates = summary.deal_candidates,
        "rankings job complete"
    );
    Ok(())
}
