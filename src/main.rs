use anyhow::{Context, Result};
use dealtrack::catalog::CatalogClient;
use dealtrack::database_ops::db::Db;
use dealtrack::util::env as env_util;
use dealtrack::{ingest_refresh_pipeline, IngestOptions};
use tracing::{info, warn};

/// One-shot ingest refresh: read the category set, reconcile every candidate
/// product against the price ledger, report per-product failures, exit.
#[tokio::main]
async fn main() -> Result<()> {
    env_util::init_env();
    dealtrack::logging::init_job_tracing();

    env_util::preflight_check(
        "ingest",
        &[],
        &[
            "DEALTRACK_DB_URL",
            "DATABASE_URL",
            "CATALOG_BASE_URL",
            "CATALOG_APP_KEY",
            "DEALTRACK_CONCURRENCY",
            "DEALTRACK_MIN_VOLUME",
        ],
    )?;

    // Storage connection failure at startup is the one fatal path; every
    // later failure is isolated per product.
    let database_url = env_util::db_url()?;
    let max_conns: u32 = env_util::env_parse("DB_MAX_CONNS", 10u32);
    let db = Db::connect(&database_url, max_conns)
        .await
        .context("Db::connect failed")?;
    info!(max_conns, "database connected");

    let client = CatalogClient::from_env()?;
    let opts = IngestOptions::from_env();
    let summary = ingest_refresh_pipeline(&db, &client, &opts).await?;

    info!(
        categories = summary.categories,
        candidates = summary.candidates,
        processed = summary.processed,
        new_variants = summary.counters.new_variants,
        first_points = summary.counters.first_points,
        lowered_points = summary.counters.lowered_points,
        rejected_points = summary.counters.rejected_points,
        volume_defaulted = summary.diagnostics.volume_defaulted,
        link_defaulted = summary.diagnostics.link_defaulted,
        props_defaulted = summary.diagnostics.props_defaulted,
        "run summary"
    );
    if !summary.failed_ids.is_empty() {
        // Partial success is the expected steady state; failures are
        // reported by id, not escalated.
        warn!(count = summary.failed_ids.len(), ids = ?summary.failed_ids, "failed product ids");
    }
    Ok(())
}
