use anyhow::Result;
use dealtrack::cli::prune_points::{run, PrunePointsConfig};

#[tokio::main]
async fn main() -> Result<()> {
    dealtrack::util::env::init_env();
    dealtrack::logging::init_job_tracing();

    run(PrunePointsConfig::default()).await
}
