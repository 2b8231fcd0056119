use anyhow::Result;
use dealtrack::cli::prune_variants::{run, PruneVariantsConfig};

#[tokio::main]
async fn main() -> Result<()> {
    dealtrack::util::env::init_env();
    dealtrack::logging::init_job_tracing();

    run(PruneVariantsConfig::default()).await
}
