use anyhow::Result;
use dealtrack::cli::prune_products::{run, PruneProductsConfig};

#[tokio::main]
async fn main() -> Result<()> {
    dealtrack::util::env::init_env();
    dealtrack::logging::init_job_tracing();

    run(PruneProductsConfig::default()).await
}
