use anyhow::Result;
use dealtrack::cli::rankings::{run, RankingsJobConfig};

#[tokio::main]
async fn main() -> Result<()> {
    dealtrack::util::env::init_env();
    dealtrack::logging::init_job_tracing();

    run(RankingsJobConfig::default()).await
}
