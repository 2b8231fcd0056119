use anyhow::Result;
use dealtrack::cli::purge_volume::{run, PurgeVolumeConfig};

#[tokio::main]
async fn main() -> Result<()> {
    dealtrack::util::env::init_env();
    dealtrack::logging::init_job_tracing();

    run(PurgeVolumeConfig::default()).await
}
