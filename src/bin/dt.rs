use anyhow::Result;
use clap::{Parser, Subcommand};
use dealtrack::cli;

#[derive(Parser, Debug)]
#[command(name = "dt", version, about = "DealTrack admin CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
#[command(rename_all = "kebab-case")]
enum Commands {
    /// Run a full ingest refresh over the category set
    Ingest {
        /// Optional override for the database URL
        #[arg(long)]
        db_url: Option<String>,
        /// Concurrency ceiling for in-flight product workups
        #[arg(long)]
        concurrency: Option<usize>,
        /// Minimum sales volume for listing candidates
        #[arg(long)]
        min_volume: Option<i64>,
        /// Process shard INDEX of --shard-count shards of the category list
        #[arg(long)]
        shard_index: Option<usize>,
        #[arg(long)]
        shard_count: Option<usize>,
    },
    /// Rebuild every per-category and global Top-20 list
    BuildRankings {
        /// Optional override for the database URL
        #[arg(long)]
        db_url: Option<String>,
        /// Analysis window: "rolling30" (default) or "calendar-month"
        #[arg(long)]
        window: Option<String>,
    },
    /// Prune ledger points older than the retention horizon
    PrunePricePoints {
        /// Optional override for the database URL
        #[arg(long)]
        db_url: Option<String>,
        /// Age threshold in days (default 65)
        #[arg(long)]
        days: Option<i64>,
    },
    /// Delete products with no recent price point at all
    PruneSilentProducts {
        /// Optional override for the database URL
        #[arg(long)]
        db_url: Option<String>,
        /// Silence horizon in days (default 16)
        #[arg(long)]
        days: Option<i64>,
        /// Delete batch size (default 500)
        #[arg(long)]
        batch_size: Option<usize>,
    },
    /// Drop variants whose every point is stale
    PruneStaleVariants {
        /// Optional override for the database URL
        #[arg(long)]
        db_url: Option<String>,
        /// Staleness horizon in days (default 30)
        #[arg(long)]
        days: Option<i64>,
    },
    /// Delete products below a sales-volume floor
    PurgeLowVolume {
        /// Optional override for the database URL
        #[arg(long)]
        db_url: Option<String>,
        /// Volume floor (default 160)
        #[arg(long)]
        floor: Option<i64>,
    },
    /// Print the stored Top-20 lists for a category (default: global "All")
    ShowRankings {
        /// Optional override for the database URL
        #[arg(long)]
        db_url: Option<String>,
        /// Category name
        #[arg(long)]
        category: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dealtrack::util::env::init_env();
    dealtrack::logging::init_job_tracing();

    let cli = Cli::parse();
    match cli.command {
        Commands::Ingest {
            db_url,
            concurrency,
            min_volume,
            shard_index,
            shard_count,
        } => {
            cli::ingest::run(cli::ingest::IngestJobConfig {
                database_url: db_url,
                concurrency,
                min_volume,
                shard_index,
                shard_count,
            })
            .await
        }
        Commands::BuildRankings { db_url, window } => {
            cli::rankings::run(cli::rankings::RankingsJobConfig {
                database_url: db_url,
                window,
            })
            .await
        }
        Commands::PrunePricePoints { db_url, days } => {
            cli::prune_points::run(cli::prune_points::PrunePointsConfig {
                database_url: db_url,
                days,
            })
            .await
        }
        Commands::PruneSilentProducts {
            db_url,
            days,
            batch_size,
        } => {
            cli::prune_products::run(cli::prune_products::PruneProductsConfig {
                database_url: db_url,
                days,
                batch_size,
            })
            .await
        }
        Commands::PruneStaleVariants { db_url, days } => {
            cli::prune_variants::run(cli::prune_variants::PruneVariantsConfig {
                database_url: db_url,
                days,
            })
            .await
        }
        Commands::PurgeLowVolume { db_url, floor } => {
            cli::purge_volume::run(cli::purge_volume::PurgeVolumeConfig {
                database_url: db_url,
                floor,
            })
            .await
        }
        Commands::ShowRankings { db_url, category } => {
            cli::show_lists::run(cli::show_lists::ShowListsConfig {
                database_url: db_url,
                category,
            })
            .await
        }
    }
}
