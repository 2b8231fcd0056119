pub mod ingest;
pub mod prune_points;
pub mod prune_products;
pub mod prune_variants;
pub mod purge_volume;
pub mod rankings;
pub mod show_lists;

use crate::database_ops::db::Db;
use crate::util::env as env_util;
use anyhow::Result;

/// Shared connect path for job binaries: resolve the DSN (explicit override
/// first), then open a small pool.
pub(crate) async fn connect(database_url: Option<String>) -> Result<Db> {
    env_util::init_env();
    let url = match database_url {
        Some(url) => url,
        None => env_util::db_url()?,
    };
    let max_conns: u32 = env_util::env_parse("DB_MAX_CONNS", 5u32);
    Db::connect(&url, max_conns).await
}
