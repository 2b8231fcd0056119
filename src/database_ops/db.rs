use anyhow::Result;
use sqlx::{
    postgres::{PgConnectOptions, PgPoolOptions, PgSslMode},
    PgPool,
};
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, instrument};

#[derive(Clone)]
pub struct Db {
    pub pool: PgPool,
}

impl Db {
    // SECURITY: never include raw DSNs in tracing spans (they may contain credentials).
    #[instrument(skip(database_url))]
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let use_prepared = crate::util::env::env_flag("USE_PREPARED", false);
        let mut connect_options = PgConnectOptions::from_str(database_url)?;

        // Be explicit about TLS when the DSN requests it.
        if database_url.contains("sslmode=require") && !database_url.contains("sslmode=disable") {
            connect_options = connect_options.ssl_mode(PgSslMode::Require);
        }

        if !use_prepared {
            // PgBouncer txn mode safe
            connect_options = connect_options.statement_cache_capacity(0);
        }

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .idle_timeout(Duration::from_secs(600))
            .connect_with(connect_options)
            .await?;
        info!("connected to db");

        let db = Self { pool };
        if crate::util::env::env_flag("DEALTRACK_ENSURE_SCHEMA", true) {
            db.ensure_schema().await?;
        } else {
            info!("DEALTRACK_ENSURE_SCHEMA disabled; skipping schema bootstrap");
        }
        Ok(db)
    }

    /// Idempotent schema bootstrap. All statements are IF NOT EXISTS so this
    /// is safe to run on every job start, including against a live database.
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::raw_sql(
            "CREATE TABLE IF NOT EXISTS product_details (
                id TEXT PRIMARY KEY,
                vol BIGINT,
                ps DOUBLE PRECISION,
                rn BIGINT,
                tt TEXT,
                pl TEXT,
                cat1 BIGINT,
                cat2 BIGINT,
                sku_info JSONB NOT NULL DEFAULT '[]'::jsonb,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
             );
             CREATE INDEX IF NOT EXISTS product_details_cat1_idx ON product_details (cat1);
             CREATE INDEX IF NOT EXISTS product_details_cat2_idx ON product_details (cat2);
             CREATE TABLE IF NOT EXISTS product_categories (
                id BIGSERIAL PRIMARY KEY,
                ext_id TEXT UNIQUE NOT NULL,
                name TEXT NOT NULL
             );
             CREATE TABLE IF NOT EXISTS ranked_lists (
                category_name TEXT NOT NULL,
                list_kind TEXT NOT NULL,
                entries JSONB NOT NULL,
                generated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                PRIMARY KEY (category_name, list_kind)
             );",
        )
        .execute(&self.pool)
        .await?;
        info!("schema ensured");
        Ok(())
    }
}
