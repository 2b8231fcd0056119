use anyhow::Result;

use crate::database_ops::rankings::{ListKind, GLOBAL_CATEGORY};

#[derive(Debug, Clone, Default)]
pub struct ShowListsConfig {
    /// Optional override for the Postgres connection string.
    pub database_url: Option<String>,
    /// Category name; defaults to the global "All" lists.
    pub category: Option<String>,
}

/// Print the persisted Top-20 lists for one category, for inspection.
pub async fn run(cfg: ShowListsConfig) -> Result<()> {
    let db = super::connect(cfg.database_url.clone()).await?;
    let category = cfg
        .category
        .unwrap_or_else(|| GLOBAL_CATEGORY.to_string());

    for kind in ListKind::ALL {
        match db.fetch_ranked_list(&category, kind).await? {
            Some(entries) => {
                println!("[{}] {} — {} entries", category, kind.as_str(), entries.len());
                for (rank, entry) in entries.iter().enumerate() {
                    let variant = entry.sid.as_deref().unwrap_or("-");
                    let price = entry
                        .latest_sale
                        .map(|p| format!(" @ {p} {}", entry.cur.as_deref().unwrap_or("")))
                        .unwrap_or_default();
                    println!(
                        "  {:>2}. {} (variant {}) metric={:.4}{}",
                        rank + 1,
                        entry.product,
                        variant,
                        entry.metric,
                        price
                    );
                }
            }
            None => println!("[{}] {} — no list stored", category, kind.as_str()),
        }
    }
    Ok(())
}
