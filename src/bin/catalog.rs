use anyhow::Result;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tcg_catalog::database_ops::catalog::DEFAULT_SEARCH_LIMIT;
use tcg_catalog::tracing::init_tracing;
use tcg_catalog::util::env::preflight_check;
use tcg_catalog::CatalogContext;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "catalog", about = "Local TCG catalog admin")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Bootstrap an empty store, otherwise diff against the remote source.
    Sync,
    /// Load the bundled snapshot into an empty store.
    Bootstrap,
    /// Fetch details for incomplete cards.
    Backfill,
    /// Count what the remote source has that the store lacks.
    CheckUpdates,
    /// Row counts per table.
    Stats,
    /// Case-insensitive card name search.
    Search {
        query: String,
        #[arg(long, default_value_t = DEFAULT_SEARCH_LIMIT)]
        limit: i64,
    },
    /// Delete every series, set and card. Bookkeeping tables are kept.
    Reset {
        #[arg(long)]
        yes: bool,
    },
    /// Inspect cache entries.
    CacheInfo,
    /// Drop cache entries: everything, one namespace, or only expired ones.
    CacheClear {
        #[arg(long, conflicts_with = "expired")]
        namespace: Option<String>,
        #[arg(long)]
        expired: bool,
    },
    /// Show or change the saved series and expansion selections.
    Filters {
        #[arg(long, value_delimiter = ',')]
        series: Option<Vec<String>>,
        #[arg(long, value_delimiter = ',')]
        expansions: Option<Vec<String>>,
        #[arg(long, conflicts_with_all = ["series", "expansions"])]
        clear: bool,
    },
    /// Convert a USD amount with the cached exchange rate.
    Fx {
        #[arg(default_value_t = 1.0)]
        amount: f64,
    },
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("info,sqlx=warn")?;
    let cli = Cli::parse();
    preflight_check(
        "catalog",
        &[],
        &[
            "CATALOG_DB_PATH",
            "CATALOG_SNAPSHOT_DIR",
            "TCGDEX_BASE_URL",
            "TCGDEX_LANGUAGE",
            "SYNC_PAGE_SIZE",
            "SYNC_MAX_PAGES",
        ],
    )?;

    let ctx = CatalogContext::from_env().await?;
    match cli.command {
        Command::Sync => print_json(&ctx.engine.sync().await?)?,
        Command::Bootstrap => print_json(&ctx.engine.bootstrap().await?)?,
        Command::Backfill => print_json(&ctx.engine.download_card_details().await?)?,
        Command::CheckUpdates => print_json(&ctx.engine.check_for_updates().await)?,
        Command::Stats => {
            ctx.db.initialize().await?;
            print_json(&ctx.db.get_stats().await?)?;
        }
        Command::Search { query, limit } => {
            ctx.db.initialize().await?;
            let cards = ctx.db.search_cards_by_name(&query, limit).await?;
            info!(query = %query, hits = cards.len(), "search");
            print_json(&cards)?;
        }
        Command::Reset { yes } => {
            if !yes {
                anyhow::bail!("refusing to wipe the catalog without --yes");
            }
            ctx.db.initialize().await?;
            ctx.db.clear_all_data().await?;
            println!("catalog cleared");
        }
        Command::CacheInfo => {
            ctx.db.initialize().await?;
            let entries = ctx.cache.info_all().await;
            let total = ctx.cache.total_size().await;
            info!(entries = entries.len(), total_bytes = total, "cache info");
            print_json(&entries)?;
        }
        Command::CacheClear { namespace, expired } => {
            ctx.db.initialize().await?;
            if expired {
                let removed = ctx.cache.optimize(&ctx.ttl).await;
                println!("removed {removed} expired entries");
            } else if let Some(ns) = namespace {
                let removed = ctx.cache.clear(&ns).await;
                println!("removed {removed} entries for {ns}");
            } else {
                ctx.cache.clear_all().await;
                println!("cache cleared");
            }
        }
        Command::Filters {
            series,
            expansions,
            clear,
        } => {
            ctx.db.initialize().await?;
            let filters = &ctx.filters;
            filters.load().await?;
            if clear {
                filters.clear_all().await?;
            }
            if let Some(ids) = series {
                filters.select_series(ids).await?;
            }
            if let Some(ids) = expansions {
                filters.select_expansions(ids).await?;
            }
            print_json(&filters.info().await)?;
            print_json(&filters.filtered_series().await?)?;
        }
        Command::Fx { amount } => {
            ctx.db.initialize().await?;
            print_json(&ctx.exchange.convert(amount).await)?;
        }
    }
    ctx.db.close().await;
    Ok(())
}
