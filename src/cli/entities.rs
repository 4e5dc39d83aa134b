//! CLI command for fetching and inspecting the market listing

use crate::downloader::config::{DEFAULT_TOP_N, MAX_RETRIES};
use crate::fetcher::coingecko::CoinGeckoSource;
use crate::fetcher::coingecko_config::CoinGeckoConfig;
use crate::fetcher::EntitySource;
use crate::output::StoreLayout;
use crate::registry::{load_listings, save_listings, EntityListing, EntityUniverse};
use clap::Args;
use serde_json::json;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

use super::{Cli, CliError, OutputFormat};

/// Entities subcommand
#[derive(Debug, Args)]
pub struct EntitiesCommand {
    #[command(subcommand)]
    action: EntitiesAction,
}

/// Entities actions
#[derive(Debug, clap::Subcommand)]
enum EntitiesAction {
    /// Page through the market list and save it
    Fetch {
        /// Output file (default: <data-dir>/coingecko_market_data.json)
        #[arg(long)]
        out: Option<PathBuf>,

        /// In-request retries for transient HTTP failures
        #[arg(long, default_value_t = MAX_RETRIES)]
        max_retries: u32,

        /// Override the API base URL
        #[arg(long, env = "COINGECKO_BASE_URL")]
        base_url: Option<String>,
    },

    /// Show the entities a run would select from a saved listing
    List {
        /// Listing file (default: <data-dir>/coingecko_market_data.json)
        #[arg(long)]
        listings: Option<PathBuf>,

        /// Number of top entities by market cap rank
        #[arg(long, default_value_t = DEFAULT_TOP_N)]
        top_n: usize,
    },
}

impl EntitiesCommand {
    /// Execute the entities command
    pub async fn execute(&self, cli: &Cli) -> Result<(), CliError> {
        let layout = StoreLayout::new(&cli.data_dir);
        match &self.action {
            EntitiesAction::Fetch {
                out,
                max_retries,
                base_url,
            } => {
                let path = out.clone().unwrap_or_else(|| layout.listings_path());
                let mut config = CoinGeckoConfig::from_env()
                    .with_max_retries(*max_retries)
                    .with_request_timeout(Duration::from_secs(15));
                if let Some(base_url) = base_url {
                    config = config.with_base_url(base_url.as_str());
                }

                let source = CoinGeckoSource::new(config)?;
                let listings = source.list_entities().await?;
                save_listings(&path, &listings)?;
                info!(count = listings.len(), path = %path.display(), "Market listing saved");

                match cli.output_format {
                    OutputFormat::Json => println!(
                        "{}",
                        json!({ "entities": listings.len(), "path": path.display().to_string() })
                    ),
                    OutputFormat::Human => {
                        println!("Saved {} entities to {}", listings.len(), path.display())
                    }
                }
                Ok(())
            }
            EntitiesAction::List { listings, top_n } => {
                let path = listings.clone().unwrap_or_else(|| layout.listings_path());
                let all = load_listings(&path)?;
                let universe = EntityUniverse::from_listings(&all, *top_n)?;
                print_selection(cli.output_format, &all, &universe)
            }
        }
    }
}

fn print_selection(
    format: OutputFormat,
    listings: &[EntityListing],
    universe: &EntityUniverse,
) -> Result<(), CliError> {
    let selected: Vec<&EntityListing> = universe
        .ids()
        .iter()
        .filter_map(|id| listings.iter().find(|l| l.id.eq_ignore_ascii_case(id)))
        .collect();

    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&selected)
                .map_err(|e| CliError::OutputError(format!("Failed to serialize listing: {e}")))?;
            println!("{json}");
        }
        OutputFormat::Human => {
            println!("Selected {} of {} entities:\n", selected.len(), listings.len());
            for listing in selected {
                let rank = listing
                    .market_cap_rank
                    .map_or_else(|| "-".to_string(), |r| r.to_string());
                println!("{rank:>5} | {} | {} | {}", listing.id, listing.symbol, listing.name);
            }
        }
    }
    Ok(())
}
