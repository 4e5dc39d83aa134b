//! Ingest command implementation

use crate::downloader::config::{DEFAULT_PACING_MS, DEFAULT_POOL_SIZE, DEFAULT_TOP_N, MAX_POOL_SIZE, MAX_RETRIES};
use crate::downloader::{EngineConfig, RunReport, Scheduler};
use crate::fetcher::coingecko::CoinGeckoSource;
use crate::fetcher::coingecko_config::CoinGeckoConfig;
use crate::fetcher::EntitySource;
use crate::output::{CsvEntityStore, StoreLayout};
use crate::registry::{load_listings, save_listings, EntityUniverse};
use crate::resume::{LedgerError, LedgerLock, SharedLedger};
use crate::shutdown::SharedShutdown;
use crate::{Granularity, DAY_MS};
use chrono::{DateTime, NaiveDate};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use super::{Cli, CliError, OutputFormat};

/// Try to parse datetime from RFC3339 format
///
/// Inputs without a timezone designator are taken as UTC. Returns milliseconds.
fn try_parse_datetime_rfc3339(input: &str) -> Option<i64> {
    let input = input.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Some(dt.timestamp_millis());
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(&format!("{input}Z")) {
        return Some(dt.timestamp_millis());
    }

    None
}

/// Parse a start time from YYYY-MM-DD (start of day, UTC) or RFC3339
pub fn parse_start_time(input: &str) -> Result<i64, CliError> {
    if let Some(ts) = try_parse_datetime_rfc3339(input) {
        return Ok(ts);
    }

    let date = NaiveDate::parse_from_str(input.trim(), "%Y-%m-%d")
        .map_err(|e| CliError::InvalidArgument(format!("Invalid start time: {e}")))?;
    let datetime = date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| CliError::InvalidArgument("Invalid start time".to_string()))?;
    Ok(datetime.and_utc().timestamp_millis())
}

/// Parse an exclusive end time from YYYY-MM-DD or RFC3339
///
/// A bare date includes the whole day, so the bound is the following midnight.
pub fn parse_end_time(input: &str) -> Result<i64, CliError> {
    if let Some(ts) = try_parse_datetime_rfc3339(input) {
        return Ok(ts);
    }

    let date = NaiveDate::parse_from_str(input.trim(), "%Y-%m-%d")
        .map_err(|e| CliError::InvalidArgument(format!("Invalid end time: {e}")))?;
    let datetime = date
        .succ_opt()
        .and_then(|next| next.and_hms_opt(0, 0, 0))
        .ok_or_else(|| CliError::InvalidArgument("Invalid end time".to_string()))?;
    Ok(datetime.and_utc().timestamp_millis())
}

/// Parse and validate the worker pool size
fn parse_concurrency(s: &str) -> Result<usize, String> {
    let value: usize = s
        .parse()
        .map_err(|_| format!("'{s}' is not a valid number"))?;

    if value == 0 {
        return Err("concurrency must be at least 1".to_string());
    }
    if value > MAX_POOL_SIZE {
        return Err(format!(
            "concurrency {value} exceeds maximum of {MAX_POOL_SIZE}"
        ));
    }
    Ok(value)
}

/// Ingest command arguments
#[derive(Parser, Debug)]
pub struct IngestArgs {
    /// Market listing JSON used to select entities (default: <data-dir>/coingecko_market_data.json)
    ///
    /// Fetched from the source and saved here when the file does not exist.
    #[arg(long)]
    pub entities: Option<PathBuf>,

    /// Explicit entity ids; bypasses the market listing
    #[arg(long = "id", value_name = "ENTITY")]
    pub ids: Vec<String>,

    /// Start of the backfill range (YYYY-MM-DD or RFC3339, default 2018-02-09)
    #[arg(long)]
    pub start: Option<String>,

    /// Exclusive end of the range (YYYY-MM-DD or RFC3339, default now)
    #[arg(long)]
    pub end: Option<String>,

    /// Number of top entities by market cap rank
    #[arg(long, env = "OHLC_TOP_N", default_value_t = DEFAULT_TOP_N)]
    pub top_n: usize,

    /// Worker pool size (max 32)
    #[arg(long, env = "OHLC_CONCURRENCY", default_value_t = DEFAULT_POOL_SIZE, value_parser = parse_concurrency)]
    pub concurrency: usize,

    /// Flat delay each worker waits after a request, in milliseconds
    #[arg(long, env = "OHLC_PACING_MS", default_value_t = DEFAULT_PACING_MS)]
    pub pacing_ms: u64,

    /// Granularities to ingest (repeatable, default: daily and hourly)
    #[arg(long = "granularity", value_name = "GRANULARITY")]
    pub granularities: Vec<Granularity>,

    /// Daily window size in days
    #[arg(long)]
    pub daily_chunk_days: Option<u32>,

    /// Hourly window size in days
    #[arg(long)]
    pub hourly_chunk_days: Option<u32>,

    /// In-request retries for transient HTTP failures
    #[arg(long, default_value_t = MAX_RETRIES, value_parser = clap::value_parser!(u32).range(0..=20))]
    pub max_retries: u32,

    /// Per-request timeout in seconds
    #[arg(long, default_value_t = 15, value_parser = clap::value_parser!(u64).range(1..=300))]
    pub request_timeout_secs: u64,

    /// Override the API base URL
    #[arg(long, env = "COINGECKO_BASE_URL")]
    pub base_url: Option<String>,

    /// Serve Prometheus metrics on this address (e.g. 127.0.0.1:9090)
    #[arg(long)]
    pub metrics_addr: Option<SocketAddr>,
}

/// JSON summary printed after a run
#[derive(Debug, Serialize)]
struct IngestSummary<'a> {
    success: bool,
    entities: usize,
    #[serde(flatten)]
    report: &'a RunReport,
}

impl IngestArgs {
    /// Build the engine configuration from the arguments
    pub fn engine_config(&self) -> Result<EngineConfig, CliError> {
        let mut config = EngineConfig::default()
            .with_top_n(self.top_n)
            .with_pool_size(self.concurrency)
            .with_pacing(Duration::from_millis(self.pacing_ms));

        if let Some(start) = &self.start {
            config = config.with_start_ms(parse_start_time(start)?);
        }
        if let Some(end) = &self.end {
            config = config.with_end_ms(parse_end_time(end)?);
        }
        if !self.granularities.is_empty() {
            let mut granularities = self.granularities.clone();
            granularities.sort();
            granularities.dedup();
            config = config.with_granularities(granularities);
        }
        if let Some(days) = self.daily_chunk_days {
            config = config.with_chunk_ms(Granularity::Daily, i64::from(days) * DAY_MS);
        }
        if let Some(days) = self.hourly_chunk_days {
            config = config.with_chunk_ms(Granularity::Hourly, i64::from(days) * DAY_MS);
        }

        config.validate().map_err(CliError::ConfigurationError)?;
        Ok(config)
    }

    /// Source configuration: API key from the environment, limits from the arguments
    pub fn source_config(&self) -> CoinGeckoConfig {
        let mut config = CoinGeckoConfig::from_env()
            .with_max_retries(self.max_retries)
            .with_request_timeout(Duration::from_secs(self.request_timeout_secs));
        if let Some(base_url) = &self.base_url {
            config = config.with_base_url(base_url.as_str());
        }
        config
    }

    /// Execute the ingest command
    pub async fn execute(&self, cli: &Cli, shutdown: SharedShutdown) -> Result<RunReport, CliError> {
        let config = self.engine_config()?;

        if let Some(addr) = self.metrics_addr {
            crate::metrics::init_metrics(addr)
                .await
                .map_err(|e| CliError::ConfigurationError(format!("metrics exporter: {e}")))?;
        }

        let store = CsvEntityStore::new(&cli.data_dir);
        let layout = store.layout().clone();
        std::fs::create_dir_all(layout.root_dir()).map_err(|e| {
            CliError::ConfigurationError(format!(
                "Failed to create data directory {}: {e}",
                layout.root_dir().display()
            ))
        })?;

        let ledger_path = layout.ledger_path();
        let mut run_lock = LedgerLock::open(&ledger_path)?;
        let _held = run_lock.try_hold()?;

        let ledger = match SharedLedger::open(&ledger_path) {
            Ok(ledger) => ledger,
            Err(e) => {
                if matches!(
                    e,
                    LedgerError::Corrupt(_) | LedgerError::SchemaVersionMismatch { .. }
                ) {
                    error!(
                        path = %ledger_path.display(),
                        "Ledger unreadable; inspect it or run `ohlc-backfill ledger reset --yes` to start over"
                    );
                }
                return Err(e.into());
            }
        };

        let source = Arc::new(CoinGeckoSource::new(self.source_config())?);
        let universe = self.resolve_universe(&layout, source.as_ref(), config.top_n).await?;

        info!(
            entities = universe.len(),
            granularities = ?config.granularities,
            start_ms = config.global_start_ms,
            end_ms = ?config.global_end_ms,
            "Starting ingest"
        );

        let progress = match cli.output_format {
            OutputFormat::Human => create_progress_bar(),
            OutputFormat::Json => ProgressBar::hidden(),
        };

        let scheduler = Scheduler::new(config, source, Arc::new(store), Arc::new(ledger))
            .with_shutdown(shutdown.clone())
            .with_progress(progress);

        let report = scheduler.run(universe.ids()).await?;

        if shutdown.is_shutdown_requested() {
            warn!(
                interrupted = report.interrupted,
                "Run stopped by shutdown request; rerun to continue"
            );
        }

        match cli.output_format {
            OutputFormat::Json => output_json(&report, universe.len())?,
            OutputFormat::Human => output_human(&report, universe.len()),
        }

        Ok(report)
    }

    /// Pick the entities to ingest
    async fn resolve_universe(
        &self,
        layout: &StoreLayout,
        source: &dyn EntitySource,
        top_n: usize,
    ) -> Result<EntityUniverse, CliError> {
        if !self.ids.is_empty() {
            return Ok(EntityUniverse::from_ids(&self.ids)?);
        }

        let path = self
            .entities
            .clone()
            .unwrap_or_else(|| layout.listings_path());

        let listings = if path.exists() {
            load_listings(&path)?
        } else {
            info!(path = %path.display(), "Market listing not found, fetching from source");
            let listings = source.list_entities().await?;
            save_listings(&path, &listings)?;
            listings
        };

        Ok(EntityUniverse::from_listings(&listings, top_n)?)
    }
}

/// Output the run report as JSON
fn output_json(report: &RunReport, entities: usize) -> Result<(), CliError> {
    let summary = IngestSummary {
        success: report.is_complete(),
        entities,
        report,
    };
    let json = serde_json::to_string(&summary)
        .map_err(|e| CliError::OutputError(format!("Failed to serialize report: {e}")))?;
    println!("{json}");
    Ok(())
}

/// Output the run report in human-readable form
fn output_human(report: &RunReport, entities: usize) {
    if report.is_complete() {
        println!("\nIngest completed successfully!");
    } else {
        println!("\nIngest finished with work remaining.");
    }
    println!("Entities: {entities} ({} keys)", report.keys);
    println!(
        "Windows: {} planned, {} already complete, {} fetched",
        report.planned, report.already_complete, report.marked
    );
    if report.seeded_from_store > 0 {
        println!("Recovered from existing store files: {}", report.seeded_from_store);
    }
    println!("Candles appended: {}", report.candles_appended);

    if !report.failures.is_empty() {
        eprintln!("Failed windows: {}", report.failures.len());
        for failure in report.failures.iter().take(20) {
            eprintln!(
                "  {} {} [{}]: {}",
                failure.key, failure.window, failure.kind, failure.message
            );
        }
        if report.failures.len() > 20 {
            eprintln!("  ... and {} more", report.failures.len() - 20);
        }
    }
    if report.interrupted > 0 {
        eprintln!("Interrupted before start: {}", report.interrupted);
    }
    if report.is_partial() {
        eprintln!("Rerun the same command to continue; completed windows are skipped.");
    }
}

/// Create progress bar with style
fn create_progress_bar() -> ProgressBar {
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );
    pb.set_message("Fetching windows");
    pb
}
