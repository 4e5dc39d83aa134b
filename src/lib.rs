//! # OHLC Backfill Library
//!
//! Resumable, chunked ingestion of long OHLC price histories for a large universe of
//! crypto assets from a rate-limited remote source (CoinGecko).
//!
//! ## Features
//!
//! - **Window Planning**: Splits a multi-year span into fixed-size request windows
//! - **Progress Ledger**: Durable record of every completed window, persisted after each fetch
//! - **Entity Stores**: One CSV file per asset and granularity, rewritten atomically on append
//! - **Bounded Concurrency**: Fixed worker pool with per-asset task affinity
//! - **Fixed Pacing**: Flat delay between requests to stay under the source's rate limit
//! - **Crash Safety**: Store before ledger, so an interruption never loses a completed window
//!
//! ## Quick Start
//!
//! ```no_run
//! use ohlc_backfill::downloader::{EngineConfig, Scheduler};
//! use ohlc_backfill::fetcher::coingecko::CoinGeckoSource;
//! use ohlc_backfill::output::csv::CsvEntityStore;
//! use ohlc_backfill::resume::SharedLedger;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = EngineConfig::default().with_top_n(10);
//! let source = Arc::new(CoinGeckoSource::from_env()?);
//! let store = Arc::new(CsvEntityStore::new("./data"));
//! let ledger = Arc::new(SharedLedger::open("./data/progress_ledger.json")?);
//!
//! let scheduler = Scheduler::new(config, source, store, ledger);
//! let report = scheduler
//!     .run(&["bitcoin".to_string(), "ethereum".to_string()])
//!     .await?;
//! println!("{} windows marked, {} failed", report.marked, report.failures.len());
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`downloader`] - Window planning, fetch tasks, executor, scheduler and pacing
//! - [`resume`] - Progress ledger persistence and run locking
//! - [`output`] - Entity stores holding fetched candles
//! - [`fetcher`] - Remote data source abstraction and the CoinGecko implementation
//! - [`registry`] - Entity universe (top-N assets by market cap rank)
//! - [`identifier`] - Entity keys (`entity:granularity`)
//!
//! ## Data Types
//!
//! - [`Candle`] - One OHLC record
//! - [`Granularity`] - Daily or hourly resolution, each with its own window size

#![warn(missing_docs)]
#![warn(clippy::all)]

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// CLI command implementations
pub mod cli;

/// Window planning, task execution and scheduling
pub mod downloader;

/// Remote data sources
pub mod fetcher;

/// Entity key parsing and validation
pub mod identifier;

/// Metrics collection
pub mod metrics;

/// Entity stores
pub mod output;

/// Entity universe selection
pub mod registry;

/// Progress ledger and run locking
pub mod resume;

/// Graceful shutdown coordination shared across workers
pub mod shutdown;

pub use identifier::EntityKey;

/// Milliseconds in one day
pub const DAY_MS: i64 = 86_400_000;

/// One OHLC record as returned by the remote source
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candle {
    /// Candle timestamp (Unix timestamp in milliseconds)
    pub timestamp: i64,
    /// Open price
    pub open: Decimal,
    /// High price
    pub high: Decimal,
    /// Low price
    pub low: Decimal,
    /// Close price
    pub close: Decimal,
}

impl Candle {
    /// Validate candle data integrity
    pub fn validate(&self) -> Result<(), String> {
        if self.timestamp < 0 {
            return Err(format!(
                "Timestamp must be non-negative, got {}",
                self.timestamp
            ));
        }

        if self.open < Decimal::ZERO
            || self.high < Decimal::ZERO
            || self.low < Decimal::ZERO
            || self.close < Decimal::ZERO
        {
            return Err(format!(
                "Prices must be non-negative, got o={} h={} l={} c={}",
                self.open, self.high, self.low, self.close
            ));
        }

        if self.high < self.open || self.high < self.close {
            return Err(format!(
                "High ({}) must be >= open ({}) and close ({})",
                self.high, self.open, self.close
            ));
        }

        if self.low > self.open || self.low > self.close {
            return Err(format!(
                "Low ({}) must be <= open ({}) and close ({})",
                self.low, self.open, self.close
            ));
        }

        Ok(())
    }
}

/// Time resolution of a series
///
/// Each granularity has its own request window size, chosen so a single request stays
/// within the source's per-call range limit for that resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Granularity {
    /// One candle per day
    #[serde(rename = "daily")]
    Daily,
    /// One candle per hour
    #[serde(rename = "hourly")]
    Hourly,
}

impl Granularity {
    /// Both granularities, daily first
    pub fn all() -> [Granularity; 2] {
        [Granularity::Daily, Granularity::Hourly]
    }

    /// Default request window size in milliseconds (180 days daily, 31 days hourly)
    pub fn default_chunk_ms(&self) -> i64 {
        match self {
            Granularity::Daily => 180 * DAY_MS,
            Granularity::Hourly => 31 * DAY_MS,
        }
    }

    /// Lowercase name used in file paths, the ledger and API queries
    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Daily => "daily",
            Granularity::Hourly => "hourly",
        }
    }
}

impl std::fmt::Display for Granularity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Granularity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "daily" | "1d" => Ok(Granularity::Daily),
            "hourly" | "1h" => Ok(Granularity::Hourly),
            _ => Err(format!("Invalid granularity: {s} (expected daily or hourly)")),
        }
    }
}
