//! Window planning, task execution and scheduling
//!
//! This module is the ingestion engine:
//!
//! 1. **Planning**: [`window::plan_windows`] splits the global time range into
//!    contiguous half-open windows per granularity
//! 2. **Execution**: [`executor::TaskExecutor`] drives one [`job::FetchTask`] through
//!    fetch, store append and ledger mark
//! 3. **Scheduling**: [`scheduler::Scheduler`] runs every pending window on a bounded
//!    worker pool, one key per worker at a time
//! 4. **Pacing**: [`rate_limit::Pacer`] waits a flat delay after each request
//!
//! # Quick Start
//!
//! ```no_run
//! use ohlc_backfill::downloader::{EngineConfig, Scheduler};
//! use ohlc_backfill::fetcher::coingecko::CoinGeckoSource;
//! use ohlc_backfill::output::CsvEntityStore;
//! use ohlc_backfill::resume::SharedLedger;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = CsvEntityStore::new("./data");
//! let ledger = SharedLedger::open(store.layout().ledger_path())?;
//! let scheduler = Scheduler::new(
//!     EngineConfig::default().with_pool_size(4),
//!     Arc::new(CoinGeckoSource::from_env()?),
//!     Arc::new(store),
//!     Arc::new(ledger),
//! );
//!
//! let report = scheduler.run(&["bitcoin".to_string()]).await?;
//! println!("{} windows left for the next run", report.remaining());
//! # Ok(())
//! # }
//! ```
//!
//! # Error Handling
//!
//! Window-level failures (transport, decode, persistence) end up in the
//! [`scheduler::RunReport`]; only [`IngestError`] aborts a run before work starts.

pub mod config;
pub mod executor;
pub mod job;
pub mod rate_limit;
pub mod scheduler;
pub mod window;

pub use config::EngineConfig;
pub use executor::TaskExecutor;
pub use job::{FailureKind, FetchTask, TaskOutcome, TaskState};
pub use rate_limit::Pacer;
pub use scheduler::{FailedWindow, RunReport, Scheduler};
pub use window::{plan_windows, TimeWindow, WindowPlan};

use crate::output::StoreError;
use crate::registry::RegistryError;
use crate::resume::LedgerError;

/// Errors that stop a run before or outside per-window work
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// Invalid configuration or input
    #[error("configuration error: {0}")]
    FatalConfig(String),

    /// Ledger could not be read or written at startup
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// Store could not be prepared
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Entity universe could not be resolved
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),
}
