//! Engine configuration and retry constants

use crate::Granularity;
use std::time::Duration;

/// Maximum number of in-request retries for transient HTTP failures.
/// A window that still fails is left out of the ledger and retried on the next run.
pub const MAX_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds.
pub const INITIAL_BACKOFF_MS: u64 = 1000; // 1 second

/// Maximum backoff delay in milliseconds.
pub const MAX_BACKOFF_MS: u64 = 30000; // 30 seconds

/// Default start of history: 2018-02-09T03:33:44Z
pub const DEFAULT_GLOBAL_START_MS: i64 = 1_518_147_224_000;

/// Default number of concurrent work lists
pub const DEFAULT_POOL_SIZE: usize = 5;

/// Upper bound on the worker pool
pub const MAX_POOL_SIZE: usize = 32;

/// Default fixed delay after each network request
pub const DEFAULT_PACING_MS: u64 = 500;

/// Default universe size
pub const DEFAULT_TOP_N: usize = 500;

/// Calculate exponential backoff delay
pub fn calculate_backoff(retry_count: u32) -> Duration {
    let delay_ms = INITIAL_BACKOFF_MS.saturating_mul(2u64.saturating_pow(retry_count));
    let delay_ms = delay_ms.min(MAX_BACKOFF_MS);
    Duration::from_millis(delay_ms)
}

/// Settings for one ingestion run
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Start of history to cover (Unix milliseconds)
    pub global_start_ms: i64,
    /// End of history to cover; `None` resolves to "now" once per run
    pub global_end_ms: Option<i64>,
    /// Request window size for daily series
    pub daily_chunk_ms: i64,
    /// Request window size for hourly series
    pub hourly_chunk_ms: i64,
    /// Number of work lists processed concurrently
    pub pool_size: usize,
    /// Fixed delay after each task that made a network request
    pub pacing: Duration,
    /// Number of top-ranked entities to ingest
    pub top_n: usize,
    /// Granularities to ingest for every entity
    pub granularities: Vec<Granularity>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            global_start_ms: DEFAULT_GLOBAL_START_MS,
            global_end_ms: None,
            daily_chunk_ms: Granularity::Daily.default_chunk_ms(),
            hourly_chunk_ms: Granularity::Hourly.default_chunk_ms(),
            pool_size: DEFAULT_POOL_SIZE,
            pacing: Duration::from_millis(DEFAULT_PACING_MS),
            top_n: DEFAULT_TOP_N,
            granularities: Granularity::all().to_vec(),
        }
    }
}

impl EngineConfig {
    /// Set the start of history
    pub fn with_start_ms(mut self, start_ms: i64) -> Self {
        self.global_start_ms = start_ms;
        self
    }

    /// Set a fixed end of history
    pub fn with_end_ms(mut self, end_ms: i64) -> Self {
        self.global_end_ms = Some(end_ms);
        self
    }

    /// Set the window size for one granularity
    pub fn with_chunk_ms(mut self, granularity: Granularity, chunk_ms: i64) -> Self {
        match granularity {
            Granularity::Daily => self.daily_chunk_ms = chunk_ms,
            Granularity::Hourly => self.hourly_chunk_ms = chunk_ms,
        }
        self
    }

    /// Set the worker pool size
    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    /// Set the pacing delay
    pub fn with_pacing(mut self, pacing: Duration) -> Self {
        self.pacing = pacing;
        self
    }

    /// Set the universe size
    pub fn with_top_n(mut self, top_n: usize) -> Self {
        self.top_n = top_n;
        self
    }

    /// Restrict ingestion to the given granularities
    pub fn with_granularities(mut self, granularities: Vec<Granularity>) -> Self {
        self.granularities = granularities;
        self
    }

    /// Window size for `granularity`
    pub fn chunk_ms(&self, granularity: Granularity) -> i64 {
        match granularity {
            Granularity::Daily => self.daily_chunk_ms,
            Granularity::Hourly => self.hourly_chunk_ms,
        }
    }

    /// Check the configuration before any work starts
    pub fn validate(&self) -> Result<(), String> {
        if self.global_start_ms < 0 {
            return Err(format!(
                "start must be non-negative, got {}",
                self.global_start_ms
            ));
        }

        if let Some(end) = self.global_end_ms {
            if end <= self.global_start_ms {
                return Err(format!(
                    "end ({end}) must be after start ({})",
                    self.global_start_ms
                ));
            }
        }

        for granularity in Granularity::all() {
            let chunk = self.chunk_ms(granularity);
            if chunk <= 0 {
                return Err(format!(
                    "{granularity} window size must be positive, got {chunk}"
                ));
            }
        }

        if self.pool_size == 0 || self.pool_size > MAX_POOL_SIZE {
            return Err(format!(
                "concurrency must be between 1 and {MAX_POOL_SIZE}, got {}",
                self.pool_size
            ));
        }

        if self.top_n == 0 {
            return Err("top_n must be at least 1".to_string());
        }

        if self.granularities.is_empty() {
            return Err("at least one granularity is required".to_string());
        }

        Ok(())
    }
}
