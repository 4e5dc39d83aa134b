//! Ingestion metrics
//!
//! Counters and histograms for HTTP traffic, window outcomes and ledger writes,
//! recorded through the `metrics` facade. Without an installed recorder every call
//! is a no-op; `--metrics-addr` installs a Prometheus scrape endpoint.

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::Lazy;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Global metrics registry initialization flag
static METRICS_INITIALIZED: Lazy<RwLock<bool>> = Lazy::new(|| RwLock::new(false));

/// Correlation ID generator for request tracing
static CORRELATION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Initialize metrics system with Prometheus exporter
///
/// Idempotent: later calls are ignored once an exporter is installed.
///
/// # Arguments
/// * `addr` - Socket address to bind the Prometheus scrape endpoint (e.g. "0.0.0.0:9090")
pub async fn init_metrics(addr: SocketAddr) -> Result<(), Box<dyn std::error::Error>> {
    let mut initialized = METRICS_INITIALIZED.write().await;
    if *initialized {
        debug!("Metrics already initialized, skipping");
        return Ok(());
    }

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_counter!(
        "http_requests_total",
        Unit::Count,
        "Total number of HTTP requests made to the data source"
    );
    describe_counter!(
        "http_retries_total",
        Unit::Count,
        "Total number of in-request retry attempts"
    );
    describe_histogram!(
        "http_request_duration_seconds",
        Unit::Seconds,
        "HTTP request duration in seconds"
    );
    describe_counter!(
        "windows_fetched_total",
        Unit::Count,
        "Windows fetched, stored and recorded in the ledger"
    );
    describe_counter!(
        "windows_failed_total",
        Unit::Count,
        "Windows that ended in a failed state, by failure kind"
    );
    describe_counter!(
        "windows_skipped_total",
        Unit::Count,
        "Windows skipped because the ledger already recorded them"
    );
    describe_counter!(
        "candles_appended_total",
        Unit::Count,
        "Candles appended to entity stores"
    );
    describe_histogram!(
        "fetch_window_duration_seconds",
        Unit::Seconds,
        "Time from request start to ledger persist for one window"
    );
    describe_histogram!(
        "ledger_persist_duration_seconds",
        Unit::Seconds,
        "Time spent writing the progress ledger"
    );

    *initialized = true;
    info!(addr = %addr, "Metrics exporter listening");
    Ok(())
}

/// Check if metrics system is initialized
pub async fn is_initialized() -> bool {
    *METRICS_INITIALIZED.read().await
}

/// Generate a new correlation ID for request tracing
pub fn generate_correlation_id() -> String {
    let id = CORRELATION_COUNTER.fetch_add(1, Ordering::Relaxed) + 1;
    format!("req-{id:08x}")
}

/// Timing and outcome of one HTTP attempt
pub struct HttpRequestMetrics {
    endpoint: &'static str,
    start_time: Instant,
    correlation_id: String,
    attempt: u32,
}

impl HttpRequestMetrics {
    /// Start recording an HTTP attempt
    pub fn start(endpoint: &'static str, attempt: u32) -> Self {
        Self {
            endpoint,
            start_time: Instant::now(),
            correlation_id: generate_correlation_id(),
            attempt,
        }
    }

    /// Record a response with `status_code`
    pub fn record_complete(&self, status_code: u16) {
        let duration = self.start_time.elapsed();

        counter!(
            "http_requests_total",
            "endpoint" => self.endpoint,
            "status" => status_code.to_string(),
        )
        .increment(1);
        histogram!("http_request_duration_seconds", "endpoint" => self.endpoint)
            .record(duration.as_secs_f64());

        debug!(
            correlation_id = %self.correlation_id,
            endpoint = self.endpoint,
            attempt = self.attempt,
            status = status_code,
            duration_ms = duration.as_millis() as u64,
            "HTTP request completed"
        );
    }

    /// Record a network error (no status code)
    pub fn record_network_error(&self) {
        let duration = self.start_time.elapsed();

        counter!(
            "http_requests_total",
            "endpoint" => self.endpoint,
            "status" => "network_error",
        )
        .increment(1);
        histogram!("http_request_duration_seconds", "endpoint" => self.endpoint)
            .record(duration.as_secs_f64());

        debug!(
            correlation_id = %self.correlation_id,
            endpoint = self.endpoint,
            attempt = self.attempt,
            duration_ms = duration.as_millis() as u64,
            "HTTP request failed without response"
        );
    }

    /// Correlation ID for this attempt
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }
}

/// Record a retry and its backoff
pub fn record_retry_backoff(endpoint: &'static str, duration: Duration) {
    counter!("http_retries_total", "endpoint" => endpoint).increment(1);
    debug!(
        endpoint,
        backoff_ms = duration.as_millis() as u64,
        "Retry backoff recorded"
    );
}

/// Outcome metrics for one window
pub struct WindowMetrics {
    granularity: &'static str,
    start_time: Instant,
}

impl WindowMetrics {
    /// Start timing a window fetch
    pub fn start(granularity: &'static str) -> Self {
        Self {
            granularity,
            start_time: Instant::now(),
        }
    }

    /// Record a window that reached the ledger
    pub fn record_marked(&self, candles: usize) {
        counter!("windows_fetched_total", "granularity" => self.granularity).increment(1);
        counter!("candles_appended_total", "granularity" => self.granularity)
            .increment(candles as u64);
        histogram!("fetch_window_duration_seconds", "granularity" => self.granularity)
            .record(self.start_time.elapsed().as_secs_f64());
    }

    /// Record a failed window
    pub fn record_failure(&self, kind: &'static str) {
        counter!(
            "windows_failed_total",
            "granularity" => self.granularity,
            "kind" => kind,
        )
        .increment(1);
    }
}

/// Record windows skipped as already complete
pub fn record_windows_skipped(granularity: &'static str, count: u64) {
    if count > 0 {
        counter!("windows_skipped_total", "granularity" => granularity).increment(count);
    }
}

/// Record windows abandoned without a request
pub fn record_windows_abandoned(granularity: &'static str, count: u64) {
    if count > 0 {
        counter!(
            "windows_failed_total",
            "granularity" => granularity,
            "kind" => "abandoned",
        )
        .increment(count);
        warn!(granularity, count, "Windows abandoned after persistence failure");
    }
}

/// Record one ledger write
pub fn record_ledger_persist(duration: Duration) {
    histogram!("ledger_persist_duration_seconds").record(duration.as_secs_f64());
}
