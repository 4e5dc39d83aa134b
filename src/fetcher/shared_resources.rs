//! HTTP client construction shared by every CoinGecko request
//!
//! One `reqwest::Client` is built per run and shared (it is `Arc`-backed) so the
//! worker pool reuses pooled connections.

use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;

use crate::fetcher::{FetchError, FetcherResult};

/// HTTP connect timeout (seconds) - time to establish TCP connection
const HTTP_CONNECT_TIMEOUT_SECS: u64 = 10;

/// User agent sent with every request
const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Build the shared HTTP client
///
/// Configured with explicit timeouts to prevent indefinite hangs:
/// - Connect timeout: 10 seconds
/// - Request timeout: `request_timeout`, fatal to the task only
pub fn build_http_client(request_timeout: Duration) -> FetcherResult<Arc<Client>> {
    Client::builder()
        .connect_timeout(Duration::from_secs(HTTP_CONNECT_TIMEOUT_SECS))
        .timeout(request_timeout)
        .user_agent(USER_AGENT)
        .build()
        .map(Arc::new)
        .map_err(|e| {
            FetchError::ConfigError(format!(
                "Failed to build HTTP client: {e}. Check system TLS configuration."
            ))
        })
}
