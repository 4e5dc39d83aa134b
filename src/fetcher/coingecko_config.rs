//! CoinGecko API configuration
//!
//! The public and pro APIs differ only in base URL and the header that carries the
//! API key, so both are plain configuration values.

use secrecy::SecretString;
use std::time::Duration;

use crate::downloader::config::MAX_RETRIES;

/// Public (demo key or keyless) API base URL
pub const PUBLIC_BASE_URL: &str = "https://api.coingecko.com/api/v3";

/// Pro API base URL
pub const PRO_BASE_URL: &str = "https://pro-api.coingecko.com/api/v3";

/// OHLC range endpoint path template; `{id}` is the entity id
pub const OHLC_RANGE_ENDPOINT: &str = "/coins/{id}/ohlc/range";

/// Market listing endpoint path
pub const MARKETS_ENDPOINT: &str = "/coins/markets";

/// Quote currency for every price series
pub const VS_CURRENCY: &str = "usd";

/// Markets page size
pub const MARKETS_PER_PAGE: u32 = 250;

/// Hard cap on market pages fetched in one listing
pub const MARKETS_MAX_PAGES: u32 = 100;

/// Pause between market pages
pub const MARKETS_PAGE_PAUSE: Duration = Duration::from_secs(1);

/// Default per-request timeout
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Header carrying the key on the pro API
pub const PRO_KEY_HEADER: &str = "x-cg-pro-api-key";

/// Header carrying the key on the public API
pub const DEMO_KEY_HEADER: &str = "x-cg-demo-api-key";

/// Environment variable read for the API key
pub const API_KEY_ENV: &str = "COINGECKO_API_KEY";

/// Connection settings for the CoinGecko API
#[derive(Debug)]
pub struct CoinGeckoConfig {
    /// Base URL without trailing slash
    pub base_url: String,
    /// API key, if any
    pub api_key: Option<SecretString>,
    /// Per-request timeout
    pub request_timeout: Duration,
    /// In-request retries for transient failures
    pub max_retries: u32,
}

impl Default for CoinGeckoConfig {
    fn default() -> Self {
        Self {
            base_url: PUBLIC_BASE_URL.to_string(),
            api_key: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_retries: MAX_RETRIES,
        }
    }
}

impl CoinGeckoConfig {
    /// Public API with an optional demo key
    pub fn public(api_key: Option<SecretString>) -> Self {
        Self {
            api_key,
            ..Self::default()
        }
    }

    /// Pro API with the given key
    pub fn pro(api_key: SecretString) -> Self {
        Self {
            base_url: PRO_BASE_URL.to_string(),
            api_key: Some(api_key),
            ..Self::default()
        }
    }

    /// Public or pro API depending on `COINGECKO_API_KEY` and `COINGECKO_PRO`
    ///
    /// A key alone selects the public API with a demo key; `COINGECKO_PRO=1` with a key
    /// selects the pro API.
    pub fn from_env() -> Self {
        let api_key = std::env::var(API_KEY_ENV)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .map(|key| SecretString::new(key.into()));
        let pro = std::env::var("COINGECKO_PRO")
            .map(|v| matches!(v.as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        match api_key {
            Some(key) if pro => Self::pro(key),
            key => Self::public(key),
        }
    }

    /// Override the base URL (tests, proxies)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Override the per-request timeout
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Override the retry count
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Whether the base URL points at the pro API
    pub fn is_pro(&self) -> bool {
        self.base_url.starts_with(PRO_BASE_URL)
    }

    /// Header name the API key is sent under
    pub fn key_header(&self) -> &'static str {
        if self.is_pro() {
            PRO_KEY_HEADER
        } else {
            DEMO_KEY_HEADER
        }
    }
}
