//! CoinGecko HTTP client
//!
//! Provides one GET helper for all CoinGecko calls with:
//! - API key header injection (never logged)
//! - Retry logic with capped exponential backoff
//! - Transport vs decode error classification

use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::downloader::config::calculate_backoff;
use crate::fetcher::coingecko_config::CoinGeckoConfig;
use crate::fetcher::shared_resources::build_http_client;
use crate::fetcher::{FetchError, FetcherResult};
use crate::metrics::{record_retry_backoff, HttpRequestMetrics};

/// HTTP client for all CoinGecko API interactions
pub struct CoinGeckoHttpClient {
    client: Arc<Client>,
    base_url: String,
    key_header: &'static str,
    api_key: Option<SecretString>,
    max_retries: u32,
}

impl CoinGeckoHttpClient {
    /// Create a client from configuration, building the shared HTTP client
    pub fn from_config(config: CoinGeckoConfig) -> FetcherResult<Self> {
        let client = build_http_client(config.request_timeout)?;
        Ok(Self::new(client, config))
    }

    /// Create a client over an existing HTTP client
    pub fn new(client: Arc<Client>, config: CoinGeckoConfig) -> Self {
        let key_header = config.key_header();
        Self {
            client,
            base_url: config.base_url,
            key_header,
            api_key: config.api_key,
            max_retries: config.max_retries,
        }
    }

    /// Base URL requests are sent to
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn auth_headers(&self) -> FetcherResult<HeaderMap> {
        let mut headers = HeaderMap::new();
        if let Some(key) = &self.api_key {
            let mut value = HeaderValue::from_str(key.expose_secret())
                .map_err(|_| FetchError::ConfigError("API key is not a valid header value".to_string()))?;
            value.set_sensitive(true);
            headers.insert(self.key_header, value);
        }
        Ok(headers)
    }

    /// Execute a GET request and deserialize the JSON body
    ///
    /// `label` names the endpoint in logs and metrics; `path` is appended to the base
    /// URL.
    ///
    /// Retries on network errors, timeouts, 429 and 5xx. Other 4xx responses fail
    /// immediately. A body that does not decode into `T` is a
    /// [`FetchError::ParseError`].
    pub async fn get<T>(
        &self,
        label: &'static str,
        path: &str,
        params: &[(&str, String)],
    ) -> FetcherResult<T>
    where
        T: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        let headers = self.auth_headers()?;
        let mut last_error = None;

        debug!(endpoint = label, url = %url, params = params.len(), "GET request");

        for attempt in 0..=self.max_retries {
            let metrics = HttpRequestMetrics::start(label, attempt);
            let response = match self
                .client
                .get(&url)
                .headers(headers.clone())
                .query(params)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(e) => {
                    metrics.record_network_error();
                    warn!(
                        endpoint = label,
                        attempt = attempt + 1,
                        max_attempts = self.max_retries + 1,
                        timeout = e.is_timeout(),
                        error = %e,
                        "Network error"
                    );
                    last_error = Some(FetchError::NetworkError(e.to_string()));

                    if attempt < self.max_retries {
                        self.backoff(label, attempt).await;
                        continue;
                    }
                    break;
                }
            };

            let status = response.status();
            metrics.record_complete(status.as_u16());

            if status.as_u16() == 429 {
                warn!(
                    endpoint = label,
                    attempt = attempt + 1,
                    max_attempts = self.max_retries + 1,
                    "Rate limit error (429)"
                );
                last_error = Some(FetchError::RateLimitExceeded);

                if attempt < self.max_retries {
                    self.backoff(label, attempt).await;
                    continue;
                }
                break;
            }

            if status.is_server_error() {
                warn!(
                    endpoint = label,
                    status = status.as_u16(),
                    attempt = attempt + 1,
                    max_attempts = self.max_retries + 1,
                    "Server error"
                );
                last_error = Some(FetchError::HttpError(format!("Server error: {status}")));

                if attempt < self.max_retries {
                    self.backoff(label, attempt).await;
                    continue;
                }
                break;
            }

            if !status.is_success() {
                let error_text = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unknown error".to_string());
                return Err(FetchError::HttpError(format!(
                    "Client error {status}: {}",
                    truncate(&error_text, 200)
                )));
            }

            let body = response
                .text()
                .await
                .map_err(|e| FetchError::NetworkError(format!("Failed to read body: {e}")))?;

            return serde_json::from_str::<T>(&body).map_err(|e| {
                FetchError::ParseError(format!("Failed to deserialize response: {e}"))
            });
        }

        Err(last_error
            .unwrap_or_else(|| FetchError::NetworkError("All retries exhausted".to_string())))
    }

    async fn backoff(&self, label: &'static str, attempt: u32) {
        let backoff = calculate_backoff(attempt);
        debug!(endpoint = label, backoff_ms = backoff.as_millis() as u64, "Retrying after backoff");
        record_retry_backoff(label, backoff);
        tokio::time::sleep(backoff).await;
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
