//! Remote data sources

use crate::downloader::window::TimeWindow;
use crate::registry::EntityListing;
use crate::{Candle, Granularity};
use async_trait::async_trait;

pub mod coingecko;
pub mod coingecko_config;
pub mod coingecko_http;
pub mod coingecko_parser;
pub mod shared_resources;

/// Fetcher errors
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// Non-success HTTP status
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// Connection failure or timeout
    #[error("network error: {0}")]
    NetworkError(String),

    /// Rate limit still exceeded after retries
    #[error("rate limit exceeded")]
    RateLimitExceeded,

    /// Response body could not be decoded
    #[error("parse error: {0}")]
    ParseError(String),

    /// Client could not be configured
    #[error("configuration error: {0}")]
    ConfigError(String),
}

impl FetchError {
    /// Whether the failure came from an undecodable payload rather than transport
    pub fn is_decode(&self) -> bool {
        matches!(self, FetchError::ParseError(_))
    }
}

/// Result type for fetcher operations
pub type FetcherResult<T> = Result<T, FetchError>;

/// Source of candles for one request window
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Fetch every candle of `entity_id` at `granularity` inside `window`
    ///
    /// One call issues exactly one logical request (in-request retries aside). An
    /// empty vector means the source has no data for the window.
    async fn fetch_window(
        &self,
        entity_id: &str,
        granularity: Granularity,
        window: TimeWindow,
    ) -> FetcherResult<Vec<Candle>>;
}

/// Source of the entity universe
#[async_trait]
pub trait EntitySource: Send + Sync {
    /// List entities with their market cap rank
    async fn list_entities(&self) -> FetcherResult<Vec<EntityListing>>;
}
