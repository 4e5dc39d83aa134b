//! CoinGecko data source
//!
//! Implements [`DataSource`] over the `/coins/{id}/ohlc/range` endpoint and
//! [`EntitySource`] over the paged `/coins/markets` listing.
//!
//! The engine works in Unix milliseconds; CoinGecko takes range bounds in seconds.
//! Window bounds are converted at the request boundary only.

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, instrument};

use crate::downloader::window::TimeWindow;
use crate::fetcher::coingecko_config::{
    CoinGeckoConfig, MARKETS_ENDPOINT, MARKETS_MAX_PAGES, MARKETS_PAGE_PAUSE, MARKETS_PER_PAGE,
    OHLC_RANGE_ENDPOINT, VS_CURRENCY,
};
use crate::fetcher::coingecko_http::CoinGeckoHttpClient;
use crate::fetcher::coingecko_parser::CoinGeckoParser;
use crate::fetcher::{DataSource, EntitySource, FetchError, FetcherResult};
use crate::registry::EntityListing;
use crate::{Candle, Granularity};

/// CoinGecko-backed candle and entity source
pub struct CoinGeckoSource {
    http_client: CoinGeckoHttpClient,
}

impl CoinGeckoSource {
    /// Create a source from configuration
    pub fn new(config: CoinGeckoConfig) -> FetcherResult<Self> {
        Ok(Self {
            http_client: CoinGeckoHttpClient::from_config(config)?,
        })
    }

    /// Source configured from the environment (`COINGECKO_API_KEY`, `COINGECKO_PRO`)
    pub fn from_env() -> FetcherResult<Self> {
        Self::new(CoinGeckoConfig::from_env())
    }

    /// Base URL requests are sent to
    pub fn base_url(&self) -> &str {
        self.http_client.base_url()
    }

    /// Query parameters for one OHLC range request
    ///
    /// `from` is rounded down and `to` rounded up to whole seconds so the request
    /// never covers less than the window.
    pub fn ohlc_params(granularity: Granularity, window: TimeWindow) -> Vec<(&'static str, String)> {
        let from_secs = window.start().div_euclid(1000);
        let to_secs = window.end().div_euclid(1000) + i64::from(window.end().rem_euclid(1000) != 0);

        vec![
            ("vs_currency", VS_CURRENCY.to_string()),
            ("from", from_secs.to_string()),
            ("to", to_secs.to_string()),
            ("interval", granularity.as_str().to_string()),
        ]
    }
}

#[async_trait]
impl DataSource for CoinGeckoSource {
    #[instrument(skip(self, window), fields(window = %window))]
    async fn fetch_window(
        &self,
        entity_id: &str,
        granularity: Granularity,
        window: TimeWindow,
    ) -> FetcherResult<Vec<Candle>> {
        let path = OHLC_RANGE_ENDPOINT.replace("{id}", entity_id);
        let params = Self::ohlc_params(granularity, window);

        let payload: Value = self.http_client.get("ohlc_range", &path, &params).await?;
        let candles = CoinGeckoParser::parse_ohlc(payload)?;

        debug!(candles = candles.len(), "OHLC window received");
        Ok(candles)
    }
}

#[async_trait]
impl EntitySource for CoinGeckoSource {
    async fn list_entities(&self) -> FetcherResult<Vec<EntityListing>> {
        let mut listings = Vec::new();

        for page in 1..=MARKETS_MAX_PAGES {
            let params = [
                ("vs_currency", VS_CURRENCY.to_string()),
                ("order", "market_cap_desc".to_string()),
                ("per_page", MARKETS_PER_PAGE.to_string()),
                ("page", page.to_string()),
            ];

            let batch: Vec<EntityListing> = self
                .http_client
                .get("markets", MARKETS_ENDPOINT, &params)
                .await?;
            let batch_len = batch.len();
            listings.extend(batch);

            debug!(page, received = batch_len, total = listings.len(), "Markets page received");

            if batch_len < MARKETS_PER_PAGE as usize {
                info!(pages = page, entities = listings.len(), "Market listing complete");
                return Ok(listings);
            }

            tokio::time::sleep(MARKETS_PAGE_PAUSE).await;
        }

        if listings.is_empty() {
            return Err(FetchError::HttpError("market listing returned no pages".to_string()));
        }

        info!(
            pages = MARKETS_MAX_PAGES,
            entities = listings.len(),
            "Market listing stopped at page cap"
        );
        Ok(listings)
    }
}
