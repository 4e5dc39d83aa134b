//! Store file layout
//!
//! Candles live under one directory per granularity with one file per entity:
//! `{data_dir}/ohlc_{granularity}/{entity_id}.csv`.
//!
//! ```rust
//! use ohlc_backfill::output::StoreLayout;
//! use ohlc_backfill::EntityKey;
//! use std::path::PathBuf;
//!
//! let layout = StoreLayout::new("data");
//! let key = EntityKey::parse("bitcoin:hourly").unwrap();
//! assert_eq!(layout.entity_path(&key), PathBuf::from("data/ohlc_hourly/bitcoin.csv"));
//! ```

use super::StoreError;
use crate::{EntityKey, Granularity};
use std::path::{Path, PathBuf};

/// Default ledger file name inside the data directory
pub const LEDGER_FILE_NAME: &str = "progress_ledger.json";

/// Default entity listing file name inside the data directory
pub const LISTINGS_FILE_NAME: &str = "coingecko_market_data.json";

/// Path builder for the data directory
#[derive(Debug, Clone)]
pub struct StoreLayout {
    root_dir: PathBuf,
}

impl StoreLayout {
    /// Create a layout rooted at `root_dir`
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
        }
    }

    /// Root data directory
    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// Directory holding every entity file of one granularity
    pub fn granularity_dir(&self, granularity: Granularity) -> PathBuf {
        self.root_dir.join(format!("ohlc_{granularity}"))
    }

    /// Store file for `key`
    ///
    /// Entity ids are validated on [`EntityKey`] construction, so the file name
    /// cannot escape the granularity directory.
    pub fn entity_path(&self, key: &EntityKey) -> PathBuf {
        self.granularity_dir(key.granularity())
            .join(format!("{}.csv", key.entity_id()))
    }

    /// Default progress ledger path
    pub fn ledger_path(&self) -> PathBuf {
        self.root_dir.join(LEDGER_FILE_NAME)
    }

    /// Default entity listing path
    pub fn listings_path(&self) -> PathBuf {
        self.root_dir.join(LISTINGS_FILE_NAME)
    }

    /// Ensure the granularity directory for `key` exists
    pub fn ensure_directories(&self, key: &EntityKey) -> Result<(), StoreError> {
        let dir_path = self.granularity_dir(key.granularity());
        std::fs::create_dir_all(&dir_path).map_err(|e| {
            StoreError::IoError(format!(
                "Failed to create directory {}: {}",
                dir_path.display(),
                e
            ))
        })
    }
}
