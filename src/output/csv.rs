//! CSV entity store

use crate::{Candle, EntityKey};
use csv::{ReaderBuilder, Writer};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info};

use super::{EntityStore, StoreError, StoreLayout, StoreResult};

const DEFAULT_BUFFER_SIZE: usize = 8192; // 8KB buffer

/// CSV record for one candle
#[derive(Debug, Serialize, Deserialize)]
struct CandleRecord {
    timestamp: i64,
    open: String,
    high: String,
    low: String,
    close: String,
}

impl From<&Candle> for CandleRecord {
    fn from(candle: &Candle) -> Self {
        Self {
            timestamp: candle.timestamp,
            open: candle.open.to_string(),
            high: candle.high.to_string(),
            low: candle.low.to_string(),
            close: candle.close.to_string(),
        }
    }
}

impl CandleRecord {
    fn into_candle(self) -> Result<Candle, String> {
        let parse = |field: &str, value: &str| {
            Decimal::from_str(value).map_err(|e| format!("invalid {field} {value:?}: {e}"))
        };

        Ok(Candle {
            timestamp: self.timestamp,
            open: parse("open", &self.open)?,
            high: parse("high", &self.high)?,
            low: parse("low", &self.low)?,
            close: parse("close", &self.close)?,
        })
    }
}

/// Entity store keeping one CSV file per key
///
/// Appends merge with the existing file, keep rows sorted by timestamp with no
/// duplicates, and replace the file atomically.
#[derive(Debug, Clone)]
pub struct CsvEntityStore {
    layout: StoreLayout,
}

impl CsvEntityStore {
    /// Create a store rooted at `data_dir`
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            layout: StoreLayout::new(data_dir),
        }
    }

    /// Path layout used by this store
    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    fn read_file(path: &Path) -> StoreResult<Vec<Candle>> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(StoreError::IoError(format!(
                    "Failed to open {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        let mut reader = ReaderBuilder::new().has_headers(true).from_reader(file);
        let mut candles = Vec::new();
        for record in reader.deserialize::<CandleRecord>() {
            let record = record.map_err(|e| StoreError::Corrupt {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;
            let candle = record.into_candle().map_err(|message| StoreError::Corrupt {
                path: path.display().to_string(),
                message,
            })?;
            candles.push(candle);
        }

        candles.sort_by_key(|c| c.timestamp);
        Ok(candles)
    }

    fn write_file(path: &Path, candles: &[Candle]) -> StoreResult<()> {
        let parent_dir = path.parent().unwrap_or_else(|| Path::new("."));
        let temp_file = tempfile::NamedTempFile::new_in(parent_dir)
            .map_err(|e| StoreError::IoError(format!("Failed to create temp file: {e}")))?;

        let buf_writer = BufWriter::with_capacity(DEFAULT_BUFFER_SIZE, temp_file);
        let mut writer = Writer::from_writer(buf_writer);
        for candle in candles {
            writer
                .serialize(CandleRecord::from(candle))
                .map_err(|e| StoreError::CsvError(format!("Failed to write candle: {e}")))?;
        }

        let mut buf_writer = writer
            .into_inner()
            .map_err(|e| StoreError::IoError(format!("Failed to get inner writer: {e}")))?;
        buf_writer
            .flush()
            .map_err(|e| StoreError::IoError(format!("Failed to flush: {e}")))?;
        let temp_file = buf_writer
            .into_inner()
            .map_err(|e| StoreError::IoError(format!("Failed to get file handle: {e}")))?;

        temp_file
            .as_file()
            .sync_all()
            .map_err(|e| StoreError::IoError(format!("Failed to sync file: {e}")))?;
        temp_file
            .persist(path)
            .map_err(|e| StoreError::IoError(format!("Failed to persist temp file: {e}")))?;

        if let Ok(dir) = File::open(parent_dir) {
            let _ = dir.sync_all();
        }
        Ok(())
    }
}

impl EntityStore for CsvEntityStore {
    fn load(&self, key: &EntityKey) -> StoreResult<Vec<Candle>> {
        Self::read_file(&self.layout.entity_path(key))
    }

    fn append(&self, key: &EntityKey, candles: &[Candle]) -> StoreResult<usize> {
        if candles.is_empty() {
            return Ok(0);
        }

        self.layout.ensure_directories(key)?;
        let path = self.layout.entity_path(key);

        let mut merged: BTreeMap<i64, Candle> = Self::read_file(&path)?
            .into_iter()
            .map(|c| (c.timestamp, c))
            .collect();
        let existing = merged.len();

        // Newly fetched rows replace stored rows with the same timestamp
        for candle in candles {
            merged.insert(candle.timestamp, candle.clone());
        }

        let rows: Vec<Candle> = merged.into_values().collect();
        Self::write_file(&path, &rows)?;

        debug!(
            key = %key,
            path = %path.display(),
            appended = candles.len(),
            existing,
            total = rows.len(),
            "Store file rewritten"
        );
        if existing == 0 {
            info!(key = %key, path = %path.display(), "Created store file");
        }

        Ok(candles.len())
    }
}
