//! Entity stores
//!
//! An entity store holds the fetched candles of one (entity, granularity) key. The
//! engine only needs two things from it: appends that are durable before they
//! return, and a way to read back what is already there.

use crate::{Candle, EntityKey};

pub mod csv;
pub mod path;

pub use self::csv::CsvEntityStore;
pub use path::StoreLayout;

/// Entity store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// IO error
    #[error("IO error: {0}")]
    IoError(String),

    /// CSV read/write error
    #[error("CSV error: {0}")]
    CsvError(String),

    /// Existing store file holds a row that cannot be parsed
    #[error("corrupt store file {path}: {message}")]
    Corrupt {
        /// Store file path
        path: String,
        /// Parse failure
        message: String,
    },
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Append-only-by-timestamp storage for one key's candles
///
/// Implementations must be safe to share across workers. The scheduler guarantees at
/// most one in-flight append per key.
pub trait EntityStore: Send + Sync {
    /// All stored candles for `key`, ascending by timestamp (empty if none)
    fn load(&self, key: &EntityKey) -> StoreResult<Vec<Candle>>;

    /// Durably add `candles` to the key's store
    ///
    /// Rows whose timestamp already exists are replaced by the new row. Returns the
    /// number of candles written. An empty slice leaves the store untouched.
    fn append(&self, key: &EntityKey, candles: &[Candle]) -> StoreResult<usize>;

    /// Timestamp of the newest stored candle
    fn last_timestamp(&self, key: &EntityKey) -> StoreResult<Option<i64>> {
        Ok(self.load(key)?.last().map(|c| c.timestamp))
    }
}
