//! Progress ledger persistence
//!
//! The ledger is the authoritative record of which request windows have been
//! fetched and stored, keyed by entity, granularity and window start. It is written
//! atomically after every completed window and guarded by an fd-lock on a sibling
//! `.lock` file.
//!
//! A window clipped to the run end is recorded together with the end it covered.
//! A later run that plans a longer window at the same start only sees it as
//! complete once that window has been fetched in full.

use crate::downloader::job::FetchTask;
use crate::downloader::window::TimeWindow;
use crate::{EntityKey, Granularity};
use fd_lock::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Current ledger schema version
const SCHEMA_VERSION: &str = "1.0.0";

/// Maximum allowed ledger file size (32 MB) to prevent memory exhaustion
pub const MAX_LEDGER_FILE_SIZE: u64 = 32 * 1024 * 1024;

type CompletedStarts = BTreeMap<Granularity, BTreeSet<i64>>;

/// Covered end per clipped window start
type ClippedEnds = BTreeMap<Granularity, BTreeMap<i64, i64>>;

/// Durable record of completed windows
///
/// Serialized as
/// `{"schema_version": "1.0.0", "updated_at": ms, "entities": {"bitcoin": {"daily": [..]}}}`,
/// plus `"clipped": {"bitcoin": {"daily": {"<start>": <end>}}}` while a clipped
/// window is recorded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProgressLedger {
    schema_version: String,
    updated_at: i64,
    entities: BTreeMap<String, CompletedStarts>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    clipped: BTreeMap<String, ClippedEnds>,
}

impl Default for ProgressLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressLedger {
    /// Create an empty ledger
    pub fn new() -> Self {
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            updated_at: chrono::Utc::now().timestamp_millis(),
            entities: BTreeMap::new(),
            clipped: BTreeMap::new(),
        }
    }

    /// Whether `window` is recorded complete for `key`
    ///
    /// The start must be recorded, and a clipped record must reach at least
    /// `window.end()`.
    pub fn is_complete(&self, key: &EntityKey, window: TimeWindow) -> bool {
        self.starts(key)
            .is_some_and(|starts| starts.contains(&window.start()))
            && self
                .clipped_end(key, window.start())
                .map_or(true, |end| end >= window.end())
    }

    /// Record the full window starting at `start` as complete
    ///
    /// Idempotent. Returns `true` if the ledger changed, which includes a clipped
    /// record at `start` being superseded.
    pub fn mark_complete(&mut self, key: &EntityKey, start: i64) -> bool {
        let inserted = self.insert_start(key, start);
        let superseded = self.set_clipped_end(key, start, None).is_some();

        let changed = inserted || superseded;
        if changed {
            self.updated_at = chrono::Utc::now().timestamp_millis();
        }
        changed
    }

    /// Record a window clipped to the run end, covering `[start, window.end())`
    ///
    /// A start already recorded as a full window, or clipped at a later end, is
    /// left as it is. Returns `true` if the ledger changed.
    pub fn mark_clipped(&mut self, key: &EntityKey, window: TimeWindow) -> bool {
        let start = window.start();
        let covered = self.clipped_end(key, start);
        let recorded = self.starts(key).is_some_and(|starts| starts.contains(&start));

        match covered {
            None if recorded => return false,
            Some(end) if end >= window.end() => return false,
            _ => {}
        }

        self.insert_start(key, start);
        self.set_clipped_end(key, start, Some(window.end()));
        self.updated_at = chrono::Utc::now().timestamp_millis();
        true
    }

    /// Record `task` complete, full or clipped
    pub fn mark_task(&mut self, task: &FetchTask) -> bool {
        if task.clipped {
            self.mark_clipped(&task.key, task.window)
        } else {
            self.mark_complete(&task.key, task.window.start())
        }
    }

    fn insert_start(&mut self, key: &EntityKey, start: i64) -> bool {
        self.entities
            .entry(key.entity_id().to_string())
            .or_default()
            .entry(key.granularity())
            .or_default()
            .insert(start)
    }

    /// Set or clear the covered end of a clipped start, returning the previous one
    fn set_clipped_end(&mut self, key: &EntityKey, start: i64, end: Option<i64>) -> Option<i64> {
        match end {
            Some(end) => self
                .clipped
                .entry(key.entity_id().to_string())
                .or_default()
                .entry(key.granularity())
                .or_default()
                .insert(start, end),
            None => {
                let by_granularity = self.clipped.get_mut(key.entity_id())?;
                let ends = by_granularity.get_mut(&key.granularity())?;
                let previous = ends.remove(&start);
                if ends.is_empty() {
                    by_granularity.remove(&key.granularity());
                }
                if by_granularity.is_empty() {
                    self.clipped.remove(key.entity_id());
                }
                previous
            }
        }
    }

    fn clipped_end(&self, key: &EntityKey, start: i64) -> Option<i64> {
        self.clipped
            .get(key.entity_id())
            .and_then(|by_granularity| by_granularity.get(&key.granularity()))
            .and_then(|ends| ends.get(&start))
            .copied()
    }

    /// Snapshot of what is recorded at one start, for rollback
    fn entry_at(&self, key: &EntityKey, start: i64) -> RecordedStart {
        RecordedStart {
            start,
            recorded: self.starts(key).is_some_and(|starts| starts.contains(&start)),
            clipped_end: self.clipped_end(key, start),
        }
    }

    /// Put one start back the way `entry_at` saw it
    fn restore(&mut self, key: &EntityKey, previous: RecordedStart) {
        if !previous.recorded {
            if let Some(starts) = self
                .entities
                .get_mut(key.entity_id())
                .and_then(|by_granularity| by_granularity.get_mut(&key.granularity()))
            {
                starts.remove(&previous.start);
            }
        }
        self.set_clipped_end(key, previous.start, previous.clipped_end);
    }

    /// Completed window starts for `key`, ascending
    pub fn completed(&self, key: &EntityKey) -> Vec<i64> {
        self.starts(key)
            .map(|starts| starts.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Clipped windows recorded for `key` as `(start, covered end)`, ascending
    pub fn clipped(&self, key: &EntityKey) -> Vec<(i64, i64)> {
        self.clipped
            .get(key.entity_id())
            .and_then(|by_granularity| by_granularity.get(&key.granularity()))
            .map(|ends| ends.iter().map(|(start, end)| (*start, *end)).collect())
            .unwrap_or_default()
    }

    /// Whether the ledger holds any entry for `key`
    pub fn contains_key(&self, key: &EntityKey) -> bool {
        self.starts(key).is_some_and(|starts| !starts.is_empty())
    }

    /// Total number of completed windows across all keys
    pub fn total_windows(&self) -> usize {
        self.entities
            .values()
            .flat_map(|by_granularity| by_granularity.values())
            .map(BTreeSet::len)
            .sum()
    }

    /// All keys with at least one completed window
    ///
    /// Entity ids that no longer pass validation are skipped with a warning.
    pub fn keys(&self) -> Vec<EntityKey> {
        let mut keys = Vec::new();
        for (entity_id, by_granularity) in &self.entities {
            for (granularity, starts) in by_granularity {
                if starts.is_empty() {
                    continue;
                }
                match EntityKey::new(entity_id, *granularity) {
                    Ok(key) => keys.push(key),
                    Err(e) => warn!(entity = %entity_id, error = %e, "Skipping invalid ledger entry"),
                }
            }
        }
        keys
    }

    /// Last modification time (Unix milliseconds)
    pub fn updated_at(&self) -> i64 {
        self.updated_at
    }

    fn starts(&self, key: &EntityKey) -> Option<&BTreeSet<i64>> {
        self.entities
            .get(key.entity_id())
            .and_then(|by_granularity| by_granularity.get(&key.granularity()))
    }

    /// Save the ledger with an atomic replace under the file lock
    ///
    /// Writes a temp file in the target directory, syncs it, renames it over the
    /// target and syncs the parent directory. A crash leaves either the old or the
    /// new document, never a torn one.
    pub fn save(&self, path: &Path) -> Result<(), LedgerError> {
        debug!(
            path = %path.display(),
            windows = self.total_windows(),
            "Saving progress ledger"
        );

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| LedgerError::IoError(e.to_string()))?;
        }

        let json = serde_json::to_string_pretty(self)
            .map_err(|e| LedgerError::SerializationError(e.to_string()))?;

        let lock_file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path.with_extension("lock"))
            .map_err(|e| LedgerError::LockError(format!("Failed to create lock file: {e}")))?;

        let mut lock = RwLock::new(lock_file);
        let _guard = lock
            .write()
            .map_err(|e| LedgerError::LockError(format!("Failed to acquire write lock: {e}")))?;

        let parent_dir = path.parent().unwrap_or_else(|| Path::new("."));
        let mut temp_file = tempfile::NamedTempFile::new_in(parent_dir)
            .map_err(|e| LedgerError::IoError(format!("Failed to create temp file: {e}")))?;

        temp_file
            .write_all(json.as_bytes())
            .map_err(|e| LedgerError::IoError(format!("Failed to write temp file: {e}")))?;
        temp_file
            .flush()
            .map_err(|e| LedgerError::IoError(format!("Failed to flush temp file: {e}")))?;
        temp_file
            .as_file()
            .sync_all()
            .map_err(|e| LedgerError::IoError(format!("Failed to sync temp file: {e}")))?;

        temp_file
            .persist(path)
            .map_err(|e| LedgerError::IoError(format!("Failed to persist temp file: {e}")))?;

        if let Ok(dir) = std::fs::File::open(parent_dir) {
            let _ = dir.sync_all();
        }

        Ok(())
    }

    /// Load a ledger that must exist
    ///
    /// # Errors
    ///
    /// Fails if the file is unreadable, larger than [`MAX_LEDGER_FILE_SIZE`], not valid
    /// JSON, or written with an unknown schema version.
    pub fn load(path: &Path) -> Result<Self, LedgerError> {
        debug!(path = %path.display(), "Loading progress ledger");

        let lock_file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path.with_extension("lock"))
            .map_err(|e| LedgerError::LockError(format!("Failed to create lock file: {e}")))?;

        let lock = RwLock::new(lock_file);
        let _guard = lock
            .read()
            .map_err(|e| LedgerError::LockError(format!("Failed to acquire read lock: {e}")))?;

        let metadata = std::fs::metadata(path).map_err(|e| LedgerError::IoError(e.to_string()))?;
        if metadata.len() > MAX_LEDGER_FILE_SIZE {
            return Err(LedgerError::LedgerTooLarge {
                size: metadata.len(),
                max: MAX_LEDGER_FILE_SIZE,
            });
        }

        let contents =
            std::fs::read_to_string(path).map_err(|e| LedgerError::IoError(e.to_string()))?;

        let ledger: ProgressLedger = serde_json::from_str(&contents).map_err(|e| {
            warn!(path = %path.display(), error = %e, "Failed to deserialize progress ledger");
            LedgerError::Corrupt(e.to_string())
        })?;

        if ledger.schema_version != SCHEMA_VERSION {
            warn!(
                found_version = %ledger.schema_version,
                expected_version = SCHEMA_VERSION,
                "Progress ledger schema version mismatch"
            );
            return Err(LedgerError::SchemaVersionMismatch {
                expected: SCHEMA_VERSION.to_string(),
                found: ledger.schema_version,
            });
        }

        info!(
            path = %path.display(),
            windows = ledger.total_windows(),
            "Progress ledger loaded"
        );
        Ok(ledger)
    }

    /// Load the ledger, treating a missing file as an empty ledger
    ///
    /// A file that exists but cannot be read or parsed is an error, never empty.
    pub fn load_or_empty(path: &Path) -> Result<Self, LedgerError> {
        match std::fs::metadata(path) {
            Ok(_) => Self::load(path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "No progress ledger found, starting empty");
                Ok(Self::new())
            }
            Err(e) => Err(LedgerError::IoError(e.to_string())),
        }
    }

    /// Delete the ledger file (explicit operator reset)
    ///
    /// Returns `true` if a file was removed.
    pub fn reset(path: &Path) -> Result<bool, LedgerError> {
        match std::fs::remove_file(path) {
            Ok(()) => {
                warn!(path = %path.display(), "Progress ledger reset");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(LedgerError::IoError(e.to_string())),
        }
    }
}

/// What the ledger held at one start before a mark
#[derive(Debug, Clone, Copy)]
struct RecordedStart {
    start: i64,
    recorded: bool,
    clipped_end: Option<i64>,
}

/// Ledger shared by concurrent workers
///
/// Every mutation happens under one mutex and is followed by a full save, so the
/// on-disk document always reflects a prefix of the completed windows.
#[derive(Debug)]
pub struct SharedLedger {
    path: PathBuf,
    inner: Mutex<ProgressLedger>,
}

impl SharedLedger {
    /// Wrap an already loaded ledger
    pub fn new(path: impl Into<PathBuf>, ledger: ProgressLedger) -> Self {
        Self {
            path: path.into(),
            inner: Mutex::new(ledger),
        }
    }

    /// Load the ledger at `path` (missing file = empty)
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let path = path.into();
        let ledger = ProgressLedger::load_or_empty(&path)?;
        Ok(Self::new(path, ledger))
    }

    /// Ledger file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the window is recorded complete
    pub async fn is_complete(&self, key: &EntityKey, window: TimeWindow) -> bool {
        self.inner.lock().await.is_complete(key, window)
    }

    /// Whether the ledger holds any entry for `key`
    pub async fn contains_key(&self, key: &EntityKey) -> bool {
        self.inner.lock().await.contains_key(key)
    }

    /// Record a task's window complete and persist the whole ledger
    ///
    /// If the save fails the in-memory entry is rolled back so memory never claims
    /// more than disk.
    pub async fn mark_and_persist(&self, task: &FetchTask) -> Result<bool, LedgerError> {
        let mut ledger = self.inner.lock().await;
        let previous = ledger.entry_at(&task.key, task.window.start());
        if !ledger.mark_task(task) {
            return Ok(false);
        }

        let started = Instant::now();
        if let Err(e) = ledger.save(&self.path) {
            ledger.restore(&task.key, previous);
            return Err(e);
        }
        crate::metrics::record_ledger_persist(started.elapsed());

        debug!(
            key = %task.key,
            window_start = task.window.start(),
            window_end = task.window.end(),
            clipped = task.clipped,
            "Window recorded in ledger"
        );
        Ok(true)
    }

    /// Seed completed windows recovered from the store and persist once
    ///
    /// Returns how many windows were newly recorded.
    pub async fn seed_from_store(&self, tasks: &[FetchTask]) -> Result<usize, LedgerError> {
        let mut ledger = self.inner.lock().await;
        let mut added = Vec::new();
        for task in tasks {
            let previous = ledger.entry_at(&task.key, task.window.start());
            if ledger.mark_task(task) {
                added.push((task.key.clone(), previous));
            }
        }

        if added.is_empty() {
            return Ok(0);
        }

        if let Err(e) = ledger.save(&self.path) {
            for (key, previous) in added.into_iter().rev() {
                ledger.restore(&key, previous);
            }
            return Err(e);
        }
        Ok(added.len())
    }

    /// Copy of the current in-memory ledger
    pub async fn snapshot(&self) -> ProgressLedger {
        self.inner.lock().await.clone()
    }
}

/// Errors related to the progress ledger
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// Schema version mismatch
    #[error("schema version mismatch: expected {expected}, found {found}")]
    SchemaVersionMismatch {
        /// Expected schema version
        expected: String,
        /// Found schema version
        found: String,
    },

    /// Ledger file too large
    #[error("ledger file too large: {size} bytes (max: {max} bytes)")]
    LedgerTooLarge {
        /// Actual file size
        size: u64,
        /// Maximum allowed size
        max: u64,
    },

    /// Ledger file exists but is not a valid ledger document
    #[error("corrupt ledger: {0}")]
    Corrupt(String),

    /// IO error
    #[error("IO error: {0}")]
    IoError(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Lock error
    #[error("lock error: {0}")]
    LockError(String),
}
