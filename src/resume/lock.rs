//! Run lock for a progress ledger
//!
//! One ingestion run owns a ledger at a time. The run lock is an advisory fd-lock on
//! `<ledger>.run.lock`, separate from the short-lived lock `save`/`load` take on
//! `<ledger>.lock`, so holding it never blocks the run's own ledger writes.

use super::ledger::LedgerError;
use fd_lock::{RwLock, RwLockWriteGuard};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

/// Advisory lock file guarding a ledger for the duration of a run
///
/// ```no_run
/// use ohlc_backfill::resume::LedgerLock;
/// use std::path::Path;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let mut lock = LedgerLock::open(Path::new("data/progress_ledger.json"))?;
/// let _held = lock.try_hold()?;
/// // ... run ingestion while `_held` is alive ...
/// # Ok(())
/// # }
/// ```
pub struct LedgerLock {
    path: PathBuf,
    lock: RwLock<File>,
}

impl LedgerLock {
    /// Open (creating if needed) the run lock file next to `ledger_path`
    pub fn open(ledger_path: &Path) -> Result<Self, LedgerError> {
        if let Some(parent) = ledger_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| LedgerError::IoError(e.to_string()))?;
        }

        let path = ledger_path.with_extension("run.lock");
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| LedgerError::LockError(format!("Failed to open lock file: {e}")))?;

        Ok(Self {
            path,
            lock: RwLock::new(file),
        })
    }

    /// Lock file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Take the exclusive lock without blocking
    ///
    /// The lock is released when the returned guard is dropped. Fails immediately if
    /// another process holds it.
    pub fn try_hold(&mut self) -> Result<RwLockWriteGuard<'_, File>, LedgerError> {
        let path = self.path.display().to_string();
        self.lock.try_write().map_err(|e| {
            LedgerError::LockError(format!(
                "ledger is in use by another run ({path}): {e}"
            ))
        })
    }
}
