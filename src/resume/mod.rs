//! Resume capability for ingestion runs
//!
//! Provides the progress ledger with atomic writes and file locking.

pub mod ledger;
pub mod lock;

pub use ledger::{LedgerError, ProgressLedger, SharedLedger};
pub use lock::LedgerLock;
