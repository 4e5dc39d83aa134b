//! CLI error types and conversions

use crate::downloader::IngestError;
use crate::fetcher::FetchError;
use crate::identifier::IdentifierError;
use crate::output::StoreError;
use crate::registry::RegistryError;
use crate::resume::LedgerError;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Identifier error
    #[error("identifier error: {0}")]
    IdentifierError(#[from] IdentifierError),

    /// Registry error
    #[error("registry error: {0}")]
    RegistryError(#[from] RegistryError),

    /// Ingest error
    #[error("ingest error: {0}")]
    IngestError(#[from] IngestError),

    /// Fetcher error
    #[error("fetcher error: {0}")]
    FetchError(#[from] FetchError),

    /// Store error
    #[error("store error: {0}")]
    StoreError(#[from] StoreError),

    /// Ledger error
    #[error("ledger error: {0}")]
    LedgerError(#[from] LedgerError),

    /// Invalid argument
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    ConfigurationError(String),

    /// Result could not be rendered
    #[error("output error: {0}")]
    OutputError(String),
}
