//! CLI command implementations

pub mod entities;
pub mod error;
pub mod ingest;
pub mod ledger;

pub use entities::EntitiesCommand;
pub use error::CliError;
pub use ingest::IngestArgs;
pub use ledger::LedgerCommand;

use crate::shutdown::SharedShutdown;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// OHLC Backfill CLI
#[derive(Parser, Debug)]
#[command(name = "ohlc-backfill")]
#[command(about = "Resumable OHLC history backfill from CoinGecko", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Output format (json or human)
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Human)]
    pub output_format: OutputFormat,

    /// Data root holding entity stores, the ledger and the market listing
    #[arg(long, global = true, env = "OHLC_DATA_DIR", default_value = "data")]
    pub data_dir: PathBuf,
}

/// CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Fetch every pending window for the selected entities
    Ingest(IngestArgs),

    /// Fetch or inspect the market listing that selects entities
    Entities(EntitiesCommand),

    /// Inspect or reset the progress ledger
    Ledger(LedgerCommand),
}

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable output
    Human,
    /// JSON output
    Json,
}

/// How a command ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    /// Everything requested was done
    Complete,
    /// The run made progress but left windows for a later run
    Partial,
}

impl CommandOutcome {
    /// Process exit code: 0 complete, 2 partial
    pub fn exit_code(&self) -> i32 {
        match self {
            CommandOutcome::Complete => 0,
            CommandOutcome::Partial => 2,
        }
    }
}

impl Cli {
    /// Dispatch the selected command
    pub async fn execute(&self, shutdown: SharedShutdown) -> Result<CommandOutcome, CliError> {
        match &self.command {
            Commands::Ingest(args) => {
                let report = args.execute(self, shutdown).await?;
                Ok(if report.is_complete() {
                    CommandOutcome::Complete
                } else {
                    CommandOutcome::Partial
                })
            }
            Commands::Entities(cmd) => {
                cmd.execute(self).await?;
                Ok(CommandOutcome::Complete)
            }
            Commands::Ledger(cmd) => {
                cmd.execute(self)?;
                Ok(CommandOutcome::Complete)
            }
        }
    }
}
