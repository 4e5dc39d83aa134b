//! Ledger subcommand: verify and reset

use crate::output::{CsvEntityStore, EntityStore};
use crate::resume::{LedgerLock, ProgressLedger};
use clap::Parser;
use serde::Serialize;
use std::path::Path;

use super::{Cli, CliError, OutputFormat};

/// Ledger command for checking or clearing recorded progress
#[derive(Parser, Debug)]
pub struct LedgerCommand {
    /// What to do
    #[command(subcommand)]
    pub action: LedgerAction,
}

/// Ledger actions
#[derive(clap::Subcommand, Debug)]
pub enum LedgerAction {
    /// Load the ledger and summarize recorded windows per key
    Verify,
    /// Delete the ledger so the next run starts from scratch
    Reset {
        /// Confirm the reset
        #[arg(long)]
        yes: bool,
    },
}

/// Recorded progress of one key
#[derive(Debug, Serialize)]
struct KeySummary {
    key: String,
    windows: usize,
    first_window_start: Option<i64>,
    last_window_start: Option<i64>,
    /// Covered end of the newest window recorded short of its full length
    clipped_until: Option<i64>,
    last_stored_timestamp: Option<i64>,
}

impl LedgerCommand {
    /// Execute the ledger command
    pub fn execute(&self, cli: &Cli) -> Result<(), CliError> {
        let store = CsvEntityStore::new(&cli.data_dir);
        let ledger_path = store.layout().ledger_path();
        match &self.action {
            LedgerAction::Verify => verify(&store, &ledger_path, cli.output_format),
            LedgerAction::Reset { yes } => reset(&ledger_path, *yes, cli.output_format),
        }
    }
}

fn verify(store: &CsvEntityStore, ledger_path: &Path, format: OutputFormat) -> Result<(), CliError> {
    if !ledger_path.exists() {
        match format {
            OutputFormat::Json => println!("{}", serde_json::json!({ "exists": false, "keys": [] })),
            OutputFormat::Human => println!("No ledger found at {}", ledger_path.display()),
        }
        return Ok(());
    }

    let ledger = ProgressLedger::load(ledger_path).map_err(|e| {
        eprintln!("Ledger at {} is unreadable: {e}", ledger_path.display());
        CliError::from(e)
    })?;

    let summaries: Vec<KeySummary> = ledger
        .keys()
        .into_iter()
        .map(|key| {
            let completed = ledger.completed(&key);
            // Store errors only affect the report column here.
            let last_stored_timestamp = store.last_timestamp(&key).ok().flatten();
            KeySummary {
                key: key.to_string(),
                windows: completed.len(),
                first_window_start: completed.first().copied(),
                last_window_start: completed.last().copied(),
                clipped_until: ledger.clipped(&key).last().map(|(_, end)| *end),
                last_stored_timestamp,
            }
        })
        .collect();

    match format {
        OutputFormat::Json => {
            let output = serde_json::json!({
                "exists": true,
                "path": ledger_path.display().to_string(),
                "updated_at": ledger.updated_at(),
                "total_windows": ledger.total_windows(),
                "keys": summaries,
            });
            println!("{output}");
        }
        OutputFormat::Human => {
            println!("Ledger: {}", ledger_path.display());
            println!("Keys: {}", summaries.len());
            println!("Recorded windows: {}", ledger.total_windows());
            for summary in &summaries {
                println!(
                    "  {} | windows={} | first={} | last={} | clipped_until={} | stored_until={}",
                    summary.key,
                    summary.windows,
                    fmt_opt(summary.first_window_start),
                    fmt_opt(summary.last_window_start),
                    fmt_opt(summary.clipped_until),
                    fmt_opt(summary.last_stored_timestamp),
                );
            }
        }
    }
    Ok(())
}

fn reset(ledger_path: &Path, confirmed: bool, format: OutputFormat) -> Result<(), CliError> {
    if !confirmed {
        return Err(CliError::InvalidArgument(
            "ledger reset discards all recorded progress; pass --yes to confirm".to_string(),
        ));
    }

    let mut run_lock = LedgerLock::open(ledger_path)?;
    let _held = run_lock.try_hold()?;
    let removed = ProgressLedger::reset(ledger_path)?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::json!({ "removed": removed })),
        OutputFormat::Human if removed => println!("Ledger {} removed", ledger_path.display()),
        OutputFormat::Human => println!("No ledger found at {}", ledger_path.display()),
    }
    Ok(())
}

fn fmt_opt(value: Option<i64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}
