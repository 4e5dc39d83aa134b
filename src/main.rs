//! Main entry point for the ohlc-backfill CLI

use anyhow::Result;
use clap::Parser;
use ohlc_backfill::cli::{Cli, CommandOutcome};
use ohlc_backfill::shutdown::{install_ctrl_c_handler, ShutdownCoordinator};
use tracing::error;
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber with optional JSON formatting
fn init_tracing() {
    // LOG_FORMAT=json switches to one JSON object per line
    let json_format = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("ohlc_backfill=info"));

    if json_format {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

async fn run(cli: Cli) -> Result<CommandOutcome> {
    let shutdown = ShutdownCoordinator::shared();
    install_ctrl_c_handler(shutdown.clone());

    Ok(cli.execute(shutdown).await?)
}

#[tokio::main]
async fn main() {
    init_tracing();

    // Usage errors exit 1 so they never read as a partial run
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = if e.use_stderr() { 1 } else { 0 };
            let _ = e.print();
            std::process::exit(code);
        }
    };

    match run(cli).await {
        Ok(CommandOutcome::Complete) => {}
        Ok(outcome) => std::process::exit(outcome.exit_code()),
        Err(e) => {
            error!("Command failed: {e:#}");
            eprintln!("Error: {e:#}");
            std::process::exit(1);
        }
    }
}
