//! Unit tests for CLI argument parsing

use clap::Parser;
use ohlc_backfill::cli::{Cli, CommandOutcome, Commands, OutputFormat};
use ohlc_backfill::downloader::config::{DEFAULT_GLOBAL_START_MS, DEFAULT_PACING_MS, DEFAULT_POOL_SIZE};
use ohlc_backfill::{Granularity, DAY_MS};
use std::path::PathBuf;
use std::time::Duration;

#[test]
fn test_ingest_defaults() {
    let cli = Cli::try_parse_from(["ohlc-backfill", "ingest"]).unwrap();
    let Commands::Ingest(args) = &cli.command else {
        panic!("expected ingest command");
    };

    assert_eq!(cli.data_dir, PathBuf::from("data"));
    assert_eq!(cli.output_format, OutputFormat::Human);
    assert_eq!(args.concurrency, DEFAULT_POOL_SIZE);
    assert_eq!(args.pacing_ms, DEFAULT_PACING_MS);

    let config = args.engine_config().unwrap();
    assert_eq!(config.global_start_ms, DEFAULT_GLOBAL_START_MS);
    assert_eq!(config.global_end_ms, None);
    assert_eq!(config.granularities, Granularity::all().to_vec());
    assert_eq!(config.chunk_ms(Granularity::Daily), 180 * DAY_MS);
    assert_eq!(config.chunk_ms(Granularity::Hourly), 31 * DAY_MS);
}

#[test]
fn test_ingest_overrides() {
    let cli = Cli::try_parse_from([
        "ohlc-backfill",
        "--data-dir",
        "/tmp/ohlc",
        "--output-format",
        "json",
        "ingest",
        "--start",
        "2020-01-01",
        "--end",
        "2020-12-31",
        "--concurrency",
        "8",
        "--pacing-ms",
        "250",
        "--granularity",
        "hourly",
        "--hourly-chunk-days",
        "30",
        "--id",
        "bitcoin",
        "--id",
        "ethereum",
    ])
    .unwrap();
    let Commands::Ingest(args) = &cli.command else {
        panic!("expected ingest command");
    };

    assert_eq!(cli.data_dir, PathBuf::from("/tmp/ohlc"));
    assert_eq!(cli.output_format, OutputFormat::Json);
    assert_eq!(args.ids, ["bitcoin", "ethereum"]);

    let config = args.engine_config().unwrap();
    assert_eq!(config.global_start_ms, 1_577_836_800_000);
    assert_eq!(config.global_end_ms, Some(1_609_459_200_000));
    assert_eq!(config.pool_size, 8);
    assert_eq!(config.pacing, Duration::from_millis(250));
    assert_eq!(config.granularities, vec![Granularity::Hourly]);
    assert_eq!(config.chunk_ms(Granularity::Hourly), 30 * DAY_MS);
}

#[test]
fn test_concurrency_is_bounded() {
    assert!(Cli::try_parse_from(["ohlc-backfill", "ingest", "--concurrency", "0"]).is_err());
    assert!(Cli::try_parse_from(["ohlc-backfill", "ingest", "--concurrency", "64"]).is_err());
}

#[test]
fn test_inverted_range_is_a_configuration_error() {
    let cli = Cli::try_parse_from([
        "ohlc-backfill",
        "ingest",
        "--start",
        "2021-01-01",
        "--end",
        "2020-01-01",
    ])
    .unwrap();
    let Commands::Ingest(args) = &cli.command else {
        panic!("expected ingest command");
    };
    assert!(args.engine_config().is_err());
}

#[test]
fn test_ledger_and_entities_commands_parse() {
    assert!(Cli::try_parse_from(["ohlc-backfill", "ledger", "verify"]).is_ok());
    assert!(Cli::try_parse_from(["ohlc-backfill", "ledger", "reset", "--yes"]).is_ok());
    assert!(Cli::try_parse_from(["ohlc-backfill", "entities", "list", "--top-n", "10"]).is_ok());
    assert!(Cli::try_parse_from(["ohlc-backfill", "entities", "fetch"]).is_ok());
    assert!(Cli::try_parse_from(["ohlc-backfill", "download"]).is_err());
}

#[test]
fn test_exit_codes() {
    assert_eq!(CommandOutcome::Complete.exit_code(), 0);
    assert_eq!(CommandOutcome::Partial.exit_code(), 2);
}
