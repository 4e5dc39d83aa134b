//! End-to-end tests of the binary that never reach the network

use assert_cmd::Command;
use std::fs;
use tempfile::TempDir;

/// 2024-01-01T00:00:00Z
const JAN_1_2024_MS: i64 = 1_704_067_200_000;

fn bin(data_dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("ohlc-backfill").unwrap();
    for var in [
        "OHLC_DATA_DIR",
        "OHLC_CONCURRENCY",
        "OHLC_PACING_MS",
        "OHLC_TOP_N",
        "COINGECKO_API_KEY",
        "COINGECKO_PRO",
        "COINGECKO_BASE_URL",
    ] {
        cmd.env_remove(var);
    }
    cmd.arg("--data-dir")
        .arg(data_dir.path());
    cmd
}

#[test]
fn test_verify_without_ledger() {
    let dir = TempDir::new().unwrap();
    let output = bin(&dir).args(["ledger", "verify"]).output().unwrap();

    assert_eq!(output.status.code(), Some(0));
    assert!(String::from_utf8_lossy(&output.stdout).contains("No ledger found"));
}

#[test]
fn test_reset_requires_confirmation() {
    let dir = TempDir::new().unwrap();
    let ledger = dir.path().join("progress_ledger.json");
    fs::write(&ledger, "{}").unwrap();

    let output = bin(&dir).args(["ledger", "reset"]).output().unwrap();
    assert_eq!(output.status.code(), Some(1));
    assert!(ledger.exists());

    let output = bin(&dir).args(["ledger", "reset", "--yes"]).output().unwrap();
    assert_eq!(output.status.code(), Some(0));
    assert!(!ledger.exists());
}

#[test]
fn test_ingest_with_corrupt_ledger_is_fatal() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("progress_ledger.json"), "not json").unwrap();

    let output = bin(&dir)
        .args(["ingest", "--id", "bitcoin", "--start", "2024-01-01", "--end", "2024-01-02"])
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(1));
    // Unreadable ledger is never silently replaced
    assert_eq!(
        fs::read_to_string(dir.path().join("progress_ledger.json")).unwrap(),
        "not json"
    );
}

#[test]
fn test_ingest_inverted_range_is_fatal() {
    let dir = TempDir::new().unwrap();
    let output = bin(&dir)
        .args(["ingest", "--id", "bitcoin", "--start", "2024-02-01", "--end", "2024-01-01"])
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn test_usage_error_exits_one() {
    let dir = TempDir::new().unwrap();
    let output = bin(&dir).args(["ingest", "--concurrency", "0"]).output().unwrap();
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn test_completed_ledger_runs_without_requests() {
    let dir = TempDir::new().unwrap();
    let ledger = serde_json::json!({
        "schema_version": "1.0.0",
        "updated_at": JAN_1_2024_MS,
        "entities": { "bitcoin": { "daily": [JAN_1_2024_MS] } },
    });
    fs::write(
        dir.path().join("progress_ledger.json"),
        serde_json::to_string(&ledger).unwrap(),
    )
    .unwrap();

    // Unroutable base URL: any request would fail the run
    let output = bin(&dir)
        .args([
            "--output-format",
            "json",
            "ingest",
            "--id",
            "bitcoin",
            "--granularity",
            "daily",
            "--start",
            "2024-01-01",
            "--end",
            "2024-01-02",
            "--base-url",
            "http://127.0.0.1:1",
            "--max-retries",
            "0",
        ])
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(0));
    let summary: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(summary["success"], true);
    assert_eq!(summary["planned"], 1);
    assert_eq!(summary["already_complete"], 1);
    assert_eq!(summary["marked"], 0);
}

#[test]
fn test_verify_reports_clipped_window() {
    let dir = TempDir::new().unwrap();
    let ledger = serde_json::json!({
        "schema_version": "1.0.0",
        "updated_at": JAN_1_2024_MS,
        "entities": { "bitcoin": { "hourly": [0, JAN_1_2024_MS] } },
        "clipped": { "bitcoin": { "hourly": { "1704067200000": JAN_1_2024_MS + 3_600_000 } } },
    });
    fs::write(
        dir.path().join("progress_ledger.json"),
        serde_json::to_string(&ledger).unwrap(),
    )
    .unwrap();

    let output = bin(&dir)
        .args(["--output-format", "json", "ledger", "verify"])
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(0));
    let summary: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(summary["total_windows"], 2);
    assert_eq!(summary["keys"][0]["key"], "bitcoin:hourly");
    assert_eq!(summary["keys"][0]["clipped_until"], JAN_1_2024_MS + 3_600_000);
}
