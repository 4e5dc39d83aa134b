//! Integration tests for scheduling, pacing and shutdown

use crate::support::{daily, ids, small_config, window, Reply, ScriptedSource};
use ohlc_backfill::downloader::Scheduler;
use ohlc_backfill::output::{CsvEntityStore, EntityStore};
use ohlc_backfill::resume::SharedLedger;
use ohlc_backfill::shutdown::ShutdownCoordinator;
use ohlc_backfill::Granularity;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

fn parts(dir: &TempDir) -> (Arc<CsvEntityStore>, Arc<SharedLedger>) {
    let store = CsvEntityStore::new(dir.path());
    let ledger = SharedLedger::open(store.layout().ledger_path()).unwrap();
    (Arc::new(store), Arc::new(ledger))
}

#[tokio::test]
async fn test_pool_size_bounds_concurrent_requests() {
    let dir = TempDir::new().unwrap();
    let (store, ledger) = parts(&dir);
    let source = Arc::new(ScriptedSource::new().with_latency(Duration::from_millis(20)));

    let report = Scheduler::new(small_config().with_pool_size(2), source.clone(), store, ledger)
        .run(&ids(&["a", "b", "c", "d", "e", "f"]))
        .await
        .unwrap();

    assert!(report.is_complete());
    assert_eq!(source.call_count(), 18);
    assert!(source.max_in_flight() <= 2, "max in flight {}", source.max_in_flight());
    assert!(source.max_in_flight() >= 1);
}

#[tokio::test]
async fn test_windows_of_one_key_run_in_order_on_one_worker() {
    let dir = TempDir::new().unwrap();
    let (store, ledger) = parts(&dir);
    let source = Arc::new(ScriptedSource::new().with_latency(Duration::from_millis(5)));

    Scheduler::new(small_config().with_pool_size(4), source.clone(), store, ledger)
        .run(&ids(&["bitcoin", "ethereum", "solana"]))
        .await
        .unwrap();

    assert_eq!(source.overlapping_entity_requests(), 0);
    for entity in ["bitcoin", "ethereum", "solana"] {
        assert_eq!(source.calls_for(entity), vec![0, 200, 400]);
    }
}

#[tokio::test]
async fn test_granularities_are_planned_with_their_own_window_size() {
    let dir = TempDir::new().unwrap();
    let (store, ledger) = parts(&dir);
    let source = Arc::new(ScriptedSource::new());
    let config = small_config()
        .with_granularities(vec![Granularity::Daily, Granularity::Hourly])
        .with_chunk_ms(Granularity::Hourly, 100);

    let report = Scheduler::new(config, source.clone(), store, ledger)
        .run(&ids(&["bitcoin"]))
        .await
        .unwrap();

    assert_eq!(report.keys, 2);
    assert_eq!(report.planned, 3 + 5);
    let hourly: Vec<i64> = source
        .calls()
        .into_iter()
        .filter(|c| c.granularity == Granularity::Hourly)
        .map(|c| c.window.start())
        .collect();
    assert_eq!(hourly, vec![0, 100, 200, 300, 400]);
}

#[tokio::test]
async fn test_pacing_delays_consecutive_requests() {
    let dir = TempDir::new().unwrap();
    let (store, ledger) = parts(&dir);
    let source = Arc::new(ScriptedSource::new());
    let config = small_config()
        .with_pool_size(1)
        .with_pacing(Duration::from_millis(30));

    let started = Instant::now();
    Scheduler::new(config, source.clone(), store, ledger)
        .run(&ids(&["bitcoin"]))
        .await
        .unwrap();

    assert_eq!(source.call_count(), 3);
    assert!(started.elapsed() >= Duration::from_millis(60));
}

#[tokio::test]
async fn test_empty_window_is_recorded_complete() {
    let dir = TempDir::new().unwrap();
    let (store, ledger) = parts(&dir);
    let source = Arc::new(ScriptedSource::new().reply("bitcoin", 200, Reply::Empty));

    let report = Scheduler::new(small_config(), source, store.clone(), ledger.clone())
        .run(&ids(&["bitcoin"]))
        .await
        .unwrap();

    assert!(report.is_complete());
    assert_eq!(report.marked, 3);
    assert_eq!(report.candles_appended, 2);
    assert!(ledger.is_complete(&daily("bitcoin"), window(200, 400)).await);

    let timestamps: Vec<i64> = store
        .load(&daily("bitcoin"))
        .unwrap()
        .iter()
        .map(|c| c.timestamp)
        .collect();
    assert_eq!(timestamps, vec![0, 400]);

    // The empty window is not requested again
    let rerun = Arc::new(ScriptedSource::new());
    Scheduler::new(small_config(), rerun.clone(), store, ledger)
        .run(&ids(&["bitcoin"]))
        .await
        .unwrap();
    assert_eq!(rerun.call_count(), 0);
}

#[tokio::test]
async fn test_shutdown_stops_at_task_boundary() {
    let dir = TempDir::new().unwrap();
    let (store, ledger) = parts(&dir);
    let shutdown = ShutdownCoordinator::shared();
    let source = Arc::new(ScriptedSource::new().with_shutdown_after(1, shutdown.clone()));

    let report = Scheduler::new(small_config().with_pool_size(1), source.clone(), store, ledger.clone())
        .with_shutdown(shutdown)
        .run(&ids(&["bitcoin"]))
        .await
        .unwrap();

    // The in-flight window finishes and is recorded; the rest wait for the next run
    assert_eq!(source.call_count(), 1);
    assert_eq!(report.marked, 1);
    assert_eq!(report.interrupted, 2);
    assert!(report.is_partial());
    assert_eq!(ledger.snapshot().await.completed(&daily("bitcoin")), vec![0]);
}

#[tokio::test]
async fn test_run_end_defaults_to_now() {
    let dir = TempDir::new().unwrap();
    let (store, ledger) = parts(&dir);
    let source = Arc::new(ScriptedSource::new());
    let now = chrono::Utc::now().timestamp_millis();
    let mut config = small_config()
        .with_start_ms(now - 10 * ohlc_backfill::DAY_MS)
        .with_chunk_ms(Granularity::Daily, 4 * ohlc_backfill::DAY_MS);
    config.global_end_ms = None;

    let report = Scheduler::new(config, source, store, ledger)
        .run(&ids(&["bitcoin"]))
        .await
        .unwrap();

    assert_eq!(report.planned, 3);
}
