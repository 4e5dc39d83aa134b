//! Integration tests for per-window failure handling

use crate::support::{daily, ids, small_config, window, FailingStore, Reply, ScriptedSource};
use ohlc_backfill::downloader::{FailureKind, Scheduler};
use ohlc_backfill::output::CsvEntityStore;
use ohlc_backfill::resume::SharedLedger;
use std::sync::Arc;
use tempfile::TempDir;

fn ledger(dir: &TempDir) -> Arc<SharedLedger> {
    let path = CsvEntityStore::new(dir.path()).layout().ledger_path();
    Arc::new(SharedLedger::open(path).unwrap())
}

#[tokio::test]
async fn test_transport_failure_is_isolated_and_retried_next_run() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(CsvEntityStore::new(dir.path()));
    let source = Arc::new(ScriptedSource::new().reply("bitcoin", 200, Reply::Transport));

    let report = Scheduler::new(small_config(), source.clone(), store.clone(), ledger(&dir))
        .run(&ids(&["bitcoin", "ethereum"]))
        .await
        .unwrap();

    // Later windows of the same key and other keys still run
    assert_eq!(source.calls_for("bitcoin"), vec![0, 200, 400]);
    assert_eq!(source.calls_for("ethereum"), vec![0, 200, 400]);
    assert_eq!(report.marked, 5);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].key, daily("bitcoin"));
    assert_eq!(report.failures[0].kind, FailureKind::Transport);

    let rerun = Arc::new(ScriptedSource::new());
    let report = Scheduler::new(small_config(), rerun.clone(), store, ledger(&dir))
        .run(&ids(&["bitcoin", "ethereum"]))
        .await
        .unwrap();
    assert_eq!(rerun.calls_for("bitcoin"), vec![200]);
    assert_eq!(rerun.calls_for("ethereum"), Vec::<i64>::new());
    assert!(report.is_complete());
}

#[tokio::test]
async fn test_decode_failure_is_classified() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(CsvEntityStore::new(dir.path()));
    let source = Arc::new(ScriptedSource::new().reply("bitcoin", 0, Reply::Decode));
    let ledger = ledger(&dir);

    let report = Scheduler::new(small_config(), source, store, ledger.clone())
        .run(&ids(&["bitcoin"]))
        .await
        .unwrap();

    assert_eq!(report.failures_of(FailureKind::Decode), 1);
    assert!(!ledger.is_complete(&daily("bitcoin"), window(0, 200)).await);
    assert!(ledger.is_complete(&daily("bitcoin"), window(200, 400)).await);
}

#[tokio::test]
async fn test_persistence_failure_abandons_rest_of_key() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(FailingStore::new(CsvEntityStore::new(dir.path()), &["ethereum"]));
    let source = Arc::new(ScriptedSource::new());
    let ledger = ledger(&dir);

    let report = Scheduler::new(small_config(), source.clone(), store, ledger.clone())
        .run(&ids(&["bitcoin", "ethereum"]))
        .await
        .unwrap();

    // Only the first ethereum window is requested
    assert_eq!(source.calls_for("ethereum"), vec![0]);
    assert_eq!(source.calls_for("bitcoin"), vec![0, 200, 400]);

    assert_eq!(report.failures_of(FailureKind::Persistence), 1);
    assert_eq!(report.failures_of(FailureKind::Abandoned), 2);
    assert_eq!(report.marked, 3);

    let snapshot = ledger.snapshot().await;
    assert!(!snapshot.contains_key(&daily("ethereum")));
    assert_eq!(snapshot.completed(&daily("bitcoin")), vec![0, 200, 400]);
}

#[tokio::test]
async fn test_out_of_window_candles_are_dropped() {
    use crate::support::candle;
    use ohlc_backfill::output::EntityStore;

    let dir = TempDir::new().unwrap();
    let store = Arc::new(CsvEntityStore::new(dir.path()));
    let source = Arc::new(ScriptedSource::new().reply(
        "bitcoin",
        0,
        Reply::Candles(vec![candle(50, "1"), candle(250, "2")]),
    ));

    let report = Scheduler::new(small_config(), source, store.clone(), ledger(&dir))
        .run(&ids(&["bitcoin"]))
        .await
        .unwrap();

    assert!(report.is_complete());
    let timestamps: Vec<i64> = store
        .load(&daily("bitcoin"))
        .unwrap()
        .iter()
        .map(|c| c.timestamp)
        .collect();
    assert_eq!(timestamps, vec![50, 200, 400]);
}

#[tokio::test]
async fn test_invalid_candle_fails_window_for_retry() {
    use crate::support::candle;
    use ohlc_backfill::output::EntityStore;
    use ohlc_backfill::Candle;
    use rust_decimal::Decimal;

    let dir = TempDir::new().unwrap();
    let store = Arc::new(CsvEntityStore::new(dir.path()));
    // high below open
    let broken = Candle {
        timestamp: 300,
        open: Decimal::from(10),
        high: Decimal::from(5),
        low: Decimal::from(1),
        close: Decimal::from(4),
    };
    let source = Arc::new(ScriptedSource::new().reply(
        "bitcoin",
        200,
        Reply::Candles(vec![candle(200, "10"), broken]),
    ));
    let ledger = ledger(&dir);

    let report = Scheduler::new(small_config(), source, store.clone(), ledger.clone())
        .run(&ids(&["bitcoin"]))
        .await
        .unwrap();

    assert!(report.is_partial());
    assert_eq!(report.failures_of(FailureKind::Decode), 1);
    assert!(!ledger.is_complete(&daily("bitcoin"), window(200, 400)).await);
    let timestamps: Vec<i64> = store
        .load(&daily("bitcoin"))
        .unwrap()
        .iter()
        .map(|c| c.timestamp)
        .collect();
    assert_eq!(timestamps, vec![0, 400]);

    // Next run requests only the failed window and stores every row
    let fixed = Arc::new(ScriptedSource::new().reply(
        "bitcoin",
        200,
        Reply::Candles(vec![candle(200, "10"), candle(300, "11")]),
    ));
    let rerun = Scheduler::new(small_config(), fixed.clone(), store.clone(), ledger.clone())
        .run(&ids(&["bitcoin"]))
        .await
        .unwrap();

    assert!(rerun.is_complete());
    assert_eq!(fixed.calls_for("bitcoin"), vec![200]);
    assert_eq!(store.load(&daily("bitcoin")).unwrap().len(), 4);
}
