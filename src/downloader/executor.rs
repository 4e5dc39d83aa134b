//! Fetch task executor
//!
//! Runs the per-window state machine: ledger check, one request, store append,
//! ledger mark. The store is always written before the ledger, so a crash between
//! the two leaves a window that is re-fetched on the next run, never one that is
//! recorded without its data.
//!
//! A response holding a candle that fails validation fails the whole window as a
//! decode error. Nothing is stored and the window is requested again next run.

use crate::downloader::job::{FailureKind, FetchTask, TaskOutcome, TaskState};
use crate::fetcher::DataSource;
use crate::metrics::WindowMetrics;
use crate::output::EntityStore;
use crate::resume::SharedLedger;
use crate::Candle;
use std::sync::Arc;
use tracing::{debug, info, info_span, warn, Instrument};

/// Executes fetch tasks against a data source, entity store and ledger
#[derive(Clone)]
pub struct TaskExecutor {
    source: Arc<dyn DataSource>,
    store: Arc<dyn EntityStore>,
    ledger: Arc<SharedLedger>,
}

impl TaskExecutor {
    /// Create an executor
    pub fn new(
        source: Arc<dyn DataSource>,
        store: Arc<dyn EntityStore>,
        ledger: Arc<SharedLedger>,
    ) -> Self {
        Self {
            source,
            store,
            ledger,
        }
    }

    /// Ledger the executor records completions in
    pub fn ledger(&self) -> &Arc<SharedLedger> {
        &self.ledger
    }

    /// Store the executor appends to
    pub fn store(&self) -> &Arc<dyn EntityStore> {
        &self.store
    }

    /// Run one task to a terminal state
    ///
    /// Never returns an error: every failure is captured in the outcome so sibling
    /// tasks are unaffected.
    pub async fn execute(&self, task: &FetchTask) -> TaskOutcome {
        let span = info_span!(
            "fetch_task",
            entity = %task.key.entity_id(),
            granularity = %task.key.granularity(),
            window_start = task.window.start(),
            window_end = task.window.end(),
        );
        self.run_state_machine(task).instrument(span).await
    }

    async fn run_state_machine(&self, task: &FetchTask) -> TaskOutcome {
        let mut state = TaskState::Pending;

        if self.ledger.is_complete(&task.key, task.window).await {
            debug!(from = ?state, to = ?TaskState::Skipped, "Window already recorded");
            return TaskOutcome::skipped(task.clone());
        }

        state = transition(state, TaskState::Fetching);
        let metrics = WindowMetrics::start(task.key.granularity().as_str());

        let fetched = self
            .source
            .fetch_window(task.key.entity_id(), task.key.granularity(), task.window)
            .await;

        let candles = match fetched {
            Ok(candles) => candles,
            Err(e) => {
                let kind = if e.is_decode() {
                    FailureKind::Decode
                } else {
                    FailureKind::Transport
                };
                warn!(kind = %kind, error = %e, "Window fetch failed, will retry next run");
                metrics.record_failure(kind.as_str());
                return TaskOutcome::failed(task.clone(), kind, e.to_string(), true);
            }
        };

        let received = candles.len();
        let candles = retain_window_candles(task, candles);
        if candles.len() < received {
            warn!(
                received,
                kept = candles.len(),
                "Dropped candles outside the window"
            );
        }

        if let Err(reason) = validate_candles(&candles) {
            warn!(%reason, "Window returned an invalid candle, will retry next run");
            metrics.record_failure(FailureKind::Decode.as_str());
            return TaskOutcome::failed(task.clone(), FailureKind::Decode, reason, true);
        }

        let appended = if candles.is_empty() {
            debug!("Source returned no data for window");
            0
        } else {
            match self.store.append(&task.key, &candles) {
                Ok(appended) => {
                    state = transition(state, TaskState::Appended);
                    appended
                }
                Err(e) => {
                    warn!(error = %e, "Store append failed");
                    metrics.record_failure(FailureKind::Persistence.as_str());
                    return TaskOutcome::failed(
                        task.clone(),
                        FailureKind::Persistence,
                        format!("store append failed: {e}"),
                        true,
                    );
                }
            }
        };

        if let Err(e) = self
            .ledger
            .mark_and_persist(task)
            .await
        {
            warn!(error = %e, "Ledger persist failed after store append");
            metrics.record_failure(FailureKind::Persistence.as_str());
            return TaskOutcome::failed(
                task.clone(),
                FailureKind::Persistence,
                format!("ledger persist failed: {e}"),
                true,
            );
        }

        transition(state, TaskState::Marked);
        metrics.record_marked(appended);
        info!(candles = appended, "Window complete");
        TaskOutcome::marked(task.clone(), appended)
    }
}

fn transition(from: TaskState, to: TaskState) -> TaskState {
    debug_assert!(from.can_transition_to(to), "illegal transition {from:?} -> {to:?}");
    debug!(from = ?from, to = ?to, "Task state transition");
    to
}

/// First validation failure in a response, if any
fn validate_candles(candles: &[Candle]) -> Result<(), String> {
    for candle in candles {
        candle
            .validate()
            .map_err(|reason| format!("invalid candle at {}: {reason}", candle.timestamp))?;
    }
    Ok(())
}

/// Keep candles inside the task window
///
/// Candles outside it belong to a neighbouring window, which stores them itself.
fn retain_window_candles(task: &FetchTask, candles: Vec<Candle>) -> Vec<Candle> {
    candles
        .into_iter()
        .filter(|candle| task.window.contains(candle.timestamp))
        .collect()
}
