//! Fetch task structures and state tracking

use super::window::TimeWindow;
use crate::EntityKey;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The unit of work: one window of one (entity, granularity) key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FetchTask {
    /// Entity and granularity
    pub key: EntityKey,
    /// Window to fetch
    pub window: TimeWindow,
    /// Window is shorter than the planned chunk because it ends at the run end
    pub clipped: bool,
}

impl FetchTask {
    /// Create a task for a full window
    pub fn new(key: EntityKey, window: TimeWindow) -> Self {
        Self {
            key,
            window,
            clipped: false,
        }
    }

    /// Create a task for a window planned with `chunk_ms`
    ///
    /// A window shorter than the chunk is recorded with its covered end, so a later
    /// run with a later end fetches the rest.
    pub fn planned(key: EntityKey, window: TimeWindow, chunk_ms: i64) -> Self {
        Self {
            key,
            window,
            clipped: window.len_ms() < chunk_ms,
        }
    }
}

impl fmt::Display for FetchTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.key, self.window)
    }
}

/// Task lifecycle state
///
/// `Pending → Skipped`, `Pending → Fetching → Appended → Marked`, or
/// `Pending → Fetching → Failed`. An empty response goes straight from `Fetching`
/// to `Marked`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Not started
    #[default]
    Pending,
    /// Ledger already recorded the window; no request made
    Skipped,
    /// Request in flight
    Fetching,
    /// Candles durably appended to the store, ledger not yet updated
    Appended,
    /// Window recorded in the ledger
    Marked,
    /// Window left unrecorded; retried on the next run
    Failed,
}

impl TaskState {
    /// Whether the state ends the task
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Skipped | TaskState::Marked | TaskState::Failed)
    }

    /// Whether `next` is a legal successor of this state
    #[must_use]
    pub(crate) fn can_transition_to(&self, next: TaskState) -> bool {
        use TaskState::*;
        matches!(
            (self, next),
            (Pending, Skipped)
                | (Pending, Fetching)
                | (Pending, Failed)
                | (Fetching, Appended)
                | (Fetching, Marked)
                | (Fetching, Failed)
                | (Appended, Marked)
                | (Appended, Failed)
        )
    }
}

/// Why a task failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Network error, timeout or non-2xx response
    Transport,
    /// Response could not be decoded
    Decode,
    /// Store append or ledger write failed
    Persistence,
    /// Not attempted because an earlier persistence failure stopped the key
    Abandoned,
}

impl FailureKind {
    /// Lowercase name used in logs, metrics and reports
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Transport => "transport",
            FailureKind::Decode => "decode",
            FailureKind::Persistence => "persistence",
            FailureKind::Abandoned => "abandoned",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure details of one task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFailure {
    /// Failure class
    pub kind: FailureKind,
    /// Human-readable cause
    pub message: String,
}

/// Terminal result of executing a task
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    /// The task
    pub task: FetchTask,
    /// Terminal state
    pub state: TaskState,
    /// Candles appended to the store
    pub candles: usize,
    /// Set when `state` is `Failed`
    pub failure: Option<TaskFailure>,
    /// Whether a network request was issued
    pub fetched: bool,
}

impl TaskOutcome {
    /// Window was already complete
    pub fn skipped(task: FetchTask) -> Self {
        Self {
            task,
            state: TaskState::Skipped,
            candles: 0,
            failure: None,
            fetched: false,
        }
    }

    /// Window recorded in the ledger
    pub fn marked(task: FetchTask, candles: usize) -> Self {
        Self {
            task,
            state: TaskState::Marked,
            candles,
            failure: None,
            fetched: true,
        }
    }

    /// Window failed
    pub fn failed(
        task: FetchTask,
        kind: FailureKind,
        message: impl Into<String>,
        fetched: bool,
    ) -> Self {
        Self {
            task,
            state: TaskState::Failed,
            candles: 0,
            failure: Some(TaskFailure {
                kind,
                message: message.into(),
            }),
            fetched,
        }
    }

    /// Failure kind, if failed
    pub fn failure_kind(&self) -> Option<FailureKind> {
        self.failure.as_ref().map(|f| f.kind)
    }
}
