//! Window planning
//!
//! Splits a `[global_start, global_end)` span into fixed-size, contiguous,
//! non-overlapping request windows. Planning is pure and deterministic: it is re-run
//! on every process start and the ledger decides which windows still need work.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Half-open time interval `[start, end)` covered by one fetch request
///
/// Both bounds are Unix timestamps in milliseconds and `start < end` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimeWindow {
    start: i64,
    end: i64,
}

impl TimeWindow {
    /// Create a window, returning `None` unless `start < end`
    pub fn new(start: i64, end: i64) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    /// Inclusive start (Unix milliseconds); the ledger key for this window
    pub fn start(&self) -> i64 {
        self.start
    }

    /// Exclusive end (Unix milliseconds)
    pub fn end(&self) -> i64 {
        self.end
    }

    /// Window length in milliseconds
    pub fn len_ms(&self) -> i64 {
        self.end - self.start
    }

    /// Whether `timestamp` falls inside `[start, end)`
    pub fn contains(&self, timestamp: i64) -> bool {
        timestamp >= self.start && timestamp < self.end
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Lazy, restartable sequence of windows covering a span
///
/// Every window is `chunk_ms` long except possibly the last, which is clipped to the
/// span end.
#[derive(Debug, Clone)]
pub struct WindowPlan {
    next_start: i64,
    end: i64,
    chunk_ms: i64,
}

impl WindowPlan {
    /// Plan windows over `[start, end)` with the given chunk size
    ///
    /// A degenerate span (`start >= end`) or a non-positive chunk yields nothing.
    pub fn new(start: i64, end: i64, chunk_ms: i64) -> Self {
        let end = if chunk_ms <= 0 { start } else { end };
        Self {
            next_start: start,
            end,
            chunk_ms,
        }
    }
}

impl Iterator for WindowPlan {
    type Item = TimeWindow;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next_start >= self.end {
            return None;
        }

        let window_end = self.next_start.saturating_add(self.chunk_ms).min(self.end);
        let window = TimeWindow {
            start: self.next_start,
            end: window_end,
        };
        self.next_start = window_end;
        Some(window)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.next_start >= self.end {
            return (0, Some(0));
        }
        let span = (self.end - self.next_start) as u128;
        let chunk = self.chunk_ms as u128;
        let remaining = span.div_ceil(chunk);
        let remaining = usize::try_from(remaining).unwrap_or(usize::MAX);
        (remaining, Some(remaining))
    }
}

/// Plan windows over `[start, end)` and collect them in chronological order
pub fn plan_windows(start: i64, end: i64, chunk_ms: i64) -> Vec<TimeWindow> {
    WindowPlan::new(start, end, chunk_ms).collect()
}
