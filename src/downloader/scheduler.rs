//! Run scheduler
//!
//! Plans windows for every (entity, granularity) key, drops the ones the ledger
//! already records, and drives the rest through a bounded worker pool. All windows
//! of one key form a single work list that one worker processes in ascending order,
//! so a store file only ever has one writer.

use super::config::EngineConfig;
use super::executor::TaskExecutor;
use super::job::{FailureKind, FetchTask, TaskOutcome, TaskState};
use super::rate_limit::Pacer;
use super::window::{plan_windows, TimeWindow};
use super::IngestError;
use crate::fetcher::DataSource;
use crate::metrics::{record_windows_abandoned, record_windows_skipped};
use crate::output::EntityStore;
use crate::resume::SharedLedger;
use crate::shutdown::{SharedShutdown, ShutdownCoordinator};
use crate::EntityKey;
use futures::stream::{self, StreamExt};
use indicatif::ProgressBar;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// All pending windows of one key, in ascending order
#[derive(Debug, Clone)]
struct WorkList {
    key: EntityKey,
    tasks: Vec<FetchTask>,
}

/// What one worker did with one work list
#[derive(Debug, Default)]
struct WorkListReport {
    outcomes: Vec<TaskOutcome>,
    interrupted: usize,
}

/// A window that ended the run unrecorded
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedWindow {
    /// Entity and granularity
    pub key: EntityKey,
    /// The window
    pub window: TimeWindow,
    /// Failure class
    pub kind: FailureKind,
    /// Human-readable cause
    pub message: String,
}

/// Summary of one run
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    /// Keys planned
    pub keys: usize,
    /// Windows planned across all keys
    pub planned: usize,
    /// Windows the ledger already recorded before the run
    pub already_complete: usize,
    /// Windows recovered from existing store files for keys missing from the ledger
    pub seeded_from_store: usize,
    /// Windows skipped by the executor
    pub skipped: usize,
    /// Windows fetched and recorded this run
    pub marked: usize,
    /// Candles appended this run
    pub candles_appended: usize,
    /// Windows left unrecorded
    pub failures: Vec<FailedWindow>,
    /// Windows not attempted because shutdown was requested
    pub interrupted: usize,
}

impl RunReport {
    /// Every planned window is recorded in the ledger
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty() && self.interrupted == 0
    }

    /// Some windows remain for a later run
    pub fn is_partial(&self) -> bool {
        !self.is_complete()
    }

    /// Windows that still need work after this run
    pub fn remaining(&self) -> usize {
        self.failures.len() + self.interrupted
    }

    /// Failures of one kind
    pub fn failures_of(&self, kind: FailureKind) -> usize {
        self.failures.iter().filter(|f| f.kind == kind).count()
    }

    fn absorb(&mut self, report: WorkListReport) {
        self.interrupted += report.interrupted;
        for outcome in report.outcomes {
            match outcome.state {
                TaskState::Skipped => self.skipped += 1,
                TaskState::Marked => {
                    self.marked += 1;
                    self.candles_appended += outcome.candles;
                }
                _ => {
                    if let Some(failure) = outcome.failure {
                        self.failures.push(FailedWindow {
                            key: outcome.task.key,
                            window: outcome.task.window,
                            kind: failure.kind,
                            message: failure.message,
                        });
                    }
                }
            }
        }
    }
}

/// Drives a full run over a set of entities
pub struct Scheduler {
    config: EngineConfig,
    executor: TaskExecutor,
    shutdown: SharedShutdown,
    progress: Option<ProgressBar>,
}

impl Scheduler {
    /// Create a scheduler
    pub fn new(
        config: EngineConfig,
        source: Arc<dyn DataSource>,
        store: Arc<dyn EntityStore>,
        ledger: Arc<SharedLedger>,
    ) -> Self {
        Self {
            config,
            executor: TaskExecutor::new(source, store, ledger),
            shutdown: ShutdownCoordinator::shared(),
            progress: None,
        }
    }

    /// Stop dispatching new windows once `shutdown` is requested
    pub fn with_shutdown(mut self, shutdown: SharedShutdown) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Report per-window progress on `progress`
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run every pending window of every key
    ///
    /// Window failures never abort the run; they are collected in the report and
    /// retried by the next run. Only configuration and startup persistence errors
    /// are returned as `Err`.
    pub async fn run(&self, entity_ids: &[String]) -> Result<RunReport, IngestError> {
        if entity_ids.is_empty() {
            return Err(IngestError::FatalConfig("entity list is empty".to_string()));
        }
        self.config.validate().map_err(IngestError::FatalConfig)?;

        let start = self.config.global_start_ms;
        let end = self
            .config
            .global_end_ms
            .unwrap_or_else(|| chrono::Utc::now().timestamp_millis());

        let mut report = RunReport::default();
        let mut work_lists = Vec::new();

        for entity_id in entity_ids {
            for &granularity in &self.config.granularities {
                let key = EntityKey::new(entity_id, granularity)
                    .map_err(|e| IngestError::FatalConfig(e.to_string()))?;
                let chunk_ms = self.config.chunk_ms(granularity);
                let planned: Vec<FetchTask> = plan_windows(start, end, chunk_ms)
                    .into_iter()
                    .map(|window| FetchTask::planned(key.clone(), window, chunk_ms))
                    .collect();

                report.keys += 1;
                report.planned += planned.len();
                report.seeded_from_store += self.seed_from_store(&key, &planned).await?;

                let mut tasks = Vec::new();
                for task in planned {
                    if self.executor.ledger().is_complete(&key, task.window).await {
                        report.already_complete += 1;
                    } else {
                        tasks.push(task);
                    }
                }

                if !tasks.is_empty() {
                    work_lists.push(WorkList { key, tasks });
                }
            }
        }

        let pending: usize = work_lists.iter().map(|wl| wl.tasks.len()).sum();
        info!(
            keys = report.keys,
            planned = report.planned,
            already_complete = report.already_complete,
            pending,
            pool_size = self.config.pool_size,
            "Run planned"
        );

        if let Some(pb) = &self.progress {
            pb.set_length(pending as u64);
        }

        let reports: Vec<WorkListReport> = stream::iter(work_lists)
            .map(|work_list| self.run_work_list(work_list))
            .buffer_unordered(self.config.pool_size)
            .collect()
            .await;

        for work_list_report in reports {
            report.absorb(work_list_report);
        }

        if let Some(pb) = &self.progress {
            pb.finish_with_message(format!(
                "{} marked, {} failed, {} interrupted",
                report.marked,
                report.failures.len(),
                report.interrupted
            ));
        }

        info!(
            marked = report.marked,
            skipped = report.skipped,
            candles = report.candles_appended,
            failed = report.failures.len(),
            interrupted = report.interrupted,
            "Run finished"
        );
        Ok(report)
    }

    /// Recover completed windows for a key the ledger has never seen
    ///
    /// Windows ending at or before the newest stored candle are treated as done.
    async fn seed_from_store(
        &self,
        key: &EntityKey,
        planned: &[FetchTask],
    ) -> Result<usize, IngestError> {
        if self.executor.ledger().contains_key(key).await {
            return Ok(0);
        }

        let last = match self.executor.store().last_timestamp(key) {
            Ok(Some(last)) => last,
            Ok(None) => return Ok(0),
            Err(e) => {
                warn!(key = %key, error = %e, "Could not read store file, planning every window");
                return Ok(0);
            }
        };

        let covered: Vec<FetchTask> = planned
            .iter()
            .filter(|task| task.window.end() <= last)
            .cloned()
            .collect();

        let seeded = self.executor.ledger().seed_from_store(&covered).await?;
        if seeded > 0 {
            warn!(
                key = %key,
                last_timestamp = last,
                seeded,
                "Key missing from ledger, recovered completed windows from store"
            );
        }
        Ok(seeded)
    }

    async fn run_work_list(&self, work_list: WorkList) -> WorkListReport {
        let WorkList { key, tasks } = work_list;
        let granularity = key.granularity().as_str();
        let pacer = Pacer::new(self.config.pacing).with_shutdown(self.shutdown.clone());
        let mut report = WorkListReport::default();
        let mut tasks = tasks.into_iter();

        debug!(key = %key, windows = tasks.len(), "Worker picked up key");

        while let Some(task) = tasks.next() {
            if self.shutdown.is_shutdown_requested() {
                report.interrupted += 1 + tasks.len();
                break;
            }

            let outcome = self.executor.execute(&task).await;
            self.tick();

            let fetched = outcome.fetched;
            let persistence_failed = outcome.failure_kind() == Some(FailureKind::Persistence);
            if outcome.state == TaskState::Skipped {
                record_windows_skipped(granularity, 1);
            }
            report.outcomes.push(outcome);

            if persistence_failed {
                let abandoned: Vec<TaskOutcome> = tasks
                    .by_ref()
                    .map(|rest| {
                        TaskOutcome::failed(
                            rest,
                            FailureKind::Abandoned,
                            format!("not attempted after persistence failure on {task}"),
                            false,
                        )
                    })
                    .collect();
                record_windows_abandoned(granularity, abandoned.len() as u64);
                for _ in &abandoned {
                    self.tick();
                }
                report.outcomes.extend(abandoned);
                break;
            }

            if fetched && !pacer.pace().await {
                report.interrupted += tasks.len();
                break;
            }
        }

        report
    }

    fn tick(&self) {
        if let Some(pb) = &self.progress {
            pb.inc(1);
        }
    }
}
