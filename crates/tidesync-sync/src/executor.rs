//! Execution scheduler
//!
//! Applies a decided plan in one of two modes:
//!
//! - **Sequential** (`concurrency == 1`): every sorted key is dispatched in
//!   order; the first error ends the run.
//! - **Phased** (`concurrency > 1`):
//!   1. folder creation, level by level from shallow to deep
//!   2. deletions, level by level from deep to shallow
//!   3. transfers, one flat pool bounded by a semaphore
//!
//! ```text
//!  keys ──→ supervisor ──permit──→ task ──dispatch──→ Ok ──→ progress
//!              ↑                      │
//!              └──── failure count ───┴── Err ──→ result channel
//! ```
//!
//! The supervisor stops starting tasks once the failure threshold is
//! reached; tasks already running are drained, never aborted.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

use tidesync_core::domain::{Decision, MixedState, SyncKey};
use tidesync_core::ports::SyncObserver;

use crate::dispatcher::Dispatch;
use crate::plan::PlanOutcome;

/// Failures tolerated in the transfer phase before it stops early
pub const DEFAULT_MAX_TRANSFER_FAILURES: usize = 3;

/// Pooled execution phase a failure belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    FolderCreation,
    Deletion,
    Transfer,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::FolderCreation => "folder creation",
            Phase::Deletion => "deletion",
            Phase::Transfer => "transfer",
        })
    }
}

/// One captured dispatch failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFailure {
    pub key: SyncKey,
    pub decision: Decision,
    pub error: String,
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.key, self.decision, self.error)
    }
}

#[derive(Debug, Error)]
pub enum ExecutionError {
    /// Execution refuses to start while oversized conflicts exist
    #[error("{0} oversized conflict(s) must be resolved first")]
    OversizedConflicts(usize),

    /// A sequential-mode dispatch failed
    #[error("{key} ({decision}) failed: {source:#}")]
    Dispatch {
        key: SyncKey,
        decision: Decision,
        #[source]
        source: anyhow::Error,
    },

    /// Failures captured by a pooled phase
    #[error("{}", describe_aggregate(.phase, .failures, .stopped_early))]
    Aggregate {
        phase: Phase,
        failures: Vec<TaskFailure>,
        stopped_early: bool,
    },
}

fn describe_aggregate(phase: &Phase, failures: &[TaskFailure], stopped_early: &bool) -> String {
    let mut text = format!("{} failure(s) in {phase} phase", failures.len());
    if *stopped_early {
        text.push_str(" (stopped early)");
    }
    for failure in failures {
        text.push_str("\n  - ");
        text.push_str(&failure.to_string());
    }
    text
}

/// Progress state of one `execute` call
pub struct ExecutionContext {
    observer: Arc<dyn SyncObserver>,
    total: usize,
    completed: AtomicUsize,
}

impl ExecutionContext {
    pub fn new(observer: Arc<dyn SyncObserver>, total: usize) -> Self {
        Self {
            observer,
            total,
            completed: AtomicUsize::new(0),
        }
    }

    fn report(&self, key: &SyncKey, decision: Decision) {
        let index = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
        self.observer.on_progress(index, self.total, key, decision);
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn total(&self) -> usize {
        self.total
    }
}

/// Counts of one successful execution
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionSummary {
    pub folders_created: usize,
    pub deletions: usize,
    pub transfers: usize,
    /// Keys dispatched in total (sequential mode includes skips)
    pub dispatched: usize,
}

pub struct ExecutionScheduler {
    dispatcher: Arc<dyn Dispatch>,
    concurrency: usize,
    max_transfer_failures: usize,
}

impl ExecutionScheduler {
    pub fn new(dispatcher: Arc<dyn Dispatch>, concurrency: usize) -> Self {
        Self {
            dispatcher,
            concurrency: concurrency.max(1),
            max_transfer_failures: DEFAULT_MAX_TRANSFER_FAILURES,
        }
    }

    pub fn with_max_transfer_failures(mut self, max: usize) -> Self {
        self.max_transfer_failures = max.max(1);
        self
    }

    #[instrument(skip(self, outcome, observer), fields(concurrency = self.concurrency))]
    pub async fn execute(
        &self,
        outcome: &PlanOutcome,
        observer: Arc<dyn SyncObserver>,
    ) -> Result<ExecutionSummary, ExecutionError> {
        if !outcome.oversized_conflicts.is_empty() {
            return Err(ExecutionError::OversizedConflicts(
                outcome.oversized_conflicts.len(),
            ));
        }

        if self.concurrency == 1 {
            self.execute_sequential(outcome, observer).await
        } else {
            self.execute_phased(outcome, observer).await
        }
    }

    async fn execute_sequential(
        &self,
        outcome: &PlanOutcome,
        observer: Arc<dyn SyncObserver>,
    ) -> Result<ExecutionSummary, ExecutionError> {
        let ctx = ExecutionContext::new(observer, outcome.sorted_keys.len());
        let mut summary = ExecutionSummary::default();

        for key in &outcome.sorted_keys {
            let Some(state) = outcome.plan.get(key) else {
                continue;
            };
            let Some(decision) = state.decision else {
                continue;
            };
            self.dispatcher
                .dispatch(state)
                .await
                .map_err(|source| ExecutionError::Dispatch {
                    key: key.clone(),
                    decision,
                    source,
                })?;
            ctx.report(key, decision);
            summary.record(decision);
        }

        info!(dispatched = summary.dispatched, "Sequential execution finished");
        Ok(summary)
    }

    async fn execute_phased(
        &self,
        outcome: &PlanOutcome,
        observer: Arc<dyn SyncObserver>,
    ) -> Result<ExecutionSummary, ExecutionError> {
        let mut folders: BTreeMap<usize, Vec<MixedState>> = BTreeMap::new();
        let mut deletions: BTreeMap<usize, Vec<MixedState>> = BTreeMap::new();
        let mut transfers = Vec::new();

        for key in &outcome.sorted_keys {
            let Some(state) = outcome.plan.get(key) else {
                continue;
            };
            let Some(decision) = state.decision else {
                continue;
            };
            match decision {
                Decision::CreateFolder => folders
                    .entry(key.depth())
                    .or_default()
                    .push(state.clone()),
                Decision::UploadLocalDelHistToRemote
                | Decision::KeepRemoteDelHist
                | Decision::UploadLocalDelHistToRemoteFolder
                | Decision::KeepRemoteDelHistFolder => deletions
                    .entry(key.depth())
                    .or_default()
                    .push(state.clone()),
                Decision::UploadLocalToRemote | Decision::DownloadRemoteToLocal => {
                    transfers.push(state.clone())
                }
                Decision::SkipUploading
                | Decision::SkipUploadingTooLarge
                | Decision::SkipDownloadingTooLarge
                | Decision::SkipUsingLocalDelTooLarge
                | Decision::SkipUsingRemoteDelTooLarge
                | Decision::SkipFolder
                | Decision::ErrorLocalTooLargeConflictRemote
                | Decision::ErrorRemoteTooLargeConflictLocal => {}
            }
        }

        let folder_count: usize = folders.values().map(Vec::len).sum();
        let deletion_count: usize = deletions.values().map(Vec::len).sum();
        let total = folder_count + deletion_count + transfers.len();
        let ctx = Arc::new(ExecutionContext::new(observer, total));
        info!(
            folders = folder_count,
            deletions = deletion_count,
            transfers = transfers.len(),
            "Starting phased execution"
        );

        for (depth, level) in folders {
            debug!(depth, count = level.len(), "Creating folder level");
            self.run_pool(Phase::FolderCreation, level, 1, &ctx).await?;
        }
        for (depth, level) in deletions.into_iter().rev() {
            debug!(depth, count = level.len(), "Deleting level");
            self.run_pool(Phase::Deletion, level, 1, &ctx).await?;
        }
        let transfer_count = transfers.len();
        self.run_pool(Phase::Transfer, transfers, self.max_transfer_failures, &ctx)
            .await?;

        Ok(ExecutionSummary {
            folders_created: folder_count,
            deletions: deletion_count,
            transfers: transfer_count,
            dispatched: ctx.completed(),
        })
    }

    /// Runs one batch with at most `concurrency` dispatches in flight
    ///
    /// Once `max_failures` failures have been captured no further task is
    /// started. Every captured failure ends up in the aggregate error.
    async fn run_pool(
        &self,
        phase: Phase,
        states: Vec<MixedState>,
        max_failures: usize,
        ctx: &Arc<ExecutionContext>,
    ) -> Result<(), ExecutionError> {
        if states.is_empty() {
            return Ok(());
        }

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let failure_count = Arc::new(AtomicUsize::new(0));
        let (failure_tx, mut failure_rx) = mpsc::unbounded_channel::<TaskFailure>();
        let mut tasks = JoinSet::new();
        let mut stopped_early = false;

        for state in states {
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };
            if failure_count.load(Ordering::SeqCst) >= max_failures {
                stopped_early = true;
                break;
            }
            let Some(decision) = state.decision else {
                continue;
            };

            let dispatcher = Arc::clone(&self.dispatcher);
            let failure_tx = failure_tx.clone();
            let failure_count = Arc::clone(&failure_count);
            let ctx = Arc::clone(ctx);
            tasks.spawn(async move {
                let _permit = permit;
                match dispatcher.dispatch(&state).await {
                    Ok(()) => ctx.report(&state.key, decision),
                    Err(e) => {
                        warn!(key = %state.key, %decision, error = %e, "Dispatch failed");
                        failure_count.fetch_add(1, Ordering::SeqCst);
                        // The receiver outlives every task.
                        let _ = failure_tx.send(TaskFailure {
                            key: state.key.clone(),
                            decision,
                            error: format!("{e:#}"),
                        });
                    }
                }
            });
        }
        drop(failure_tx);

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                if e.is_panic() {
                    std::panic::resume_unwind(e.into_panic());
                }
            }
        }

        let mut failures = Vec::new();
        while let Some(failure) = failure_rx.recv().await {
            failures.push(failure);
        }
        if failures.is_empty() {
            return Ok(());
        }

        failures.sort_by(|a, b| a.key.cmp(&b.key));
        warn!(
            %phase,
            failures = failures.len(),
            stopped_early,
            "Phase finished with failures"
        );
        Err(ExecutionError::Aggregate {
            phase,
            failures,
            stopped_early,
        })
    }
}

impl ExecutionSummary {
    fn record(&mut self, decision: Decision) {
        self.dispatched += 1;
        if decision == Decision::CreateFolder {
            self.folders_created += 1;
        } else if decision.is_deletion() {
            self.deletions += 1;
        } else if decision.is_transfer() {
            self.transfers += 1;
        }
    }
}
