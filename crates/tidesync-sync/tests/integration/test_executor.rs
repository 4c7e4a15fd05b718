//! Execution scheduler tests
//!
//! Plans are built by hand and dispatched through a recording dispatcher,
//! so these tests pin ordering and failure handling without any store.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};

use anyhow::bail;

use tidesync_core::domain::{Decision, MixedState, SyncKey, SyncPlan, TriggerSource};
use tidesync_core::ports::NoopObserver;
use tidesync_sync::dispatcher::Dispatch;
use tidesync_sync::executor::ExecutionScheduler;
use tidesync_sync::plan::{sort_keys, PlanOutcome};
use tidesync_sync::{ExecutionError, Phase};

use crate::common::{key, RecordingObserver};

// ============================================================================
// Helpers
// ============================================================================

/// Records dispatched keys in completion order; fails the listed keys
#[derive(Default)]
struct RecordingDispatch {
    completed: Mutex<Vec<SyncKey>>,
    failing: HashSet<SyncKey>,
    fail_all: bool,
}

impl RecordingDispatch {
    fn failing(keys: &[&str]) -> Self {
        Self {
            failing: keys.iter().map(|k| key(k)).collect(),
            ..Self::default()
        }
    }

    fn completed(&self) -> Vec<SyncKey> {
        self.completed.lock().unwrap().clone()
    }

    fn position(&self, raw: &str) -> usize {
        let wanted = key(raw);
        self.completed()
            .iter()
            .position(|k| *k == wanted)
            .unwrap_or_else(|| panic!("{raw} was not dispatched"))
    }
}

#[async_trait::async_trait]
impl Dispatch for RecordingDispatch {
    async fn dispatch(&self, state: &MixedState) -> anyhow::Result<()> {
        tokio::task::yield_now().await;
        if self.fail_all || self.failing.contains(&state.key) {
            bail!("permission denied");
        }
        self.completed.lock().unwrap().push(state.key.clone());
        Ok(())
    }
}

fn outcome_of(decisions: &[(&str, Decision)]) -> PlanOutcome {
    let mut states = BTreeMap::new();
    for (raw, decision) in decisions {
        let mut state = MixedState::new(key(raw));
        state.decision = Some(*decision);
        states.insert(key(raw), state);
    }
    let sorted_keys = sort_keys(states.keys());
    let oversized_conflicts = states
        .values()
        .filter(|s| s.decision.is_some_and(|d| d.is_oversized_conflict()))
        .cloned()
        .collect();
    PlanOutcome {
        plan: SyncPlan::new(TriggerSource::Manual, states),
        sorted_keys,
        deletions: Vec::new(),
        oversized_conflicts,
        touched_keys: Vec::new(),
    }
}

fn uploads(names: &[&str]) -> PlanOutcome {
    let decisions: Vec<_> = names
        .iter()
        .map(|n| (*n, Decision::UploadLocalToRemote))
        .collect();
    outcome_of(&decisions)
}

// ============================================================================
// Phased mode
// ============================================================================

#[tokio::test]
async fn test_phased_order_folders_then_deletions_deepest_first_then_transfers() {
    let outcome = outcome_of(&[
        ("a/", Decision::KeepRemoteDelHistFolder),
        ("a/b/", Decision::UploadLocalDelHistToRemoteFolder),
        ("a/b/c.txt", Decision::KeepRemoteDelHist),
        ("new/", Decision::CreateFolder),
        ("new/deeper/", Decision::CreateFolder),
        ("x.md", Decision::UploadLocalToRemote),
        ("same.md", Decision::SkipUploading),
    ]);
    let dispatch = Arc::new(RecordingDispatch::default());

    let summary = ExecutionScheduler::new(dispatch.clone(), 4)
        .execute(&outcome, Arc::new(NoopObserver))
        .await
        .unwrap();

    assert_eq!(summary.folders_created, 2);
    assert_eq!(summary.deletions, 3);
    assert_eq!(summary.transfers, 1);
    assert_eq!(summary.dispatched, 6);

    assert!(dispatch.position("new/") < dispatch.position("new/deeper/"));
    assert!(dispatch.position("new/deeper/") < dispatch.position("a/b/c.txt"));
    assert!(dispatch.position("a/b/c.txt") < dispatch.position("a/b/"));
    assert!(dispatch.position("a/b/") < dispatch.position("a/"));
    assert!(dispatch.position("a/") < dispatch.position("x.md"));
    // Skips never reach the dispatcher in phased mode
    assert!(!dispatch.completed().contains(&key("same.md")));
}

#[tokio::test]
async fn test_single_transfer_failure_lets_the_others_finish() {
    let outcome = uploads(&["f1.md", "f2.md", "f3.md", "f4.md", "f5.md"]);
    let dispatch = Arc::new(RecordingDispatch::failing(&["f3.md"]));

    let err = ExecutionScheduler::new(dispatch.clone(), 2)
        .execute(&outcome, Arc::new(NoopObserver))
        .await
        .unwrap_err();

    let mut completed = dispatch.completed();
    completed.sort();
    assert_eq!(
        completed,
        vec![key("f1.md"), key("f2.md"), key("f4.md"), key("f5.md")]
    );
    match err {
        ExecutionError::Aggregate {
            phase,
            failures,
            stopped_early,
        } => {
            assert_eq!(phase, Phase::Transfer);
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].key, key("f3.md"));
            assert_eq!(failures[0].decision, Decision::UploadLocalToRemote);
            assert!(failures[0].error.contains("permission denied"));
            assert!(!stopped_early);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_transfer_phase_stops_after_failure_threshold() {
    let names: Vec<String> = (0..10).map(|i| format!("f{i}.md")).collect();
    let refs: Vec<&str> = names.iter().map(String::as_str).collect();
    let outcome = uploads(&refs);
    let dispatch = Arc::new(RecordingDispatch {
        fail_all: true,
        ..RecordingDispatch::default()
    });

    let err = ExecutionScheduler::new(dispatch.clone(), 2)
        .execute(&outcome, Arc::new(NoopObserver))
        .await
        .unwrap_err();

    let ExecutionError::Aggregate {
        failures,
        stopped_early,
        ..
    } = err
    else {
        panic!("expected an aggregate error");
    };
    assert!(stopped_early);
    assert!(failures.len() >= 3);
    assert!(failures.len() < 10);
}

#[tokio::test]
async fn test_deletion_failure_stops_before_shallower_levels() {
    let outcome = outcome_of(&[
        ("a/", Decision::KeepRemoteDelHistFolder),
        ("a/b.md", Decision::KeepRemoteDelHist),
        ("z.md", Decision::DownloadRemoteToLocal),
    ]);
    let dispatch = Arc::new(RecordingDispatch::failing(&["a/b.md"]));

    let err = ExecutionScheduler::new(dispatch.clone(), 3)
        .execute(&outcome, Arc::new(NoopObserver))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ExecutionError::Aggregate {
            phase: Phase::Deletion,
            ..
        }
    ));
    assert!(dispatch.completed().is_empty());
}

#[tokio::test]
async fn test_progress_counts_only_mutating_keys() {
    let outcome = outcome_of(&[
        ("docs/", Decision::CreateFolder),
        ("docs/a.md", Decision::DownloadRemoteToLocal),
        ("b.md", Decision::UploadLocalToRemote),
        ("c.md", Decision::SkipUploading),
    ]);
    let observer = Arc::new(RecordingObserver::default());

    ExecutionScheduler::new(Arc::new(RecordingDispatch::default()), 2)
        .execute(&outcome, observer.clone())
        .await
        .unwrap();

    let progress = observer.progress.lock().unwrap().clone();
    let mut indices: Vec<usize> = progress.iter().map(|p| p.0).collect();
    indices.sort();
    assert_eq!(indices, vec![1, 2, 3]);
    assert!(progress.iter().all(|p| p.1 == 3));
}

// ============================================================================
// Sequential mode and refusals
// ============================================================================

#[tokio::test]
async fn test_sequential_dispatches_every_key_in_sorted_order() {
    let outcome = outcome_of(&[
        ("a/", Decision::SkipFolder),
        ("a/long-name.md", Decision::UploadLocalToRemote),
        ("b.md", Decision::SkipUploading),
    ]);
    let dispatch = Arc::new(RecordingDispatch::default());
    let observer = Arc::new(RecordingObserver::default());

    let summary = ExecutionScheduler::new(dispatch.clone(), 1)
        .execute(&outcome, observer.clone())
        .await
        .unwrap();

    assert_eq!(
        dispatch.completed(),
        vec![key("a/long-name.md"), key("b.md"), key("a/")]
    );
    assert_eq!(summary.dispatched, 3);
    assert_eq!(summary.transfers, 1);
    assert_eq!(observer.progress.lock().unwrap().len(), 3);
}

#[tokio::test]
async fn test_sequential_stops_at_first_error() {
    let outcome = uploads(&["bb.md", "a.md", "c.md"]);
    let dispatch = Arc::new(RecordingDispatch::failing(&["a.md"]));

    let err = ExecutionScheduler::new(dispatch.clone(), 1)
        .execute(&outcome, Arc::new(NoopObserver))
        .await
        .unwrap_err();

    match err {
        ExecutionError::Dispatch { key: failed, .. } => assert_eq!(failed, key("a.md")),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(dispatch.completed(), vec![key("bb.md")]);
}

#[tokio::test]
async fn test_oversized_conflicts_refuse_execution() {
    let outcome = outcome_of(&[
        ("big.bin", Decision::ErrorLocalTooLargeConflictRemote),
        ("a.md", Decision::UploadLocalToRemote),
    ]);
    let dispatch = Arc::new(RecordingDispatch::default());

    let err = ExecutionScheduler::new(dispatch.clone(), 2)
        .execute(&outcome, Arc::new(NoopObserver))
        .await
        .unwrap_err();

    assert!(matches!(err, ExecutionError::OversizedConflicts(1)));
    assert!(dispatch.completed().is_empty());
}
