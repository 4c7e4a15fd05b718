//! End-to-end engine runs against the in-memory stores

use std::time::Duration;

use tidesync_core::config::ConfigBuilder;
use tidesync_core::domain::{Decision, HistoryAction, HistoryEvent, SyncKey, TriggerSource};
use tidesync_core::ports::{Cipher, HistoryStore};
use tidesync_sync::{ExecutionError, SyncError, SyncOptions};

use crate::common::{key, Harness, HexCipher, METADATA_KEY, PREFIX};

fn forced() -> SyncOptions {
    SyncOptions {
        force: true,
        ..SyncOptions::default()
    }
}

// ============================================================================
// Transfers and idempotence
// ============================================================================

#[tokio::test]
async fn test_first_sync_uploads_and_second_run_is_idle() {
    let h = Harness::new();
    h.local.put("notes/a.md", b"alpha", 100);
    h.local.put("b.md", b"beta", 200);

    let first = h.engine().sync(SyncOptions::default()).await.unwrap();
    assert_eq!(first.execution.transfers, 2);
    assert_eq!(first.execution.folders_created, 1);
    assert!(!first.metadata_updated);
    assert_eq!(
        h.remote.keys(),
        vec!["vault/b.md", "vault/notes/", "vault/notes/a.md"]
    );
    assert_eq!(h.remote.get("vault/notes/a.md").unwrap().data, b"alpha");
    assert_eq!(h.history.mapping("b.md").unwrap().local_mtime, 200);

    let uploads = h.remote.upload_count();
    let second = h.engine().sync(SyncOptions::default()).await.unwrap();
    assert_eq!(h.remote.upload_count(), uploads);
    assert_eq!(second.touched_keys, 0);
    assert_eq!(second.decisions.get("skipUploading"), Some(&2));
    assert_eq!(second.decisions.get("skipFolder"), Some(&1));
}

#[tokio::test]
async fn test_new_remote_file_is_downloaded_sequentially() {
    let h = Harness::new();
    h.remote.put("vault/docs/", b"", 200);
    h.remote.put("vault/docs/x.md", b"hello", 200);

    let options = SyncOptions {
        concurrency: Some(1),
        ..SyncOptions::default()
    };
    let report = h.engine().sync(options).await.unwrap();
    assert_eq!(report.execution.transfers, 1);
    assert_eq!(h.local.content("docs/x.md").unwrap(), b"hello");
    assert_eq!(h.local.mtime("docs/x.md"), Some(200));

    let again = h.engine().sync(SyncOptions::default()).await.unwrap();
    assert_eq!(again.touched_keys, 0);
    assert_eq!(h.remote.upload_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_transient_upload_failure_recovers_within_the_run() {
    let h = Harness::new();
    h.local.put("a.md", b"alpha", 100);
    h.remote.fail_transiently("vault/a.md", 2);

    let started = tokio::time::Instant::now();
    let report = h.engine().sync(SyncOptions::default()).await.unwrap();

    assert_eq!(report.execution.transfers, 1);
    assert_eq!(h.remote.upload_count(), 1);
    assert_eq!(h.remote.get("vault/a.md").unwrap().data, b"alpha");
    // backoff of 1s then 2s on the paused clock
    assert!(started.elapsed() >= Duration::from_secs(3));
}

#[tokio::test]
async fn test_plan_only_changes_nothing() {
    let h = Harness::new();
    h.local.put("a.md", b"alpha", 100);

    let outcome = h
        .engine()
        .plan(TriggerSource::DryRun, None)
        .await
        .unwrap();

    assert_eq!(
        outcome.plan.get(&key("a.md")).unwrap().decision,
        Some(Decision::UploadLocalToRemote)
    );
    assert_eq!(outcome.touched_keys, vec![key("a.md")]);
    assert_eq!(h.history.plan_count(), 0);
    assert!(h.remote.keys().is_empty());
}

#[tokio::test]
async fn test_watched_root_limits_the_run() {
    let h = Harness::new();
    h.local.put("a/x.md", b"x", 100);
    h.local.put("b/y.md", b"y", 100);

    let options = SyncOptions {
        watched_root: Some(SyncKey::folder("a").unwrap()),
        ..SyncOptions::default()
    };
    h.engine().sync(options).await.unwrap();

    assert_eq!(h.remote.keys(), vec!["vault/a/", "vault/a/x.md"]);
}

// ============================================================================
// Deletions and tombstones
// ============================================================================

#[tokio::test]
async fn test_local_deletion_removes_remote_copy_and_records_tombstone() {
    let h = Harness::new();
    h.remote.put("vault/note.md", b"old", 100);
    h.history
        .record_event(&HistoryEvent::new(key("note.md"), HistoryAction::Delete, 300))
        .await
        .unwrap();

    let report = h.engine().sync(SyncOptions::default()).await.unwrap();

    assert_eq!(report.decisions.get("uploadLocalDelHistToRemote"), Some(&1));
    assert!(report.metadata_updated);
    assert!(h.remote.get("vault/note.md").is_none());
    assert_eq!(h.history.event_count(), 0);

    let metadata: serde_json::Value =
        serde_json::from_slice(&h.remote.get(METADATA_KEY).unwrap().data).unwrap();
    assert_eq!(metadata["deletions"][0]["key"], "note.md");
    assert_eq!(metadata["deletions"][0]["actionWhen"], 300);

    let again = h.engine().sync(SyncOptions::default()).await.unwrap();
    assert!(!again.metadata_updated);
}

#[tokio::test]
async fn test_tombstone_survives_a_failing_transfer() {
    let h = Harness::new();
    h.remote.put("vault/gone.md", b"old", 100);
    h.history
        .record_event(&HistoryEvent::new(key("gone.md"), HistoryAction::Delete, 300))
        .await
        .unwrap();
    h.local.put("new.md", b"fresh", 400);
    h.remote.fail_on("vault/new.md");

    let err = h.engine().sync(SyncOptions::default()).await.unwrap_err();
    assert!(matches!(err, SyncError::Execution(_)));

    // The deletion phase ran before the transfer failed
    assert!(h.remote.get("vault/gone.md").is_none());
    let metadata: serde_json::Value =
        serde_json::from_slice(&h.remote.get(METADATA_KEY).unwrap().data).unwrap();
    assert_eq!(metadata["deletions"][0]["key"], "gone.md");
    assert_eq!(metadata["deletions"][0]["actionWhen"], 300);

    h.remote.heal();
    let report = h.engine().sync(SyncOptions::default()).await.unwrap();
    assert_eq!(report.execution.transfers, 1);
    assert!(!report.metadata_updated);
    assert_eq!(h.remote.get("vault/new.md").unwrap().data, b"fresh");
    assert!(h.remote.get(METADATA_KEY).is_some());
}

#[tokio::test]
async fn test_newer_local_deletion_removes_both_copies() {
    let h = Harness::new();
    h.local.put("note.md", b"local", 100);
    h.remote.put("vault/note.md", b"remote", 100);
    h.history
        .record_event(&HistoryEvent::new(key("note.md"), HistoryAction::Delete, 300))
        .await
        .unwrap();

    let outcome = h.engine().plan(TriggerSource::Manual, None).await.unwrap();
    assert_eq!(
        outcome.plan.get(&key("note.md")).unwrap().decision,
        Some(Decision::UploadLocalDelHistToRemote)
    );

    let report = h.engine().sync(SyncOptions::default()).await.unwrap();
    assert_eq!(report.execution.deletions, 1);
    assert!(h.local.content("note.md").is_none());
    assert!(h.remote.get("vault/note.md").is_none());
    assert!(h.history.mapping("note.md").is_none());
}

#[tokio::test]
async fn test_remote_tombstone_deletes_stale_local_copy() {
    let h = Harness::new();
    h.remote.put(
        METADATA_KEY,
        br#"{"version":1,"generatedWhen":1,"deletions":[{"key":"old.md","actionWhen":500}]}"#,
        600,
    );
    h.local.put("old.md", b"stale", 100);

    let report = h.engine().sync(SyncOptions::default()).await.unwrap();

    assert_eq!(report.decisions.get("keepRemoteDelHist"), Some(&1));
    assert!(h.local.content("old.md").is_none());
    assert!(!report.metadata_updated);
}

// ============================================================================
// Safety checks
// ============================================================================

#[tokio::test]
async fn test_conflicting_remote_edit_is_kept_as_local_copy() {
    let h = Harness::new();
    h.local.put("a.md", b"v1", 100);
    h.engine().sync(SyncOptions::default()).await.unwrap();

    // Both sides change after the baseline; the local edit is newer.
    h.remote.put("vault/a.md", b"remote edit", 2_000_000);
    h.local.put("a.md", b"local edit", 3_000_000);
    h.engine().sync(SyncOptions::default()).await.unwrap();

    assert_eq!(h.remote.get("vault/a.md").unwrap().data, b"local edit");
    let copies: Vec<String> = h
        .local
        .keys()
        .into_iter()
        .filter(|k| k.starts_with("a (conflicted copy"))
        .collect();
    assert_eq!(copies.len(), 1);
    let copy = h.local.content(&copies[0]).unwrap();
    assert!(copy.starts_with(b"remote edit"));
    assert_eq!(*h.observer.conflicts.lock().unwrap(), vec![key("a.md")]);
}

#[tokio::test]
async fn test_oversized_conflict_blocks_the_run() {
    let h = Harness::with_config(
        ConfigBuilder::new()
            .remote_prefix(PREFIX)
            .skip_size_larger_than(10)
            .protect_modify_percentage(100)
            .build(),
    );
    h.local.put("big.md", &[b'x'; 20], 100);
    h.remote.put("vault/big.md", b"small", 100);

    let err = h.engine().sync(SyncOptions::default()).await.unwrap_err();

    assert!(matches!(err, SyncError::OversizedConflicts { count: 1 }));
    assert_eq!(
        *h.observer.sizes_conflicts.lock().unwrap(),
        vec![key("big.md")]
    );
    assert_eq!(h.history.plan_count(), 1);
    assert_eq!(h.remote.get("vault/big.md").unwrap().data, b"small");
}

#[tokio::test]
async fn test_mass_overwrite_needs_force() {
    let h = Harness::with_config(
        ConfigBuilder::new()
            .remote_prefix(PREFIX)
            .concurrency(2)
            .protect_modify_percentage(50)
            .build(),
    );
    for i in 0..4 {
        h.local.put(&format!("f{i}.md"), b"v1", 100);
    }
    h.engine().sync(SyncOptions::default()).await.unwrap();

    for i in 0..4 {
        h.local.put(&format!("f{i}.md"), b"v2", 9_000_000);
    }
    let err = h.engine().sync(SyncOptions::default()).await.unwrap_err();
    assert!(matches!(
        err,
        SyncError::TooManyChanges {
            touched: 4,
            total: 4,
            percentage: 50
        }
    ));
    assert_eq!(h.remote.get("vault/f0.md").unwrap().data, b"v1");

    let report = h.engine().sync(forced()).await.unwrap();
    assert_eq!(report.execution.transfers, 4);
    assert_eq!(h.remote.get("vault/f3.md").unwrap().data, b"v2");
}

#[tokio::test]
async fn test_failed_run_resumes_where_it_stopped() {
    let h = Harness::new();
    h.local.put("a.md", b"a", 100);
    h.local.put("b.md", b"b", 100);
    h.local.put("c.md", b"c", 100);
    h.remote.fail_on("vault/c.md");

    let err = h.engine().sync(SyncOptions::default()).await.unwrap_err();
    assert!(matches!(
        err,
        SyncError::Execution(ExecutionError::Aggregate { .. })
    ));
    assert_eq!(h.remote.upload_count(), 2);

    h.remote.heal();
    let report = h.engine().sync(SyncOptions::default()).await.unwrap();
    assert_eq!(report.execution.transfers, 1);
    assert_eq!(h.remote.upload_count(), 3);
}

// ============================================================================
// Encryption
// ============================================================================

#[tokio::test]
async fn test_encrypted_round_trip() {
    let h = Harness::new();
    h.local.put("notes/a.md", b"alpha", 100);
    h.local.put("b.md", b"beta", 200);

    let first = h.encrypted_engine().sync(SyncOptions::default()).await.unwrap();
    assert_eq!(first.execution.transfers, 2);
    assert!(h.remote.keys().iter().all(|k| !k.contains(".md")));
    assert!(h.remote.get(&HexCipher::object_key("notes/")).is_some());
    let stored = h.remote.get(&HexCipher::object_key("notes/a.md")).unwrap();
    assert_eq!(stored.data, b"HEX1alpha");

    // Encrypted sizes on both sides compare equal, so nothing moves
    let uploads = h.remote.upload_count();
    let outcome = h
        .encrypted_engine()
        .plan(TriggerSource::Manual, None)
        .await
        .unwrap();
    let state = outcome.plan.get(&key("notes/a.md")).unwrap();
    assert_eq!(state.decision, Some(Decision::SkipUploading));
    assert_eq!(state.size_local_enc, Some(9));
    let second = h.encrypted_engine().sync(SyncOptions::default()).await.unwrap();
    assert_eq!(second.touched_keys, 0);
    assert_eq!(h.remote.upload_count(), uploads);

    // A remote edit comes down decrypted; a local deletion removes the
    // encrypted object and publishes an encrypted tombstone list
    h.remote.put(&HexCipher::object_key("b.md"), b"HEX1beta v2", 5_000_000);
    h.local.remove("notes/a.md");
    h.history
        .record_event(&HistoryEvent::new(
            key("notes/a.md"),
            HistoryAction::Delete,
            9_000_000,
        ))
        .await
        .unwrap();
    let third = h.encrypted_engine().sync(SyncOptions::default()).await.unwrap();

    assert!(third.metadata_updated);
    assert_eq!(h.local.content("b.md").unwrap(), b"beta v2");
    assert!(h.remote.get(&HexCipher::object_key("notes/a.md")).is_none());
    let sealed = h.remote.get(METADATA_KEY).unwrap().data;
    let metadata: serde_json::Value =
        serde_json::from_slice(&HexCipher.decrypt(&sealed).unwrap()).unwrap();
    assert_eq!(metadata["deletions"][0]["key"], "notes/a.md");
}

#[tokio::test]
async fn test_size_limit_applies_to_encrypted_size() {
    let h = Harness::with_config(
        ConfigBuilder::new()
            .remote_prefix(PREFIX)
            .skip_size_larger_than(7)
            .protect_modify_percentage(100)
            .build(),
    );
    // 5 plain bytes become 9 stored bytes, over the limit
    h.local.put("alpha.md", b"alpha", 100);
    h.local.put("hi.md", b"hi", 100);

    let report = h.encrypted_engine().sync(SyncOptions::default()).await.unwrap();

    assert_eq!(report.decisions.get("skipUploadingTooLarge"), Some(&1));
    assert!(h.remote.get(&HexCipher::object_key("alpha.md")).is_none());
    assert_eq!(
        h.remote.get(&HexCipher::object_key("hi.md")).unwrap().data,
        b"HEX1hi"
    );
}
