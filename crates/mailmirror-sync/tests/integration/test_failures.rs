//! Partial failure: interrupted walks, cancellation, retries, fatal errors
//! and transaction atomicity

use std::sync::atomic::Ordering;

use mailmirror_core::domain::{Checkpoint, PageToken};
use mailmirror_core::ports::{IStateStore, SourceError};
use mailmirror_sync::{ConsistencyChecker, ConsistencyOptions, RunOptions, SyncError};
use tokio_util::sync::CancellationToken;

use crate::common::{at, fid, Call, Harness};

fn seed_three(h: &Harness) {
    h.source.add_folder("f-inbox", None, "Inbox");
    h.source.add_message("f-inbox", "m1", "One", at(0), b"one");
    h.source.add_message("f-inbox", "m2", "Two", at(1), b"two");
    h.source.add_message("f-inbox", "m3", "Three", at(2), b"three");
}

#[tokio::test]
async fn test_failed_page_resumes_from_last_committed_page() {
    let h = Harness::new().await;
    seed_three(&h);
    h.source.fail(
        Call::ListMessages,
        Some("p2"),
        SourceError::Protocol("bad payload".into()),
        1,
    );

    let first = h.run().await;

    assert_eq!(first.added, 2);
    assert_eq!(first.folders_failed, 1);
    assert!(first.has_failures());
    assert!(first.errors[0].error.contains("page 2"));
    assert_eq!(
        h.folder("f-inbox").await.checkpoint,
        Checkpoint::Listing {
            since: None,
            next_page: Some(PageToken::new("p2").unwrap())
        }
    );
    let state = h.sqlite.get_sync_state("test").await.unwrap().unwrap();
    assert!(state.last_error.is_some());
    assert!(state.last_success_at.is_none());

    let second = h.run().await;

    assert_eq!(second.added, 1);
    assert!(!second.has_failures());
    assert_eq!(h.source.fetch_count(), 3);
    assert_eq!(h.files().len(), 3);
    let calls = h.source.list_calls();
    assert_eq!(calls.last().unwrap().1.as_deref(), Some("p2"));
    let state = h.sqlite.get_sync_state("test").await.unwrap().unwrap();
    assert!(state.last_error.is_none());
}

#[tokio::test]
async fn test_cancellation_stops_between_pages() {
    let h = Harness::new().await;
    seed_three(&h);
    let cancel = CancellationToken::new();
    h.source.cancel_after_pages(1, cancel.clone());

    let summary = h
        .run_with(RunOptions::from_config(&h.config), cancel)
        .await;

    assert!(summary.cancelled);
    assert_eq!(summary.added, 2);
    assert!(!summary.folders[0].completed);
    assert!(h.folder("f-inbox").await.checkpoint.is_mid_walk());
    assert!(h.partials().is_empty());

    let resumed = h.run().await;
    assert!(!resumed.cancelled);
    assert_eq!(resumed.added, 1);
    assert_eq!(h.sqlite.all_messages().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_transient_errors_are_retried() {
    let h = Harness::new().await;
    seed_three(&h);
    h.source.fail(
        Call::FetchContent,
        Some("m2"),
        SourceError::Transient("connection reset".into()),
        2,
    );
    h.source
        .fail(Call::ListFolders, None, SourceError::RateLimited { retry_after: None }, 1);

    let summary = h.run().await;

    assert_eq!(summary.added, 3);
    assert_eq!(summary.error_count, 0);
}

#[tokio::test]
async fn test_retry_exhaustion_fails_only_that_folder() {
    let h = Harness::new().await;
    seed_three(&h);
    h.source.add_folder("f-sent", None, "Sent");
    h.source.add_message("f-sent", "s1", "Reply", at(0), b"reply");
    h.source.fail(
        Call::FetchContent,
        Some("m2"),
        SourceError::Transient("timeout".into()),
        10,
    );

    let summary = h.run().await;

    assert_eq!(summary.folders_failed, 1);
    assert_eq!(summary.folders_synced, 1);
    assert_eq!(summary.errors[0].message_id.as_deref(), Some("m2"));
    // The failed page wrote nothing; the staged file for m1 was discarded
    assert_eq!(summary.added, 1);
    assert!(h.partials().is_empty());
    assert_eq!(h.sqlite.message_counts(Some(&fid("f-inbox"))).await.unwrap().active, 0);
    assert_eq!(h.folder("f-inbox").await.checkpoint, Checkpoint::Fresh);
}

#[tokio::test]
async fn test_unauthorized_aborts_the_run() {
    let h = Harness::new().await;
    seed_three(&h);
    h.source.fail(
        Call::ListMessages,
        None,
        SourceError::Unauthorized("token expired".into()),
        1,
    );

    let result = h
        .orchestrator()
        .run(&RunOptions::from_config(&h.config), CancellationToken::new())
        .await;

    assert!(matches!(result, Err(SyncError::Unauthorized(_))));
    let state = h.sqlite.get_sync_state("test").await.unwrap().unwrap();
    assert!(state.last_error.unwrap().contains("token expired"));
}

#[tokio::test]
async fn test_failed_commit_leaves_no_dangling_rows() {
    let mut h = Harness::new().await;
    let fail_commits = h.use_flaky_store();
    seed_three(&h);
    fail_commits.store(true, Ordering::SeqCst);

    let summary = h.run().await;

    assert_eq!(summary.added, 0);
    assert_eq!(summary.folders_failed, 1);
    assert!(h.files().is_empty(), "no file may sit at a final path");
    assert_eq!(h.partials().len(), 2, "staged content stays under temp names");
    assert!(h.sqlite.all_messages().await.unwrap().is_empty());

    let checker = ConsistencyChecker::new(h.store.clone(), h.storage.clone());
    let report = checker.check(ConsistencyOptions::default()).await.unwrap();
    assert!(report.dangling.is_empty());
    assert!(report.untracked.is_empty());
    assert_eq!(report.stale_partials.len(), 2);

    fail_commits.store(false, Ordering::SeqCst);
    let summary = h.run().await;

    assert_eq!(summary.added, 3);
    assert_eq!(h.files().len(), 3);
    let report = checker
        .check(ConsistencyOptions {
            verify_hashes: true,
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(report.is_clean());
}
