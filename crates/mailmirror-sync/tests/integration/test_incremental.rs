//! Incremental pulls: updates, tombstones, message moves and cursor fallback

use mailmirror_core::domain::{Checkpoint, QuarantineReason};
use mailmirror_core::ports::IStateStore;
use mailmirror_sync::storage::content_hash;
use mailmirror_sync::{ConsistencyChecker, ConsistencyOptions, RunOptions};
use tokio_util::sync::CancellationToken;

use crate::common::{at, Harness};

const HELLO: &str = "messages/Inbox/2024/03/Inbox_20240307-0941_Hello.eml";
const HELLO_Q: &str = "quarantine/Inbox/2024/03/Inbox_20240307-0941_Hello.eml";

async fn inbox_with_two() -> Harness {
    let h = Harness::new().await;
    h.source.add_folder("f-inbox", None, "Inbox");
    h.source.add_message("f-inbox", "m1", "Hello", at(0), b"hello body");
    h.source.add_message("f-inbox", "m2", "Other", at(1), b"other body");
    let summary = h.run().await;
    assert_eq!(summary.added, 2);
    h
}

#[tokio::test]
async fn test_updated_message_is_rewritten_in_place() {
    let h = inbox_with_two().await;
    h.source.update_message("f-inbox", "m1", b"hello body, edited");

    let summary = h.run().await;

    assert_eq!(summary.updated, 1);
    assert_eq!(summary.added, 0);
    assert_eq!(h.read(HELLO), b"hello body, edited");
    let row = h.message("m1").await;
    assert_eq!(row.storage_path.as_str(), HELLO);
    assert_eq!(row.content_hash, content_hash(b"hello body, edited"));
    assert_eq!(row.change_key.as_deref(), Some("ck-m1-2"));
    assert!(h.partials().is_empty());

    let checker = ConsistencyChecker::new(h.store.clone(), h.storage.clone());
    let report = checker
        .check(ConsistencyOptions {
            verify_hashes: true,
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(report.is_clean());
}

#[tokio::test]
async fn test_tombstone_quarantines_with_content_preserved() {
    let h = inbox_with_two().await;
    h.source.delete_message("f-inbox", "m1");

    let summary = h.run().await;

    assert_eq!(summary.quarantined, 1);
    assert!(!h.path(HELLO).exists());
    assert_eq!(h.read(HELLO_Q), b"hello body");

    assert!(h
        .sqlite
        .active_message_by_remote_id(&crate::common::mid("m1"))
        .await
        .unwrap()
        .is_none());
    let row = h
        .sqlite
        .all_messages()
        .await
        .unwrap()
        .into_iter()
        .find(|m| m.remote_id.as_str() == "m1")
        .unwrap();
    assert_eq!(row.storage_path.as_str(), HELLO_Q);
    let info = row.quarantine.expect("quarantined");
    assert_eq!(info.reason, QuarantineReason::RemoteDeleted);
    assert_eq!(row.content_hash, content_hash(b"hello body"));

    // Quarantine is one-way and replays are harmless
    let again = h.run().await;
    assert_eq!(again.quarantined, 0);
    assert_eq!(h.read(HELLO_Q), b"hello body");
}

#[tokio::test]
async fn test_tombstone_for_missing_file_is_flagged() {
    let h = inbox_with_two().await;
    std::fs::remove_file(h.path(HELLO)).unwrap();
    h.source.delete_message("f-inbox", "m1");

    let summary = h.run().await;

    assert_eq!(summary.quarantined, 1);
    assert_eq!(summary.flagged, 1);
    let row = h
        .sqlite
        .all_messages()
        .await
        .unwrap()
        .into_iter()
        .find(|m| m.remote_id.as_str() == "m1")
        .unwrap();
    assert!(row.is_quarantined());
    assert!(row.integrity_error.is_some());
}

#[tokio::test]
async fn test_moved_message_is_relocated_not_downloaded() {
    let h = Harness::new().await;
    // The destination folder "Archive" is pulled before the source "Inbox"
    h.source.add_folder("f-archive", None, "Archive");
    h.source.add_folder("f-inbox", None, "Inbox");
    h.source.add_message("f-inbox", "m1", "Hello", at(0), b"hello body");
    h.run().await;
    let fetches = h.source.fetch_count();

    h.source.move_message("f-inbox", "f-archive", "m1", "m1-moved");
    let summary = h.run().await;

    assert_eq!(summary.moved, 1);
    assert_eq!(summary.quarantined, 0);
    assert_eq!(h.source.fetch_count(), fetches);

    let archived = "messages/Archive/2024/03/Archive_20240307-0941_Hello.eml";
    assert_eq!(h.files(), vec![archived.to_string()]);
    let row = h.message("m1-moved").await;
    assert_eq!(row.storage_path.as_str(), archived);
    assert_eq!(row.folder_id.as_str(), "f-archive");
    assert_eq!(h.sqlite.all_messages().await.unwrap().len(), 1);
}

async fn archive_and_inbox(parallelism: usize) -> Harness {
    let mut h = Harness::new().await;
    h.config.parallelism = parallelism;
    h.source.add_folder("f-archive", None, "Archive");
    h.source.add_folder("f-inbox", None, "Inbox");
    h.source.add_folder("f-junk", None, "Junk");
    h.source
        .add_message("f-archive", "m1", "Hello", at(0), b"hello body");
    h.run().await;
    h
}

async fn assert_moved_to_inbox(h: &Harness, summary: &mailmirror_sync::RunSummary, fetches: usize) {
    assert_eq!(summary.moved, 1);
    assert_eq!(summary.quarantined, 0);
    assert_eq!(summary.added, 0);
    assert_eq!(h.source.fetch_count(), fetches);

    let inbox = "messages/Inbox/2024/03/Inbox_20240307-0941_Hello.eml";
    assert_eq!(h.files(), vec![inbox.to_string()]);
    let row = h.message("m1-moved").await;
    assert_eq!(row.folder_id.as_str(), "f-inbox");
    assert_eq!(row.storage_path.as_str(), inbox);
    assert!(row.integrity_error.is_none());
    assert_eq!(h.sqlite.all_messages().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_move_out_of_earlier_folder_is_relocated() {
    // The source folder "Archive" is pulled before the destination "Inbox"
    let h = archive_and_inbox(1).await;
    let fetches = h.source.fetch_count();

    h.source.move_message("f-archive", "f-inbox", "m1", "m1-moved");
    let summary = h.run().await;

    assert_moved_to_inbox(&h, &summary, fetches).await;
    assert_eq!(h.source.locate_count(), 1);
}

#[tokio::test]
async fn test_move_with_concurrent_folder_workers() {
    let h = archive_and_inbox(4).await;
    let fetches = h.source.fetch_count();

    h.source.move_message("f-archive", "f-inbox", "m1", "m1-moved");
    let summary = h.run().await;

    assert_moved_to_inbox(&h, &summary, fetches).await;
}

#[tokio::test]
async fn test_move_into_excluded_folder_is_quarantined() {
    let h = archive_and_inbox(1).await;
    h.source.move_message("f-archive", "f-junk", "m1", "m1-junk");

    let mut options = RunOptions::from_config(&h.config);
    options.exclude = vec!["Junk".to_string()];
    let summary = h.run_with(options, CancellationToken::new()).await;

    assert_eq!(summary.quarantined, 1);
    assert_eq!(summary.moved, 0);
    assert_eq!(
        h.files(),
        vec!["quarantine/Archive/2024/03/Archive_20240307-0941_Hello.eml".to_string()]
    );
}

#[tokio::test]
async fn test_rejected_cursor_falls_back_to_bounded_listing() {
    let h = inbox_with_two().await;
    let fetches = h.source.fetch_count();
    h.source.expire_cursors();
    h.source
        .add_message("f-inbox", "m3", "Fresh", chrono::Utc::now(), b"new body");

    let summary = h.run().await;

    let report = &summary.folders[0];
    assert!(report.cursor_reset);
    assert!(report.completed);
    assert_eq!(summary.added, 1);
    // Only the message inside the overlap window was listed and fetched
    assert_eq!(h.source.fetch_count(), fetches + 1);
    let (_, since_page) = h.source.list_calls().last().cloned().unwrap();
    assert_eq!(since_page, None);

    let folder = h.folder("f-inbox").await;
    assert!(matches!(folder.checkpoint, Checkpoint::Delta { .. }));
    assert_eq!(h.sqlite.all_messages().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_delta_with_several_pages() {
    let h = inbox_with_two().await;
    for i in 0..5 {
        h.source
            .add_message("f-inbox", &format!("n{i}"), "Batch", at(10 + i), b"batch");
    }

    let summary = h.run().await;

    assert_eq!(summary.added, 5);
    assert_eq!(summary.folders[0].pages, 3);
    assert!(summary.folders[0].completed);
    assert_eq!(h.files().len(), 7);
}
