//! Initial listing: layout, naming collisions, exclusions, dry run and
//! idempotent re-runs

use mailmirror_core::domain::{Checkpoint, SyncMode};
use mailmirror_core::ports::IStateStore;
use mailmirror_sync::storage::content_hash;
use mailmirror_sync::RunOptions;
use tokio_util::sync::CancellationToken;

use crate::common::{at, fid, Harness};

const HELLO: &str = "messages/Inbox/2024/03/Inbox_20240307-0941_Hello.eml";

#[tokio::test]
async fn test_initial_sync_mirrors_every_message() {
    let h = Harness::new().await;
    h.source.add_folder("f-inbox", None, "Inbox");
    h.source.add_message("f-inbox", "m1", "Hello", at(0), b"From: a\r\n\r\none");
    h.source.add_message("f-inbox", "m2", "Weekly report", at(5), b"From: b\r\n\r\ntwo");
    h.source.add_message("f-inbox", "m3", "Re: lunch?", at(70), b"From: c\r\n\r\nthree");

    let summary = h.run().await;

    assert_eq!(summary.added, 3);
    assert_eq!(summary.folders_synced, 1);
    assert!(!summary.has_failures());
    assert_eq!(
        h.files(),
        vec![
            HELLO.to_string(),
            "messages/Inbox/2024/03/Inbox_20240307-0946_Weekly_report.eml".to_string(),
            "messages/Inbox/2024/03/Inbox_20240307-1051_Re_lunch_.eml".to_string(),
        ]
    );
    assert_eq!(h.read(HELLO), b"From: a\r\n\r\none");

    let row = h.message("m1").await;
    assert_eq!(row.storage_path.as_str(), HELLO);
    assert_eq!(row.content_hash, content_hash(b"From: a\r\n\r\none"));
    assert_eq!(row.change_key.as_deref(), Some("ck-m1-1"));

    let folder = h.folder("f-inbox").await;
    assert!(matches!(folder.checkpoint, Checkpoint::Delta { next_page: None, .. }));
    assert!(folder.last_sync_at.is_some());

    let state = h.sqlite.get_sync_state("test").await.unwrap().unwrap();
    assert_eq!(state.mode, SyncMode::Incremental);
    assert!(state.last_error.is_none());
    assert!(h.partials().is_empty());
}

#[tokio::test]
async fn test_rerun_without_remote_changes_is_a_no_op() {
    let h = Harness::new().await;
    h.source.add_folder("f-inbox", None, "Inbox");
    h.source.add_message("f-inbox", "m1", "Hello", at(0), b"one");
    h.source.add_message("f-inbox", "m2", "Other", at(1), b"two");
    h.run().await;
    let files = h.files();
    let fetches = h.source.fetch_count();
    let folder = h.folder("f-inbox").await;

    let summary = h.run().await;

    assert_eq!(summary.processed(), 0);
    assert_eq!(summary.error_count, 0);
    assert_eq!(h.files(), files);
    assert_eq!(h.source.fetch_count(), fetches);
    assert_eq!(h.folder("f-inbox").await, folder);
    assert_eq!(h.sqlite.all_messages().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_colliding_names_get_suffixes() {
    let h = Harness::new().await;
    h.source.add_folder("f-inbox", None, "Inbox");
    h.source.add_message("f-inbox", "m1", "Hello", at(0), b"first");
    h.source.add_message("f-inbox", "m2", "Hello", at(0), b"second");
    h.source.add_message("f-inbox", "m3", "Hello", at(0), b"first");

    let summary = h.run().await;

    assert_eq!(summary.added, 3);
    assert_eq!(
        h.files(),
        vec![
            HELLO.to_string(),
            "messages/Inbox/2024/03/Inbox_20240307-0941_Hello_1.eml".to_string(),
            "messages/Inbox/2024/03/Inbox_20240307-0941_Hello_2.eml".to_string(),
        ]
    );
    assert_eq!(h.read(HELLO), b"first");
    assert_eq!(
        h.message("m2").await.storage_path.as_str(),
        "messages/Inbox/2024/03/Inbox_20240307-0941_Hello_1.eml"
    );
}

#[tokio::test]
async fn test_excluded_folders_are_not_pulled() {
    let h = Harness::new().await;
    h.source.add_folder("f-inbox", None, "Inbox");
    h.source.add_folder("f-robots", Some("f-inbox"), "Robots");
    h.source.add_folder("f-junk", None, "Junk Email");
    h.source.add_message("f-inbox", "m1", "Hello", at(0), b"one");
    h.source.add_message("f-robots", "r1", "Build failed", at(0), b"two");
    h.source.add_message("f-junk", "j1", "Prize", at(0), b"three");

    let options = RunOptions {
        exclude: vec!["Inbox/*".into(), "Junk*".into()],
        ..RunOptions::from_config(&h.config)
    };
    let summary = h.run_with(options, CancellationToken::new()).await;

    assert_eq!(summary.folders_in_scope, 1);
    assert_eq!(summary.folders_excluded, 2);
    assert_eq!(summary.added, 1);
    assert_eq!(h.files(), vec![HELLO.to_string()]);

    // Excluded folders are still tracked in the identity map
    let robots = h.folder("f-robots").await;
    assert_eq!(robots.local_path.as_str(), "Inbox/Robots");
    assert_eq!(robots.checkpoint, Checkpoint::Fresh);
}

#[tokio::test]
async fn test_dry_run_writes_nothing() {
    let h = Harness::new().await;
    h.source.add_folder("f-inbox", None, "Inbox");
    h.source.add_folder("f-sent", None, "Sent Items");
    h.source.add_message("f-inbox", "m1", "Hello", at(0), b"one");

    let options = RunOptions {
        dry_run: true,
        ..RunOptions::from_config(&h.config)
    };
    let summary = h.run_with(options, CancellationToken::new()).await;

    assert!(summary.dry_run);
    assert_eq!(summary.folders_created, 2);
    assert_eq!(summary.folders.len(), 2);
    assert_eq!(summary.added, 0);
    assert!(h.files().is_empty());
    // Not even the archive directories are created
    assert_eq!(std::fs::read_dir(h.dir.path()).unwrap().count(), 0);
    assert!(h.sqlite.get_folders().await.unwrap().is_empty());
    assert!(h.sqlite.get_sync_state("test").await.unwrap().is_none());
    assert_eq!(h.source.fetch_count(), 0);
}

#[tokio::test]
async fn test_nested_folders_and_parallel_workers() {
    let mut h = Harness::new().await;
    h.config.parallelism = 4;
    h.source.add_folder("f-inbox", None, "Inbox");
    h.source.add_folder("f-proj", Some("f-inbox"), "Projects");
    h.source.add_folder("f-sent", None, "Sent Items");
    for i in 0..5 {
        h.source
            .add_message("f-proj", &format!("p{i}"), &format!("Plan {i}"), at(i), b"plan");
        h.source
            .add_message("f-sent", &format!("s{i}"), &format!("Reply {i}"), at(i), b"reply");
    }

    let summary = h.run().await;

    assert_eq!(summary.added, 10);
    assert_eq!(summary.folders_synced, 3);
    assert_eq!(
        h.message("p0").await.storage_path.as_str(),
        "messages/Inbox/Projects/2024/03/Projects_20240307-0941_Plan_0.eml"
    );
    assert_eq!(
        h.message("s4").await.storage_path.as_str(),
        "messages/Sent Items/2024/03/Sent_Items_20240307-0945_Reply_4.eml"
    );
    let counts = h.sqlite.message_counts(Some(&fid("f-proj"))).await.unwrap();
    assert_eq!(counts.active, 5);
}
