//! A full mirror run through the Graph adapter

use std::sync::Arc;

use mailmirror_cache::{DatabasePool, SqliteStateStore};
use mailmirror_core::config::SyncConfig;
use mailmirror_core::domain::{Checkpoint, FolderId};
use mailmirror_core::ports::IStateStore;
use mailmirror_sync::{ArchiveStorage, RetryPolicy, RunOptions, SyncOrchestrator};
use serde_json::json;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use crate::common::{self, folder, message, removed, INBOX_DELTA};

const HELLO: &str = "messages/Inbox/2024/03/Inbox_20240307-0941_Hello.eml";

#[tokio::test]
async fn test_mirror_then_quarantine_through_graph() {
    let (server, source) = common::setup_graph_mock().await;
    let dir = TempDir::new().unwrap();
    let pool = DatabasePool::in_memory().await.unwrap();
    let store = Arc::new(SqliteStateStore::new(pool.pool().clone()));
    let storage = Arc::new(ArchiveStorage::new(dir.path(), "messages", "quarantine").unwrap());
    let config = SyncConfig {
        mailbox: "graph".to_string(),
        parallelism: 1,
        ..Default::default()
    };
    let orchestrator = SyncOrchestrator::new(
        Arc::new(source),
        store.clone(),
        storage,
        config.clone(),
        RetryPolicy::immediate(1),
    );

    common::mount_json(
        &server,
        "/me/mailFolders",
        None,
        json!({ "value": [folder("f-inbox", "Inbox", 0)] }),
    )
    .await;
    common::mount_json(
        &server,
        INBOX_DELTA,
        Some(("$deltatoken", "d1")),
        json!({
            "value": [removed("m1")],
            "@odata.deltaLink": common::link(&server, &format!("{INBOX_DELTA}?$deltatoken=d2"))
        }),
    )
    .await;
    common::mount_json(
        &server,
        INBOX_DELTA,
        None,
        json!({
            "value": [
                message("m1", "Hello", "2024-03-07T09:41:00Z"),
                message("m2", "Weekly report", "2024-03-07T09:46:00Z")
            ],
            "@odata.deltaLink": common::link(&server, &format!("{INBOX_DELTA}?$deltatoken=d1"))
        }),
    )
    .await;
    common::mount_content(&server, "m1", b"From: a\r\n\r\nhello").await;
    common::mount_content(&server, "m2", b"From: b\r\n\r\nreport").await;

    let summary = orchestrator
        .run(&RunOptions::from_config(&config), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.added, 2);
    assert!(!summary.has_failures());
    assert_eq!(std::fs::read(dir.path().join(HELLO)).unwrap(), b"From: a\r\n\r\nhello");
    let inbox = store
        .get_folder(&FolderId::new("f-inbox").unwrap())
        .await
        .unwrap()
        .unwrap();
    match &inbox.checkpoint {
        Checkpoint::Delta { cursor, next_page } => {
            assert!(cursor.as_str().ends_with("$deltatoken=d1"));
            assert!(next_page.is_none());
        }
        other => panic!("unexpected checkpoint {other:?}"),
    }

    let summary = orchestrator
        .run(&RunOptions::from_config(&config), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.quarantined, 1);
    assert!(!dir.path().join(HELLO).exists());
    assert_eq!(
        std::fs::read(dir.path().join("quarantine/Inbox/2024/03/Inbox_20240307-0941_Hello.eml"))
            .unwrap(),
        b"From: a\r\n\r\nhello"
    );
}
