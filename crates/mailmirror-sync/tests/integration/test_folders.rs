//! Folder identity map: renames, moves to a new parent, retirement and revival

use mailmirror_core::ports::IStateStore;
use mailmirror_sync::{ConsistencyChecker, ConsistencyOptions};

use crate::common::{at, Harness};

const PLAN: &str = "messages/Inbox/Projects/2024/03/Projects_20240307-0941_Plan.eml";
const PLAN_MOVED: &str = "messages/Inbox/Clients/2024/03/Projects_20240307-0941_Plan.eml";

async fn with_projects() -> Harness {
    let h = Harness::new().await;
    h.source.add_folder("f-inbox", None, "Inbox");
    h.source.add_folder("f-proj", Some("f-inbox"), "Projects");
    h.source.add_message("f-inbox", "m1", "Hello", at(0), b"hello");
    h.source.add_message("f-proj", "p1", "Plan", at(0), b"plan");
    h.source.add_message("f-proj", "p2", "Budget", at(3), b"budget");
    h.run().await;
    assert_eq!(h.message("p1").await.storage_path.as_str(), PLAN);
    h
}

#[tokio::test]
async fn test_rename_moves_files_before_rows() {
    let h = with_projects().await;
    let fetches = h.source.fetch_count();
    h.source.rename_folder("f-proj", "Clients");

    let summary = h.run().await;

    assert_eq!(summary.folders_moved, 1);
    assert_eq!(summary.added, 0);
    assert_eq!(h.source.fetch_count(), fetches);
    assert!(!h.path(PLAN).exists());
    assert_eq!(h.read(PLAN_MOVED), b"plan");

    let folder = h.folder("f-proj").await;
    assert_eq!(folder.local_path.as_str(), "Inbox/Clients");
    assert_eq!(folder.display_name, "Clients");
    assert_eq!(h.message("p1").await.storage_path.as_str(), PLAN_MOVED);
    assert_eq!(
        h.message("p2").await.storage_path.as_str(),
        "messages/Inbox/Clients/2024/03/Projects_20240307-0944_Budget.eml"
    );

    // Messages arriving after the rename land under the new path
    h.source.add_message("f-proj", "p3", "Kickoff", at(10), b"kickoff");
    h.run().await;
    assert_eq!(
        h.message("p3").await.storage_path.as_str(),
        "messages/Inbox/Clients/2024/03/Clients_20240307-0951_Kickoff.eml"
    );

    let checker = ConsistencyChecker::new(h.store.clone(), h.storage.clone());
    let report = checker.check(ConsistencyOptions::default()).await.unwrap();
    assert!(report.is_clean());
    assert!(report.untracked.is_empty());
}

#[tokio::test]
async fn test_folder_moved_to_new_parent() {
    let h = Harness::new().await;
    h.source.add_folder("f-a", None, "A");
    h.source.add_folder("f-b", Some("f-a"), "B");
    h.source.add_folder("f-c", Some("f-a"), "C");
    h.source.add_folder("f-x", Some("f-b"), "X");
    h.source.add_folder("f-y", Some("f-x"), "Y");
    h.source.add_message("f-x", "x1", "Notes", at(0), b"notes");
    h.source.add_message("f-y", "y1", "Draft", at(1), b"draft");
    h.run().await;
    assert_eq!(
        h.message("x1").await.storage_path.as_str(),
        "messages/A/B/X/2024/03/X_20240307-0941_Notes.eml"
    );
    let fetches = h.source.fetch_count();

    h.source.reparent_folder("f-x", Some("f-c"));
    let summary = h.run().await;

    assert_eq!(summary.folders_moved, 2);
    assert_eq!(summary.added, 0);
    assert_eq!(summary.quarantined, 0);
    assert_eq!(h.source.fetch_count(), fetches);

    assert_eq!(h.folder("f-x").await.local_path.as_str(), "A/C/X");
    assert_eq!(h.folder("f-y").await.local_path.as_str(), "A/C/X/Y");
    let notes = "messages/A/C/X/2024/03/X_20240307-0941_Notes.eml";
    let draft = "messages/A/C/X/Y/2024/03/Y_20240307-0942_Draft.eml";
    assert_eq!(h.files(), vec![notes.to_string(), draft.to_string()]);
    assert_eq!(h.read(notes), b"notes");
    assert_eq!(h.message("x1").await.storage_path.as_str(), notes);
    assert_eq!(h.message("y1").await.storage_path.as_str(), draft);

    let checker = ConsistencyChecker::new(h.store.clone(), h.storage.clone());
    let report = checker.check(ConsistencyOptions::default()).await.unwrap();
    assert!(report.is_clean());
    assert!(report.untracked.is_empty());
}

#[tokio::test]
async fn test_parent_rename_carries_children() {
    let h = with_projects().await;
    h.source.rename_folder("f-inbox", "Mail");

    let summary = h.run().await;

    assert_eq!(summary.folders_moved, 2);
    assert_eq!(h.folder("f-proj").await.local_path.as_str(), "Mail/Projects");
    assert_eq!(
        h.message("p1").await.storage_path.as_str(),
        "messages/Mail/Projects/2024/03/Projects_20240307-0941_Plan.eml"
    );
    assert_eq!(
        h.message("m1").await.storage_path.as_str(),
        "messages/Mail/2024/03/Inbox_20240307-0941_Hello.eml"
    );
    assert!(h.files().iter().all(|f| f.starts_with("messages/Mail/")));
}

#[tokio::test]
async fn test_missing_folder_is_retired_then_revived() {
    let h = with_projects().await;
    h.source.remove_folder("f-proj");

    let summary = h.run().await;

    assert_eq!(summary.folders_retired, 1);
    assert_eq!(summary.folders_in_scope, 1);
    assert!(h.folder("f-proj").await.is_retired());
    // Rows and files are kept
    assert_eq!(h.read(PLAN), b"plan");
    assert_eq!(h.sqlite.all_messages().await.unwrap().len(), 3);

    h.source.add_folder("f-proj", Some("f-inbox"), "Projects");
    let summary = h.run().await;

    assert_eq!(summary.folders_revived, 1);
    assert_eq!(summary.folders_in_scope, 2);
    let folder = h.folder("f-proj").await;
    assert!(!folder.is_retired());
    assert_eq!(folder.local_path.as_str(), "Inbox/Projects");
}

#[tokio::test]
async fn test_orphan_folder_is_reported_not_synced() {
    let h = Harness::new().await;
    h.source.add_folder("f-inbox", None, "Inbox");
    h.source.add_folder("f-lost", Some("f-nowhere"), "Lost");
    h.source.add_message("f-lost", "l1", "Lost", at(0), b"lost");

    let summary = h.run().await;

    assert_eq!(summary.folders_in_scope, 1);
    assert_eq!(summary.folders_failed, 1);
    assert!(summary.errors[0].error.contains("not in the remote listing"));
    assert_eq!(h.source.fetch_count(), 0);
}
