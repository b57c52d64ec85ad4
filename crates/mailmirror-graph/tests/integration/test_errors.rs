//! HTTP outcomes mapped onto source error classes

use std::sync::Arc;
use std::time::Duration;

use mailmirror_core::domain::{DeltaCursor, FolderId, MessageId};
use mailmirror_core::ports::{IMailSource, SourceError};
use mailmirror_graph::{EnvTokenProvider, GraphClient, GraphMailSource};
use serde_json::json;
use wiremock::ResponseTemplate;

use crate::common::{self, INBOX_DELTA};

fn inbox() -> FolderId {
    FolderId::new("f-inbox").unwrap()
}

fn graph_error(code: &str, message: &str) -> serde_json::Value {
    json!({ "error": { "code": code, "message": message } })
}

#[tokio::test]
async fn test_expired_token_is_unauthorized() {
    let (server, source) = common::setup_graph_mock().await;
    common::mount_status(
        &server,
        "/me/mailFolders",
        ResponseTemplate::new(401).set_body_json(graph_error(
            "InvalidAuthenticationToken",
            "Access token has expired or is not yet valid.",
        )),
    )
    .await;

    let err = source.list_folders().await.unwrap_err();

    assert!(err.is_fatal());
    assert!(err.to_string().contains("Access token has expired"));
}

#[tokio::test]
async fn test_throttling_carries_retry_after() {
    let (server, source) = common::setup_graph_mock().await;
    common::mount_status(
        &server,
        INBOX_DELTA,
        ResponseTemplate::new(429).insert_header("Retry-After", "7"),
    )
    .await;

    let err = source
        .list_messages(&inbox(), None, None, 50)
        .await
        .unwrap_err();

    assert_eq!(
        err,
        SourceError::RateLimited {
            retry_after: Some(Duration::from_secs(7))
        }
    );
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_server_errors_are_transient() {
    let (server, source) = common::setup_graph_mock().await;
    common::mount_status(&server, "/me/mailFolders", ResponseTemplate::new(503)).await;

    let err = source.list_folders().await.unwrap_err();

    assert!(matches!(err, SourceError::Transient(_)));
}

#[tokio::test]
async fn test_expired_delta_link_is_cursor_invalid() {
    let (server, source) = common::setup_graph_mock().await;
    common::mount_status(&server, INBOX_DELTA, ResponseTemplate::new(410)).await;

    let cursor =
        DeltaCursor::new(common::link(&server, &format!("{INBOX_DELTA}?$deltatoken=old"))).unwrap();
    let err = source.get_delta(&inbox(), &cursor, None, 50).await.unwrap_err();

    assert_eq!(err, SourceError::CursorInvalid);
}

#[tokio::test]
async fn test_sync_state_not_found_is_cursor_invalid() {
    let (server, source) = common::setup_graph_mock().await;
    common::mount_status(
        &server,
        INBOX_DELTA,
        ResponseTemplate::new(400).set_body_json(graph_error(
            "SyncStateNotFound",
            "The sync state generation is not found.",
        )),
    )
    .await;

    let cursor =
        DeltaCursor::new(common::link(&server, &format!("{INBOX_DELTA}?$deltatoken=old"))).unwrap();
    let err = source.get_delta(&inbox(), &cursor, None, 50).await.unwrap_err();

    assert_eq!(err, SourceError::CursorInvalid);
}

#[tokio::test]
async fn test_missing_message_is_not_found() {
    let (server, source) = common::setup_graph_mock().await;
    common::mount_status(
        &server,
        "/me/messages/gone/$value",
        ResponseTemplate::new(404).set_body_json(graph_error(
            "ErrorItemNotFound",
            "The specified object was not found in the store.",
        )),
    )
    .await;

    let err = source
        .fetch_content(&MessageId::new("gone").unwrap())
        .await
        .unwrap_err();

    assert!(matches!(err, SourceError::NotFound(_)));
}

#[tokio::test]
async fn test_malformed_body_is_protocol_error() {
    let (server, source) = common::setup_graph_mock().await;
    common::mount_status(
        &server,
        "/me/mailFolders",
        ResponseTemplate::new(200).set_body_string("<html>proxy login</html>"),
    )
    .await;

    let err = source.list_folders().await.unwrap_err();

    assert!(matches!(err, SourceError::Protocol(_)));
    assert!(!err.is_transient());
}

#[tokio::test]
async fn test_foreign_delta_link_is_refused() {
    let (server, source) = common::setup_graph_mock().await;

    let cursor = DeltaCursor::new("https://attacker.example.com/collect?$deltatoken=x").unwrap();
    let err = source.get_delta(&inbox(), &cursor, None, 50).await.unwrap_err();

    assert!(matches!(err, SourceError::Protocol(_)));
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_missing_credential_sends_nothing() {
    let server = wiremock::MockServer::start().await;
    let provider = EnvTokenProvider::new("MAILMIRROR_GRAPH_TEST_TOKEN_NEVER_SET");
    let client = GraphClient::with_base_url(Arc::new(provider), &server.uri()).unwrap();
    let source = GraphMailSource::new(client, "me");

    let err = source.list_folders().await.unwrap_err();

    assert!(matches!(err, SourceError::Unauthorized(ref m) if m.contains("NEVER_SET")));
    assert!(server.received_requests().await.unwrap().is_empty());
}
