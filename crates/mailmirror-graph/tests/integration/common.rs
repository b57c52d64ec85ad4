//! Shared helpers: a mock Graph server and JSON builders for its resources

use std::sync::Arc;

use mailmirror_core::ports::StaticTokenProvider;
use mailmirror_graph::{GraphClient, GraphMailSource};
use serde_json::{json, Value};
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const TOKEN: &str = "test-access-token";

pub const INBOX_DELTA: &str = "/me/mailFolders/f-inbox/messages/delta";

/// Starts a mock server and returns a source for the signed-in user
pub async fn setup_graph_mock() -> (MockServer, GraphMailSource) {
    let server = MockServer::start().await;
    let source = source_for(&server, "me");
    (server, source)
}

pub fn source_for(server: &MockServer, user: &str) -> GraphMailSource {
    let client =
        GraphClient::with_base_url(Arc::new(StaticTokenProvider::new(TOKEN)), &server.uri())
            .unwrap();
    GraphMailSource::new(client, user)
}

/// Absolute link on the mock server, as Graph would issue it
pub fn link(server: &MockServer, path_and_query: &str) -> String {
    format!("{}{}", server.uri(), path_and_query)
}

pub fn folder(id: &str, name: &str, children: u64) -> Value {
    json!({
        "id": id,
        "displayName": name,
        "childFolderCount": children,
        "totalItemCount": 10,
        "unreadItemCount": 2
    })
}

pub fn message(id: &str, subject: &str, received: &str) -> Value {
    json!({
        "id": id,
        "subject": subject,
        "receivedDateTime": received,
        "changeKey": format!("ck-{id}")
    })
}

pub fn removed(id: &str) -> Value {
    json!({ "id": id, "@removed": { "reason": "deleted" } })
}

/// Mounts a GET on `path_str`, optionally requiring one query parameter
pub async fn mount_json(
    server: &MockServer,
    path_str: &str,
    query: Option<(&str, &str)>,
    body: Value,
) {
    let mock = Mock::given(method("GET"))
        .and(path(path_str))
        .and(header("Authorization", format!("Bearer {TOKEN}").as_str()));
    let mock = match query {
        Some((key, value)) => mock.and(query_param(key, value)),
        None => mock,
    };
    mock.respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

/// Mounts a failure response on `path_str`
pub async fn mount_status(server: &MockServer, path_str: &str, template: ResponseTemplate) {
    Mock::given(method("GET"))
        .and(path(path_str))
        .respond_with(template)
        .mount(server)
        .await;
}

/// Mounts the raw MIME download for a message
pub async fn mount_content(server: &MockServer, id: &str, content: &[u8]) {
    Mock::given(method("GET"))
        .and(path(format!("/me/messages/{id}/$value")))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(content.to_vec())
                .insert_header("Content-Type", "message/rfc822"),
        )
        .mount(server)
        .await;
}
