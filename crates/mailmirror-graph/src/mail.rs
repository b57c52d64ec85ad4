//! GraphMailSource - IMailSource implementation for the Graph mail API
//!
//! ## Endpoint mapping
//!
//! - `list_folders`: `GET /me/mailFolders`, then `childFolders` of every
//!   folder reporting children, breadth first
//! - `list_messages`: `GET /me/mailFolders/{id}/messages/delta`, optionally
//!   filtered on `receivedDateTime`; the final page carries the delta link
//! - `get_delta`: the stored delta link, then its `@odata.nextLink` pages
//! - `fetch_content`: `GET /me/messages/{id}/$value`
//! - `locate_message`: `GET /me/messages/{id}?$select=parentFolderId`; a 404
//!   means the message is gone
//!
//! Page tokens are the `@odata.nextLink` URLs and delta cursors are the
//! `@odata.deltaLink` URLs, stored verbatim. Every request asks for immutable
//! IDs so a message keeps its ID when it is moved between folders.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use mailmirror_core::config::GraphConfig;
use mailmirror_core::domain::{DeltaCursor, FolderId, ImmutableId, MessageId, PageToken};
use mailmirror_core::ports::{
    ChangePage, DeltaEntry, ICredentialProvider, IMailSource, RemoteFolder, RemoteMessage,
    SourceError,
};
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::client::GraphClient;

const FOLDER_SELECT: &str = "id,displayName,childFolderCount,totalItemCount,unreadItemCount";
const MESSAGE_SELECT: &str = "subject,receivedDateTime,changeKey";
const FOLDER_PAGE_SIZE: u32 = 100;
const IMMUTABLE_IDS: &str = "IdType=\"ImmutableId\"";

// ============================================================================
// Microsoft Graph API response types (JSON deserialization)
// ============================================================================

/// A page of an OData collection
#[derive(Debug, Deserialize)]
struct ODataPage<T> {
    #[serde(default = "Vec::new")]
    value: Vec<T>,

    /// Present while more pages remain
    #[serde(rename = "@odata.nextLink")]
    next_link: Option<String>,

    /// Present on the last page of a delta walk
    #[serde(rename = "@odata.deltaLink")]
    delta_link: Option<String>,
}

/// A mailFolder resource
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphMailFolder {
    id: String,
    #[serde(default)]
    display_name: String,
    #[serde(default)]
    child_folder_count: u64,
    #[serde(default)]
    total_item_count: u64,
    #[serde(default)]
    unread_item_count: u64,
}

/// A message resource as returned by `messages/delta`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphMessage {
    id: String,
    subject: Option<String>,
    received_date_time: Option<DateTime<Utc>>,
    change_key: Option<String>,

    /// Present on delta entries for messages deleted or moved out of the folder
    #[serde(rename = "@removed")]
    removed: Option<serde_json::Value>,
}

/// Just the parent folder of a message
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphMessageParent {
    parent_folder_id: Option<String>,
}

fn protocol(err: impl std::fmt::Display) -> SourceError {
    SourceError::Protocol(err.to_string())
}

// ============================================================================
// GraphMailSource
// ============================================================================

/// Remote mailbox backed by Microsoft Graph
#[derive(Debug)]
pub struct GraphMailSource {
    client: GraphClient,
    /// `["me"]` or `["users", "<principal>"]`
    user: Vec<String>,
}

impl GraphMailSource {
    /// `user` is `me` for the signed-in user, or a user principal name / ID
    pub fn new(client: GraphClient, user: &str) -> Self {
        let user = if user == "me" {
            vec!["me".to_string()]
        } else {
            vec!["users".to_string(), user.to_string()]
        };
        Self { client, user }
    }

    pub fn from_config(
        config: &GraphConfig,
        credentials: Arc<dyn ICredentialProvider>,
    ) -> anyhow::Result<Self> {
        let client = GraphClient::from_config(config, credentials)?;
        Ok(Self::new(client, &config.user))
    }

    fn endpoint(&self, tail: &[&str]) -> Url {
        self.client
            .endpoint(self.user.iter().map(String::as_str).chain(tail.iter().copied()))
    }

    fn folder_query(mut url: Url) -> Url {
        url.query_pairs_mut()
            .append_pair("$select", FOLDER_SELECT)
            .append_pair("$top", &FOLDER_PAGE_SIZE.to_string());
        url
    }

    fn page_preferences(page_size: u32) -> Vec<String> {
        vec![
            format!("odata.maxpagesize={page_size}"),
            IMMUTABLE_IDS.to_string(),
        ]
    }

    /// Fetches one message page and converts it
    ///
    /// In a full listing removals are dropped and everything else is
    /// [`DeltaEntry::Added`]. In an incremental pull Graph does not say
    /// whether a message is new or changed, so non-removed entries are
    /// [`DeltaEntry::Updated`] and the engine resolves them against its index.
    async fn message_page(
        &self,
        url: Url,
        page_size: u32,
        listing: bool,
    ) -> Result<ChangePage, SourceError> {
        let page: ODataPage<GraphMessage> = self
            .client
            .get_json(url, &Self::page_preferences(page_size))
            .await?;

        let mut entries = Vec::with_capacity(page.value.len());
        for raw in page.value {
            let id = MessageId::new(raw.id.as_str()).map_err(protocol)?;
            if raw.removed.is_some() {
                if !listing {
                    entries.push(DeltaEntry::Deleted(id));
                }
                continue;
            }
            let message = to_remote_message(raw, id)?;
            entries.push(if listing {
                DeltaEntry::Added(message)
            } else {
                DeltaEntry::Updated(message)
            });
        }

        let next_page = page.next_link.map(PageToken::new).transpose().map_err(protocol)?;
        let cursor = match next_page {
            Some(_) => None,
            None => page
                .delta_link
                .map(DeltaCursor::new)
                .transpose()
                .map_err(protocol)?,
        };

        debug!(
            entries = entries.len(),
            more = next_page.is_some(),
            cursor = cursor.is_some(),
            "Message page"
        );
        Ok(ChangePage {
            entries,
            next_page,
            cursor,
        })
    }
}

fn to_remote_message(raw: GraphMessage, id: MessageId) -> Result<RemoteMessage, SourceError> {
    let received_at = raw.received_date_time.ok_or_else(|| {
        SourceError::Protocol(format!("Message {} has no receivedDateTime", raw.id))
    })?;
    let immutable_id = ImmutableId::new(raw.id.as_str()).map_err(protocol)?;
    Ok(RemoteMessage {
        id,
        immutable_id: Some(immutable_id),
        subject: raw.subject.unwrap_or_default(),
        received_at,
        change_key: raw.change_key,
        size: None,
    })
}

#[async_trait::async_trait]
impl IMailSource for GraphMailSource {
    async fn list_folders(&self) -> Result<Vec<RemoteFolder>, SourceError> {
        let mut folders = Vec::new();
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([(None, Self::folder_query(self.endpoint(&["mailFolders"])))]);

        while let Some((parent, first)) = queue.pop_front() {
            let mut next = Some(first);
            while let Some(url) = next.take() {
                let page: ODataPage<GraphMailFolder> = self.client.get_json(url, &[]).await?;
                for raw in page.value {
                    if !seen.insert(raw.id.clone()) {
                        continue;
                    }
                    let id = FolderId::new(raw.id.as_str()).map_err(protocol)?;
                    if raw.child_folder_count > 0 {
                        let children = self.endpoint(&["mailFolders", id.as_str(), "childFolders"]);
                        queue.push_back((Some(id.clone()), Self::folder_query(children)));
                    }
                    folders.push(RemoteFolder {
                        id,
                        parent_id: parent.clone(),
                        display_name: raw.display_name,
                        total_count: raw.total_item_count,
                        unread_count: raw.unread_item_count,
                    });
                }
                next = page
                    .next_link
                    .map(|link| self.client.link(&link))
                    .transpose()?;
            }
        }

        debug!(count = folders.len(), "Listed mail folders");
        Ok(folders)
    }

    async fn list_messages(
        &self,
        folder: &FolderId,
        since: Option<DateTime<Utc>>,
        page: Option<&PageToken>,
        page_size: u32,
    ) -> Result<ChangePage, SourceError> {
        let url = match page {
            Some(token) => self.client.link(token.as_str())?,
            None => {
                let mut url = self.endpoint(&["mailFolders", folder.as_str(), "messages", "delta"]);
                {
                    let mut query = url.query_pairs_mut();
                    query.append_pair("$select", MESSAGE_SELECT);
                    if let Some(since) = since {
                        let since = since.to_rfc3339_opts(SecondsFormat::Secs, true);
                        query.append_pair("$filter", &format!("receivedDateTime ge {since}"));
                    }
                }
                url
            }
        };
        debug!(folder = %folder, resumed = page.is_some(), "Listing messages");
        self.message_page(url, page_size, true).await
    }

    async fn get_delta(
        &self,
        folder: &FolderId,
        cursor: &DeltaCursor,
        page: Option<&PageToken>,
        page_size: u32,
    ) -> Result<ChangePage, SourceError> {
        let url = match page {
            Some(token) => self.client.link(token.as_str())?,
            None => self.client.link(cursor.as_str())?,
        };
        debug!(folder = %folder, resumed = page.is_some(), "Pulling message delta");
        self.message_page(url, page_size, false).await
    }

    async fn fetch_content(&self, message: &MessageId) -> Result<Vec<u8>, SourceError> {
        let url = self.endpoint(&["messages", message.as_str(), "$value"]);
        let bytes = self
            .client
            .get_bytes(url, &[IMMUTABLE_IDS.to_string()])
            .await?;
        debug!(message_id = %message, bytes = bytes.len(), "Downloaded message content");
        Ok(bytes)
    }

    async fn locate_message(&self, message: &ImmutableId) -> Result<Option<FolderId>, SourceError> {
        let mut url = self.endpoint(&["messages", message.as_str()]);
        url.query_pairs_mut().append_pair("$select", "parentFolderId");

        let found: GraphMessageParent = match self
            .client
            .get_json(url, &[IMMUTABLE_IDS.to_string()])
            .await
        {
            Ok(found) => found,
            Err(SourceError::NotFound(_)) => {
                debug!(message_id = %message, "Message no longer exists");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        let folder = found
            .parent_folder_id
            .ok_or_else(|| protocol("message without parentFolderId"))?;
        let folder = FolderId::new(folder).map_err(protocol)?;
        debug!(message_id = %message, folder = %folder, "Located message");
        Ok(Some(folder))
    }
}
