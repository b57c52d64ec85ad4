//! Remote mailbox port (driven/secondary port)
//!
//! This module defines the interface for reading a remote, paginated mailbox.
//! The primary implementation speaks the Microsoft Graph mail API, but the
//! engine only depends on the capabilities below.
//!
//! ## Design Notes
//!
//! - Errors are classified with [`SourceError`] rather than `anyhow`, because
//!   the engine's behavior depends on the class: transient errors are retried,
//!   cursor invalidation triggers a date-bounded relist, authorization
//!   failures abort the run.
//! - Page tokens and delta cursors are opaque; the engine only stores and
//!   hands them back.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::newtypes::{DeltaCursor, FolderId, ImmutableId, MessageId, PageToken};

// ============================================================================
// SourceError
// ============================================================================

/// Classified failure of a remote call
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SourceError {
    /// Timeout, connection reset, 5xx and similar
    #[error("Transient remote error: {0}")]
    Transient(String),

    /// The remote asked us to slow down
    #[error("Rate limited (retry after {retry_after:?})")]
    RateLimited {
        /// Server-requested delay, if one was sent
        retry_after: Option<Duration>,
    },

    /// The stored delta cursor is no longer accepted
    #[error("Delta cursor is no longer valid")]
    CursorInvalid,

    /// Credential rejected
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The requested folder or message does not exist remotely
    #[error("Not found: {0}")]
    NotFound(String),

    /// Malformed response or unexpected status
    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl SourceError {
    /// Returns true if retrying the same call may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SourceError::Transient(_) | SourceError::RateLimited { .. }
        )
    }

    /// Returns true if the failure must abort the whole run
    pub fn is_fatal(&self) -> bool {
        matches!(self, SourceError::Unauthorized(_))
    }

    /// Server-requested delay before the next attempt
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            SourceError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

// ============================================================================
// DTOs
// ============================================================================

/// A folder as reported by the remote listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFolder {
    pub id: FolderId,
    /// `None` for top-level folders
    pub parent_id: Option<FolderId>,
    pub display_name: String,
    pub total_count: u64,
    pub unread_count: u64,
}

/// Message metadata carried by listing and delta entries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteMessage {
    pub id: MessageId,
    /// Identity that survives moves between folders, when the remote provides one
    pub immutable_id: Option<ImmutableId>,
    pub subject: String,
    pub received_at: DateTime<Utc>,
    /// Changes whenever the message content changes
    pub change_key: Option<String>,
    pub size: Option<u64>,
}

/// One entry of a listing or delta page
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeltaEntry {
    Added(RemoteMessage),
    Updated(RemoteMessage),
    /// Tombstone
    Deleted(MessageId),
}

impl DeltaEntry {
    /// Remote ID the entry refers to
    pub fn message_id(&self) -> &MessageId {
        match self {
            DeltaEntry::Added(m) | DeltaEntry::Updated(m) => &m.id,
            DeltaEntry::Deleted(id) => id,
        }
    }
}

/// One page of a folder listing or delta feed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangePage {
    pub entries: Vec<DeltaEntry>,
    /// Present while more pages remain
    pub next_page: Option<PageToken>,
    /// Present on the final page: the cursor for the next incremental pull
    pub cursor: Option<DeltaCursor>,
}

impl ChangePage {
    /// Returns true if this is the final page of the walk
    pub fn is_last(&self) -> bool {
        self.next_page.is_none()
    }
}

// ============================================================================
// IMailSource trait
// ============================================================================

/// Port trait for the remote mailbox
///
/// ## Implementation Notes
///
/// - Implementations do not retry; the engine wraps every call in its own
///   backoff loop below the transaction boundary.
/// - A full listing ends with a cursor when the remote supports incremental
///   pulls; a listing that ends without one is repeated on the next run.
#[async_trait::async_trait]
pub trait IMailSource: Send + Sync {
    /// Lists every folder in the mailbox, flattened
    async fn list_folders(&self) -> Result<Vec<RemoteFolder>, SourceError>;

    /// Pages through the full listing of a folder
    ///
    /// `since` bounds the listing to messages received at or after that
    /// time. Every entry is reported as [`DeltaEntry::Added`].
    async fn list_messages(
        &self,
        folder: &FolderId,
        since: Option<DateTime<Utc>>,
        page: Option<&PageToken>,
        page_size: u32,
    ) -> Result<ChangePage, SourceError>;

    /// Pages through the changes since `cursor`
    async fn get_delta(
        &self,
        folder: &FolderId,
        cursor: &DeltaCursor,
        page: Option<&PageToken>,
        page_size: u32,
    ) -> Result<ChangePage, SourceError>;

    /// Downloads the raw RFC 822 content of a message
    async fn fetch_content(&self, message: &MessageId) -> Result<Vec<u8>, SourceError>;

    /// Folder currently holding the message with this immutable identity
    ///
    /// `None` if the message no longer exists anywhere in the mailbox. A
    /// tombstone for a message that is still found in another folder means
    /// it moved rather than was deleted.
    async fn locate_message(&self, message: &ImmutableId) -> Result<Option<FolderId>, SourceError>;
}
