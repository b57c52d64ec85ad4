//! Message index records
//!
//! A [`MessageRecord`] is the index row for one mirrored message. The raw
//! bytes live in the archive at `storage_path`; the row never embeds content.
//! Rows are never hard-deleted: a remote deletion moves the file into the
//! quarantine tree and marks the row quarantined.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::DomainError;
use super::newtypes::{ArchivePath, FolderId, ImmutableId, MessageId};

/// Why a message was moved into quarantine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuarantineReason {
    /// The remote reported a tombstone for the message
    RemoteDeleted,
    /// A consistency pass completed a quarantine that was interrupted
    /// between the file move and the row update
    Recovered,
}

impl QuarantineReason {
    /// Stable string form used for storage
    pub fn as_str(&self) -> &'static str {
        match self {
            QuarantineReason::RemoteDeleted => "remote_deleted",
            QuarantineReason::Recovered => "recovered",
        }
    }

    /// Parses the stored string form
    pub fn parse(s: &str) -> Result<Self, DomainError> {
        match s {
            "remote_deleted" => Ok(QuarantineReason::RemoteDeleted),
            "recovered" => Ok(QuarantineReason::Recovered),
            other => Err(DomainError::UnknownVariant {
                kind: "quarantine reason",
                value: other.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for QuarantineReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Quarantine metadata carried by a quarantined row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuarantineInfo {
    pub reason: QuarantineReason,
    pub quarantined_at: DateTime<Utc>,
}

/// One row of the message index
#[derive(Debug, Clone, PartialEq)]
pub struct MessageRecord {
    /// Local surrogate key
    pub id: i64,
    /// Remote message ID (unique among non-quarantined rows)
    pub remote_id: MessageId,
    /// Remote immutable ID, used to follow the message across folder moves
    pub immutable_id: Option<ImmutableId>,
    /// Containing folder
    pub folder_id: FolderId,
    pub subject: String,
    pub received_at: DateTime<Utc>,
    /// Archive-relative path of the raw content
    pub storage_path: ArchivePath,
    /// Remote change key; an unchanged key means unchanged content
    pub change_key: Option<String>,
    /// Hex SHA-256 of the raw content
    pub content_hash: String,
    pub size_bytes: u64,
    pub quarantine: Option<QuarantineInfo>,
    /// Set when the archive file is missing or does not match the row
    pub integrity_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MessageRecord {
    /// Returns true if the message is in quarantine
    pub fn is_quarantined(&self) -> bool {
        self.quarantine.is_some()
    }

    /// Returns true if the remote change key matches the stored one
    ///
    /// A missing key on either side counts as changed.
    pub fn matches_change_key(&self, change_key: Option<&str>) -> bool {
        match (self.change_key.as_deref(), change_key) {
            (Some(stored), Some(remote)) => stored == remote,
            _ => false,
        }
    }
}

/// Values for inserting a message row (or upserting by remote ID)
#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    pub remote_id: MessageId,
    pub immutable_id: Option<ImmutableId>,
    pub folder_id: FolderId,
    pub subject: String,
    pub received_at: DateTime<Utc>,
    pub storage_path: ArchivePath,
    pub change_key: Option<String>,
    pub content_hash: String,
    pub size_bytes: u64,
}

/// Content fields refreshed when the remote reports an update
#[derive(Debug, Clone, PartialEq)]
pub struct ContentUpdate {
    pub subject: String,
    pub change_key: Option<String>,
    pub content_hash: String,
    pub size_bytes: u64,
}
