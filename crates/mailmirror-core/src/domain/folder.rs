//! Folder identity records and per-folder checkpoints
//!
//! A [`Folder`] is identified by its remote folder ID, which is stable across
//! renames and moves. Its local path is recomputed from the remote parent
//! chain on every run and is never trusted from a previous run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::DomainError;
use super::newtypes::{ArchivePath, DeltaCursor, FolderId, PageToken};

/// Whether a folder (or mailbox) pulls a full listing or an incremental delta
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// No delta cursor yet: the full remote listing is walked page by page
    Initial,
    /// A delta cursor is stored: only changes since the cursor are requested
    Incremental,
}

impl SyncMode {
    /// Stable string form used for storage
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncMode::Initial => "initial",
            SyncMode::Incremental => "incremental",
        }
    }

    /// Parses the stored string form
    pub fn parse(s: &str) -> Result<Self, DomainError> {
        match s {
            "initial" => Ok(SyncMode::Initial),
            "incremental" => Ok(SyncMode::Incremental),
            other => Err(DomainError::UnknownVariant {
                kind: "sync mode",
                value: other.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for SyncMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted resume point for one folder
///
/// A checkpoint is only ever written in the same transaction as the page
/// data it follows, so the stored checkpoint always describes exactly the
/// set of pages that are committed.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Checkpoint {
    /// Nothing observed yet; the next pull starts a full listing
    #[default]
    Fresh,
    /// A full (optionally date-bounded) listing is in progress
    Listing {
        /// Lower bound on received time, set when falling back from an
        /// invalidated cursor
        since: Option<DateTime<Utc>>,
        /// Next page to request; `None` means start from the first page
        next_page: Option<PageToken>,
    },
    /// Incremental pulls against a stored cursor
    Delta {
        /// Cursor marking all changes already observed
        cursor: DeltaCursor,
        /// Next page of the current delta walk, if one is in progress
        next_page: Option<PageToken>,
    },
}

impl Checkpoint {
    /// The sync mode this checkpoint implies
    pub fn mode(&self) -> SyncMode {
        match self {
            Checkpoint::Fresh | Checkpoint::Listing { .. } => SyncMode::Initial,
            Checkpoint::Delta { .. } => SyncMode::Incremental,
        }
    }

    /// Returns true if a multi-page walk was interrupted and can be resumed
    pub fn is_mid_walk(&self) -> bool {
        matches!(
            self,
            Checkpoint::Listing {
                next_page: Some(_),
                ..
            } | Checkpoint::Delta {
                next_page: Some(_),
                ..
            }
        )
    }

    /// Returns the stored delta cursor, if any
    pub fn cursor(&self) -> Option<&DeltaCursor> {
        match self {
            Checkpoint::Delta { cursor, .. } => Some(cursor),
            _ => None,
        }
    }

    /// Stable discriminator used for storage
    pub fn kind(&self) -> &'static str {
        match self {
            Checkpoint::Fresh => "fresh",
            Checkpoint::Listing { .. } => "listing",
            Checkpoint::Delta { .. } => "delta",
        }
    }

    /// Rebuilds a checkpoint from its stored columns
    pub fn from_parts(
        kind: &str,
        cursor: Option<DeltaCursor>,
        next_page: Option<PageToken>,
        since: Option<DateTime<Utc>>,
    ) -> Result<Self, DomainError> {
        match kind {
            "fresh" => Ok(Checkpoint::Fresh),
            "listing" => Ok(Checkpoint::Listing { since, next_page }),
            "delta" => {
                let cursor = cursor.ok_or_else(|| {
                    DomainError::ValidationFailed(
                        "delta checkpoint stored without a cursor".to_string(),
                    )
                })?;
                Ok(Checkpoint::Delta { cursor, next_page })
            }
            other => Err(DomainError::UnknownVariant {
                kind: "checkpoint",
                value: other.to_string(),
            }),
        }
    }
}

/// A remote folder as known to the local archive
#[derive(Debug, Clone, PartialEq)]
pub struct Folder {
    /// Stable remote identity
    pub id: FolderId,
    /// Remote parent (`None` for top-level folders)
    pub parent_id: Option<FolderId>,
    /// Remote display name
    pub display_name: String,
    /// Folder path relative to the messages directory (e.g. `Inbox/Projects`)
    pub local_path: ArchivePath,
    /// Total item count reported by the remote
    pub total_count: u64,
    /// Unread item count reported by the remote
    pub unread_count: u64,
    /// Resume state for delta pulls
    pub checkpoint: Checkpoint,
    /// Completion time of the last fully drained pull
    pub last_sync_at: Option<DateTime<Utc>>,
    /// Set when the folder disappeared remotely; rows and files are kept
    pub retired_at: Option<DateTime<Utc>>,
}

impl Folder {
    /// Creates a newly observed folder with a fresh checkpoint
    pub fn new(
        id: FolderId,
        parent_id: Option<FolderId>,
        display_name: impl Into<String>,
        local_path: ArchivePath,
    ) -> Self {
        Self {
            id,
            parent_id,
            display_name: display_name.into(),
            local_path,
            total_count: 0,
            unread_count: 0,
            checkpoint: Checkpoint::Fresh,
            last_sync_at: None,
            retired_at: None,
        }
    }

    /// Returns true if the folder has been retired
    pub fn is_retired(&self) -> bool {
        self.retired_at.is_some()
    }

    /// Current sync mode derived from the checkpoint
    pub fn mode(&self) -> SyncMode {
        self.checkpoint.mode()
    }
}
