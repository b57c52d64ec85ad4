//! State store port (driven/secondary port)
//!
//! This module defines the interface for the transactional state database:
//! folder identity map, checkpoints, message index, sync state,
//! transformation status and attachment records.
//!
//! ## Design Notes
//!
//! - Uses `anyhow::Result` because storage errors are adapter-specific
//!   and don't need domain-level classification.
//! - Reads go through [`IStateStore`] and only observe committed data.
//! - Every multi-row write goes through an [`IStateTransaction`]. A
//!   transaction is never held across a remote call: callers perform network
//!   I/O first and open the transaction afterwards.
//! - Dropping a transaction without calling `commit` rolls it back.

use chrono::{DateTime, Utc};

use crate::domain::{
    newtypes::{ArchivePath, FolderId, ImmutableId, MessageId},
    AttachmentRecord, Checkpoint, ContentUpdate, Folder, MessageRecord, NewMessage,
    QuarantineInfo, SyncState, Transformation,
};

/// Message row counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MessageCounts {
    pub active: u64,
    pub quarantined: u64,
    /// Active rows carrying an integrity flag
    pub flagged: u64,
}

/// Read side of the state store, plus the transaction factory
#[async_trait::async_trait]
pub trait IStateStore: Send + Sync {
    /// Opens a write transaction
    ///
    /// Writers are serialized: this waits until any other open transaction
    /// has committed or rolled back.
    async fn begin(&self) -> anyhow::Result<Box<dyn IStateTransaction>>;

    // --- Folder operations ---

    /// All known folders, including retired ones
    async fn get_folders(&self) -> anyhow::Result<Vec<Folder>>;

    async fn get_folder(&self, id: &FolderId) -> anyhow::Result<Option<Folder>>;

    // --- Message operations ---

    async fn get_message(&self, id: i64) -> anyhow::Result<Option<MessageRecord>>;

    /// The non-quarantined row with this remote ID
    async fn active_message_by_remote_id(
        &self,
        remote_id: &MessageId,
    ) -> anyhow::Result<Option<MessageRecord>>;

    /// The non-quarantined row with this immutable ID
    async fn active_message_by_immutable_id(
        &self,
        immutable_id: &ImmutableId,
    ) -> anyhow::Result<Option<MessageRecord>>;

    /// Rows of one folder, ordered by storage path
    async fn messages_in_folder(
        &self,
        folder: &FolderId,
        include_quarantined: bool,
    ) -> anyhow::Result<Vec<MessageRecord>>;

    /// Every row, ordered by local key
    async fn all_messages(&self) -> anyhow::Result<Vec<MessageRecord>>;

    /// Storage paths of every row, quarantined included
    async fn all_message_paths(&self) -> anyhow::Result<Vec<ArchivePath>>;

    /// Returns true if any row records `path` as its storage path
    async fn is_path_claimed(&self, path: &ArchivePath) -> anyhow::Result<bool>;

    /// Counts, optionally restricted to one folder
    async fn message_counts(&self, folder: Option<&FolderId>) -> anyhow::Result<MessageCounts>;

    // --- Sync state ---

    async fn get_sync_state(&self, mailbox: &str) -> anyhow::Result<Option<SyncState>>;

    // --- Transformations & attachments ---

    /// All transformation rows of one kind
    async fn transformations_of_kind(&self, kind: &str) -> anyhow::Result<Vec<Transformation>>;

    /// The attachment set of a message, with nested extractions
    async fn attachments_for(&self, message_id: i64) -> anyhow::Result<Vec<AttachmentRecord>>;
}

/// One unit of atomic work against the state store
#[async_trait::async_trait]
pub trait IStateTransaction: Send {
    // --- Folder operations ---

    /// Inserts or replaces a folder row, checkpoint included
    async fn upsert_folder(&mut self, folder: &Folder) -> anyhow::Result<()>;

    /// Marks a folder retired; its rows and files are kept
    async fn retire_folder(&mut self, id: &FolderId, at: DateTime<Utc>) -> anyhow::Result<()>;

    /// Persists a folder's checkpoint together with the page it follows
    async fn save_checkpoint(
        &mut self,
        id: &FolderId,
        checkpoint: &Checkpoint,
        last_sync_at: Option<DateTime<Utc>>,
    ) -> anyhow::Result<()>;

    // --- Message operations ---

    /// Inserts a message, or updates the active row with the same remote ID.
    /// Returns the local key.
    async fn upsert_message(&mut self, message: &NewMessage) -> anyhow::Result<i64>;

    /// Refreshes content fields after the file was rewritten in place
    async fn update_message_content(
        &mut self,
        id: i64,
        update: &ContentUpdate,
    ) -> anyhow::Result<()>;

    /// Moves an active row to another folder and path after the file moved.
    /// Returns false if the row is no longer active.
    async fn relocate_message(
        &mut self,
        id: i64,
        folder: &FolderId,
        remote_id: &MessageId,
        path: &ArchivePath,
    ) -> anyhow::Result<bool>;

    /// Rewrites the storage path of a row (folder rename)
    async fn set_message_path(&mut self, id: i64, path: &ArchivePath) -> anyhow::Result<()>;

    /// Marks an active row quarantined at its quarantine path.
    /// Returns false if the row was already quarantined.
    async fn mark_quarantined(
        &mut self,
        id: i64,
        path: &ArchivePath,
        info: &QuarantineInfo,
    ) -> anyhow::Result<bool>;

    /// Sets or clears the integrity flag of a row
    async fn flag_integrity(&mut self, id: i64, problem: Option<&str>) -> anyhow::Result<()>;

    // --- Sync state ---

    async fn save_sync_state(&mut self, state: &SyncState) -> anyhow::Result<()>;

    // --- Transformations & attachments ---

    /// Inserts or overwrites the (message, kind) transformation row
    async fn record_transformation(&mut self, t: &Transformation) -> anyhow::Result<()>;

    /// Deletes and reinserts the full attachment set of a message
    async fn replace_attachments(
        &mut self,
        message_id: i64,
        attachments: &[AttachmentRecord],
    ) -> anyhow::Result<()>;

    // --- Lifecycle ---

    async fn commit(self: Box<Self>) -> anyhow::Result<()>;

    async fn rollback(self: Box<Self>) -> anyhow::Result<()>;
}
