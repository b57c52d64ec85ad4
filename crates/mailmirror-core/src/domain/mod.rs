//! Domain entities
//!
//! This module contains the core domain types for mailmirror:
//! - Newtypes for remote identifiers, cursors and archive-relative paths
//! - Folder identity records and per-folder checkpoints
//! - Message index records and quarantine metadata
//! - Mailbox-level sync state
//! - Transformation, attachment and archive-extraction records
//! - Domain-specific error types

pub mod errors;
pub mod folder;
pub mod message;
pub mod newtypes;
pub mod sync_state;
pub mod transformation;

// Re-export commonly used types
pub use errors::DomainError;
pub use folder::{Checkpoint, Folder, SyncMode};
pub use message::{ContentUpdate, MessageRecord, NewMessage, QuarantineInfo, QuarantineReason};
pub use newtypes::*;
pub use sync_state::SyncState;
pub use transformation::{ArchiveExtraction, AttachmentRecord, ExtractedFile, Transformation};
