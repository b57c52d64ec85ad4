//! mailmirror Sync - Mailbox synchronization and consistency engine
//!
//! Provides:
//! - Folder tree reconciliation with rename/move propagation
//! - Page-by-page delta reconciliation with crash-safe checkpoints
//! - Quarantine of remotely deleted messages
//! - Collision-safe, atomic archive storage
//! - Consistency checking and repair
//!
//! ## Modules
//!
//! - [`matcher`] - Folder exclusion globs
//! - [`storage`] - Archive layout, atomic writes, rename-based moves
//! - [`retry`] - Exponential backoff with jitter for remote calls
//! - [`folders`] - Folder identity map reconciliation
//! - [`delta`] - Per-folder delta pulls
//! - [`quarantine`] - Quarantine lifecycle
//! - [`consistency`] - Index/archive cross-checks
//! - [`transform`] - "Needs transformation" query
//! - [`engine`] - Run orchestration and bounded worker pool
//! - [`summary`] - Run and folder reports

pub mod consistency;
pub mod delta;
pub mod engine;
pub mod folders;
pub mod matcher;
pub mod quarantine;
pub mod retry;
pub mod storage;
pub mod summary;
pub mod transform;

pub use consistency::{ConsistencyChecker, ConsistencyOptions, ConsistencyReport};
pub use delta::{DeltaReconciler, FolderOutcome};
pub use engine::{RunOptions, SyncOrchestrator};
pub use folders::{compute_paths, FolderReconciler, ReconcileOutcome};
pub use matcher::FolderMatcher;
pub use quarantine::QuarantineManager;
pub use retry::RetryPolicy;
pub use storage::{ArchiveStorage, StorageError};
pub use summary::{FolderReport, RunSummary, SyncIssue};
pub use transform::{pending_transformations, PendingReason, PendingTransformation};

use mailmirror_core::ports::SourceError;
use thiserror::Error;

/// Errors that abort a sync run or a folder
#[derive(Debug, Error)]
pub enum SyncError {
    /// The run cannot continue for this mailbox
    #[error("Fatal: {0}")]
    Fatal(String),

    /// The remote permanently rejected the credential
    #[error("Authorization denied: {0}")]
    Unauthorized(String),

    /// Cooperative cancellation was requested
    #[error("Sync cancelled")]
    Cancelled,

    /// An exclusion pattern could not be compiled
    #[error("Invalid exclusion pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// A remote call failed after retries
    #[error("Remote error: {0}")]
    Source(#[from] SourceError),

    /// An archive filesystem operation failed
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// A state store operation failed
    #[error("State store error: {0:#}")]
    Store(#[from] anyhow::Error),

    /// A domain-level error propagated from mailmirror-core
    #[error("Domain error: {0}")]
    Domain(#[from] mailmirror_core::domain::DomainError),
}

impl SyncError {
    /// Returns true if the error must stop every folder worker
    pub fn is_fatal(&self) -> bool {
        matches!(self, SyncError::Fatal(_) | SyncError::Unauthorized(_))
    }
}
