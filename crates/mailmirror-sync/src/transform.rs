//! "Needs transformation" query
//!
//! The transformation pipeline runs outside the engine. It asks which active
//! messages still need output of a given kind under the current
//! configuration version: those with no row, a row from another version, or
//! a row whose output file is gone.

use std::collections::HashMap;

use mailmirror_core::{domain::MessageRecord, ports::IStateStore};
use serde::Serialize;
use tracing::debug;

use crate::storage::ArchiveStorage;
use crate::SyncError;

/// Why a message needs (re)generation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum PendingReason {
    /// Never transformed
    Missing,
    /// Produced under another configuration version
    StaleVersion { found: String },
    /// Recorded, but the output file no longer exists
    OutputMissing,
}

#[derive(Debug, Clone, Serialize)]
pub struct PendingTransformation {
    pub message: MessageSummary,
    #[serde(flatten)]
    pub reason: PendingReason,
}

/// The identifying fields of a message row
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageSummary {
    pub id: i64,
    pub remote_id: String,
    pub storage_path: String,
}

impl From<&MessageRecord> for MessageSummary {
    fn from(row: &MessageRecord) -> Self {
        Self {
            id: row.id,
            remote_id: row.remote_id.to_string(),
            storage_path: row.storage_path.to_string(),
        }
    }
}

/// Active messages whose `kind` output is missing or not current for
/// `version`, ordered by local key
pub async fn pending_transformations(
    store: &dyn IStateStore,
    storage: &ArchiveStorage,
    kind: &str,
    version: &str,
) -> Result<Vec<PendingTransformation>, SyncError> {
    let done: HashMap<i64, _> = store
        .transformations_of_kind(kind)
        .await?
        .into_iter()
        .map(|t| (t.message_id, t))
        .collect();

    let mut pending = Vec::new();
    for row in store.all_messages().await? {
        if row.is_quarantined() {
            continue;
        }

        let reason = match done.get(&row.id) {
            None => PendingReason::Missing,
            Some(t) if !t.is_current(version) => PendingReason::StaleVersion {
                found: t.config_version.clone(),
            },
            Some(t) => {
                if storage.exists(&t.output_path).await {
                    continue;
                }
                PendingReason::OutputMissing
            }
        };
        pending.push(PendingTransformation {
            message: MessageSummary::from(&row),
            reason,
        });
    }

    debug!(kind, version, count = pending.len(), "Computed pending transformations");
    Ok(pending)
}
