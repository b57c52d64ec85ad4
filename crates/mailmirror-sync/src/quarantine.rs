//! Quarantine lifecycle
//!
//! A remotely deleted message is moved from the live tree into the parallel
//! quarantine tree (same relative path), then its row is marked quarantined
//! in its own transaction. The file always moves first. If the row update
//! fails the file stays in quarantine and is picked up again either by the
//! replayed tombstone or by the consistency checker; it is never deleted.
//!
//! Quarantine is one-way: nothing here moves a file back.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use mailmirror_core::{
    domain::{newtypes::ArchivePath, MessageRecord, QuarantineInfo, QuarantineReason},
    ports::IStateStore,
};
use tracing::{info, instrument, warn};

use crate::storage::{with_suffix, ArchiveStorage, StoreClaims};
use crate::SyncError;

const MISSING_AT_QUARANTINE: &str = "file missing when quarantined";

/// Result of one quarantine request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuarantineOutcome {
    /// File moved and row marked
    Quarantined(ArchivePath),
    /// An earlier attempt had already moved the file; the row now matches it
    Completed(ArchivePath),
    /// No file existed anywhere; the row was marked and flagged
    Flagged(ArchivePath),
    /// The row was already quarantined or no longer exists
    Unchanged,
}

/// Moves remotely deleted messages into quarantine
#[derive(Clone)]
pub struct QuarantineManager {
    store: Arc<dyn IStateStore>,
    storage: Arc<ArchiveStorage>,
}

impl QuarantineManager {
    pub fn new(store: Arc<dyn IStateStore>, storage: Arc<ArchiveStorage>) -> Self {
        Self { store, storage }
    }

    /// Quarantines one message
    #[instrument(skip(self, message), fields(message_id = %message.remote_id, path = %message.storage_path))]
    pub async fn quarantine(
        &self,
        message: &MessageRecord,
        reason: QuarantineReason,
    ) -> Result<QuarantineOutcome, SyncError> {
        // Another worker may have moved or quarantined it since it was read
        let Some(current) = self.store.get_message(message.id).await? else {
            return Ok(QuarantineOutcome::Unchanged);
        };
        if current.is_quarantined() {
            return Ok(QuarantineOutcome::Unchanged);
        }

        let live = current.storage_path.clone();
        let base = self.storage.quarantine_path(&live)?;

        if self.storage.exists(&live).await {
            let reserved = HashSet::new();
            let claims = StoreClaims {
                store: self.store.as_ref(),
                reserved: &reserved,
            };
            let allocation = self.storage.allocate(&base, None, &claims).await?;
            self.storage.relocate(&live, &allocation.path).await?;
            self.mark(&current, &allocation.path, reason, None).await?;
            info!(to = %allocation.path, reason = reason.as_str(), "Message quarantined");
            return Ok(QuarantineOutcome::Quarantined(allocation.path));
        }

        if let Some(found) = self.find_moved_copy(&current, &base).await? {
            self.mark(&current, &found, QuarantineReason::Recovered, None)
                .await?;
            info!(to = %found, "Completed interrupted quarantine");
            return Ok(QuarantineOutcome::Completed(found));
        }

        warn!("File missing, marking quarantined and flagged");
        self.mark(&current, &base, reason, Some(MISSING_AT_QUARANTINE))
            .await?;
        Ok(QuarantineOutcome::Flagged(base))
    }

    /// Looks for an unclaimed file under the quarantine mirror of the row's
    /// path (or one of its suffixed variants) with the row's content hash
    pub async fn find_moved_copy(
        &self,
        message: &MessageRecord,
        base: &ArchivePath,
    ) -> Result<Option<ArchivePath>, SyncError> {
        let mut n = 0;
        loop {
            let candidate = with_suffix(base, n)?;
            n += 1;
            if self.store.is_path_claimed(&candidate).await? {
                continue;
            }
            if !self.storage.exists(&candidate).await {
                return Ok(None);
            }
            if self.storage.hash_file(&candidate).await? == message.content_hash {
                return Ok(Some(candidate));
            }
        }
    }

    async fn mark(
        &self,
        message: &MessageRecord,
        path: &ArchivePath,
        reason: QuarantineReason,
        problem: Option<&str>,
    ) -> Result<(), SyncError> {
        let info = QuarantineInfo {
            reason,
            quarantined_at: Utc::now(),
        };
        let mut tx = self.store.begin().await?;
        tx.mark_quarantined(message.id, path, &info).await?;
        if let Some(problem) = problem {
            tx.flag_integrity(message.id, Some(problem)).await?;
        }
        tx.commit().await?;
        Ok(())
    }
}
