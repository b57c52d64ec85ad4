//! SQLite implementation of IStateTransaction
//!
//! A transaction owns the writer gate for its whole lifetime. Dropping it
//! without `commit` rolls back (sqlx issues the rollback on drop) and
//! releases the gate.

use chrono::{DateTime, Utc};
use sqlx::{Sqlite, Transaction};
use tokio::sync::OwnedMutexGuard;

use mailmirror_core::domain::{
    newtypes::{ArchivePath, FolderId, MessageId},
    AttachmentRecord, Checkpoint, ContentUpdate, Folder, NewMessage, QuarantineInfo, SyncState,
    Transformation,
};
use mailmirror_core::ports::IStateTransaction;

use crate::rows::checkpoint_columns;
use crate::CacheError;

/// One write transaction against the state database
pub struct SqliteTransaction {
    tx: Transaction<'static, Sqlite>,
    _writer: OwnedMutexGuard<()>,
}

impl SqliteTransaction {
    pub(crate) fn new(tx: Transaction<'static, Sqlite>, writer: OwnedMutexGuard<()>) -> Self {
        Self {
            tx,
            _writer: writer,
        }
    }
}

fn now() -> String {
    Utc::now().to_rfc3339()
}

#[async_trait::async_trait]
impl IStateTransaction for SqliteTransaction {
    // --- Folder operations ---

    async fn upsert_folder(&mut self, folder: &Folder) -> anyhow::Result<()> {
        let (kind, cursor, page_token, since) = checkpoint_columns(&folder.checkpoint);
        let now = now();

        sqlx::query(
            "INSERT INTO folders \
             (id, parent_id, display_name, local_path, total_count, unread_count, \
              checkpoint_kind, delta_cursor, page_token, listing_since, \
              last_sync_at, retired_at, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET \
                parent_id = excluded.parent_id, \
                display_name = excluded.display_name, \
                local_path = excluded.local_path, \
                total_count = excluded.total_count, \
                unread_count = excluded.unread_count, \
                checkpoint_kind = excluded.checkpoint_kind, \
                delta_cursor = excluded.delta_cursor, \
                page_token = excluded.page_token, \
                listing_since = excluded.listing_since, \
                last_sync_at = excluded.last_sync_at, \
                retired_at = excluded.retired_at, \
                updated_at = excluded.updated_at",
        )
        .bind(folder.id.as_str())
        .bind(folder.parent_id.as_ref().map(|p| p.as_str()))
        .bind(&folder.display_name)
        .bind(folder.local_path.as_str())
        .bind(folder.total_count as i64)
        .bind(folder.unread_count as i64)
        .bind(kind)
        .bind(cursor)
        .bind(page_token)
        .bind(since)
        .bind(folder.last_sync_at.map(|dt| dt.to_rfc3339()))
        .bind(folder.retired_at.map(|dt| dt.to_rfc3339()))
        .bind(&now)
        .bind(&now)
        .execute(&mut *self.tx)
        .await
        .map_err(CacheError::from)?;

        tracing::trace!(folder_id = %folder.id, path = %folder.local_path, "Saved folder");
        Ok(())
    }

    async fn retire_folder(&mut self, id: &FolderId, at: DateTime<Utc>) -> anyhow::Result<()> {
        sqlx::query(
            "UPDATE folders SET retired_at = ?, updated_at = ? \
             WHERE id = ? AND retired_at IS NULL",
        )
        .bind(at.to_rfc3339())
        .bind(now())
        .bind(id.as_str())
        .execute(&mut *self.tx)
        .await
        .map_err(CacheError::from)?;
        Ok(())
    }

    async fn save_checkpoint(
        &mut self,
        id: &FolderId,
        checkpoint: &Checkpoint,
        last_sync_at: Option<DateTime<Utc>>,
    ) -> anyhow::Result<()> {
        let (kind, cursor, page_token, since) = checkpoint_columns(checkpoint);
        let result = sqlx::query(
            "UPDATE folders SET checkpoint_kind = ?, delta_cursor = ?, page_token = ?, \
             listing_since = ?, last_sync_at = COALESCE(?, last_sync_at), updated_at = ? \
             WHERE id = ?",
        )
        .bind(kind)
        .bind(cursor)
        .bind(page_token)
        .bind(since)
        .bind(last_sync_at.map(|dt| dt.to_rfc3339()))
        .bind(now())
        .bind(id.as_str())
        .execute(&mut *self.tx)
        .await
        .map_err(CacheError::from)?;

        if result.rows_affected() == 0 {
            anyhow::bail!("Cannot save checkpoint for unknown folder {}", id);
        }
        Ok(())
    }

    // --- Message operations ---

    async fn upsert_message(&mut self, message: &NewMessage) -> anyhow::Result<i64> {
        let now = now();
        let existing: Option<i64> = sqlx::query_scalar(
            "SELECT id FROM messages WHERE remote_id = ? AND quarantined_at IS NULL",
        )
        .bind(message.remote_id.as_str())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(CacheError::from)?;

        if let Some(id) = existing {
            sqlx::query(
                "UPDATE messages SET immutable_id = ?, folder_id = ?, subject = ?, \
                 received_at = ?, storage_path = ?, change_key = ?, content_hash = ?, \
                 size_bytes = ?, integrity_error = NULL, updated_at = ? WHERE id = ?",
            )
            .bind(message.immutable_id.as_ref().map(|i| i.as_str()))
            .bind(message.folder_id.as_str())
            .bind(&message.subject)
            .bind(message.received_at.to_rfc3339())
            .bind(message.storage_path.as_str())
            .bind(&message.change_key)
            .bind(&message.content_hash)
            .bind(message.size_bytes as i64)
            .bind(&now)
            .bind(id)
            .execute(&mut *self.tx)
            .await
            .map_err(CacheError::from)?;

            tracing::trace!(message_id = %message.remote_id, id, "Updated message row");
            return Ok(id);
        }

        let result = sqlx::query(
            "INSERT INTO messages \
             (remote_id, immutable_id, folder_id, subject, received_at, storage_path, \
              change_key, content_hash, size_bytes, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(message.remote_id.as_str())
        .bind(message.immutable_id.as_ref().map(|i| i.as_str()))
        .bind(message.folder_id.as_str())
        .bind(&message.subject)
        .bind(message.received_at.to_rfc3339())
        .bind(message.storage_path.as_str())
        .bind(&message.change_key)
        .bind(&message.content_hash)
        .bind(message.size_bytes as i64)
        .bind(&now)
        .bind(&now)
        .execute(&mut *self.tx)
        .await
        .map_err(CacheError::from)?;

        let id = result.last_insert_rowid();
        tracing::trace!(message_id = %message.remote_id, id, "Inserted message row");
        Ok(id)
    }

    async fn update_message_content(
        &mut self,
        id: i64,
        update: &ContentUpdate,
    ) -> anyhow::Result<()> {
        sqlx::query(
            "UPDATE messages SET subject = ?, change_key = ?, content_hash = ?, size_bytes = ?, \
             integrity_error = NULL, updated_at = ? WHERE id = ?",
        )
        .bind(&update.subject)
        .bind(&update.change_key)
        .bind(&update.content_hash)
        .bind(update.size_bytes as i64)
        .bind(now())
        .bind(id)
        .execute(&mut *self.tx)
        .await
        .map_err(CacheError::from)?;
        Ok(())
    }

    async fn relocate_message(
        &mut self,
        id: i64,
        folder: &FolderId,
        remote_id: &MessageId,
        path: &ArchivePath,
    ) -> anyhow::Result<bool> {
        let result = sqlx::query(
            "UPDATE messages SET folder_id = ?, remote_id = ?, storage_path = ?, updated_at = ? \
             WHERE id = ? AND quarantined_at IS NULL",
        )
        .bind(folder.as_str())
        .bind(remote_id.as_str())
        .bind(path.as_str())
        .bind(now())
        .bind(id)
        .execute(&mut *self.tx)
        .await
        .map_err(CacheError::from)?;
        Ok(result.rows_affected() == 1)
    }

    async fn set_message_path(&mut self, id: i64, path: &ArchivePath) -> anyhow::Result<()> {
        sqlx::query("UPDATE messages SET storage_path = ?, updated_at = ? WHERE id = ?")
            .bind(path.as_str())
            .bind(now())
            .bind(id)
            .execute(&mut *self.tx)
            .await
            .map_err(CacheError::from)?;
        Ok(())
    }

    async fn mark_quarantined(
        &mut self,
        id: i64,
        path: &ArchivePath,
        info: &QuarantineInfo,
    ) -> anyhow::Result<bool> {
        let result = sqlx::query(
            "UPDATE messages SET storage_path = ?, quarantine_reason = ?, quarantined_at = ?, \
             updated_at = ? WHERE id = ? AND quarantined_at IS NULL",
        )
        .bind(path.as_str())
        .bind(info.reason.as_str())
        .bind(info.quarantined_at.to_rfc3339())
        .bind(now())
        .bind(id)
        .execute(&mut *self.tx)
        .await
        .map_err(CacheError::from)?;
        Ok(result.rows_affected() == 1)
    }

    async fn flag_integrity(&mut self, id: i64, problem: Option<&str>) -> anyhow::Result<()> {
        sqlx::query("UPDATE messages SET integrity_error = ?, updated_at = ? WHERE id = ?")
            .bind(problem)
            .bind(now())
            .bind(id)
            .execute(&mut *self.tx)
            .await
            .map_err(CacheError::from)?;
        Ok(())
    }

    // --- Sync state ---

    async fn save_sync_state(&mut self, state: &SyncState) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO sync_state (mailbox, last_run_at, last_success_at, last_error, mode) \
             VALUES (?, ?, ?, ?, ?) \
             ON CONFLICT(mailbox) DO UPDATE SET \
                last_run_at = excluded.last_run_at, \
                last_success_at = excluded.last_success_at, \
                last_error = excluded.last_error, \
                mode = excluded.mode",
        )
        .bind(&state.mailbox)
        .bind(state.last_run_at.map(|dt| dt.to_rfc3339()))
        .bind(state.last_success_at.map(|dt| dt.to_rfc3339()))
        .bind(&state.last_error)
        .bind(state.mode.as_str())
        .execute(&mut *self.tx)
        .await
        .map_err(CacheError::from)?;
        Ok(())
    }

    // --- Transformations & attachments ---

    async fn record_transformation(&mut self, t: &Transformation) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO transformations \
             (message_id, kind, output_path, config_version, completed_at) \
             VALUES (?, ?, ?, ?, ?) \
             ON CONFLICT(message_id, kind) DO UPDATE SET \
                output_path = excluded.output_path, \
                config_version = excluded.config_version, \
                completed_at = excluded.completed_at",
        )
        .bind(t.message_id)
        .bind(&t.kind)
        .bind(t.output_path.as_str())
        .bind(&t.config_version)
        .bind(t.completed_at.to_rfc3339())
        .execute(&mut *self.tx)
        .await
        .map_err(CacheError::from)?;
        Ok(())
    }

    async fn replace_attachments(
        &mut self,
        message_id: i64,
        attachments: &[AttachmentRecord],
    ) -> anyhow::Result<()> {
        sqlx::query(
            "DELETE FROM extracted_files WHERE extraction_id IN ( \
                SELECT e.id FROM archive_extractions e \
                JOIN attachments a ON a.id = e.attachment_id WHERE a.message_id = ?)",
        )
        .bind(message_id)
        .execute(&mut *self.tx)
        .await
        .map_err(CacheError::from)?;

        sqlx::query(
            "DELETE FROM archive_extractions WHERE attachment_id IN ( \
                SELECT id FROM attachments WHERE message_id = ?)",
        )
        .bind(message_id)
        .execute(&mut *self.tx)
        .await
        .map_err(CacheError::from)?;

        sqlx::query("DELETE FROM attachments WHERE message_id = ?")
            .bind(message_id)
            .execute(&mut *self.tx)
            .await
            .map_err(CacheError::from)?;

        for (position, attachment) in attachments.iter().enumerate() {
            let attachment_id = sqlx::query(
                "INSERT INTO attachments \
                 (message_id, position, filename, content_type, size_bytes, storage_path, \
                  skipped, blocked, block_reason) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(message_id)
            .bind(position as i64)
            .bind(&attachment.filename)
            .bind(&attachment.content_type)
            .bind(attachment.size_bytes as i64)
            .bind(attachment.storage_path.as_ref().map(|p| p.as_str()))
            .bind(attachment.skipped)
            .bind(attachment.blocked)
            .bind(&attachment.block_reason)
            .execute(&mut *self.tx)
            .await
            .map_err(CacheError::from)?
            .last_insert_rowid();

            for (ext_position, extraction) in attachment.extractions.iter().enumerate() {
                let extraction_id = sqlx::query(
                    "INSERT INTO archive_extractions \
                     (attachment_id, position, format, skipped, blocked, error) \
                     VALUES (?, ?, ?, ?, ?, ?)",
                )
                .bind(attachment_id)
                .bind(ext_position as i64)
                .bind(&extraction.format)
                .bind(extraction.skipped)
                .bind(extraction.blocked)
                .bind(&extraction.error)
                .execute(&mut *self.tx)
                .await
                .map_err(CacheError::from)?
                .last_insert_rowid();

                for (file_position, file) in extraction.files.iter().enumerate() {
                    sqlx::query(
                        "INSERT INTO extracted_files \
                         (extraction_id, position, inner_path, size_bytes, storage_path, \
                          skipped, blocked) \
                         VALUES (?, ?, ?, ?, ?, ?, ?)",
                    )
                    .bind(extraction_id)
                    .bind(file_position as i64)
                    .bind(&file.inner_path)
                    .bind(file.size_bytes as i64)
                    .bind(file.storage_path.as_ref().map(|p| p.as_str()))
                    .bind(file.skipped)
                    .bind(file.blocked)
                    .execute(&mut *self.tx)
                    .await
                    .map_err(CacheError::from)?;
                }
            }
        }

        tracing::trace!(message_id, count = attachments.len(), "Replaced attachment set");
        Ok(())
    }

    // --- Lifecycle ---

    async fn commit(self: Box<Self>) -> anyhow::Result<()> {
        let this = *self;
        this.tx.commit().await.map_err(CacheError::from)?;
        tracing::trace!("Committed state transaction");
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> anyhow::Result<()> {
        let this = *self;
        this.tx.rollback().await.map_err(CacheError::from)?;
        tracing::trace!("Rolled back state transaction");
        Ok(())
    }
}
