//! SQLite implementation of IStateStore
//!
//! Read queries run directly against the pool and only observe committed
//! data. Writes go through [`SqliteTransaction`], opened with
//! [`IStateStore::begin`]. Writers are serialized by an in-process gate so
//! concurrent folder workers never race SQLite's lock upgrade.

use std::sync::Arc;

use sqlx::{Row, SqlitePool};
use tokio::sync::Mutex;

use mailmirror_core::domain::{
    newtypes::{ArchivePath, FolderId, ImmutableId, MessageId},
    ArchiveExtraction, AttachmentRecord, ExtractedFile, Folder, MessageRecord, SyncState,
    Transformation,
};
use mailmirror_core::ports::{IStateStore, IStateTransaction, MessageCounts};

use crate::rows::{
    folder_from_row, message_from_row, optional_path, sync_state_from_row,
    transformation_from_row,
};
use crate::transaction::SqliteTransaction;
use crate::CacheError;

/// SQLite-based implementation of the state store port
#[derive(Clone)]
pub struct SqliteStateStore {
    pool: SqlitePool,
    writer: Arc<Mutex<()>>,
}

impl SqliteStateStore {
    /// Creates a new store instance with the given connection pool
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            writer: Arc::new(Mutex::new(())),
        }
    }

    /// Returns the underlying pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn fetch_messages(
        &self,
        sql: &str,
        bind: Option<&str>,
    ) -> Result<Vec<MessageRecord>, CacheError> {
        let mut query = sqlx::query(sql);
        if let Some(value) = bind {
            query = query.bind(value);
        }
        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(message_from_row).collect()
    }

    async fn fetch_one_message(
        &self,
        sql: &str,
        value: &str,
    ) -> Result<Option<MessageRecord>, CacheError> {
        let row = sqlx::query(sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(message_from_row).transpose()
    }

    async fn load_extractions(
        &self,
        attachment_id: i64,
    ) -> Result<Vec<ArchiveExtraction>, CacheError> {
        let rows = sqlx::query(
            "SELECT * FROM archive_extractions WHERE attachment_id = ? ORDER BY position",
        )
        .bind(attachment_id)
        .fetch_all(&self.pool)
        .await?;

        let mut extractions = Vec::with_capacity(rows.len());
        for row in &rows {
            let extraction_id: i64 = row.try_get("id")?;
            let file_rows = sqlx::query(
                "SELECT * FROM extracted_files WHERE extraction_id = ? ORDER BY position",
            )
            .bind(extraction_id)
            .fetch_all(&self.pool)
            .await?;

            let mut files = Vec::with_capacity(file_rows.len());
            for f in &file_rows {
                let size: i64 = f.try_get("size_bytes")?;
                files.push(ExtractedFile {
                    inner_path: f.try_get("inner_path")?,
                    size_bytes: size.max(0) as u64,
                    storage_path: optional_path(f.try_get("storage_path")?)?,
                    skipped: f.try_get("skipped")?,
                    blocked: f.try_get("blocked")?,
                });
            }

            extractions.push(ArchiveExtraction {
                format: row.try_get("format")?,
                skipped: row.try_get("skipped")?,
                blocked: row.try_get("blocked")?,
                error: row.try_get("error")?,
                files,
            });
        }
        Ok(extractions)
    }
}

#[async_trait::async_trait]
impl IStateStore for SqliteStateStore {
    async fn begin(&self) -> anyhow::Result<Box<dyn IStateTransaction>> {
        let guard = Arc::clone(&self.writer).lock_owned().await;
        let tx = self.pool.begin().await.map_err(CacheError::from)?;
        tracing::trace!("Opened state transaction");
        Ok(Box::new(SqliteTransaction::new(tx, guard)))
    }

    // --- Folder operations ---

    async fn get_folders(&self) -> anyhow::Result<Vec<Folder>> {
        let rows = sqlx::query("SELECT * FROM folders ORDER BY local_path")
            .fetch_all(&self.pool)
            .await?;
        let folders = rows
            .iter()
            .map(folder_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(folders)
    }

    async fn get_folder(&self, id: &FolderId) -> anyhow::Result<Option<Folder>> {
        let row = sqlx::query("SELECT * FROM folders WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(folder_from_row).transpose()?)
    }

    // --- Message operations ---

    async fn get_message(&self, id: i64) -> anyhow::Result<Option<MessageRecord>> {
        let row = sqlx::query("SELECT * FROM messages WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(message_from_row).transpose()?)
    }

    async fn active_message_by_remote_id(
        &self,
        remote_id: &MessageId,
    ) -> anyhow::Result<Option<MessageRecord>> {
        Ok(self
            .fetch_one_message(
                "SELECT * FROM messages WHERE remote_id = ? AND quarantined_at IS NULL",
                remote_id.as_str(),
            )
            .await?)
    }

    async fn active_message_by_immutable_id(
        &self,
        immutable_id: &ImmutableId,
    ) -> anyhow::Result<Option<MessageRecord>> {
        Ok(self
            .fetch_one_message(
                "SELECT * FROM messages WHERE immutable_id = ? AND quarantined_at IS NULL",
                immutable_id.as_str(),
            )
            .await?)
    }

    async fn messages_in_folder(
        &self,
        folder: &FolderId,
        include_quarantined: bool,
    ) -> anyhow::Result<Vec<MessageRecord>> {
        let sql = if include_quarantined {
            "SELECT * FROM messages WHERE folder_id = ? ORDER BY storage_path"
        } else {
            "SELECT * FROM messages WHERE folder_id = ? AND quarantined_at IS NULL \
             ORDER BY storage_path"
        };
        Ok(self.fetch_messages(sql, Some(folder.as_str())).await?)
    }

    async fn all_messages(&self) -> anyhow::Result<Vec<MessageRecord>> {
        Ok(self
            .fetch_messages("SELECT * FROM messages ORDER BY id", None)
            .await?)
    }

    async fn all_message_paths(&self) -> anyhow::Result<Vec<ArchivePath>> {
        let paths: Vec<String> =
            sqlx::query_scalar("SELECT storage_path FROM messages ORDER BY storage_path")
                .fetch_all(&self.pool)
                .await?;
        let paths = paths
            .into_iter()
            .map(ArchivePath::new)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(paths)
    }

    async fn is_path_claimed(&self, path: &ArchivePath) -> anyhow::Result<bool> {
        let claimed: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM messages WHERE storage_path = ?)")
                .bind(path.as_str())
                .fetch_one(&self.pool)
                .await?;
        Ok(claimed)
    }

    async fn message_counts(&self, folder: Option<&FolderId>) -> anyhow::Result<MessageCounts> {
        const COUNTS: &str = "SELECT \
            COALESCE(SUM(CASE WHEN quarantined_at IS NULL THEN 1 ELSE 0 END), 0) AS active, \
            COALESCE(SUM(CASE WHEN quarantined_at IS NOT NULL THEN 1 ELSE 0 END), 0) AS quarantined, \
            COALESCE(SUM(CASE WHEN quarantined_at IS NULL AND integrity_error IS NOT NULL \
                THEN 1 ELSE 0 END), 0) AS flagged \
            FROM messages";

        let row = match folder {
            Some(id) => {
                sqlx::query(&format!("{COUNTS} WHERE folder_id = ?"))
                    .bind(id.as_str())
                    .fetch_one(&self.pool)
                    .await?
            }
            None => sqlx::query(COUNTS).fetch_one(&self.pool).await?,
        };

        let active: i64 = row.try_get("active")?;
        let quarantined: i64 = row.try_get("quarantined")?;
        let flagged: i64 = row.try_get("flagged")?;
        Ok(MessageCounts {
            active: active as u64,
            quarantined: quarantined as u64,
            flagged: flagged as u64,
        })
    }

    // --- Sync state ---

    async fn get_sync_state(&self, mailbox: &str) -> anyhow::Result<Option<SyncState>> {
        let row = sqlx::query("SELECT * FROM sync_state WHERE mailbox = ?")
            .bind(mailbox)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(sync_state_from_row).transpose()?)
    }

    // --- Transformations & attachments ---

    async fn transformations_of_kind(&self, kind: &str) -> anyhow::Result<Vec<Transformation>> {
        let rows = sqlx::query("SELECT * FROM transformations WHERE kind = ? ORDER BY message_id")
            .bind(kind)
            .fetch_all(&self.pool)
            .await?;
        let rows = rows
            .iter()
            .map(transformation_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    async fn attachments_for(&self, message_id: i64) -> anyhow::Result<Vec<AttachmentRecord>> {
        let rows = sqlx::query("SELECT * FROM attachments WHERE message_id = ? ORDER BY position")
            .bind(message_id)
            .fetch_all(&self.pool)
            .await?;

        let mut attachments = Vec::with_capacity(rows.len());
        for row in &rows {
            let id: i64 = row.try_get("id")?;
            let size: i64 = row.try_get("size_bytes")?;
            attachments.push(AttachmentRecord {
                filename: row.try_get("filename")?,
                content_type: row.try_get("content_type")?,
                size_bytes: size.max(0) as u64,
                storage_path: optional_path(row.try_get("storage_path")?)?,
                skipped: row.try_get("skipped")?,
                blocked: row.try_get("blocked")?,
                block_reason: row.try_get("block_reason")?,
                extractions: self.load_extractions(id).await?,
            });
        }
        Ok(attachments)
    }
}
