//! Row mapping between SQLite and domain types
//!
//! | Domain Type                    | SQL Type | Strategy                          |
//! |--------------------------------|----------|-----------------------------------|
//! | FolderId, MessageId, ImmutableId | TEXT   | `.as_str()` / `::new()`           |
//! | ArchivePath                    | TEXT     | `/`-separated relative path       |
//! | DeltaCursor, PageToken         | TEXT     | opaque string                     |
//! | Checkpoint                     | 4 cols   | kind + cursor + page + since      |
//! | DateTime<Utc>                  | TEXT     | RFC 3339                          |
//! | u64 counts and sizes           | INTEGER  | `as i64`                          |
//! | SyncMode, QuarantineReason     | TEXT     | `as_str()` / `parse()`            |

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use mailmirror_core::domain::{
    ArchivePath, Checkpoint, DeltaCursor, Folder, FolderId, ImmutableId, MessageId,
    MessageRecord, PageToken, QuarantineInfo, QuarantineReason, SyncMode, SyncState,
    Transformation,
};

use crate::CacheError;

/// Parse a DateTime<Utc> from an RFC 3339 string
pub(crate) fn parse_datetime(s: &str) -> Result<DateTime<Utc>, CacheError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            CacheError::SerializationError(format!("Failed to parse datetime '{}': {}", s, e))
        })
}

/// Parse an optional DateTime<Utc> from an optional string
pub(crate) fn parse_optional_datetime(
    s: Option<String>,
) -> Result<Option<DateTime<Utc>>, CacheError> {
    match s {
        Some(ref val) if !val.is_empty() => parse_datetime(val).map(Some),
        _ => Ok(None),
    }
}

/// Columns storing a checkpoint: (kind, cursor, page token, listing lower bound)
pub(crate) fn checkpoint_columns(
    checkpoint: &Checkpoint,
) -> (&'static str, Option<String>, Option<String>, Option<String>) {
    match checkpoint {
        Checkpoint::Fresh => (checkpoint.kind(), None, None, None),
        Checkpoint::Listing { since, next_page } => (
            checkpoint.kind(),
            None,
            next_page.as_ref().map(|p| p.as_str().to_string()),
            since.map(|dt| dt.to_rfc3339()),
        ),
        Checkpoint::Delta { cursor, next_page } => (
            checkpoint.kind(),
            Some(cursor.as_str().to_string()),
            next_page.as_ref().map(|p| p.as_str().to_string()),
            None,
        ),
    }
}

pub(crate) fn folder_from_row(row: &SqliteRow) -> Result<Folder, CacheError> {
    let id: String = row.try_get("id")?;
    let parent_id: Option<String> = row.try_get("parent_id")?;
    let local_path: String = row.try_get("local_path")?;
    let kind: String = row.try_get("checkpoint_kind")?;
    let cursor: Option<String> = row.try_get("delta_cursor")?;
    let page_token: Option<String> = row.try_get("page_token")?;
    let listing_since: Option<String> = row.try_get("listing_since")?;
    let total_count: i64 = row.try_get("total_count")?;
    let unread_count: i64 = row.try_get("unread_count")?;

    let checkpoint = Checkpoint::from_parts(
        &kind,
        cursor.map(DeltaCursor::new).transpose()?,
        page_token.map(PageToken::new).transpose()?,
        parse_optional_datetime(listing_since)?,
    )?;

    Ok(Folder {
        id: FolderId::new(id)?,
        parent_id: parent_id.map(FolderId::new).transpose()?,
        display_name: row.try_get("display_name")?,
        local_path: ArchivePath::new(local_path)?,
        total_count: total_count.max(0) as u64,
        unread_count: unread_count.max(0) as u64,
        checkpoint,
        last_sync_at: parse_optional_datetime(row.try_get("last_sync_at")?)?,
        retired_at: parse_optional_datetime(row.try_get("retired_at")?)?,
    })
}

pub(crate) fn message_from_row(row: &SqliteRow) -> Result<MessageRecord, CacheError> {
    let remote_id: String = row.try_get("remote_id")?;
    let immutable_id: Option<String> = row.try_get("immutable_id")?;
    let folder_id: String = row.try_get("folder_id")?;
    let storage_path: String = row.try_get("storage_path")?;
    let received_at: String = row.try_get("received_at")?;
    let size_bytes: i64 = row.try_get("size_bytes")?;
    let reason: Option<String> = row.try_get("quarantine_reason")?;
    let quarantined_at = parse_optional_datetime(row.try_get("quarantined_at")?)?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    let quarantine = match (reason, quarantined_at) {
        (Some(reason), Some(quarantined_at)) => Some(QuarantineInfo {
            reason: QuarantineReason::parse(&reason)?,
            quarantined_at,
        }),
        (None, None) => None,
        _ => {
            return Err(CacheError::SerializationError(
                "quarantine reason and timestamp must be set together".to_string(),
            ))
        }
    };

    Ok(MessageRecord {
        id: row.try_get("id")?,
        remote_id: MessageId::new(remote_id)?,
        immutable_id: immutable_id.map(ImmutableId::new).transpose()?,
        folder_id: FolderId::new(folder_id)?,
        subject: row.try_get("subject")?,
        received_at: parse_datetime(&received_at)?,
        storage_path: ArchivePath::new(storage_path)?,
        change_key: row.try_get("change_key")?,
        content_hash: row.try_get("content_hash")?,
        size_bytes: size_bytes.max(0) as u64,
        quarantine,
        integrity_error: row.try_get("integrity_error")?,
        created_at: parse_datetime(&created_at)?,
        updated_at: parse_datetime(&updated_at)?,
    })
}

pub(crate) fn sync_state_from_row(row: &SqliteRow) -> Result<SyncState, CacheError> {
    let mode: String = row.try_get("mode")?;
    Ok(SyncState {
        mailbox: row.try_get("mailbox")?,
        last_run_at: parse_optional_datetime(row.try_get("last_run_at")?)?,
        last_success_at: parse_optional_datetime(row.try_get("last_success_at")?)?,
        last_error: row.try_get("last_error")?,
        mode: SyncMode::parse(&mode)?,
    })
}

pub(crate) fn transformation_from_row(row: &SqliteRow) -> Result<Transformation, CacheError> {
    let output_path: String = row.try_get("output_path")?;
    let completed_at: String = row.try_get("completed_at")?;
    Ok(Transformation {
        message_id: row.try_get("message_id")?,
        kind: row.try_get("kind")?,
        output_path: ArchivePath::new(output_path)?,
        config_version: row.try_get("config_version")?,
        completed_at: parse_datetime(&completed_at)?,
    })
}

pub(crate) fn optional_path(s: Option<String>) -> Result<Option<ArchivePath>, CacheError> {
    Ok(s.map(ArchivePath::new).transpose()?)
}
