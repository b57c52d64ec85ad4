//! Archive storage layer
//!
//! Maps (folder path, subject, received time) to a physical file under the
//! archive root and performs every filesystem mutation the engine needs.
//!
//! ## Layout
//!
//! ```text
//! <root>/messages/<folder path>/<YYYY>/<MM>/<prefix>_<YYYYMMDD-HHMM>_<subject>.eml
//! <root>/quarantine/<folder path>/<YYYY>/<MM>/<same file name>
//! ```
//!
//! ## Design Decisions
//!
//! - **Atomic writes**: content is staged to a hidden `.partial` file in the
//!   destination directory, fsynced, then renamed into place.
//! - **Replaced content is kept until commit**: promoting over an existing
//!   file first renames it to a hidden `.backup` name. Cleanup never deletes
//!   a backup whose destination is missing; it renames it back instead.
//! - **No overwrite on move**: moves refuse an occupied destination. A
//!   cross-device move copies to a `.partial` name, verifies size and SHA-256,
//!   renames, and only then removes the source.
//! - **Collision suffixes**: `name.eml`, `name_1.eml`, `name_2.eml`, ... with
//!   no upper bound.

use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use mailmirror_core::{
    config::ArchiveConfig,
    domain::{newtypes::ArchivePath, DomainError},
    ports::IStateStore,
};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, warn};

/// Marker suffix of staged content and in-flight copies
pub const PARTIAL_SUFFIX: &str = ".partial";

/// Marker suffix of previous content set aside by a promotion
pub const BACKUP_SUFFIX: &str = ".backup";

const PREFIX_MAX_CHARS: usize = 30;
const SUBJECT_MAX_CHARS: usize = 60;
const FOLDER_MAX_CHARS: usize = 80;
const MESSAGE_EXTENSION: &str = "eml";

/// Errors from archive filesystem operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Copy verification failed moving {from} to {to}")]
    VerifyFailed { from: PathBuf, to: PathBuf },

    #[error("Destination already exists: {0}")]
    AlreadyExists(PathBuf),

    #[error("Archive root {path} is not writable: {reason}")]
    NotWritable { path: PathBuf, reason: String },

    #[error("Path claim lookup failed: {0:#}")]
    Claims(anyhow::Error),

    #[error(transparent)]
    Domain(#[from] DomainError),
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> StorageError + '_ {
    move |source| StorageError::Io {
        path: path.to_path_buf(),
        source,
    }
}

// ============================================================================
// Naming
// ============================================================================

/// Sanitizes one path component
///
/// Separators, reserved characters and control characters become `_`;
/// leading/trailing dots and whitespace are trimmed; the result is capped at
/// `max_chars` characters (and four bytes per character beyond half of that).
pub fn sanitize_component(raw: &str, max_chars: usize, fallback: &str) -> String {
    let replaced: String = raw
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    let truncated = truncate(trim_edges(&replaced), max_chars);
    let trimmed = trim_edges(&truncated);
    if trimmed.is_empty() {
        fallback.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Sanitizes a file-name fragment: like [`sanitize_component`], with
/// whitespace runs collapsed into a single `_`
pub fn sanitize_fragment(raw: &str, max_chars: usize, fallback: &str) -> String {
    let component = sanitize_component(raw, max_chars, fallback);
    let mut out = String::with_capacity(component.len());
    for c in component.chars() {
        let c = if c.is_whitespace() { '_' } else { c };
        if c == '_' && out.ends_with('_') {
            continue;
        }
        out.push(c);
    }
    out
}

/// Sanitizes a remote folder display name for use as a path component
pub fn sanitize_folder_name(raw: &str) -> String {
    sanitize_component(raw, FOLDER_MAX_CHARS, "_")
}

fn trim_edges(s: &str) -> &str {
    s.trim_matches(|c: char| c == '.' || c.is_whitespace())
}

fn truncate(s: &str, max_chars: usize) -> String {
    let max_bytes = max_chars * 2;
    let mut out = String::new();
    for c in s.chars().take(max_chars) {
        if out.len() + c.len_utf8() > max_bytes {
            break;
        }
        out.push(c);
    }
    out
}

/// Returns `path` with a `_<n>` disambiguator before the extension (`n > 0`)
pub fn with_suffix(path: &ArchivePath, n: u64) -> Result<ArchivePath, DomainError> {
    if n == 0 {
        return Ok(path.clone());
    }
    let name = path.file_name();
    let renamed = match name.rfind('.') {
        Some(dot) if dot > 0 => format!("{}_{}{}", &name[..dot], n, &name[dot..]),
        _ => format!("{name}_{n}"),
    };
    match path.parent() {
        Some(parent) => parent.join(&renamed),
        None => ArchivePath::new(renamed),
    }
}

/// Returns true if the file name is a storage-layer temp file
pub fn is_partial_name(name: &str) -> bool {
    name.starts_with('.') && name.ends_with(PARTIAL_SUFFIX)
}

/// Returns true if the file name is a promotion backup
pub fn is_backup_name(name: &str) -> bool {
    name.starts_with('.') && name.ends_with(BACKUP_SUFFIX)
}

/// Name of the file a backup was taken from
fn backup_origin(name: &str) -> Option<&str> {
    let inner = name.strip_prefix('.')?.strip_suffix(BACKUP_SUFFIX)?;
    let (origin, _nonce) = inner.rsplit_once('.')?;
    (!origin.is_empty()).then_some(origin)
}

fn hidden_path_for(dest: &Path, suffix: &str) -> PathBuf {
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let nonce = uuid::Uuid::new_v4().simple().to_string();
    dest.with_file_name(format!(".{name}.{}{suffix}", &nonce[..8]))
}

fn partial_path_for(dest: &Path) -> PathBuf {
    hidden_path_for(dest, PARTIAL_SUFFIX)
}

fn backup_path_for(dest: &Path) -> PathBuf {
    hidden_path_for(dest, BACKUP_SUFFIX)
}

/// SHA-256 of raw content as lowercase hex
pub fn content_hash(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

// ============================================================================
// Claims
// ============================================================================

/// Answers whether an archive path is already taken by an index row
#[async_trait::async_trait]
pub trait PathClaims: Send + Sync {
    async fn is_claimed(&self, path: &ArchivePath) -> anyhow::Result<bool>;
}

#[async_trait::async_trait]
impl PathClaims for HashSet<ArchivePath> {
    async fn is_claimed(&self, path: &ArchivePath) -> anyhow::Result<bool> {
        Ok(self.contains(path))
    }
}

/// Paths claimed by committed rows, plus paths reserved earlier in the
/// current unit of work that are not committed yet
pub struct StoreClaims<'a> {
    pub store: &'a dyn IStateStore,
    pub reserved: &'a HashSet<ArchivePath>,
}

#[async_trait::async_trait]
impl PathClaims for StoreClaims<'_> {
    async fn is_claimed(&self, path: &ArchivePath) -> anyhow::Result<bool> {
        if self.reserved.contains(path) {
            return Ok(true);
        }
        self.store.is_path_claimed(path).await
    }
}

/// Result of picking a destination path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    pub path: ArchivePath,
    /// The path already holds an unclaimed file with identical content
    pub adopted: bool,
}

// ============================================================================
// Staged writes
// ============================================================================

/// Content written to a temp file, waiting to be renamed into place
#[derive(Debug)]
pub struct StagedFile {
    dest: ArchivePath,
    dest_fs: PathBuf,
    temp: PathBuf,
    backup: Option<PathBuf>,
    promoted: bool,
}

impl StagedFile {
    pub fn dest(&self) -> &ArchivePath {
        &self.dest
    }

    /// Location of the content while it is not promoted
    pub fn temp_path(&self) -> &Path {
        &self.temp
    }

    pub fn is_promoted(&self) -> bool {
        self.promoted
    }
}

/// A non-partial file found under the archive
#[derive(Debug, Clone)]
pub struct ArchivedFile {
    pub fs_path: PathBuf,
    pub path: Option<ArchivePath>,
    pub partial: bool,
}

// ============================================================================
// ArchiveStorage
// ============================================================================

/// Filesystem access rooted at the archive directory
#[derive(Debug, Clone)]
pub struct ArchiveStorage {
    root: PathBuf,
    messages_dir: ArchivePath,
    quarantine_dir: ArchivePath,
}

impl ArchiveStorage {
    pub fn new(
        root: impl Into<PathBuf>,
        messages_dir: &str,
        quarantine_dir: &str,
    ) -> Result<Self, StorageError> {
        Ok(Self {
            root: root.into(),
            messages_dir: ArchivePath::new(messages_dir)?,
            quarantine_dir: ArchivePath::new(quarantine_dir)?,
        })
    }

    pub fn from_config(config: &ArchiveConfig) -> Result<Self, StorageError> {
        Self::new(
            config.root.clone(),
            &config.messages_dir,
            &config.quarantine_dir,
        )
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn messages_dir(&self) -> &ArchivePath {
        &self.messages_dir
    }

    pub fn quarantine_dir(&self) -> &ArchivePath {
        &self.quarantine_dir
    }

    /// Absolute filesystem path for an archive path
    pub fn fs_path(&self, path: &ArchivePath) -> PathBuf {
        path.to_fs_path(&self.root)
    }

    /// Directory holding the live files of a folder
    pub fn folder_dir(&self, folder_path: &ArchivePath) -> Result<ArchivePath, StorageError> {
        Ok(self.messages_dir.join(folder_path.as_str())?)
    }

    /// Creates the archive directories and proves the root accepts writes
    #[instrument(skip(self), fields(root = %self.root.display()))]
    pub async fn ensure_writable(&self) -> Result<(), StorageError> {
        let not_writable = |reason: String| StorageError::NotWritable {
            path: self.root.clone(),
            reason,
        };

        for dir in [&self.messages_dir, &self.quarantine_dir] {
            tokio::fs::create_dir_all(self.fs_path(dir))
                .await
                .map_err(|e| not_writable(e.to_string()))?;
        }

        let marker = partial_path_for(&self.root.join("write-check"));
        tokio::fs::write(&marker, b"ok")
            .await
            .map_err(|e| not_writable(e.to_string()))?;
        tokio::fs::remove_file(&marker)
            .await
            .map_err(|e| not_writable(e.to_string()))?;

        debug!("Archive root is writable");
        Ok(())
    }

    /// Derives the deterministic live path of a message
    ///
    /// `messages/<folder>/<YYYY>/<MM>/<prefix>_<YYYYMMDD-HHMM>_<subject>.eml`
    pub fn plan_message_path(
        &self,
        folder_path: &ArchivePath,
        subject: &str,
        received_at: DateTime<Utc>,
    ) -> Result<ArchivePath, StorageError> {
        let prefix = sanitize_fragment(folder_path.file_name(), PREFIX_MAX_CHARS, "_");
        let subject = sanitize_fragment(subject, SUBJECT_MAX_CHARS, "no-subject");
        let file_name = format!(
            "{prefix}_{}_{subject}.{MESSAGE_EXTENSION}",
            received_at.format("%Y%m%d-%H%M")
        );
        let tail = format!(
            "{}/{}/{}",
            received_at.format("%Y"),
            received_at.format("%m"),
            file_name
        );
        Ok(self.folder_dir(folder_path)?.join(&tail)?)
    }

    /// Maps a live path to its mirror under the quarantine root
    pub fn quarantine_path(&self, live: &ArchivePath) -> Result<ArchivePath, StorageError> {
        if let Some(path) = live.rebase(&self.messages_dir, &self.quarantine_dir) {
            return Ok(path);
        }
        Ok(self.quarantine_dir.join(live.as_str())?)
    }

    pub fn is_quarantine_path(&self, path: &ArchivePath) -> bool {
        path.starts_with(&self.quarantine_dir)
    }

    /// Returns true if a regular file exists at the path
    pub async fn exists(&self, path: &ArchivePath) -> bool {
        tokio::fs::metadata(self.fs_path(path))
            .await
            .map(|m| m.is_file())
            .unwrap_or(false)
    }

    /// Size of the file at the path, `None` if absent
    pub async fn file_size(&self, path: &ArchivePath) -> Result<Option<u64>, StorageError> {
        let fs_path = self.fs_path(path);
        match tokio::fs::metadata(&fs_path).await {
            Ok(meta) if meta.is_file() => Ok(Some(meta.len())),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(&fs_path)(e)),
        }
    }

    /// SHA-256 of the file at the path
    pub async fn hash_file(&self, path: &ArchivePath) -> Result<String, StorageError> {
        hash_fs_path(&self.fs_path(path)).await
    }

    /// Picks the first free candidate among `candidate`, `candidate_1`, ...
    ///
    /// A candidate is taken if a row claims it or a file occupies it. An
    /// unclaimed file whose SHA-256 equals `content_hash` is adopted instead
    /// of skipped.
    pub async fn allocate(
        &self,
        candidate: &ArchivePath,
        content_hash: Option<&str>,
        claims: &dyn PathClaims,
    ) -> Result<Allocation, StorageError> {
        let mut n: u64 = 0;
        loop {
            let path = with_suffix(candidate, n)?;
            n += 1;

            if claims
                .is_claimed(&path)
                .await
                .map_err(StorageError::Claims)?
            {
                continue;
            }
            if !self.exists(&path).await {
                return Ok(Allocation {
                    path,
                    adopted: false,
                });
            }
            if let Some(expected) = content_hash {
                if self.hash_file(&path).await? == expected {
                    debug!(path = %path, "Adopting unclaimed file with identical content");
                    return Ok(Allocation {
                        path,
                        adopted: true,
                    });
                }
            }
        }
    }

    /// Writes content to a temp file next to `dest` and fsyncs it
    #[instrument(skip(self, bytes), fields(dest = %dest, bytes = bytes.len()))]
    pub async fn stage(&self, dest: &ArchivePath, bytes: &[u8]) -> Result<StagedFile, StorageError> {
        let dest_fs = self.fs_path(dest);
        if let Some(parent) = dest_fs.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(io_error(parent))?;
        }

        let temp = partial_path_for(&dest_fs);
        let mut file = tokio::fs::File::create(&temp)
            .await
            .map_err(io_error(&temp))?;
        file.write_all(bytes).await.map_err(io_error(&temp))?;
        file.sync_all().await.map_err(io_error(&temp))?;
        drop(file);

        Ok(StagedFile {
            dest: dest.clone(),
            dest_fs,
            temp,
            backup: None,
            promoted: false,
        })
    }

    /// Renames a staged file into place
    ///
    /// An existing destination is first set aside under a backup name so
    /// [`demote`](Self::demote) can restore it.
    pub async fn promote(&self, staged: &mut StagedFile) -> Result<(), StorageError> {
        if staged.promoted {
            return Ok(());
        }

        if tokio::fs::metadata(&staged.dest_fs).await.is_ok() {
            let backup = backup_path_for(&staged.dest_fs);
            tokio::fs::rename(&staged.dest_fs, &backup)
                .await
                .map_err(io_error(&staged.dest_fs))?;
            staged.backup = Some(backup);
        }

        if let Err(e) = tokio::fs::rename(&staged.temp, &staged.dest_fs).await {
            if let Some(backup) = staged.backup.take() {
                if let Err(restore) = tokio::fs::rename(&backup, &staged.dest_fs).await {
                    warn!(path = %staged.dest, error = %restore, "Failed to restore previous content");
                }
            }
            return Err(io_error(&staged.temp)(e));
        }

        staged.promoted = true;
        Ok(())
    }

    /// Reverses [`promote`](Self::promote): the new content goes back to its
    /// temp name and any previous content is restored
    pub async fn demote(&self, staged: &mut StagedFile) -> Result<(), StorageError> {
        if !staged.promoted {
            return Ok(());
        }
        tokio::fs::rename(&staged.dest_fs, &staged.temp)
            .await
            .map_err(io_error(&staged.dest_fs))?;
        if let Some(backup) = staged.backup.take() {
            tokio::fs::rename(&backup, &staged.dest_fs)
                .await
                .map_err(io_error(&backup))?;
        }
        staged.promoted = false;
        Ok(())
    }

    /// Drops the content a promotion replaced
    pub async fn finalize(&self, mut staged: StagedFile) -> Result<(), StorageError> {
        if let Some(backup) = staged.backup.take() {
            remove_if_present(&backup).await?;
        }
        Ok(())
    }

    /// Removes the temp file of a staged write that was never promoted
    pub async fn discard(&self, staged: StagedFile) -> Result<(), StorageError> {
        if staged.promoted {
            return Ok(());
        }
        remove_if_present(&staged.temp).await
    }

    /// Stages and promotes in one step
    pub async fn write_atomic(&self, dest: &ArchivePath, bytes: &[u8]) -> Result<(), StorageError> {
        let mut staged = self.stage(dest, bytes).await?;
        if let Err(e) = self.promote(&mut staged).await {
            let _ = self.discard(staged).await;
            return Err(e);
        }
        self.finalize(staged).await
    }

    /// Moves a file between archive paths without overwriting
    #[instrument(skip(self), fields(from = %from, to = %to))]
    pub async fn relocate(&self, from: &ArchivePath, to: &ArchivePath) -> Result<(), StorageError> {
        move_file(&self.fs_path(from), &self.fs_path(to)).await
    }

    /// Lists every file under the messages and quarantine trees
    pub async fn list_files(&self) -> Result<Vec<ArchivedFile>, StorageError> {
        let mut out = Vec::new();
        for dir in [&self.messages_dir, &self.quarantine_dir] {
            for fs_path in walk_files(&self.fs_path(dir)).await? {
                let partial = fs_path
                    .file_name()
                    .map(|n| {
                        let name = n.to_string_lossy();
                        is_partial_name(&name) || is_backup_name(&name)
                    })
                    .unwrap_or(false);
                let path = ArchivePath::from_fs_path(&self.root, &fs_path).ok();
                out.push(ArchivedFile {
                    fs_path,
                    path,
                    partial,
                });
            }
        }
        Ok(out)
    }

    /// Removes temp files older than `max_age` anywhere under the root
    ///
    /// A backup whose destination is missing is the only copy of that
    /// content and is renamed back, whatever its age. A backup next to its
    /// destination is superseded and ages out like a temp file.
    #[instrument(skip(self), fields(root = %self.root.display()))]
    pub async fn cleanup_partials(&self, max_age: Duration) -> Result<Vec<PathBuf>, StorageError> {
        let now = SystemTime::now();
        let mut removed = Vec::new();
        let mut restored = 0usize;

        for fs_path in walk_files(&self.root).await? {
            let Some(name) = fs_path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
                continue;
            };
            if is_backup_name(&name) {
                if let Some(origin) = backup_origin(&name) {
                    let dest = fs_path.with_file_name(origin);
                    if tokio::fs::metadata(&dest).await.is_err() {
                        tokio::fs::rename(&fs_path, &dest)
                            .await
                            .map_err(io_error(&fs_path))?;
                        warn!(path = %dest.display(), "Restored content from an interrupted replacement");
                        restored += 1;
                        continue;
                    }
                }
            } else if !is_partial_name(&name) {
                continue;
            }

            let modified = match tokio::fs::metadata(&fs_path).await {
                Ok(meta) => meta.modified().unwrap_or(now),
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(io_error(&fs_path)(e)),
            };
            let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
            if age < max_age {
                continue;
            }

            remove_if_present(&fs_path).await?;
            debug!(path = %fs_path.display(), "Removed stale temp file");
            removed.push(fs_path);
        }

        if !removed.is_empty() || restored > 0 {
            info!(removed = removed.len(), restored, "Cleaned up stale temp files");
        }
        Ok(removed)
    }
}

// ============================================================================
// Filesystem primitives
// ============================================================================

/// Moves `from` to `to`, refusing to replace an existing destination
///
/// Falls back to copy, verify and remove-source when the rename crosses
/// filesystems. The copy lives under a temp name until verified.
pub async fn move_file(from: &Path, to: &Path) -> Result<(), StorageError> {
    if tokio::fs::metadata(to).await.is_ok() {
        return Err(StorageError::AlreadyExists(to.to_path_buf()));
    }
    if let Some(parent) = to.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(io_error(parent))?;
    }

    match tokio::fs::rename(from, to).await {
        Ok(()) => Ok(()),
        Err(e) if e.raw_os_error() == Some(libc::EXDEV) => {
            debug!(from = %from.display(), to = %to.display(), "Cross-device move, copying");
            copy_verify_remove(from, to).await
        }
        Err(e) => Err(io_error(from)(e)),
    }
}

async fn copy_verify_remove(from: &Path, to: &Path) -> Result<(), StorageError> {
    let temp = partial_path_for(to);
    tokio::fs::copy(from, &temp).await.map_err(io_error(&temp))?;

    let file = tokio::fs::File::open(&temp)
        .await
        .map_err(io_error(&temp))?;
    file.sync_all().await.map_err(io_error(&temp))?;
    drop(file);

    let source_len = tokio::fs::metadata(from)
        .await
        .map_err(io_error(from))?
        .len();
    let copy_len = tokio::fs::metadata(&temp)
        .await
        .map_err(io_error(&temp))?
        .len();
    if source_len != copy_len || hash_fs_path(from).await? != hash_fs_path(&temp).await? {
        remove_if_present(&temp).await?;
        return Err(StorageError::VerifyFailed {
            from: from.to_path_buf(),
            to: to.to_path_buf(),
        });
    }

    tokio::fs::rename(&temp, to).await.map_err(io_error(&temp))?;
    tokio::fs::remove_file(from).await.map_err(io_error(from))?;
    Ok(())
}

async fn hash_fs_path(path: &Path) -> Result<String, StorageError> {
    let bytes = tokio::fs::read(path).await.map_err(io_error(path))?;
    Ok(content_hash(&bytes))
}

async fn remove_if_present(path: &Path) -> Result<(), StorageError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(io_error(path)(e)),
    }
}

/// Collects regular files below `dir` (empty if `dir` does not exist)
async fn walk_files(dir: &Path) -> Result<Vec<PathBuf>, StorageError> {
    let mut files = Vec::new();
    let mut pending = vec![dir.to_path_buf()];

    while let Some(current) = pending.pop() {
        let mut entries = match tokio::fs::read_dir(&current).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => continue,
            Err(e) => return Err(io_error(&current)(e)),
        };
        while let Some(entry) = entries.next_entry().await.map_err(io_error(&current))? {
            let file_type = entry.file_type().await.map_err(io_error(&entry.path()))?;
            if file_type.is_dir() {
                pending.push(entry.path());
            } else if file_type.is_file() {
                files.push(entry.path());
            }
        }
    }

    files.sort();
    Ok(files)
}
