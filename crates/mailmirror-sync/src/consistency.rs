//! Index/archive cross-checks
//!
//! Compares every message row against the file it points to, and every file
//! under the archive against the rows. Findings:
//!
//! - **Dangling**: a row whose file does not exist
//! - **Orphaned quarantine**: an active row whose file was already moved into
//!   quarantine (an interrupted quarantine)
//! - **Mismatched**: the file size (or, optionally, hash) differs from the row
//! - **Untracked**: a file no row points to
//! - **Stale temp**: leftover `.partial` files
//!
//! With repair enabled, interrupted quarantines are completed and integrity
//! flags are set or cleared to match the findings. Files are never deleted
//! or rewritten by this pass.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use mailmirror_core::{
    domain::{newtypes::ArchivePath, MessageRecord, QuarantineInfo, QuarantineReason},
    ports::IStateStore,
};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::quarantine::QuarantineManager;
use crate::storage::ArchiveStorage;
use crate::SyncError;

const MISSING_FILE: &str = "file missing from archive";

/// What the checker does besides reporting
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsistencyOptions {
    /// Complete interrupted quarantines and update integrity flags
    pub repair: bool,
    /// Hash every file instead of comparing sizes only
    pub verify_hashes: bool,
}

/// One row that does not match the archive
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Discrepancy {
    pub message: i64,
    pub remote_id: String,
    pub path: ArchivePath,
    pub detail: String,
}

impl Discrepancy {
    fn new(row: &MessageRecord, path: &ArchivePath, detail: impl Into<String>) -> Self {
        Self {
            message: row.id,
            remote_id: row.remote_id.to_string(),
            path: path.clone(),
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ConsistencyReport {
    /// Rows inspected
    pub checked: u64,
    pub dangling: Vec<Discrepancy>,
    /// Active rows whose file was found under quarantine (path = found file)
    pub orphaned_quarantine: Vec<Discrepancy>,
    pub mismatched: Vec<Discrepancy>,
    pub untracked: Vec<PathBuf>,
    pub stale_partials: Vec<PathBuf>,
    /// Interrupted quarantines completed
    pub repaired: u64,
    /// Rows newly flagged
    pub flagged: u64,
    /// Rows whose flag was cleared because they check out again
    pub cleared: u64,
}

impl ConsistencyReport {
    /// Returns true if no row disagrees with the archive
    ///
    /// Untracked and temp files do not make a report unclean.
    pub fn is_clean(&self) -> bool {
        self.dangling.is_empty() && self.orphaned_quarantine.is_empty() && self.mismatched.is_empty()
    }

    /// Active rows pointing at a missing file
    pub fn dangling_active(&self) -> usize {
        self.dangling
            .iter()
            .filter(|d| !d.detail.starts_with("quarantined"))
            .count()
    }
}

enum Fix {
    Recover { id: i64, path: ArchivePath },
    Flag { id: i64, problem: String },
    Clear { id: i64 },
}

/// Cross-checks the message index against the archive
pub struct ConsistencyChecker {
    store: Arc<dyn IStateStore>,
    storage: Arc<ArchiveStorage>,
    quarantine: QuarantineManager,
}

impl ConsistencyChecker {
    pub fn new(store: Arc<dyn IStateStore>, storage: Arc<ArchiveStorage>) -> Self {
        let quarantine = QuarantineManager::new(Arc::clone(&store), Arc::clone(&storage));
        Self {
            store,
            storage,
            quarantine,
        }
    }

    #[instrument(skip(self), fields(repair = options.repair, hashes = options.verify_hashes))]
    pub async fn check(&self, options: ConsistencyOptions) -> Result<ConsistencyReport, SyncError> {
        let rows = self.store.all_messages().await?;
        let mut report = ConsistencyReport::default();
        let mut tracked: HashSet<ArchivePath> =
            rows.iter().map(|r| r.storage_path.clone()).collect();
        let mut fixes = Vec::new();

        for row in &rows {
            report.checked += 1;
            let problem = self.check_row(row, options, &mut report, &mut tracked).await?;

            match problem {
                RowState::Ok if row.integrity_error.is_some() && !row.is_quarantined() => {
                    fixes.push(Fix::Clear { id: row.id });
                }
                RowState::Ok => {}
                RowState::Recovered(path) => fixes.push(Fix::Recover { id: row.id, path }),
                RowState::Problem(problem) => {
                    if row.integrity_error.as_deref() != Some(problem.as_str()) {
                        fixes.push(Fix::Flag { id: row.id, problem });
                    }
                }
            }
        }

        for file in self.storage.list_files().await? {
            if file.partial {
                report.stale_partials.push(file.fs_path);
                continue;
            }
            let known = file.path.as_ref().is_some_and(|p| tracked.contains(p));
            if !known {
                report.untracked.push(file.fs_path);
            }
        }

        if options.repair && !fixes.is_empty() {
            self.apply(&fixes, &mut report).await?;
        }

        info!(
            checked = report.checked,
            dangling = report.dangling.len(),
            orphaned = report.orphaned_quarantine.len(),
            mismatched = report.mismatched.len(),
            untracked = report.untracked.len(),
            partials = report.stale_partials.len(),
            repaired = report.repaired,
            "Consistency check finished"
        );
        Ok(report)
    }

    async fn check_row(
        &self,
        row: &MessageRecord,
        options: ConsistencyOptions,
        report: &mut ConsistencyReport,
        tracked: &mut HashSet<ArchivePath>,
    ) -> Result<RowState, SyncError> {
        let path = &row.storage_path;

        let Some(size) = self.storage.file_size(path).await? else {
            if row.is_quarantined() {
                report
                    .dangling
                    .push(Discrepancy::new(row, path, "quarantined file missing"));
                // Flagged when it was quarantined; nothing to repair
                return Ok(RowState::Ok);
            }

            let base = self.storage.quarantine_path(path)?;
            if let Some(found) = self.quarantine.find_moved_copy(row, &base).await? {
                debug!(message = row.id, found = %found, "Live file found in quarantine");
                report.orphaned_quarantine.push(Discrepancy::new(
                    row,
                    &found,
                    "file already moved to quarantine",
                ));
                tracked.insert(found.clone());
                return Ok(RowState::Recovered(found));
            }

            report.dangling.push(Discrepancy::new(row, path, MISSING_FILE));
            return Ok(RowState::Problem(MISSING_FILE.to_string()));
        };

        if size != row.size_bytes {
            let detail = format!("size {size} on disk, {} indexed", row.size_bytes);
            report.mismatched.push(Discrepancy::new(row, path, &detail));
            return Ok(RowState::Problem(detail));
        }

        if options.verify_hashes {
            let hash = self.storage.hash_file(path).await?;
            if hash != row.content_hash {
                let detail = "content hash differs from index".to_string();
                report.mismatched.push(Discrepancy::new(row, path, &detail));
                return Ok(RowState::Problem(detail));
            }
        }

        Ok(RowState::Ok)
    }

    async fn apply(&self, fixes: &[Fix], report: &mut ConsistencyReport) -> Result<(), SyncError> {
        let mut tx = self.store.begin().await?;
        let mut repaired = 0;
        let mut flagged = 0;
        let mut cleared = 0;

        for fix in fixes {
            match fix {
                Fix::Recover { id, path } => {
                    let info = QuarantineInfo {
                        reason: QuarantineReason::Recovered,
                        quarantined_at: Utc::now(),
                    };
                    if tx.mark_quarantined(*id, path, &info).await? {
                        tx.flag_integrity(*id, None).await?;
                        repaired += 1;
                    }
                }
                Fix::Flag { id, problem } => {
                    tx.flag_integrity(*id, Some(problem.as_str())).await?;
                    flagged += 1;
                }
                Fix::Clear { id } => {
                    tx.flag_integrity(*id, None).await?;
                    cleared += 1;
                }
            }
        }

        tx.commit().await?;
        report.repaired += repaired;
        report.flagged += flagged;
        report.cleared += cleared;
        if repaired + flagged > 0 {
            warn!(repaired, flagged, "Consistency repairs applied");
        }
        Ok(())
    }
}

enum RowState {
    Ok,
    Recovered(ArchivePath),
    Problem(String),
}
