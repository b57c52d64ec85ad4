//! Run reports
//!
//! Every run produces a [`RunSummary`]: aggregate counts, one
//! [`FolderReport`] per in-scope folder and the first few [`SyncIssue`]s with
//! enough identity (folder path, message ID) to locate the problem.

use std::fmt;

use chrono::{DateTime, Utc};
use mailmirror_core::domain::SyncMode;
use serde::Serialize;

/// Number of issues kept verbatim in a summary
pub const MAX_REPORTED_ISSUES: usize = 10;

/// One captured failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncIssue {
    /// Folder path (or remote folder ID when no path is known)
    pub folder: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    pub error: String,
}

impl SyncIssue {
    pub fn folder(folder: impl Into<String>, error: impl fmt::Display) -> Self {
        Self {
            folder: folder.into(),
            message_id: None,
            error: error.to_string(),
        }
    }

    pub fn message(
        folder: impl Into<String>,
        message_id: impl Into<String>,
        error: impl fmt::Display,
    ) -> Self {
        Self {
            folder: folder.into(),
            message_id: Some(message_id.into()),
            error: error.to_string(),
        }
    }
}

impl fmt::Display for SyncIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message_id {
            Some(id) => write!(f, "{} [{}]: {}", self.folder, id, self.error),
            None => write!(f, "{}: {}", self.folder, self.error),
        }
    }
}

/// Outcome of one folder worker
#[derive(Debug, Clone, Default, Serialize)]
pub struct FolderReport {
    pub path: String,
    pub mode: Option<SyncMode>,
    pub pages: u32,
    pub added: u64,
    pub updated: u64,
    pub moved: u64,
    pub skipped: u64,
    pub quarantined: u64,
    pub flagged: u64,
    /// The stored cursor was rejected and a date-bounded listing was used
    pub cursor_reset: bool,
    /// Every page up to the end of the walk was committed
    pub completed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FolderReport {
    pub fn failed(&self) -> bool {
        self.error.is_some()
    }
}

/// Aggregate result of one run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub mailbox: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub dry_run: bool,
    pub cancelled: bool,

    pub folders_in_scope: u64,
    pub folders_excluded: u64,
    pub folders_created: u64,
    pub folders_moved: u64,
    pub folders_retired: u64,
    pub folders_revived: u64,
    pub folders_synced: u64,
    pub folders_failed: u64,

    pub added: u64,
    pub updated: u64,
    pub moved: u64,
    pub skipped: u64,
    pub quarantined: u64,
    pub flagged: u64,
    pub partials_removed: u64,

    pub folders: Vec<FolderReport>,
    /// Total number of issues, including those not kept in `errors`
    pub error_count: u64,
    pub errors: Vec<SyncIssue>,
}

impl RunSummary {
    pub fn new(mailbox: impl Into<String>, started_at: DateTime<Utc>, dry_run: bool) -> Self {
        Self {
            mailbox: mailbox.into(),
            started_at,
            finished_at: None,
            dry_run,
            cancelled: false,
            folders_in_scope: 0,
            folders_excluded: 0,
            folders_created: 0,
            folders_moved: 0,
            folders_retired: 0,
            folders_revived: 0,
            folders_synced: 0,
            folders_failed: 0,
            added: 0,
            updated: 0,
            moved: 0,
            skipped: 0,
            quarantined: 0,
            flagged: 0,
            partials_removed: 0,
            folders: Vec::new(),
            error_count: 0,
            errors: Vec::new(),
        }
    }

    /// Records an issue, keeping only the first few verbatim
    pub fn push_issue(&mut self, issue: SyncIssue) {
        self.error_count += 1;
        if self.errors.len() < MAX_REPORTED_ISSUES {
            self.errors.push(issue);
        }
    }

    /// Folds a finished folder into the totals
    pub fn add_folder(&mut self, report: FolderReport, issues: Vec<SyncIssue>) {
        self.added += report.added;
        self.updated += report.updated;
        self.moved += report.moved;
        self.skipped += report.skipped;
        self.quarantined += report.quarantined;
        self.flagged += report.flagged;
        if report.failed() {
            self.folders_failed += 1;
        } else if report.completed {
            self.folders_synced += 1;
        }
        for issue in issues {
            self.push_issue(issue);
        }
        self.folders.push(report);
    }

    /// First recorded issue, used as the mailbox's last error
    pub fn first_error(&self) -> Option<String> {
        self.errors.first().map(ToString::to_string)
    }

    /// Returns true if any folder ended in an unrecoverable error
    pub fn has_failures(&self) -> bool {
        self.folders_failed > 0
    }

    pub fn processed(&self) -> u64 {
        self.added + self.updated + self.moved + self.quarantined
    }
}
