//! Mailbox-level sync state
//!
//! One row per mailbox. Updated once at the end of every run, after all
//! folder workers have finished or the run was cancelled.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::folder::SyncMode;

/// Tracks run history for one mailbox
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncState {
    /// Mailbox name from configuration
    pub mailbox: String,
    /// Start time of the most recent run
    pub last_run_at: Option<DateTime<Utc>>,
    /// Start time of the most recent run that ended without errors
    pub last_success_at: Option<DateTime<Utc>>,
    /// First error of the most recent run, if any
    pub last_error: Option<String>,
    /// Initial until every in-scope folder holds a delta cursor
    pub mode: SyncMode,
}

impl SyncState {
    /// State for a mailbox that has never been synced
    pub fn new(mailbox: impl Into<String>) -> Self {
        Self {
            mailbox: mailbox.into(),
            last_run_at: None,
            last_success_at: None,
            last_error: None,
            mode: SyncMode::Initial,
        }
    }

    /// Records the outcome of a finished run
    pub fn record_run(
        &mut self,
        started_at: DateTime<Utc>,
        first_error: Option<String>,
        mode: SyncMode,
    ) {
        self.last_run_at = Some(started_at);
        if first_error.is_none() {
            self.last_success_at = Some(started_at);
        }
        self.last_error = first_error;
        self.mode = mode;
    }
}
