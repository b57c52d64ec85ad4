//! Run orchestration
//!
//! The [`SyncOrchestrator`] drives one mailbox run:
//!
//! 1. **Preflight**: check the archive root is writable, remove stale temp
//!    files (skipped in a dry run)
//! 2. **Folders**: list remote folders, reconcile the identity map (moves,
//!    retirements), apply exclusion globs
//! 3. **Messages**: pull every in-scope folder through a bounded worker pool;
//!    each folder is pulled page by page by the [`DeltaReconciler`]
//! 4. **Bookkeeping**: write the mailbox sync state once, after every worker
//!    has finished or the run was cancelled
//!
//! A folder failure is recorded and does not stop other folders. An
//! authorization failure cancels the remaining workers and fails the run.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use futures::stream::{self, StreamExt};
use mailmirror_core::{
    config::{Config, SyncConfig},
    domain::{Folder, SyncMode, SyncState},
    ports::{IMailSource, IStateStore},
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::delta::{DeltaReconciler, FolderOutcome};
use crate::folders::FolderReconciler;
use crate::matcher::FolderMatcher;
use crate::retry::{with_retry, RetryPolicy};
use crate::storage::ArchiveStorage;
use crate::summary::{FolderReport, RunSummary, SyncIssue};
use crate::SyncError;

// ============================================================================
// RunOptions
// ============================================================================

/// Per-run settings, usually the configuration overridden by CLI flags
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Maximum number of folders pulled concurrently
    pub parallelism: usize,
    /// Report what would change without writing anything
    pub dry_run: bool,
    /// Folder exclusion globs, matched against local folder paths
    pub exclude: Vec<String>,
}

impl RunOptions {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            parallelism: config.parallelism,
            dry_run: false,
            exclude: config.exclude.clone(),
        }
    }
}

impl Default for RunOptions {
    fn default() -> Self {
        Self::from_config(&SyncConfig::default())
    }
}

// ============================================================================
// SyncOrchestrator
// ============================================================================

/// Runs sync passes for one mailbox
pub struct SyncOrchestrator {
    source: Arc<dyn IMailSource>,
    store: Arc<dyn IStateStore>,
    storage: Arc<ArchiveStorage>,
    sync: SyncConfig,
    retry: RetryPolicy,
}

impl SyncOrchestrator {
    pub fn new(
        source: Arc<dyn IMailSource>,
        store: Arc<dyn IStateStore>,
        storage: Arc<ArchiveStorage>,
        sync: SyncConfig,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            source,
            store,
            storage,
            sync,
            retry,
        }
    }

    /// Builds an orchestrator from the full configuration
    pub fn from_config(
        source: Arc<dyn IMailSource>,
        store: Arc<dyn IStateStore>,
        config: &Config,
    ) -> Result<Self, SyncError> {
        let storage = ArchiveStorage::from_config(&config.archive)?;
        Ok(Self::new(
            source,
            store,
            Arc::new(storage),
            config.sync.clone(),
            RetryPolicy::from(&config.retry),
        ))
    }

    pub fn storage(&self) -> &Arc<ArchiveStorage> {
        &self.storage
    }

    /// Runs one full pass
    ///
    /// Returns `Err` only when the run could not proceed at all (archive not
    /// writable, folder listing failed, credential rejected). Folder-level
    /// failures are reported in the summary.
    #[instrument(skip_all, fields(mailbox = %self.sync.mailbox, dry_run = options.dry_run))]
    pub async fn run(
        &self,
        options: &RunOptions,
        cancel: CancellationToken,
    ) -> Result<RunSummary, SyncError> {
        let started = Utc::now();
        let mut summary = RunSummary::new(&self.sync.mailbox, started, options.dry_run);

        info!(parallelism = options.parallelism, "Starting sync run");

        // Step 1: Preflight; a dry run leaves the archive untouched
        if !options.dry_run {
            self.storage
                .ensure_writable()
                .await
                .map_err(|e| SyncError::Fatal(e.to_string()))?;

            let max_age = Duration::from_secs(self.sync.temp_max_age_hours.saturating_mul(3600));
            match self.storage.cleanup_partials(max_age).await {
                Ok(removed) => summary.partials_removed = removed.len() as u64,
                Err(e) => warn!(error = %e, "Temp file cleanup failed"),
            }
        }

        let matcher = FolderMatcher::new(options.exclude.as_slice())?;

        // Step 2: Folder reconciliation
        let source = self.source.as_ref();
        let remote = match with_retry(&self.retry, &cancel, "list_folders", move || {
            source.list_folders()
        })
        .await
        {
            Ok(remote) => remote,
            Err(e) => {
                let err = if e.is_fatal() {
                    SyncError::Unauthorized(e.to_string())
                } else {
                    SyncError::Source(e)
                };
                error!(error = %err, "Folder listing failed");
                if !options.dry_run {
                    self.record_state(&summary, Some(err.to_string()), None)
                        .await?;
                }
                return Err(err);
            }
        };

        let reconciler = FolderReconciler::new(Arc::clone(&self.store), Arc::clone(&self.storage));
        let plan = reconciler
            .reconcile(&remote, &matcher, options.dry_run)
            .await?;

        summary.folders_in_scope = plan.in_scope.len() as u64;
        summary.folders_excluded = plan.excluded.len() as u64;
        summary.folders_created = plan.created;
        summary.folders_moved = plan.moved;
        summary.folders_retired = plan.retired;
        summary.folders_revived = plan.revived;
        summary.folders_failed += plan.issues.len() as u64;
        for issue in plan.issues {
            summary.push_issue(issue);
        }

        if options.dry_run {
            summary.folders = plan
                .in_scope
                .iter()
                .map(|f| FolderReport {
                    path: f.local_path.to_string(),
                    mode: Some(f.mode()),
                    ..Default::default()
                })
                .collect();
            summary.finished_at = Some(Utc::now());
            info!(folders = summary.folders_in_scope, "Dry run finished");
            return Ok(summary);
        }

        // Step 3: Folder workers
        let workers = cancel.child_token();
        let delta = DeltaReconciler::new(
            Arc::clone(&self.source),
            Arc::clone(&self.store),
            Arc::clone(&self.storage),
            self.retry.clone(),
            self.sync.page_size,
            ChronoDuration::minutes(self.sync.overlap_minutes),
        )
        .with_scope(plan.in_scope.iter().map(|f| f.id.clone()));

        let results: Vec<(&Folder, Result<FolderOutcome, SyncError>)> =
            stream::iter(plan.in_scope.iter())
                .map(|folder| {
                    let delta = &delta;
                    let workers = &workers;
                    async move {
                        if workers.is_cancelled() {
                            return None;
                        }
                        let result = delta.sync_folder(folder, workers).await;
                        if matches!(&result, Err(e) if e.is_fatal()) {
                            workers.cancel();
                        }
                        Some((folder, result))
                    }
                })
                .buffer_unordered(options.parallelism.max(1))
                .filter_map(|r| async move { r })
                .collect()
                .await;

        // Step 4: Aggregate and record
        let mut fatal = None;
        for (folder, result) in results {
            match result {
                Ok(outcome) => summary.add_folder(outcome.report, outcome.issues),
                Err(e) => {
                    let issue = SyncIssue::folder(folder.local_path.as_str(), &e);
                    let report = FolderReport {
                        path: folder.local_path.to_string(),
                        mode: Some(folder.mode()),
                        error: Some(e.to_string()),
                        ..Default::default()
                    };
                    summary.add_folder(report, vec![issue]);
                    if e.is_fatal() && fatal.is_none() {
                        fatal = Some(e);
                    }
                }
            }
        }
        summary.folders.sort_by(|a, b| a.path.cmp(&b.path));
        summary.cancelled = cancel.is_cancelled();

        let mode = self.mailbox_mode(&plan.in_scope).await?;
        let first_error = match &fatal {
            Some(e) => Some(e.to_string()),
            None => summary.first_error(),
        };
        self.record_state(&summary, first_error, Some(mode)).await?;
        summary.finished_at = Some(Utc::now());

        if let Some(e) = fatal {
            error!(error = %e, "Run aborted");
            return Err(e);
        }

        info!(
            synced = summary.folders_synced,
            failed = summary.folders_failed,
            added = summary.added,
            updated = summary.updated,
            moved = summary.moved,
            quarantined = summary.quarantined,
            errors = summary.error_count,
            cancelled = summary.cancelled,
            "Sync run finished"
        );
        Ok(summary)
    }

    /// Incremental once every in-scope folder holds a delta cursor
    async fn mailbox_mode(&self, in_scope: &[Folder]) -> Result<SyncMode, SyncError> {
        for folder in in_scope {
            let current = self.store.get_folder(&folder.id).await?;
            let incremental = current
                .map(|f| f.mode() == SyncMode::Incremental)
                .unwrap_or(false);
            if !incremental {
                return Ok(SyncMode::Initial);
            }
        }
        Ok(SyncMode::Incremental)
    }

    async fn record_state(
        &self,
        summary: &RunSummary,
        first_error: Option<String>,
        mode: Option<SyncMode>,
    ) -> Result<(), SyncError> {
        let mut state = self
            .store
            .get_sync_state(&summary.mailbox)
            .await?
            .unwrap_or_else(|| SyncState::new(&summary.mailbox));
        let mode = mode.unwrap_or(state.mode);
        state.record_run(summary.started_at, first_error, mode);

        let mut tx = self.store.begin().await?;
        tx.save_sync_state(&state).await?;
        tx.commit().await?;
        Ok(())
    }
}
