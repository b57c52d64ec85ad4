//! Per-folder delta reconciliation
//!
//! Pulls one folder page by page, strictly in sequence. For every page:
//!
//! 1. The page is fetched (with retry) before any transaction is opened.
//! 2. Tombstones go to the [`QuarantineManager`], one transaction each,
//!    unless the source still finds the message in another in-scope folder.
//!    That folder's pull relocates the file instead.
//! 3. Additions and updates are planned: content is downloaded, hashed and
//!    staged to temp files; message moves relocate files. Still no
//!    transaction is open.
//! 4. One transaction upserts the rows and saves the next checkpoint. Staged
//!    files are renamed into place, then the transaction commits. A failed
//!    commit renames them back to their temp names.
//!
//! A crash at any point leaves either the previous page's state or the
//! current page's state committed, never a mix. Replaying a page is a no-op
//! for rows whose change key is unchanged.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use mailmirror_core::{
    domain::{
        newtypes::ArchivePath, Checkpoint, ContentUpdate, Folder, FolderId, MessageId,
        MessageRecord, NewMessage, QuarantineReason,
    },
    ports::{
        ChangePage, DeltaEntry, IMailSource, IStateStore, IStateTransaction, RemoteMessage,
        SourceError,
    },
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::quarantine::{QuarantineManager, QuarantineOutcome};
use crate::retry::{with_retry, RetryPolicy};
use crate::storage::{content_hash, ArchiveStorage, StagedFile, StoreClaims};
use crate::summary::{FolderReport, SyncIssue};
use crate::SyncError;

const MISSING_FILE: &str = "file missing from archive";

/// Result of syncing one folder
#[derive(Debug, Default)]
pub struct FolderOutcome {
    pub report: FolderReport,
    pub issues: Vec<SyncIssue>,
}

impl FolderOutcome {
    fn new(folder: &Folder) -> Self {
        Self {
            report: FolderReport {
                path: folder.local_path.to_string(),
                mode: Some(folder.mode()),
                ..Default::default()
            },
            issues: Vec::new(),
        }
    }

    fn fail(&mut self, issue: SyncIssue) {
        warn!(error = %issue, "Folder stopped");
        self.report.error = Some(issue.to_string());
        self.issues.push(issue);
    }
}

enum PageError {
    /// Stop every worker
    Fatal(SyncError),
    /// Stop this folder; committed pages stay
    Failed(SyncIssue),
}

enum Action {
    Insert(NewMessage),
    Update {
        id: i64,
        update: ContentUpdate,
    },
    Relocate {
        id: i64,
        message: NewMessage,
        update: Option<ContentUpdate>,
    },
    Flag {
        id: i64,
    },
}

#[derive(Default)]
struct PagePlan {
    actions: Vec<Action>,
    staged: Vec<StagedFile>,
    /// Files relocated for message moves, as (from, to)
    moved: Vec<(ArchivePath, ArchivePath)>,
    /// Paths handed out in this page, not committed yet
    reserved: HashSet<ArchivePath>,
    skipped: u64,
}

impl PagePlan {
    fn is_empty(&self) -> bool {
        self.actions.is_empty() && self.staged.is_empty() && self.moved.is_empty()
    }
}

/// Pulls remote changes for one folder at a time
pub struct DeltaReconciler {
    source: Arc<dyn IMailSource>,
    store: Arc<dyn IStateStore>,
    storage: Arc<ArchiveStorage>,
    quarantine: QuarantineManager,
    retry: RetryPolicy,
    page_size: u32,
    overlap: ChronoDuration,
    /// Folders pulled in this run
    scope: HashSet<FolderId>,
}

impl DeltaReconciler {
    pub fn new(
        source: Arc<dyn IMailSource>,
        store: Arc<dyn IStateStore>,
        storage: Arc<ArchiveStorage>,
        retry: RetryPolicy,
        page_size: u32,
        overlap: ChronoDuration,
    ) -> Self {
        let quarantine = QuarantineManager::new(Arc::clone(&store), Arc::clone(&storage));
        Self {
            source,
            store,
            storage,
            quarantine,
            retry,
            page_size,
            overlap,
            scope: HashSet::new(),
        }
    }

    /// Sets the folders pulled in this run
    ///
    /// A message deleted from one folder but still present in one of these
    /// is treated as moved, not quarantined.
    pub fn with_scope(mut self, folders: impl IntoIterator<Item = FolderId>) -> Self {
        self.scope = folders.into_iter().collect();
        self
    }

    /// Pulls every remaining page of a folder
    ///
    /// Page-level failures end the folder and are reported in the outcome.
    /// Only an authorization failure is returned as an error.
    #[instrument(skip_all, fields(folder = %folder.local_path, mode = %folder.mode()))]
    pub async fn sync_folder(
        &self,
        folder: &Folder,
        cancel: &CancellationToken,
    ) -> Result<FolderOutcome, SyncError> {
        let started = Utc::now();
        let mut outcome = FolderOutcome::new(folder);
        let mut checkpoint = folder.checkpoint.clone();

        if checkpoint.is_mid_walk() {
            info!(checkpoint = checkpoint.kind(), "Resuming interrupted walk");
        }

        loop {
            if cancel.is_cancelled() {
                info!(pages = outcome.report.pages, "Cancelled between pages");
                break;
            }

            let page = match self.fetch_page(folder, &checkpoint, cancel).await {
                Ok(page) => page,
                Err(SourceError::CursorInvalid) if matches!(checkpoint, Checkpoint::Delta { .. }) => {
                    let since = folder.last_sync_at.map(|t| t - self.overlap);
                    warn!(since = ?since, "Delta cursor rejected, falling back to date-bounded listing");
                    checkpoint = Checkpoint::Listing {
                        since,
                        next_page: None,
                    };
                    outcome.report.cursor_reset = true;
                    continue;
                }
                Err(e) if e.is_fatal() => return Err(SyncError::Unauthorized(e.to_string())),
                Err(e) => {
                    let page_no = outcome.report.pages + 1;
                    outcome.fail(SyncIssue::folder(
                        folder.local_path.as_str(),
                        format!("page {page_no}: {e}"),
                    ));
                    return Ok(outcome);
                }
            };

            let is_last = page.is_last();
            let next = next_checkpoint(&checkpoint, &page, started, self.overlap);

            match self
                .apply_page(folder, page.entries, &checkpoint, &next, is_last, &mut outcome, cancel)
                .await
            {
                Ok(()) => {}
                Err(PageError::Fatal(e)) => return Err(e),
                Err(PageError::Failed(issue)) => {
                    outcome.fail(issue);
                    return Ok(outcome);
                }
            }

            outcome.report.pages += 1;
            checkpoint = next;
            if is_last {
                outcome.report.completed = true;
                break;
            }
        }

        debug!(
            pages = outcome.report.pages,
            added = outcome.report.added,
            updated = outcome.report.updated,
            moved = outcome.report.moved,
            quarantined = outcome.report.quarantined,
            "Folder pull finished"
        );
        Ok(outcome)
    }

    async fn fetch_page(
        &self,
        folder: &Folder,
        checkpoint: &Checkpoint,
        cancel: &CancellationToken,
    ) -> Result<ChangePage, SourceError> {
        let source = self.source.as_ref();
        let id = &folder.id;
        let size = self.page_size;

        match checkpoint {
            Checkpoint::Fresh => {
                with_retry(&self.retry, cancel, "list_messages", move || {
                    source.list_messages(id, None, None, size)
                })
                .await
            }
            Checkpoint::Listing { since, next_page } => {
                let since = *since;
                let page = next_page.as_ref();
                with_retry(&self.retry, cancel, "list_messages", move || {
                    source.list_messages(id, since, page, size)
                })
                .await
            }
            Checkpoint::Delta { cursor, next_page } => {
                let page = next_page.as_ref();
                with_retry(&self.retry, cancel, "get_delta", move || {
                    source.get_delta(id, cursor, page, size)
                })
                .await
            }
        }
    }

    /// Downloads content; `None` if the message vanished remotely meanwhile
    async fn fetch_content(
        &self,
        id: &MessageId,
        cancel: &CancellationToken,
    ) -> Result<Option<Vec<u8>>, SyncError> {
        let source = self.source.as_ref();
        match with_retry(&self.retry, cancel, "fetch_content", move || {
            source.fetch_content(id)
        })
        .await
        {
            Ok(bytes) => Ok(Some(bytes)),
            Err(SourceError::NotFound(_)) => {
                debug!(message_id = %id, "Message vanished before download");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn apply_page(
        &self,
        folder: &Folder,
        entries: Vec<DeltaEntry>,
        current: &Checkpoint,
        next: &Checkpoint,
        is_last: bool,
        outcome: &mut FolderOutcome,
        cancel: &CancellationToken,
    ) -> Result<(), PageError> {
        let (tombstones, changes) = collapse(entries);

        for id in &tombstones {
            self.apply_tombstone(folder, id, outcome, cancel).await?;
        }

        let mut plan = PagePlan::default();
        for message in &changes {
            if let Err(e) = self.plan_change(folder, message, &mut plan, cancel).await {
                let failure = self.classify(folder, Some(&message.id), e);
                self.abandon(plan).await;
                return Err(failure);
            }
        }

        if plan.is_empty() && next == current {
            outcome.report.skipped += plan.skipped;
            return Ok(());
        }

        let completed_at = is_last.then(Utc::now);
        self.commit_page(folder, plan, next, completed_at, outcome)
            .await
    }

    async fn apply_tombstone(
        &self,
        folder: &Folder,
        id: &MessageId,
        outcome: &mut FolderOutcome,
        cancel: &CancellationToken,
    ) -> Result<(), PageError> {
        let row = self
            .store
            .active_message_by_remote_id(id)
            .await
            .map_err(|e| self.classify(folder, Some(id), e.into()))?;

        let Some(row) = row else {
            debug!(message_id = %id, "Tombstone for unknown message");
            return Ok(());
        };
        if row.folder_id != folder.id {
            debug!(message_id = %id, "Tombstone for a message now in another folder, ignoring");
            return Ok(());
        }
        if let Some(destination) = self.moved_within_scope(folder, &row, cancel).await? {
            debug!(
                message_id = %id,
                to = %destination,
                "Message moved to a folder in scope, leaving it for that folder's pull"
            );
            return Ok(());
        }

        match self
            .quarantine
            .quarantine(&row, QuarantineReason::RemoteDeleted)
            .await
        {
            Ok(QuarantineOutcome::Unchanged) => {}
            Ok(QuarantineOutcome::Flagged(_)) => {
                outcome.report.quarantined += 1;
                outcome.report.flagged += 1;
                outcome.issues.push(SyncIssue::message(
                    folder.local_path.as_str(),
                    id.as_str(),
                    "file missing when quarantined",
                ));
            }
            Ok(_) => outcome.report.quarantined += 1,
            Err(e) => return Err(self.classify(folder, Some(id), e)),
        }
        Ok(())
    }

    /// Asks the source where the message lives now; `Some` if it sits in
    /// another folder this run pulls
    async fn moved_within_scope(
        &self,
        folder: &Folder,
        row: &MessageRecord,
        cancel: &CancellationToken,
    ) -> Result<Option<FolderId>, PageError> {
        let Some(immutable) = row.immutable_id.as_ref() else {
            return Ok(None);
        };
        if self.scope.iter().all(|id| id == &folder.id) {
            return Ok(None);
        }

        let source = self.source.as_ref();
        let located = with_retry(&self.retry, cancel, "locate_message", move || {
            source.locate_message(immutable)
        })
        .await;
        match located {
            Ok(Some(current)) if current != folder.id && self.scope.contains(&current) => {
                Ok(Some(current))
            }
            Ok(_) | Err(SourceError::NotFound(_)) => Ok(None),
            Err(e) => Err(self.classify(folder, Some(&row.remote_id), e.into())),
        }
    }

    /// Plans one addition or update; performs downloads, staging and file
    /// moves but no index writes
    async fn plan_change(
        &self,
        folder: &Folder,
        message: &RemoteMessage,
        plan: &mut PagePlan,
        cancel: &CancellationToken,
    ) -> Result<(), SyncError> {
        let mut existing = self.store.active_message_by_remote_id(&message.id).await?;
        if existing.is_none() {
            if let Some(immutable) = &message.immutable_id {
                existing = self.store.active_message_by_immutable_id(immutable).await?;
            }
        }

        let Some(row) = existing else {
            return self.plan_insert(folder, message, plan, cancel).await;
        };

        if row.folder_id != folder.id || row.remote_id != message.id {
            return self.plan_move(folder, message, row, plan, cancel).await;
        }

        if row.matches_change_key(message.change_key.as_deref()) {
            if row.integrity_error.is_none() && !self.storage.exists(&row.storage_path).await {
                warn!(message_id = %message.id, path = %row.storage_path, "Indexed file is missing");
                plan.actions.push(Action::Flag { id: row.id });
            } else {
                plan.skipped += 1;
            }
            return Ok(());
        }

        self.plan_update(message, row, plan, cancel).await
    }

    async fn plan_insert(
        &self,
        folder: &Folder,
        message: &RemoteMessage,
        plan: &mut PagePlan,
        cancel: &CancellationToken,
    ) -> Result<(), SyncError> {
        let Some(bytes) = self.fetch_content(&message.id, cancel).await? else {
            plan.skipped += 1;
            return Ok(());
        };
        let hash = content_hash(&bytes);

        let candidate = self.storage.plan_message_path(
            &folder.local_path,
            &message.subject,
            message.received_at,
        )?;
        let allocation = {
            let claims = StoreClaims {
                store: self.store.as_ref(),
                reserved: &plan.reserved,
            };
            self.storage
                .allocate(&candidate, Some(&hash), &claims)
                .await?
        };
        plan.reserved.insert(allocation.path.clone());

        if !allocation.adopted {
            let staged = self.storage.stage(&allocation.path, &bytes).await?;
            plan.staged.push(staged);
        }

        plan.actions.push(Action::Insert(new_message(
            folder,
            message,
            allocation.path,
            hash,
            bytes.len() as u64,
        )));
        Ok(())
    }

    async fn plan_update(
        &self,
        message: &RemoteMessage,
        row: MessageRecord,
        plan: &mut PagePlan,
        cancel: &CancellationToken,
    ) -> Result<(), SyncError> {
        let Some(bytes) = self.fetch_content(&message.id, cancel).await? else {
            plan.skipped += 1;
            return Ok(());
        };
        let hash = content_hash(&bytes);

        if hash != row.content_hash || !self.storage.exists(&row.storage_path).await {
            let staged = self.storage.stage(&row.storage_path, &bytes).await?;
            plan.staged.push(staged);
        }

        plan.actions.push(Action::Update {
            id: row.id,
            update: ContentUpdate {
                subject: message.subject.clone(),
                change_key: message.change_key.clone(),
                content_hash: hash,
                size_bytes: bytes.len() as u64,
            },
        });
        Ok(())
    }

    /// Follows a message that moved between folders (or got a new remote ID)
    /// by relocating its file instead of downloading it again
    async fn plan_move(
        &self,
        folder: &Folder,
        message: &RemoteMessage,
        row: MessageRecord,
        plan: &mut PagePlan,
        cancel: &CancellationToken,
    ) -> Result<(), SyncError> {
        let candidate = if row.folder_id == folder.id {
            row.storage_path.clone()
        } else {
            self.storage.plan_message_path(
                &folder.local_path,
                &message.subject,
                message.received_at,
            )?
        };

        let source_exists = self.storage.exists(&row.storage_path).await;
        let (path, mut needs_content) = if candidate == row.storage_path {
            (candidate, !source_exists)
        } else {
            let allocation = {
                let claims = StoreClaims {
                    store: self.store.as_ref(),
                    reserved: &plan.reserved,
                };
                let expected = (!source_exists).then_some(row.content_hash.as_str());
                self.storage.allocate(&candidate, expected, &claims).await?
            };
            if source_exists {
                self.storage
                    .relocate(&row.storage_path, &allocation.path)
                    .await?;
                plan.moved
                    .push((row.storage_path.clone(), allocation.path.clone()));
                (allocation.path, false)
            } else {
                let missing = !allocation.adopted;
                (allocation.path, missing)
            }
        };
        plan.reserved.insert(path.clone());

        if !row.matches_change_key(message.change_key.as_deref()) {
            needs_content = true;
        }

        let mut update = None;
        let mut hash = row.content_hash.clone();
        let mut size = row.size_bytes;
        if needs_content {
            match self.fetch_content(&message.id, cancel).await? {
                Some(bytes) => {
                    hash = content_hash(&bytes);
                    size = bytes.len() as u64;
                    if hash != row.content_hash || !self.storage.exists(&path).await {
                        let staged = self.storage.stage(&path, &bytes).await?;
                        plan.staged.push(staged);
                    }
                    update = Some(ContentUpdate {
                        subject: message.subject.clone(),
                        change_key: message.change_key.clone(),
                        content_hash: hash.clone(),
                        size_bytes: size,
                    });
                }
                None if plan.moved.iter().any(|(_, to)| to == &path) => {}
                None => {
                    plan.reserved.remove(&path);
                    plan.skipped += 1;
                    return Ok(());
                }
            }
        }

        debug!(
            message_id = %message.id,
            from = %row.storage_path,
            to = %path,
            "Message moved"
        );
        plan.actions.push(Action::Relocate {
            id: row.id,
            message: new_message(folder, message, path, hash, size),
            update,
        });
        Ok(())
    }

    /// Writes the page's rows and checkpoint in one transaction and puts the
    /// staged files in place before committing
    async fn commit_page(
        &self,
        folder: &Folder,
        mut plan: PagePlan,
        next: &Checkpoint,
        completed_at: Option<DateTime<Utc>>,
        outcome: &mut FolderOutcome,
    ) -> Result<(), PageError> {
        let mut tx = match self.store.begin().await {
            Ok(tx) => tx,
            Err(e) => {
                let failure = self.classify(folder, None, e.into());
                self.abandon(plan).await;
                return Err(failure);
            }
        };

        let counts = match write_actions(tx.as_mut(), folder, &plan.actions, next, completed_at).await {
            Ok(counts) => counts,
            Err(e) => {
                drop(tx);
                let failure = self.classify(folder, None, e.into());
                self.abandon(plan).await;
                return Err(failure);
            }
        };

        for i in 0..plan.staged.len() {
            if let Err(e) = self.storage.promote(&mut plan.staged[i]).await {
                drop(tx);
                self.demote_all(&mut plan.staged).await;
                let failure = self.classify(folder, None, e.into());
                self.abandon(plan).await;
                return Err(failure);
            }
        }

        if let Err(e) = tx.commit().await {
            error!(folder = %folder.local_path, error = %e, "Page commit failed");
            self.demote_all(&mut plan.staged).await;
            self.undo_moves(&plan.moved).await;
            // Staged content stays under its temp name for the cleanup pass
            return Err(self.classify(folder, None, e.into()));
        }

        for staged in plan.staged {
            if let Err(e) = self.storage.finalize(staged).await {
                warn!(error = %e, "Failed to remove replaced content");
            }
        }

        outcome.report.added += counts.added;
        outcome.report.updated += counts.updated;
        outcome.report.moved += counts.moved;
        outcome.report.flagged += counts.flagged;
        outcome.report.skipped += plan.skipped;
        for id in counts.flagged_ids {
            outcome.issues.push(SyncIssue::message(
                folder.local_path.as_str(),
                id.to_string(),
                MISSING_FILE,
            ));
        }
        Ok(())
    }

    async fn demote_all(&self, staged: &mut [StagedFile]) {
        for file in staged.iter_mut().rev() {
            if let Err(e) = self.storage.demote(file).await {
                error!(path = %file.dest(), error = %e, "Failed to take back promoted file");
            }
        }
    }

    /// Reverts the side effects of a page that will not be committed
    async fn abandon(&self, plan: PagePlan) {
        for staged in plan.staged {
            if let Err(e) = self.storage.discard(staged).await {
                warn!(error = %e, "Failed to remove staged file");
            }
        }
        self.undo_moves(&plan.moved).await;
    }

    async fn undo_moves(&self, moved: &[(ArchivePath, ArchivePath)]) {
        for (from, to) in moved.iter().rev() {
            if let Err(e) = self.storage.relocate(to, from).await {
                error!(from = %to, to = %from, error = %e, "Failed to undo message move");
            }
        }
    }

    fn classify(&self, folder: &Folder, message: Option<&MessageId>, err: SyncError) -> PageError {
        match &err {
            SyncError::Source(e) if e.is_fatal() => {
                return PageError::Fatal(SyncError::Unauthorized(e.to_string()))
            }
            SyncError::Unauthorized(_) | SyncError::Fatal(_) => return PageError::Fatal(err),
            _ => {}
        }
        let issue = match message {
            Some(id) => SyncIssue::message(folder.local_path.as_str(), id.as_str(), &err),
            None => SyncIssue::folder(folder.local_path.as_str(), &err),
        };
        PageError::Failed(issue)
    }
}

#[derive(Default)]
struct WriteCounts {
    added: u64,
    updated: u64,
    moved: u64,
    flagged: u64,
    flagged_ids: Vec<i64>,
}

async fn write_actions(
    tx: &mut dyn IStateTransaction,
    folder: &Folder,
    actions: &[Action],
    next: &Checkpoint,
    completed_at: Option<DateTime<Utc>>,
) -> anyhow::Result<WriteCounts> {
    let mut counts = WriteCounts::default();

    for action in actions {
        match action {
            Action::Insert(message) => {
                tx.upsert_message(message).await?;
                counts.added += 1;
            }
            Action::Update { id, update } => {
                tx.update_message_content(*id, update).await?;
                counts.updated += 1;
            }
            Action::Relocate {
                id,
                message,
                update,
            } => {
                let relocated = tx
                    .relocate_message(*id, &message.folder_id, &message.remote_id, &message.storage_path)
                    .await?;
                if !relocated {
                    // The old row was quarantined meanwhile; index the file afresh
                    tx.upsert_message(message).await?;
                    counts.added += 1;
                    continue;
                }
                if let Some(update) = update {
                    tx.update_message_content(*id, update).await?;
                }
                counts.moved += 1;
            }
            Action::Flag { id } => {
                tx.flag_integrity(*id, Some(MISSING_FILE)).await?;
                counts.flagged += 1;
                counts.flagged_ids.push(*id);
            }
        }
    }

    tx.save_checkpoint(&folder.id, next, completed_at).await?;
    Ok(counts)
}

/// Splits a page into tombstones and changes, keeping only the last entry
/// per message ID
fn collapse(entries: Vec<DeltaEntry>) -> (Vec<MessageId>, Vec<RemoteMessage>) {
    let mut last: HashMap<MessageId, usize> = HashMap::new();
    for (i, entry) in entries.iter().enumerate() {
        last.insert(entry.message_id().clone(), i);
    }

    let mut tombstones = Vec::new();
    let mut changes = Vec::new();
    for (i, entry) in entries.into_iter().enumerate() {
        if last.get(entry.message_id()) != Some(&i) {
            continue;
        }
        match entry {
            DeltaEntry::Deleted(id) => tombstones.push(id),
            DeltaEntry::Added(m) | DeltaEntry::Updated(m) => changes.push(m),
        }
    }
    (tombstones, changes)
}

/// Checkpoint to store once the given page is committed
pub fn next_checkpoint(
    current: &Checkpoint,
    page: &ChangePage,
    started: DateTime<Utc>,
    overlap: ChronoDuration,
) -> Checkpoint {
    match (&page.next_page, &page.cursor) {
        (Some(token), _) => match current {
            Checkpoint::Fresh => Checkpoint::Listing {
                since: None,
                next_page: Some(token.clone()),
            },
            Checkpoint::Listing { since, .. } => Checkpoint::Listing {
                since: *since,
                next_page: Some(token.clone()),
            },
            Checkpoint::Delta { cursor, .. } => Checkpoint::Delta {
                cursor: cursor.clone(),
                next_page: Some(token.clone()),
            },
        },
        (None, Some(cursor)) => Checkpoint::Delta {
            cursor: cursor.clone(),
            next_page: None,
        },
        (None, None) => match current {
            Checkpoint::Delta { cursor, .. } => Checkpoint::Delta {
                cursor: cursor.clone(),
                next_page: None,
            },
            _ => Checkpoint::Listing {
                since: Some(started - overlap),
                next_page: None,
            },
        },
    }
}

fn new_message(
    folder: &Folder,
    message: &RemoteMessage,
    path: ArchivePath,
    content_hash: String,
    size_bytes: u64,
) -> NewMessage {
    NewMessage {
        remote_id: message.id.clone(),
        immutable_id: message.immutable_id.clone(),
        folder_id: folder.id.clone(),
        subject: message.subject.clone(),
        received_at: message.received_at,
        storage_path: path,
        change_key: message.change_key.clone(),
        content_hash,
        size_bytes,
    }
}
