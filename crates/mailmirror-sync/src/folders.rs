//! Folder reconciliation
//!
//! Diffs the remote folder listing against the stored folder identity map.
//! Local paths are recomputed top-down from the remote parent chain on every
//! run; a changed path under the same remote ID is a rename or move.
//!
//! Moves relocate the folder's files first and update the folder row and the
//! message paths in one transaction afterwards. If that transaction fails,
//! the file moves are undone. Folders missing from the listing are retired,
//! never deleted. Exclusion patterns are applied last, against the new paths.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use chrono::Utc;
use mailmirror_core::{
    domain::{newtypes::ArchivePath, FolderId, Folder},
    ports::{IStateStore, RemoteFolder},
};
use tracing::{debug, error, info, instrument, warn};

use crate::matcher::FolderMatcher;
use crate::storage::{sanitize_folder_name, ArchiveStorage, StoreClaims};
use crate::summary::SyncIssue;
use crate::SyncError;

/// A remote folder whose local path could not be derived
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathError {
    pub id: FolderId,
    pub display_name: String,
    pub reason: String,
}

/// Local paths derived from one remote listing
#[derive(Debug, Default)]
pub struct ComputedPaths {
    pub paths: HashMap<FolderId, ArchivePath>,
    pub errors: Vec<PathError>,
}

/// Derives every folder's local path from its remote parent chain
///
/// Traversal is breadth-first from the top-level folders over an adjacency
/// map, so a parent cycle or a dangling parent reference leaves the affected
/// folders unreached; they are reported as errors. Siblings whose sanitized
/// names coincide (case-insensitively) are disambiguated with `~2`, `~3`, ...
/// in remote ID order.
pub fn compute_paths(remote: &[RemoteFolder]) -> ComputedPaths {
    let mut computed = ComputedPaths::default();

    let mut by_id: HashMap<&FolderId, &RemoteFolder> = HashMap::new();
    for folder in remote {
        if by_id.contains_key(&folder.id) {
            computed.errors.push(PathError {
                id: folder.id.clone(),
                display_name: folder.display_name.clone(),
                reason: "folder ID listed more than once".to_string(),
            });
            continue;
        }
        by_id.insert(&folder.id, folder);
    }

    let mut children: HashMap<Option<&FolderId>, Vec<&RemoteFolder>> = HashMap::new();
    for &folder in by_id.values() {
        children
            .entry(folder.parent_id.as_ref())
            .or_default()
            .push(folder);
    }

    let mut queue: VecDeque<(Option<&FolderId>, Option<ArchivePath>)> = VecDeque::new();
    queue.push_back((None, None));

    while let Some((parent, parent_path)) = queue.pop_front() {
        let Some(kids) = children.get(&parent) else {
            continue;
        };
        let mut kids = kids.clone();
        kids.sort_by(|a, b| a.id.cmp(&b.id));

        let mut taken: HashSet<String> = HashSet::new();
        for kid in kids {
            if computed.paths.contains_key(&kid.id) {
                continue;
            }

            let base = sanitize_folder_name(&kid.display_name);
            let mut n = 1;
            let name = loop {
                let candidate = if n == 1 {
                    base.clone()
                } else {
                    format!("{base}~{n}")
                };
                if taken.insert(candidate.to_lowercase()) {
                    break candidate;
                }
                n += 1;
            };

            let path = match &parent_path {
                Some(p) => p.join(&name),
                None => ArchivePath::new(name),
            };
            match path {
                Ok(path) => {
                    computed.paths.insert(kid.id.clone(), path.clone());
                    queue.push_back((Some(&kid.id), Some(path)));
                }
                Err(e) => computed.errors.push(PathError {
                    id: kid.id.clone(),
                    display_name: kid.display_name.clone(),
                    reason: e.to_string(),
                }),
            }
        }
    }

    let mut unreached: Vec<&RemoteFolder> = by_id
        .values()
        .filter(|f| !computed.paths.contains_key(&f.id))
        .copied()
        .collect();
    unreached.sort_by(|a, b| a.id.cmp(&b.id));

    for folder in unreached {
        if computed.errors.iter().any(|e| e.id == folder.id) {
            continue;
        }
        let reason = match &folder.parent_id {
            Some(parent) if !by_id.contains_key(parent) => {
                format!("parent folder {parent} is not in the remote listing")
            }
            _ => "folder is not reachable from a top-level folder (parent cycle)".to_string(),
        };
        computed.errors.push(PathError {
            id: folder.id.clone(),
            display_name: folder.display_name.clone(),
            reason,
        });
    }

    computed
}

/// What one reconciliation changed and which folders to pull
#[derive(Debug, Default)]
pub struct ReconcileOutcome {
    /// Live, non-excluded folders with their updated rows, ordered by path
    pub in_scope: Vec<Folder>,
    pub excluded: Vec<ArchivePath>,
    pub created: u64,
    pub moved: u64,
    pub retired: u64,
    pub revived: u64,
    pub issues: Vec<SyncIssue>,
}

/// Applies remote folder tree changes to the identity map and the archive
pub struct FolderReconciler {
    store: Arc<dyn IStateStore>,
    storage: Arc<ArchiveStorage>,
}

impl FolderReconciler {
    pub fn new(store: Arc<dyn IStateStore>, storage: Arc<ArchiveStorage>) -> Self {
        Self { store, storage }
    }

    /// Reconciles the stored folders with a fresh remote listing
    ///
    /// With `dry_run` nothing is written; the outcome describes what a real
    /// run would do.
    #[instrument(skip_all, fields(remote = remote.len(), dry_run = dry_run))]
    pub async fn reconcile(
        &self,
        remote: &[RemoteFolder],
        matcher: &FolderMatcher,
        dry_run: bool,
    ) -> Result<ReconcileOutcome, SyncError> {
        let computed = compute_paths(remote);
        let mut outcome = ReconcileOutcome::default();

        for e in &computed.errors {
            warn!(folder_id = %e.id, name = %e.display_name, reason = %e.reason, "Skipping folder");
            outcome
                .issues
                .push(SyncIssue::folder(e.display_name.clone(), &e.reason));
        }

        let known: HashMap<FolderId, Folder> = self
            .store
            .get_folders()
            .await?
            .into_iter()
            .map(|f| (f.id.clone(), f))
            .collect();

        let mut ordered: Vec<(&RemoteFolder, &ArchivePath)> = Vec::new();
        let mut seen = HashSet::new();
        for r in remote {
            if let Some(path) = computed.paths.get(&r.id) {
                if seen.insert(&r.id) {
                    ordered.push((r, path));
                }
            }
        }
        ordered.sort_by(|a, b| a.1.cmp(b.1));

        let mut pending: Vec<Folder> = Vec::new();
        let mut live: Vec<Folder> = Vec::new();

        for (r, path) in ordered {
            let Some(existing) = known.get(&r.id) else {
                let mut folder = Folder::new(
                    r.id.clone(),
                    r.parent_id.clone(),
                    r.display_name.clone(),
                    path.clone(),
                );
                folder.total_count = r.total_count;
                folder.unread_count = r.unread_count;
                info!(folder = %path, "New folder");
                outcome.created += 1;
                pending.push(folder.clone());
                live.push(folder);
                continue;
            };

            let mut folder = existing.clone();
            folder.parent_id = r.parent_id.clone();
            folder.display_name = r.display_name.clone();
            folder.total_count = r.total_count;
            folder.unread_count = r.unread_count;
            if folder.retired_at.take().is_some() {
                info!(folder = %path, "Folder reappeared remotely");
                outcome.revived += 1;
            }

            if &existing.local_path == path {
                if folder != *existing {
                    pending.push(folder.clone());
                }
                live.push(folder);
                continue;
            }

            folder.local_path = path.clone();
            if dry_run {
                info!(from = %existing.local_path, to = %path, "Folder would move");
                outcome.moved += 1;
                live.push(folder);
                continue;
            }

            match self.move_folder(existing, &folder).await {
                Ok(files) => {
                    info!(from = %existing.local_path, to = %path, files, "Folder moved");
                    outcome.moved += 1;
                    live.push(folder);
                }
                Err(e) => {
                    error!(from = %existing.local_path, to = %path, error = %e, "Folder move failed");
                    outcome.issues.push(SyncIssue::folder(
                        existing.local_path.as_str(),
                        format!("move to {path} failed: {e}"),
                    ));
                }
            }
        }

        let remote_ids: HashSet<&FolderId> = remote.iter().map(|r| &r.id).collect();
        let mut retiring: Vec<&Folder> = known
            .values()
            .filter(|f| !f.is_retired() && !remote_ids.contains(&f.id))
            .collect();
        retiring.sort_by(|a, b| a.local_path.cmp(&b.local_path));
        for folder in &retiring {
            info!(folder = %folder.local_path, "Folder gone remotely, retiring");
        }
        outcome.retired = retiring.len() as u64;

        if !dry_run && (!pending.is_empty() || !retiring.is_empty()) {
            let now = Utc::now();
            let mut tx = self.store.begin().await?;
            for folder in &pending {
                tx.upsert_folder(folder).await?;
            }
            for folder in &retiring {
                tx.retire_folder(&folder.id, now).await?;
            }
            tx.commit().await?;
            debug!(
                updated = pending.len(),
                retired = retiring.len(),
                "Folder map committed"
            );
        }

        for folder in live {
            if matcher.is_excluded(folder.local_path.as_str()) {
                debug!(folder = %folder.local_path, "Excluded by pattern");
                outcome.excluded.push(folder.local_path);
            } else {
                outcome.in_scope.push(folder);
            }
        }

        Ok(outcome)
    }

    /// Relocates a folder's live files, then commits the new folder path and
    /// message paths together. Returns the number of files moved.
    async fn move_folder(&self, old: &Folder, new: &Folder) -> Result<usize, SyncError> {
        let old_prefix = self.storage.folder_dir(&old.local_path)?;
        let new_prefix = self.storage.folder_dir(&new.local_path)?;
        let rows = self.store.messages_in_folder(&old.id, false).await?;

        let mut moved: Vec<(ArchivePath, ArchivePath)> = Vec::new();
        let mut updates: Vec<(i64, ArchivePath)> = Vec::new();
        let mut reserved: HashSet<ArchivePath> = HashSet::new();

        for row in &rows {
            let Some(target) = row.storage_path.rebase(&old_prefix, &new_prefix) else {
                continue;
            };

            let source_exists = self.storage.exists(&row.storage_path).await;
            let allocation = {
                let claims = StoreClaims {
                    store: self.store.as_ref(),
                    reserved: &reserved,
                };
                let expected = (!source_exists).then_some(row.content_hash.as_str());
                self.storage.allocate(&target, expected, &claims).await
            };
            let allocation = match allocation {
                Ok(a) => a,
                Err(e) => {
                    self.undo_moves(&moved).await;
                    return Err(e.into());
                }
            };

            if !source_exists {
                if allocation.adopted {
                    // An interrupted earlier move already placed the file
                    reserved.insert(allocation.path.clone());
                    updates.push((row.id, allocation.path));
                } else {
                    warn!(
                        path = %row.storage_path,
                        message_id = %row.remote_id,
                        "File missing, leaving path unchanged"
                    );
                }
                continue;
            }

            if let Err(e) = self
                .storage
                .relocate(&row.storage_path, &allocation.path)
                .await
            {
                self.undo_moves(&moved).await;
                return Err(e.into());
            }
            moved.push((row.storage_path.clone(), allocation.path.clone()));
            reserved.insert(allocation.path.clone());
            updates.push((row.id, allocation.path));
        }

        if let Err(e) = self.commit_move(new, &updates).await {
            self.undo_moves(&moved).await;
            return Err(e);
        }
        Ok(moved.len())
    }

    async fn commit_move(
        &self,
        folder: &Folder,
        updates: &[(i64, ArchivePath)],
    ) -> Result<(), SyncError> {
        let mut tx = self.store.begin().await?;
        tx.upsert_folder(folder).await?;
        for (id, path) in updates {
            tx.set_message_path(*id, path).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn undo_moves(&self, moved: &[(ArchivePath, ArchivePath)]) {
        for (from, to) in moved.iter().rev() {
            if let Err(e) = self.storage.relocate(to, from).await {
                error!(from = %to, to = %from, error = %e, "Failed to undo file move");
            }
        }
    }
}
