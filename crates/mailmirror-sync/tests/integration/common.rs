//! Shared fixtures: a scripted in-memory mailbox, a store wrapper that can
//! refuse to commit, and a harness wiring them to a temp-dir archive

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, TimeZone, Utc};
use mailmirror_cache::{DatabasePool, SqliteStateStore};
use mailmirror_core::config::SyncConfig;
use mailmirror_core::domain::{
    ArchivePath, AttachmentRecord, Checkpoint, ContentUpdate, DeltaCursor, Folder, FolderId,
    ImmutableId, MessageId, MessageRecord, NewMessage, PageToken, QuarantineInfo, SyncState,
    Transformation,
};
use mailmirror_core::ports::{
    ChangePage, DeltaEntry, IMailSource, IStateStore, IStateTransaction, MessageCounts,
    RemoteFolder, RemoteMessage, SourceError,
};
use mailmirror_sync::{ArchiveStorage, RetryPolicy, RunOptions, RunSummary, SyncOrchestrator};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

// ============================================================================
// FakeMailbox
// ============================================================================

/// Which source call a scripted failure applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Call {
    ListFolders,
    ListMessages,
    GetDelta,
    FetchContent,
}

struct Failure {
    call: Call,
    /// Page token or message ID the failure is bound to; `None` matches any
    key: Option<String>,
    error: SourceError,
    remaining: u32,
}

#[derive(Default)]
struct MailboxState {
    folders: Vec<RemoteFolder>,
    /// Current messages per folder, in arrival order
    messages: HashMap<FolderId, Vec<RemoteMessage>>,
    content: HashMap<MessageId, Vec<u8>>,
    /// Change log per folder; a cursor is a position in it
    log: HashMap<FolderId, Vec<DeltaEntry>>,
    epoch: u32,
    failures: Vec<Failure>,
    /// Cancelled once this many message pages have been served
    cancel_after: Option<(usize, CancellationToken)>,
    pages_served: usize,
    /// (folder, page token) of every listing request
    list_calls: Vec<(String, Option<String>)>,
    locate_calls: usize,
}

/// Scripted remote mailbox
///
/// Listing pages are tokenised as `p<offset>`, delta pages as `d<offset>`,
/// cursors as `e<epoch>-<log position>`. Bumping the epoch invalidates every
/// cursor handed out before.
#[derive(Default)]
pub struct FakeMailbox {
    state: Mutex<MailboxState>,
    pub fetches: AtomicUsize,
}

impl FakeMailbox {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_folder(&self, id: &str, parent: Option<&str>, name: &str) {
        let mut state = self.state.lock().unwrap();
        state.folders.push(RemoteFolder {
            id: fid(id),
            parent_id: parent.map(fid),
            display_name: name.to_string(),
            total_count: 0,
            unread_count: 0,
        });
    }

    pub fn rename_folder(&self, id: &str, name: &str) {
        let mut state = self.state.lock().unwrap();
        let folder = state
            .folders
            .iter_mut()
            .find(|f| f.id.as_str() == id)
            .expect("unknown folder");
        folder.display_name = name.to_string();
    }

    /// Moves a folder under a new parent (`None` for top level)
    pub fn reparent_folder(&self, id: &str, parent: Option<&str>) {
        let mut state = self.state.lock().unwrap();
        let folder = state
            .folders
            .iter_mut()
            .find(|f| f.id.as_str() == id)
            .expect("unknown folder");
        folder.parent_id = parent.map(fid);
    }

    pub fn remove_folder(&self, id: &str) {
        let mut state = self.state.lock().unwrap();
        state.folders.retain(|f| f.id.as_str() != id);
    }

    /// Adds a message and returns its metadata
    pub fn add_message(
        &self,
        folder: &str,
        id: &str,
        subject: &str,
        received_at: DateTime<Utc>,
        body: &[u8],
    ) -> RemoteMessage {
        let message = RemoteMessage {
            id: mid(id),
            immutable_id: Some(ImmutableId::new(format!("imm-{id}")).unwrap()),
            subject: subject.to_string(),
            received_at,
            change_key: Some(format!("ck-{id}-1")),
            size: Some(body.len() as u64),
        };
        self.insert(folder, message.clone(), body.to_vec());
        message
    }

    fn insert(&self, folder: &str, message: RemoteMessage, body: Vec<u8>) {
        let mut state = self.state.lock().unwrap();
        state.content.insert(message.id.clone(), body);
        state
            .messages
            .entry(fid(folder))
            .or_default()
            .push(message.clone());
        state
            .log
            .entry(fid(folder))
            .or_default()
            .push(DeltaEntry::Added(message));
    }

    /// Replaces the content of a message and bumps its change key
    pub fn update_message(&self, folder: &str, id: &str, body: &[u8]) {
        let mut state = self.state.lock().unwrap();
        let list = state.messages.get_mut(&fid(folder)).expect("unknown folder");
        let message = list
            .iter_mut()
            .find(|m| m.id.as_str() == id)
            .expect("unknown message");
        let version = message
            .change_key
            .as_deref()
            .and_then(|k| k.rsplit('-').next())
            .and_then(|n| n.parse::<u32>().ok())
            .unwrap_or(1);
        message.change_key = Some(format!("ck-{id}-{}", version + 1));
        message.size = Some(body.len() as u64);
        let updated = message.clone();
        state.content.insert(mid(id), body.to_vec());
        state
            .log
            .entry(fid(folder))
            .or_default()
            .push(DeltaEntry::Updated(updated));
    }

    pub fn delete_message(&self, folder: &str, id: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(list) = state.messages.get_mut(&fid(folder)) {
            list.retain(|m| m.id.as_str() != id);
        }
        state
            .log
            .entry(fid(folder))
            .or_default()
            .push(DeltaEntry::Deleted(mid(id)));
    }

    /// Moves a message to another folder; the remote assigns a new ID but
    /// keeps the immutable ID
    pub fn move_message(&self, from: &str, to: &str, id: &str, new_id: &str) {
        let (mut message, body) = {
            let state = self.state.lock().unwrap();
            let message = state.messages[&fid(from)]
                .iter()
                .find(|m| m.id.as_str() == id)
                .expect("unknown message")
                .clone();
            let body = state.content[&mid(id)].clone();
            (message, body)
        };
        self.delete_message(from, id);
        message.id = mid(new_id);
        self.insert(to, message, body);
    }

    /// Invalidates every cursor handed out so far
    pub fn expire_cursors(&self) {
        self.state.lock().unwrap().epoch += 1;
    }

    /// Makes the next `times` matching calls fail with `error`
    pub fn fail(&self, call: Call, key: Option<&str>, error: SourceError, times: u32) {
        self.state.lock().unwrap().failures.push(Failure {
            call,
            key: key.map(String::from),
            error,
            remaining: times,
        });
    }

    /// Cancels `token` right after the `pages`-th message page is served
    pub fn cancel_after_pages(&self, pages: usize, token: CancellationToken) {
        let mut state = self.state.lock().unwrap();
        state.pages_served = 0;
        state.cancel_after = Some((pages, token));
    }

    pub fn list_calls(&self) -> Vec<(String, Option<String>)> {
        self.state.lock().unwrap().list_calls.clone()
    }

    pub fn locate_count(&self) -> usize {
        self.state.lock().unwrap().locate_calls
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    fn take_failure(state: &mut MailboxState, call: Call, key: Option<&str>) -> Option<SourceError> {
        let failure = state.failures.iter_mut().find(|f| {
            f.call == call && f.remaining > 0 && (f.key.is_none() || f.key.as_deref() == key)
        })?;
        failure.remaining -= 1;
        Some(failure.error.clone())
    }

    fn page_served(state: &mut MailboxState) {
        state.pages_served += 1;
        if let Some((limit, token)) = &state.cancel_after {
            if state.pages_served >= *limit {
                token.cancel();
            }
        }
    }

    fn cursor(state: &MailboxState, folder: &FolderId) -> DeltaCursor {
        let position = state.log.get(folder).map(Vec::len).unwrap_or(0);
        DeltaCursor::new(format!("e{}-{}", state.epoch, position)).unwrap()
    }
}

#[async_trait::async_trait]
impl IMailSource for FakeMailbox {
    async fn list_folders(&self) -> Result<Vec<RemoteFolder>, SourceError> {
        let mut state = self.state.lock().unwrap();
        if let Some(e) = Self::take_failure(&mut state, Call::ListFolders, None) {
            return Err(e);
        }
        Ok(state.folders.clone())
    }

    async fn list_messages(
        &self,
        folder: &FolderId,
        since: Option<DateTime<Utc>>,
        page: Option<&PageToken>,
        page_size: u32,
    ) -> Result<ChangePage, SourceError> {
        let mut state = self.state.lock().unwrap();
        let key = page.map(|p| p.as_str().to_string());
        state
            .list_calls
            .push((folder.to_string(), key.clone()));
        if let Some(e) = Self::take_failure(&mut state, Call::ListMessages, key.as_deref()) {
            return Err(e);
        }

        let all: Vec<RemoteMessage> = state
            .messages
            .get(folder)
            .map(|list| {
                list.iter()
                    .filter(|m| since.map_or(true, |s| m.received_at >= s))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        let offset = parse_offset(page, 'p');
        let end = (offset + page_size as usize).min(all.len());
        let entries = all[offset.min(all.len())..end]
            .iter()
            .cloned()
            .map(DeltaEntry::Added)
            .collect();

        let mut result = ChangePage {
            entries,
            ..Default::default()
        };
        if end < all.len() {
            result.next_page = Some(PageToken::new(format!("p{end}")).unwrap());
        } else {
            result.cursor = Some(Self::cursor(&state, folder));
        }
        Self::page_served(&mut state);
        Ok(result)
    }

    async fn get_delta(
        &self,
        folder: &FolderId,
        cursor: &DeltaCursor,
        page: Option<&PageToken>,
        page_size: u32,
    ) -> Result<ChangePage, SourceError> {
        let mut state = self.state.lock().unwrap();
        let key = page.map(|p| p.as_str().to_string());
        if let Some(e) = Self::take_failure(&mut state, Call::GetDelta, key.as_deref()) {
            return Err(e);
        }

        let (epoch, position) = cursor
            .as_str()
            .trim_start_matches('e')
            .split_once('-')
            .and_then(|(e, p)| Some((e.parse::<u32>().ok()?, p.parse::<usize>().ok()?)))
            .ok_or_else(|| SourceError::Protocol("malformed cursor".into()))?;
        if epoch != state.epoch {
            return Err(SourceError::CursorInvalid);
        }

        let log = state.log.get(folder).cloned().unwrap_or_default();
        let start = match page {
            Some(_) => parse_offset(page, 'd'),
            None => position,
        };
        let end = (start + page_size as usize).min(log.len());
        let entries = log[start.min(log.len())..end].to_vec();

        let mut result = ChangePage {
            entries,
            ..Default::default()
        };
        if end < log.len() {
            result.next_page = Some(PageToken::new(format!("d{end}")).unwrap());
        } else {
            result.cursor = Some(Self::cursor(&state, folder));
        }
        Self::page_served(&mut state);
        Ok(result)
    }

    async fn fetch_content(&self, message: &MessageId) -> Result<Vec<u8>, SourceError> {
        let mut state = self.state.lock().unwrap();
        if let Some(e) = Self::take_failure(&mut state, Call::FetchContent, Some(message.as_str())) {
            return Err(e);
        }
        self.fetches.fetch_add(1, Ordering::SeqCst);
        state
            .content
            .get(message)
            .cloned()
            .ok_or_else(|| SourceError::NotFound(message.to_string()))
    }

    async fn locate_message(&self, message: &ImmutableId) -> Result<Option<FolderId>, SourceError> {
        let mut state = self.state.lock().unwrap();
        state.locate_calls += 1;
        Ok(state.messages.iter().find_map(|(folder, list)| {
            list.iter()
                .any(|m| m.immutable_id.as_ref() == Some(message))
                .then(|| folder.clone())
        }))
    }
}

fn parse_offset(page: Option<&PageToken>, prefix: char) -> usize {
    page.and_then(|p| p.as_str().strip_prefix(prefix)?.parse().ok())
        .unwrap_or(0)
}

// ============================================================================
// FlakyStore
// ============================================================================

/// Delegates to a real store; while `fail_commits` is set, every commit of
/// a transaction that wrote message rows rolls back and reports an error
pub struct FlakyStore {
    inner: Arc<SqliteStateStore>,
    pub fail_commits: Arc<AtomicBool>,
}

impl FlakyStore {
    pub fn new(inner: Arc<SqliteStateStore>) -> Self {
        Self {
            inner,
            fail_commits: Arc::new(AtomicBool::new(false)),
        }
    }
}

struct FlakyTransaction {
    inner: Box<dyn IStateTransaction>,
    fail_enabled: bool,
    wrote_messages: bool,
}

#[async_trait::async_trait]
impl IStateStore for FlakyStore {
    async fn begin(&self) -> anyhow::Result<Box<dyn IStateTransaction>> {
        let inner = self.inner.begin().await?;
        Ok(Box::new(FlakyTransaction {
            inner,
            fail_enabled: self.fail_commits.load(Ordering::SeqCst),
            wrote_messages: false,
        }))
    }

    async fn get_folders(&self) -> anyhow::Result<Vec<Folder>> {
        self.inner.get_folders().await
    }

    async fn get_folder(&self, id: &FolderId) -> anyhow::Result<Option<Folder>> {
        self.inner.get_folder(id).await
    }

    async fn get_message(&self, id: i64) -> anyhow::Result<Option<MessageRecord>> {
        self.inner.get_message(id).await
    }

    async fn active_message_by_remote_id(
        &self,
        remote_id: &MessageId,
    ) -> anyhow::Result<Option<MessageRecord>> {
        self.inner.active_message_by_remote_id(remote_id).await
    }

    async fn active_message_by_immutable_id(
        &self,
        immutable_id: &ImmutableId,
    ) -> anyhow::Result<Option<MessageRecord>> {
        self.inner.active_message_by_immutable_id(immutable_id).await
    }

    async fn messages_in_folder(
        &self,
        folder: &FolderId,
        include_quarantined: bool,
    ) -> anyhow::Result<Vec<MessageRecord>> {
        self.inner
            .messages_in_folder(folder, include_quarantined)
            .await
    }

    async fn all_messages(&self) -> anyhow::Result<Vec<MessageRecord>> {
        self.inner.all_messages().await
    }

    async fn all_message_paths(&self) -> anyhow::Result<Vec<ArchivePath>> {
        self.inner.all_message_paths().await
    }

    async fn is_path_claimed(&self, path: &ArchivePath) -> anyhow::Result<bool> {
        self.inner.is_path_claimed(path).await
    }

    async fn message_counts(&self, folder: Option<&FolderId>) -> anyhow::Result<MessageCounts> {
        self.inner.message_counts(folder).await
    }

    async fn get_sync_state(&self, mailbox: &str) -> anyhow::Result<Option<SyncState>> {
        self.inner.get_sync_state(mailbox).await
    }

    async fn transformations_of_kind(&self, kind: &str) -> anyhow::Result<Vec<Transformation>> {
        self.inner.transformations_of_kind(kind).await
    }

    async fn attachments_for(&self, message_id: i64) -> anyhow::Result<Vec<AttachmentRecord>> {
        self.inner.attachments_for(message_id).await
    }
}

#[async_trait::async_trait]
impl IStateTransaction for FlakyTransaction {
    async fn upsert_folder(&mut self, folder: &Folder) -> anyhow::Result<()> {
        self.inner.upsert_folder(folder).await
    }

    async fn retire_folder(&mut self, id: &FolderId, at: DateTime<Utc>) -> anyhow::Result<()> {
        self.inner.retire_folder(id, at).await
    }

    async fn save_checkpoint(
        &mut self,
        id: &FolderId,
        checkpoint: &Checkpoint,
        last_sync_at: Option<DateTime<Utc>>,
    ) -> anyhow::Result<()> {
        self.inner.save_checkpoint(id, checkpoint, last_sync_at).await
    }

    async fn upsert_message(&mut self, message: &NewMessage) -> anyhow::Result<i64> {
        self.wrote_messages = true;
        self.inner.upsert_message(message).await
    }

    async fn update_message_content(
        &mut self,
        id: i64,
        update: &ContentUpdate,
    ) -> anyhow::Result<()> {
        self.inner.update_message_content(id, update).await
    }

    async fn relocate_message(
        &mut self,
        id: i64,
        folder: &FolderId,
        remote_id: &MessageId,
        path: &ArchivePath,
    ) -> anyhow::Result<bool> {
        self.inner
            .relocate_message(id, folder, remote_id, path)
            .await
    }

    async fn set_message_path(&mut self, id: i64, path: &ArchivePath) -> anyhow::Result<()> {
        self.inner.set_message_path(id, path).await
    }

    async fn mark_quarantined(
        &mut self,
        id: i64,
        path: &ArchivePath,
        info: &QuarantineInfo,
    ) -> anyhow::Result<bool> {
        self.inner.mark_quarantined(id, path, info).await
    }

    async fn flag_integrity(&mut self, id: i64, problem: Option<&str>) -> anyhow::Result<()> {
        self.inner.flag_integrity(id, problem).await
    }

    async fn save_sync_state(&mut self, state: &SyncState) -> anyhow::Result<()> {
        self.inner.save_sync_state(state).await
    }

    async fn record_transformation(&mut self, t: &Transformation) -> anyhow::Result<()> {
        self.inner.record_transformation(t).await
    }

    async fn replace_attachments(
        &mut self,
        message_id: i64,
        attachments: &[AttachmentRecord],
    ) -> anyhow::Result<()> {
        self.inner.replace_attachments(message_id, attachments).await
    }

    async fn commit(self: Box<Self>) -> anyhow::Result<()> {
        let this = *self;
        if this.fail_enabled && this.wrote_messages {
            this.inner.rollback().await?;
            anyhow::bail!("injected commit failure");
        }
        this.inner.commit().await
    }

    async fn rollback(self: Box<Self>) -> anyhow::Result<()> {
        self.inner.rollback().await
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub dir: TempDir,
    pub source: Arc<FakeMailbox>,
    pub sqlite: Arc<SqliteStateStore>,
    pub store: Arc<dyn IStateStore>,
    pub storage: Arc<ArchiveStorage>,
    pub config: SyncConfig,
}

impl Harness {
    pub async fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let pool = DatabasePool::in_memory().await.unwrap();
        let sqlite = Arc::new(SqliteStateStore::new(pool.pool().clone()));
        let storage =
            Arc::new(ArchiveStorage::new(dir.path(), "messages", "quarantine").unwrap());
        let config = SyncConfig {
            mailbox: "test".to_string(),
            parallelism: 1,
            page_size: 2,
            ..Default::default()
        };
        Self {
            dir,
            source: FakeMailbox::new(),
            store: sqlite.clone(),
            sqlite,
            storage,
            config,
        }
    }

    /// Routes every store call through a [`FlakyStore`]; returns its switch
    pub fn use_flaky_store(&mut self) -> Arc<AtomicBool> {
        let flaky = FlakyStore::new(self.sqlite.clone());
        let switch = flaky.fail_commits.clone();
        self.store = Arc::new(flaky);
        switch
    }

    pub fn orchestrator(&self) -> SyncOrchestrator {
        SyncOrchestrator::new(
            self.source.clone(),
            self.store.clone(),
            self.storage.clone(),
            self.config.clone(),
            RetryPolicy::immediate(3),
        )
    }

    pub async fn run(&self) -> RunSummary {
        self.run_with(RunOptions::from_config(&self.config), CancellationToken::new())
            .await
    }

    pub async fn run_with(&self, options: RunOptions, cancel: CancellationToken) -> RunSummary {
        self.orchestrator()
            .run(&options, cancel)
            .await
            .expect("run failed")
    }

    pub fn path(&self, relative: &str) -> PathBuf {
        self.dir.path().join(relative)
    }

    pub fn read(&self, relative: &str) -> Vec<u8> {
        std::fs::read(self.path(relative)).unwrap()
    }

    /// Archive-relative paths of every file under `messages/` and
    /// `quarantine/`, temp and backup files excluded, sorted
    pub fn files(&self) -> Vec<String> {
        let mut out = Vec::new();
        for dir in ["messages", "quarantine"] {
            collect(&self.path(dir), self.dir.path(), &mut out);
        }
        out.retain(|p| !p.ends_with(".partial") && !p.ends_with(".backup"));
        out.sort();
        out
    }

    pub fn partials(&self) -> Vec<String> {
        let mut out = Vec::new();
        collect(self.dir.path(), self.dir.path(), &mut out);
        out.retain(|p| p.ends_with(".partial"));
        out
    }

    pub async fn message(&self, remote_id: &str) -> MessageRecord {
        self.sqlite
            .active_message_by_remote_id(&mid(remote_id))
            .await
            .unwrap()
            .expect("message indexed")
    }

    pub async fn folder(&self, id: &str) -> Folder {
        self.sqlite
            .get_folder(&fid(id))
            .await
            .unwrap()
            .expect("folder known")
    }
}

fn collect(dir: &std::path::Path, root: &std::path::Path, out: &mut Vec<String>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect(&path, root, out);
        } else {
            let relative = path.strip_prefix(root).unwrap();
            out.push(relative.to_string_lossy().replace('\\', "/"));
        }
    }
}

pub fn fid(id: &str) -> FolderId {
    FolderId::new(id).unwrap()
}

pub fn mid(id: &str) -> MessageId {
    MessageId::new(id).unwrap()
}

/// 2024-03-07 09:41 UTC plus `minutes`
pub fn at(minutes: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 7, 9, 41, 0).unwrap() + chrono::Duration::minutes(minutes)
}
