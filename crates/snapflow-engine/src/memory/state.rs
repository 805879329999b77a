//! Handle table and per-file bookkeeping of the in-memory engine.

use snapflow_core::{DatabaseId, EngineError, HandleKind, ObjectKey, RawHandle};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use tokio::sync::mpsc;

use super::notifier::{Job, Registration};
use super::store::Snapshot;
use crate::api::{EngineResult, Filter};

/// Committed snapshots by history index. Index `i` is version `v{i}.{i}`;
/// index 0 is the empty database. Indices below `base` were trimmed once no
/// reference or registration could read them.
#[derive(Clone)]
pub(crate) struct History {
    base: usize,
    snapshots: VecDeque<Arc<Snapshot>>,
}

impl History {
    fn new() -> Self {
        Self {
            base: 0,
            snapshots: VecDeque::from([Arc::new(Snapshot::default())]),
        }
    }

    pub fn latest(&self) -> usize {
        self.base + self.snapshots.len() - 1
    }

    pub fn get(&self, index: usize) -> Option<&Arc<Snapshot>> {
        index
            .checked_sub(self.base)
            .and_then(|offset| self.snapshots.get(offset))
    }

    pub fn push(&mut self, snapshot: Snapshot) -> usize {
        self.snapshots.push_back(Arc::new(snapshot));
        self.latest()
    }

    /// Snapshots still held.
    pub fn retained(&self) -> usize {
        self.snapshots.len()
    }

    /// Drop snapshots below `floor`. The latest one is always kept.
    fn trim_below(&mut self, floor: usize) -> usize {
        let floor = floor.min(self.latest());
        let mut trimmed = 0;
        while self.base < floor {
            self.snapshots.pop_front();
            self.base += 1;
            trimmed += 1;
        }
        trimmed
    }
}

/// Everything the engine knows about one database path.
pub(crate) struct FileState {
    pub id: DatabaseId,
    pub history: History,
    /// Frozen-reference count per pinned history index.
    pins: BTreeMap<usize, usize>,
    pub max_active_versions: Option<usize>,
    pub writer: Option<u64>,
    pub pending: Option<Snapshot>,
    pub next_key: u64,
    pub next_element: u64,
    pub read_fault: Option<String>,
    jobs: mpsc::UnboundedSender<Job>,
    pub registrations: BTreeMap<u64, Arc<Registration>>,
}

impl FileState {
    pub fn new(
        id: DatabaseId,
        max_active_versions: Option<usize>,
        jobs: mpsc::UnboundedSender<Job>,
    ) -> Self {
        Self {
            id,
            history: History::new(),
            pins: BTreeMap::new(),
            max_active_versions,
            writer: None,
            pending: None,
            next_key: 0,
            next_element: 0,
            read_fault: None,
            jobs,
            registrations: BTreeMap::new(),
        }
    }

    pub fn latest(&self) -> usize {
        self.history.latest()
    }

    pub fn check_read(&self) -> EngineResult<()> {
        match &self.read_fault {
            Some(message) => Err(EngineError::Storage(message.clone())),
            None => Ok(()),
        }
    }

    pub fn pin(&mut self, index: usize) -> EngineResult<()> {
        if let Some(limit) = self.max_active_versions
            && !self.pins.contains_key(&index)
            && self.pins.len() >= limit
        {
            return Err(EngineError::TooManyVersions { limit });
        }
        *self.pins.entry(index).or_default() += 1;
        Ok(())
    }

    fn unpin(&mut self, index: usize) {
        if let Some(count) = self.pins.get_mut(&index) {
            *count -= 1;
            if *count == 0 {
                self.pins.remove(&index);
            }
        }
    }

    pub fn pinned(&self) -> usize {
        self.pins.len()
    }

    pub fn pending_mut(&mut self) -> EngineResult<&mut Snapshot> {
        self.pending.as_mut().ok_or(EngineError::NoWriteTransaction)
    }

    pub fn rollback(&mut self) {
        self.writer = None;
        self.pending = None;
    }

    pub fn notify(&self, job: Job) {
        if self.jobs.send(job).is_err() {
            tracing::warn!(database = %self.id, "notifier is gone, dropping job");
        }
    }
}

#[derive(Debug)]
pub(crate) struct DatabaseEntry {
    pub path: String,
    pub frozen: bool,
    pub version: usize,
    pub closed: bool,
    released: bool,
    /// Entity and token handles minted through this reference.
    dependents: usize,
}

impl DatabaseEntry {
    pub fn new(path: &str, frozen: bool, version: usize) -> Self {
        Self {
            path: path.to_string(),
            frozen,
            version,
            closed: false,
            released: false,
            dependents: 0,
        }
    }
}

#[derive(Debug)]
pub(crate) enum Entry {
    Database(DatabaseEntry),
    Object {
        db: u64,
        class: String,
        key: ObjectKey,
    },
    List {
        db: u64,
        class: String,
        key: ObjectKey,
        field: String,
    },
    Query {
        db: u64,
        class: String,
        filter: Filter,
    },
    Results {
        db: u64,
        class: String,
        filter: Filter,
    },
    Token {
        db: u64,
        registration: u64,
    },
}

impl Entry {
    fn kind(&self) -> HandleKind {
        match self {
            Self::Database(_) => HandleKind::Database,
            Self::Object { .. } => HandleKind::Object,
            Self::List { .. } => HandleKind::List,
            Self::Query { .. } => HandleKind::Query,
            Self::Results { .. } => HandleKind::Results,
            Self::Token { .. } => HandleKind::NotificationToken,
        }
    }

    /// The database reference this handle was minted through.
    fn owner(&self) -> Option<u64> {
        match self {
            Self::Database(_) => None,
            Self::Object { db, .. }
            | Self::List { db, .. }
            | Self::Query { db, .. }
            | Self::Results { db, .. }
            | Self::Token { db, .. } => Some(*db),
        }
    }
}

#[derive(Default)]
pub(crate) struct State {
    pub files: BTreeMap<String, FileState>,
    handles: BTreeMap<u64, Entry>,
    /// Released identifiers, reused most-recent first.
    free: Vec<u64>,
    next_raw: u64,
    pub next_database: u64,
    pub next_registration: u64,
}

impl State {
    pub fn mint(&mut self, entry: Entry) -> RawHandle {
        if let Some(db) = entry.owner()
            && let Some(Entry::Database(owner)) = self.handles.get_mut(&db)
        {
            owner.dependents += 1;
        }
        let raw = match self.free.pop() {
            Some(raw) => raw,
            None => {
                self.next_raw += 1;
                self.next_raw
            }
        };
        self.handles.insert(raw, entry);
        RawHandle(raw)
    }

    pub fn live_handles(&self) -> usize {
        self.handles.len()
    }

    pub fn entry(&self, kind: HandleKind, raw: RawHandle) -> EngineResult<&Entry> {
        match self.handles.get(&raw.0) {
            Some(entry) if entry.kind() == kind => Ok(entry),
            _ => Err(EngineError::UnknownHandle { kind, raw }),
        }
    }

    /// An open database reference.
    pub fn database(&self, raw: RawHandle) -> EngineResult<&DatabaseEntry> {
        match self.entry(HandleKind::Database, raw)? {
            Entry::Database(db) if db.closed => Err(EngineError::Closed),
            Entry::Database(db) => Ok(db),
            _ => Err(EngineError::UnknownHandle {
                kind: HandleKind::Database,
                raw,
            }),
        }
    }

    pub fn database_mut(&mut self, raw: RawHandle) -> EngineResult<&mut DatabaseEntry> {
        match self.handles.get_mut(&raw.0) {
            Some(Entry::Database(db)) if db.closed => Err(EngineError::Closed),
            Some(Entry::Database(db)) => Ok(db),
            _ => Err(EngineError::UnknownHandle {
                kind: HandleKind::Database,
                raw,
            }),
        }
    }

    pub fn file(&self, path: &str) -> EngineResult<&FileState> {
        self.files.get(path).ok_or(EngineError::Closed)
    }

    pub fn file_mut(&mut self, path: &str) -> EngineResult<&mut FileState> {
        self.files.get_mut(path).ok_or(EngineError::Closed)
    }

    /// The file behind an open database reference.
    pub fn file_of(&self, db: u64) -> EngineResult<&FileState> {
        let entry = self.database(RawHandle(db))?;
        self.file(&entry.path)
    }

    /// The snapshot reads through `db` observe. The writer sees its own
    /// uncommitted changes.
    pub fn snapshot(&self, db: u64) -> EngineResult<&Snapshot> {
        let entry = self.database(RawHandle(db))?;
        let file = self.file(&entry.path)?;
        if file.writer == Some(db)
            && let Some(pending) = &file.pending
        {
            return Ok(pending);
        }
        file.history
            .get(entry.version)
            .map(Arc::as_ref)
            .ok_or_else(|| EngineError::Storage(format!("missing version {}", entry.version)))
    }

    /// The file whose write transaction `db` owns.
    pub fn writable(&mut self, db: u64) -> EngineResult<&mut FileState> {
        let entry = self.database(RawHandle(db))?;
        if entry.frozen {
            return Err(EngineError::FrozenWrite);
        }
        let path = entry.path.clone();
        let file = self.file_mut(&path)?;
        if file.writer != Some(db) {
            return Err(EngineError::NoWriteTransaction);
        }
        Ok(file)
    }

    /// Forget a handle. Returns the registration a released token stood
    /// for; the caller detaches its callback outside the state lock.
    pub fn release(&mut self, kind: HandleKind, raw: RawHandle) -> Option<Arc<Registration>> {
        let id = raw.0;
        match self.handles.get_mut(&id) {
            None => {
                tracing::warn!(%kind, %raw, "release of unknown handle");
                return None;
            }
            Some(Entry::Database(db)) => {
                db.released = true;
                let path = db.path.clone();
                let pending = db.dependents;
                if let Some(file) = self.files.get_mut(&path)
                    && file.writer == Some(id)
                {
                    tracing::debug!(database = %file.id, "rolling back write of released reference");
                    file.rollback();
                }
                if pending == 0 {
                    self.free_database(id);
                }
                return None;
            }
            Some(_) => {}
        }

        let entry = self.handles.remove(&id)?;
        self.free.push(id);
        let mut finished = None;
        if let Entry::Token { db, registration } = &entry
            && let Some(Entry::Database(owner)) = self.handles.get(db)
        {
            let path = owner.path.clone();
            finished = self
                .files
                .get_mut(&path)
                .and_then(|file| file.registrations.remove(registration));
        }
        if let Some(db) = entry.owner() {
            self.drop_dependent(db);
        }
        finished
    }

    fn drop_dependent(&mut self, db: u64) {
        let free = match self.handles.get_mut(&db) {
            Some(Entry::Database(owner)) => {
                owner.dependents = owner.dependents.saturating_sub(1);
                owner.released && owner.dependents == 0
            }
            _ => false,
        };
        if free {
            self.free_database(db);
        }
    }

    fn free_database(&mut self, id: u64) {
        if let Some(Entry::Database(db)) = self.handles.remove(&id) {
            self.free.push(id);
            if db.frozen
                && let Some(file) = self.files.get_mut(&db.path)
            {
                file.unpin(db.version);
            }
            self.trim_history(&db.path);
        }
    }

    /// Forget snapshots of `path` older than anything a reference reads at
    /// or a registration diffs from.
    pub fn trim_history(&mut self, path: &str) {
        let Some(file) = self.files.get(path) else {
            return;
        };
        let references = self.handles.values().filter_map(|entry| match entry {
            Entry::Database(db) if db.path == path => Some(db.version),
            _ => None,
        });
        let registrations = file
            .registrations
            .values()
            .map(|registration| registration.delivered());
        let floor = references
            .chain(registrations)
            .chain(file.pins.keys().copied())
            .fold(file.latest(), usize::min);
        if let Some(file) = self.files.get_mut(path) {
            let trimmed = file.history.trim_below(floor);
            if trimmed > 0 {
                tracing::trace!(database = %file.id, trimmed, floor, "trimmed history");
            }
        }
    }
}
