//! In-process MVCC engine.
//!
//! This is the memory boundary for `snapflow-engine`:
//! - committed snapshots are indexed by version and kept while any
//!   reference reads at them or any registration still diffs from them
//! - one writer per database builds the next snapshot privately
//! - one notifier thread per database diffs snapshots for registered
//!   callbacks
//!
//! Handle identifiers are recycled most-recent first, like a C allocator
//! would, so a stale raw id can name a newer resource.

mod notifier;
mod state;
mod store;

use parking_lot::Mutex;
use snapflow_core::{
    Database, DatabaseId, EngineError, HandleKind, List, NativeHandle, NotificationToken, Object,
    ObjectKey, Query, RawHandle, Release, Results, Value, VersionId,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::oneshot;

use crate::api::{
    ChangeCallback, DatabaseChangedCallback, EngineResult, Filter, NativeEngine,
};
use crate::config::EngineConfig;
use notifier::{Callback, Job, Registration, version_at};
use state::{DatabaseEntry, Entry, FileState, History, State};
use store::{ListElement, ObjectState, Target};

#[derive(Default)]
struct Counters {
    registrations: AtomicU64,
    unregistrations: AtomicU64,
    deliveries: AtomicU64,
    releases: AtomicU64,
}

/// Engine-wide counters, for tests and diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Callback registrations accepted.
    pub registrations: u64,
    /// Notification tokens released.
    pub unregistrations: u64,
    /// Callback invocations.
    pub deliveries: u64,
    /// Handles released, of every kind.
    pub releases: u64,
    /// Handles currently alive.
    pub live_handles: usize,
}

pub(crate) struct Shared {
    state: Mutex<State>,
    stats: Counters,
}

impl Shared {
    fn registrations_of(
        &self,
        path: &str,
    ) -> Option<(History, Vec<Arc<Registration>>)> {
        let state = self.state.lock();
        let file = state.files.get(path)?;
        Some((
            file.history.clone(),
            file.registrations.values().cloned().collect(),
        ))
    }

    /// Move the live reference a callback is bound through to `index`.
    /// Returns false once the reference is closed or gone.
    fn advance_live(&self, db: u64, index: usize) -> bool {
        let mut state = self.state.lock();
        let Ok(entry) = state.database(RawHandle(db)) else {
            return false;
        };
        let path = entry.path.clone();
        let writing = state
            .files
            .get(&path)
            .is_some_and(|file| file.writer == Some(db));
        if let Ok(entry) = state.database_mut(RawHandle(db))
            && !entry.frozen
            && !writing
            && entry.version < index
        {
            entry.version = index;
        }
        true
    }
}

impl Release for Shared {
    fn release(&self, kind: HandleKind, raw: RawHandle) {
        let registration = self.state.lock().release(kind, raw);
        self.stats.releases.fetch_add(1, Ordering::Relaxed);
        if let Some(registration) = registration {
            let callback = registration.finish();
            drop(callback);
            self.stats.unregistrations.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(registration = registration.id, %raw, "callback unregistered");
        }
    }
}

/// In-memory [`NativeEngine`]. Cloning shares the same databases.
#[derive(Clone)]
pub struct MemoryEngine {
    shared: Arc<Shared>,
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryEngine")
            .field("stats", &self.stats())
            .finish()
    }
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::default()),
                stats: Counters::default(),
            }),
        }
    }

    pub fn stats(&self) -> EngineStats {
        let live_handles = self.shared.state.lock().live_handles();
        let stats = &self.shared.stats;
        EngineStats {
            registrations: stats.registrations.load(Ordering::Relaxed),
            unregistrations: stats.unregistrations.load(Ordering::Relaxed),
            deliveries: stats.deliveries.load(Ordering::Relaxed),
            releases: stats.releases.load(Ordering::Relaxed),
            live_handles,
        }
    }

    /// Number of distinct versions currently pinned by frozen references.
    pub fn pinned_versions(&self, path: &str) -> usize {
        self.shared
            .state
            .lock()
            .files
            .get(path)
            .map_or(0, FileState::pinned)
    }

    /// Number of committed snapshots of `path` still held in memory.
    pub fn retained_versions(&self, path: &str) -> usize {
        self.shared
            .state
            .lock()
            .files
            .get(path)
            .map_or(0, |file| file.history.retained())
    }

    /// Make every later freeze, thaw and resolve on `path` fail with
    /// [`EngineError::Storage`], or clear the fault with `None`.
    pub fn inject_read_fault(&self, path: &str, fault: Option<String>) {
        if let Some(file) = self.shared.state.lock().files.get_mut(path) {
            file.read_fault = fault;
        }
    }

    /// Wait until the notifier of `path` has processed every job enqueued
    /// before this call.
    pub async fn flush(&self, path: &str) {
        let (done, wait) = oneshot::channel();
        {
            let state = self.shared.state.lock();
            let Some(file) = state.files.get(path) else {
                return;
            };
            file.notify(Job::Barrier(done));
        }
        let _ = wait.await;
    }

    fn owner(&self) -> Arc<dyn Release> {
        self.shared.clone()
    }

    fn wrap<C: snapflow_core::Capability>(&self, raw: RawHandle) -> NativeHandle<C> {
        NativeHandle::from_raw(raw, self.owner())
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut State) -> EngineResult<T>) -> EngineResult<T> {
        let mut state = self.shared.state.lock();
        f(&mut state)
    }

    fn object_entry(state: &State, obj: RawHandle) -> EngineResult<(u64, String, ObjectKey)> {
        match state.entry(HandleKind::Object, obj)? {
            Entry::Object { db, class, key } => Ok((*db, class.clone(), *key)),
            _ => Err(EngineError::UnknownHandle {
                kind: HandleKind::Object,
                raw: obj,
            }),
        }
    }

    fn list_entry(state: &State, list: RawHandle) -> EngineResult<(u64, String, ObjectKey, String)> {
        match state.entry(HandleKind::List, list)? {
            Entry::List {
                db,
                class,
                key,
                field,
            } => Ok((*db, class.clone(), *key, field.clone())),
            _ => Err(EngineError::UnknownHandle {
                kind: HandleKind::List,
                raw: list,
            }),
        }
    }

    fn results_entry(state: &State, results: RawHandle) -> EngineResult<(u64, String, Filter)> {
        match state.entry(HandleKind::Results, results)? {
            Entry::Results { db, class, filter } => Ok((*db, class.clone(), filter.clone())),
            _ => Err(EngineError::UnknownHandle {
                kind: HandleKind::Results,
                raw: results,
            }),
        }
    }

    /// Check that `target` is an open reference to the same file as `db`
    /// and that reads on that file are healthy.
    fn check_target(state: &State, db: u64, target: RawHandle) -> EngineResult<()> {
        let source = state.database(RawHandle(db))?;
        let target = state.database(target)?;
        if source.path != target.path {
            return Err(EngineError::WrongDatabase);
        }
        state.file(&target.path)?.check_read()
    }

    fn register(
        &self,
        db: u64,
        target: Target,
        callback: Callback,
    ) -> EngineResult<NativeHandle<NotificationToken>> {
        let raw = {
            // Nothing may fail once `callback` moves into the registration:
            // dropping it under the state lock could release handles.
            let mut state = self.shared.state.lock();
            let entry = state.database(RawHandle(db))?;
            if entry.frozen {
                return Err(EngineError::NotLive);
            }
            let (path, delivered) = (entry.path.clone(), entry.version);
            state.next_registration += 1;
            let id = state.next_registration;
            let file = state.file_mut(&path)?;
            let registration = Registration::new(id, db, target, callback, delivered);
            file.registrations.insert(id, Arc::new(registration));
            // Covers commits that landed after `delivered` but before the
            // registration existed.
            file.notify(Job::CatchUp { registration: id });
            tracing::trace!(registration = id, version = %version_at(delivered), "callback registered");
            state.mint(Entry::Token {
                db,
                registration: id,
            })
        };
        self.shared
            .stats
            .registrations
            .fetch_add(1, Ordering::Relaxed);
        Ok(self.wrap(raw))
    }

    fn mutate_object<T>(
        &self,
        obj: &NativeHandle<Object>,
        f: impl FnOnce(&mut ObjectState, &mut u64) -> EngineResult<T>,
    ) -> EngineResult<T> {
        self.with_state(|state| {
            let (db, class, key) = Self::object_entry(state, obj.raw())?;
            let file = state.writable(db)?;
            let mut next_element = file.next_element;
            let snapshot = file.pending_mut()?;
            let object = snapshot
                .object_mut(&class, key)
                .ok_or_else(|| EngineError::MissingTarget(format!("{class} {key}")))?;
            let out = f(object, &mut next_element)?;
            file.next_element = next_element;
            Ok(out)
        })
    }

    fn mutate_list<T>(
        &self,
        list: &NativeHandle<List>,
        f: impl FnOnce(&mut Vec<ListElement>, &mut u64) -> EngineResult<T>,
    ) -> EngineResult<T> {
        self.with_state(|state| {
            let (db, class, key, field) = Self::list_entry(state, list.raw())?;
            let file = state.writable(db)?;
            let mut next_element = file.next_element;
            let snapshot = file.pending_mut()?;
            let object = snapshot
                .object_mut(&class, key)
                .ok_or_else(|| EngineError::MissingTarget(format!("{class} {key}")))?;
            let out = f(object.lists.entry(field).or_default(), &mut next_element)?;
            file.next_element = next_element;
            Ok(out)
        })
    }

    fn read_list<T>(
        &self,
        list: &NativeHandle<List>,
        f: impl FnOnce(&[ListElement]) -> EngineResult<T>,
    ) -> EngineResult<T> {
        self.with_state(|state| {
            let (db, class, key, field) = Self::list_entry(state, list.raw())?;
            let object = state
                .snapshot(db)?
                .object(&class, key)
                .ok_or_else(|| EngineError::MissingTarget(format!("{class} {key}")))?;
            f(object.list(&field))
        })
    }
}

fn check_index(index: usize, len: usize) -> EngineResult<()> {
    if index < len {
        Ok(())
    } else {
        Err(EngineError::IndexOutOfBounds { index, len })
    }
}

impl NativeEngine for MemoryEngine {
    fn open(&self, path: &str, config: &EngineConfig) -> EngineResult<NativeHandle<Database>> {
        let raw = self.with_state(|state| {
            if !state.files.contains_key(path) {
                state.next_database += 1;
                let id = DatabaseId(state.next_database);
                let name = format!("{}-{}", config.notifier_thread_name, id.0);
                let jobs = notifier::spawn(name, path.to_string(), Arc::downgrade(&self.shared))
                    .map_err(|err| EngineError::Storage(format!("spawn notifier: {err}")))?;
                state.files.insert(
                    path.to_string(),
                    FileState::new(id, config.max_active_versions, jobs),
                );
                tracing::debug!(path, database = %id, "database opened");
            }
            let file = state.file_mut(path)?;
            if config.max_active_versions.is_some() {
                file.max_active_versions = config.max_active_versions;
            }
            let latest = file.latest();
            Ok(state.mint(Entry::Database(DatabaseEntry::new(path, false, latest))))
        })?;
        Ok(self.wrap(raw))
    }

    fn close(&self, db: &NativeHandle<Database>) -> EngineResult<()> {
        let bound = self.with_state(|state| {
            let entry = state.database_mut(db.raw())?;
            entry.closed = true;
            let path = entry.path.clone();
            let file = state.file_mut(&path)?;
            if file.writer == Some(db.raw().0) {
                file.rollback();
            }
            Ok(file
                .registrations
                .values()
                .filter(|registration| registration.db == db.raw().0)
                .cloned()
                .collect::<Vec<_>>())
        })?;
        for registration in bound {
            drop(registration.finish());
        }
        tracing::debug!(handle = %db.raw(), "database reference closed");
        Ok(())
    }

    fn is_closed(&self, db: &NativeHandle<Database>) -> bool {
        self.shared.state.lock().database(db.raw()).is_err()
    }

    fn database_id(&self, db: &NativeHandle<Database>) -> EngineResult<DatabaseId> {
        self.with_state(|state| Ok(state.file_of(db.raw().0)?.id))
    }

    fn version(&self, db: &NativeHandle<Database>) -> EngineResult<VersionId> {
        self.with_state(|state| Ok(version_at(state.database(db.raw())?.version)))
    }

    fn is_frozen(&self, db: &NativeHandle<Database>) -> EngineResult<bool> {
        self.with_state(|state| Ok(state.database(db.raw())?.frozen))
    }

    fn freeze(&self, db: &NativeHandle<Database>) -> EngineResult<NativeHandle<Database>> {
        let raw = self.with_state(|state| {
            let entry = state.database(db.raw())?;
            let (path, version) = (entry.path.clone(), entry.version);
            let file = state.file_mut(&path)?;
            file.check_read()?;
            file.pin(version)?;
            Ok(state.mint(Entry::Database(DatabaseEntry::new(&path, true, version))))
        })?;
        Ok(self.wrap(raw))
    }

    fn thaw(&self, db: &NativeHandle<Database>) -> EngineResult<NativeHandle<Database>> {
        let raw = self.with_state(|state| {
            let path = state.database(db.raw())?.path.clone();
            let file = state.file(&path)?;
            file.check_read()?;
            let latest = file.latest();
            Ok(state.mint(Entry::Database(DatabaseEntry::new(&path, false, latest))))
        })?;
        Ok(self.wrap(raw))
    }

    fn refresh(&self, db: &NativeHandle<Database>) -> EngineResult<VersionId> {
        self.with_state(|state| {
            let entry = state.database(db.raw())?;
            if entry.frozen {
                return Err(EngineError::NotLive);
            }
            let file = state.file(&entry.path)?;
            if file.writer == Some(db.raw().0) {
                return Err(EngineError::WriteInProgress);
            }
            let latest = file.latest();
            state.database_mut(db.raw())?.version = latest;
            Ok(version_at(latest))
        })
    }

    fn begin_write(&self, db: &NativeHandle<Database>) -> EngineResult<()> {
        self.with_state(|state| {
            let entry = state.database(db.raw())?;
            if entry.frozen {
                return Err(EngineError::FrozenWrite);
            }
            let path = entry.path.clone();
            let file = state.file_mut(&path)?;
            if file.writer.is_some() {
                return Err(EngineError::WriteInProgress);
            }
            let latest = file.latest();
            let base = file
                .history
                .get(latest)
                .ok_or_else(|| EngineError::Storage(format!("missing version {latest}")))?;
            file.pending = Some(base.as_ref().clone());
            file.writer = Some(db.raw().0);
            state.database_mut(db.raw())?.version = latest;
            Ok(())
        })
    }

    fn commit(&self, db: &NativeHandle<Database>) -> EngineResult<VersionId> {
        self.with_state(|state| {
            let file = state.writable(db.raw().0)?;
            let snapshot = file.pending.take().ok_or(EngineError::NoWriteTransaction)?;
            let index = file.history.push(snapshot);
            file.writer = None;
            file.notify(Job::Commit { index });
            tracing::debug!(database = %file.id, version = %version_at(index), "committed");
            let entry = state.database_mut(db.raw())?;
            entry.version = index;
            let path = entry.path.clone();
            state.trim_history(&path);
            Ok(version_at(index))
        })
    }

    fn rollback(&self, db: &NativeHandle<Database>) -> EngineResult<()> {
        self.with_state(|state| {
            state.writable(db.raw().0)?.rollback();
            Ok(())
        })
    }

    fn is_in_transaction(&self, db: &NativeHandle<Database>) -> bool {
        self.with_state(|state| Ok(state.file_of(db.raw().0)?.writer == Some(db.raw().0)))
            .unwrap_or(false)
    }

    fn object_create(
        &self,
        db: &NativeHandle<Database>,
        class: &str,
    ) -> EngineResult<NativeHandle<Object>> {
        let raw = self.with_state(|state| {
            let file = state.writable(db.raw().0)?;
            file.next_key += 1;
            let key = ObjectKey(file.next_key);
            file.pending_mut()?
                .insert(class, key, ObjectState::default());
            Ok(state.mint(Entry::Object {
                db: db.raw().0,
                class: class.to_string(),
                key,
            }))
        })?;
        Ok(self.wrap(raw))
    }

    fn object_find(
        &self,
        db: &NativeHandle<Database>,
        class: &str,
        key: ObjectKey,
    ) -> EngineResult<Option<NativeHandle<Object>>> {
        let raw = self.with_state(|state| {
            if state.snapshot(db.raw().0)?.object(class, key).is_none() {
                return Ok(None);
            }
            Ok(Some(state.mint(Entry::Object {
                db: db.raw().0,
                class: class.to_string(),
                key,
            })))
        })?;
        Ok(raw.map(|raw| self.wrap(raw)))
    }

    fn object_key(&self, obj: &NativeHandle<Object>) -> EngineResult<ObjectKey> {
        self.with_state(|state| Ok(Self::object_entry(state, obj.raw())?.2))
    }

    fn object_class(&self, obj: &NativeHandle<Object>) -> EngineResult<String> {
        self.with_state(|state| Ok(Self::object_entry(state, obj.raw())?.1))
    }

    fn object_is_valid(&self, obj: &NativeHandle<Object>) -> bool {
        self.with_state(|state| {
            let (db, class, key) = Self::object_entry(state, obj.raw())?;
            Ok(state.snapshot(db)?.object(&class, key).is_some())
        })
        .unwrap_or(false)
    }

    fn object_get(&self, obj: &NativeHandle<Object>, field: &str) -> EngineResult<Option<Value>> {
        Ok(self.object_fields(obj)?.remove(field))
    }

    fn object_fields(&self, obj: &NativeHandle<Object>) -> EngineResult<BTreeMap<String, Value>> {
        self.with_state(|state| {
            let (db, class, key) = Self::object_entry(state, obj.raw())?;
            state
                .snapshot(db)?
                .object(&class, key)
                .map(|object| object.fields.clone())
                .ok_or_else(|| EngineError::MissingTarget(format!("{class} {key}")))
        })
    }

    fn object_set(
        &self,
        obj: &NativeHandle<Object>,
        field: &str,
        value: Value,
    ) -> EngineResult<()> {
        self.mutate_object(obj, |object, _| {
            object.fields.insert(field.to_string(), value);
            Ok(())
        })
    }

    fn object_delete(&self, obj: &NativeHandle<Object>) -> EngineResult<()> {
        self.with_state(|state| {
            let (db, class, key) = Self::object_entry(state, obj.raw())?;
            state
                .writable(db)?
                .pending_mut()?
                .remove(&class, key)
                .map(|_| ())
                .ok_or_else(|| EngineError::MissingTarget(format!("{class} {key}")))
        })
    }

    fn object_get_list(
        &self,
        obj: &NativeHandle<Object>,
        field: &str,
    ) -> EngineResult<NativeHandle<List>> {
        let raw = self.with_state(|state| {
            let (db, class, key) = Self::object_entry(state, obj.raw())?;
            if state.snapshot(db)?.object(&class, key).is_none() {
                return Err(EngineError::MissingTarget(format!("{class} {key}")));
            }
            Ok(state.mint(Entry::List {
                db,
                class,
                key,
                field: field.to_string(),
            }))
        })?;
        Ok(self.wrap(raw))
    }

    fn list_size(&self, list: &NativeHandle<List>) -> EngineResult<usize> {
        self.read_list(list, |elements| Ok(elements.len()))
    }

    fn list_get(&self, list: &NativeHandle<List>, index: usize) -> EngineResult<Value> {
        self.read_list(list, |elements| {
            check_index(index, elements.len())?;
            Ok(elements[index].value.clone())
        })
    }

    fn list_insert(
        &self,
        list: &NativeHandle<List>,
        index: usize,
        value: Value,
    ) -> EngineResult<()> {
        self.mutate_list(list, |elements, next_element| {
            check_index(index, elements.len() + 1)?;
            *next_element += 1;
            elements.insert(
                index,
                ListElement {
                    id: *next_element,
                    value,
                },
            );
            Ok(())
        })
    }

    fn list_set(&self, list: &NativeHandle<List>, index: usize, value: Value) -> EngineResult<()> {
        self.mutate_list(list, |elements, _| {
            check_index(index, elements.len())?;
            elements[index].value = value;
            Ok(())
        })
    }

    fn list_erase(&self, list: &NativeHandle<List>, index: usize) -> EngineResult<()> {
        self.mutate_list(list, |elements, _| {
            check_index(index, elements.len())?;
            elements.remove(index);
            Ok(())
        })
    }

    fn list_move(&self, list: &NativeHandle<List>, from: usize, to: usize) -> EngineResult<()> {
        self.mutate_list(list, |elements, _| {
            check_index(from, elements.len())?;
            check_index(to, elements.len())?;
            let element = elements.remove(from);
            elements.insert(to, element);
            Ok(())
        })
    }

    fn query(
        &self,
        db: &NativeHandle<Database>,
        class: &str,
        filter: Filter,
    ) -> EngineResult<NativeHandle<Query>> {
        let raw = self.with_state(|state| {
            state.database(db.raw())?;
            Ok(state.mint(Entry::Query {
                db: db.raw().0,
                class: class.to_string(),
                filter,
            }))
        })?;
        Ok(self.wrap(raw))
    }

    fn query_find_all(&self, query: &NativeHandle<Query>) -> EngineResult<NativeHandle<Results>> {
        let raw = self.with_state(|state| {
            let Entry::Query { db, class, filter } = state.entry(HandleKind::Query, query.raw())?
            else {
                return Err(EngineError::UnknownHandle {
                    kind: HandleKind::Query,
                    raw: query.raw(),
                });
            };
            let entry = Entry::Results {
                db: *db,
                class: class.clone(),
                filter: filter.clone(),
            };
            Ok(state.mint(entry))
        })?;
        Ok(self.wrap(raw))
    }

    fn results_size(&self, results: &NativeHandle<Results>) -> EngineResult<usize> {
        self.with_state(|state| {
            let (db, class, filter) = Self::results_entry(state, results.raw())?;
            Ok(state.snapshot(db)?.select(&class, &filter).len())
        })
    }

    fn results_get(
        &self,
        results: &NativeHandle<Results>,
        index: usize,
    ) -> EngineResult<NativeHandle<Object>> {
        let raw = self.with_state(|state| {
            let (db, class, filter) = Self::results_entry(state, results.raw())?;
            let keys = state.snapshot(db)?.select(&class, &filter);
            check_index(index, keys.len())?;
            Ok(state.mint(Entry::Object {
                db,
                class,
                key: keys[index],
            }))
        })?;
        Ok(self.wrap(raw))
    }

    fn object_resolve_in(
        &self,
        obj: &NativeHandle<Object>,
        target: &NativeHandle<Database>,
    ) -> EngineResult<Option<NativeHandle<Object>>> {
        let raw = self.with_state(|state| {
            let (db, class, key) = Self::object_entry(state, obj.raw())?;
            Self::check_target(state, db, target.raw())?;
            if state.snapshot(target.raw().0)?.object(&class, key).is_none() {
                return Ok(None);
            }
            Ok(Some(state.mint(Entry::Object {
                db: target.raw().0,
                class,
                key,
            })))
        })?;
        Ok(raw.map(|raw| self.wrap(raw)))
    }

    fn list_resolve_in(
        &self,
        list: &NativeHandle<List>,
        target: &NativeHandle<Database>,
    ) -> EngineResult<Option<NativeHandle<List>>> {
        let raw = self.with_state(|state| {
            let (db, class, key, field) = Self::list_entry(state, list.raw())?;
            Self::check_target(state, db, target.raw())?;
            if state.snapshot(target.raw().0)?.object(&class, key).is_none() {
                return Ok(None);
            }
            Ok(Some(state.mint(Entry::List {
                db: target.raw().0,
                class,
                key,
                field,
            })))
        })?;
        Ok(raw.map(|raw| self.wrap(raw)))
    }

    fn results_resolve_in(
        &self,
        results: &NativeHandle<Results>,
        target: &NativeHandle<Database>,
    ) -> EngineResult<NativeHandle<Results>> {
        let raw = self.with_state(|state| {
            let (db, class, filter) = Self::results_entry(state, results.raw())?;
            Self::check_target(state, db, target.raw())?;
            Ok(state.mint(Entry::Results {
                db: target.raw().0,
                class,
                filter,
            }))
        })?;
        Ok(self.wrap(raw))
    }

    fn object_add_notification_callback(
        &self,
        obj: &NativeHandle<Object>,
        callback: ChangeCallback,
    ) -> EngineResult<NativeHandle<NotificationToken>> {
        let (db, class, key) = self.with_state(|state| Self::object_entry(state, obj.raw()))?;
        self.register(db, Target::Object { class, key }, Callback::Change(callback))
    }

    fn list_add_notification_callback(
        &self,
        list: &NativeHandle<List>,
        callback: ChangeCallback,
    ) -> EngineResult<NativeHandle<NotificationToken>> {
        let (db, class, key, field) = self.with_state(|state| Self::list_entry(state, list.raw()))?;
        self.register(
            db,
            Target::List { class, key, field },
            Callback::Change(callback),
        )
    }

    fn results_add_notification_callback(
        &self,
        results: &NativeHandle<Results>,
        callback: ChangeCallback,
    ) -> EngineResult<NativeHandle<NotificationToken>> {
        let (db, class, filter) =
            self.with_state(|state| Self::results_entry(state, results.raw()))?;
        self.register(db, Target::Results { class, filter }, Callback::Change(callback))
    }

    fn add_database_changed_callback(
        &self,
        db: &NativeHandle<Database>,
        callback: DatabaseChangedCallback,
    ) -> EngineResult<NativeHandle<NotificationToken>> {
        self.register(db.raw().0, Target::Database, Callback::Database(callback))
    }
}

#[cfg(test)]
mod tests;
