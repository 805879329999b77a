//! One application's view of one database.
//!
//! A session owns a live reference, the arena of frozen versions its
//! streams share, and the registry their callbacks go through. Closing the
//! session (or dropping it) ends every stream it opened.

use snapflow_core::{DatabaseId, ObjectKey, Result, Value, VersionId};
use snapflow_engine::{Filter, NativeEngine};
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

use crate::arena::{VersionArena, VersionData};
use crate::config::{NotifierConfig, SessionConfig};
use crate::entity::{
    BoundObject, BoundResults, ListEntity, ObjectEntity, Observable, ResultsEntity,
};
use crate::reference::VersionedRef;
use crate::registry::{NotificationRegistry, RegistryStats};
use crate::stream::{self, ChangeStream, DatabaseChangeStream, StreamContext};

pub struct Session {
    engine: Arc<dyn NativeEngine>,
    path: String,
    notifier: NotifierConfig,
    live: Arc<VersionedRef>,
    arena: Arc<VersionArena>,
    registry: Arc<NotificationRegistry>,
    closed: watch::Sender<bool>,
}

impl Session {
    pub fn open(engine: Arc<dyn NativeEngine>, path: &str, config: &SessionConfig) -> Result<Self> {
        let live = VersionedRef::open(engine.clone(), path, &config.engine)?;
        tracing::info!(path, database = %live.database(), "session opened");
        let (closed, _) = watch::channel(false);
        Ok(Self {
            engine,
            path: path.to_string(),
            notifier: config.notifier.clone(),
            live,
            arena: Arc::new(VersionArena::new()),
            registry: Arc::new(NotificationRegistry::new()),
            closed,
        })
    }

    pub fn id(&self) -> DatabaseId {
        self.live.database()
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Version of the session's live reference.
    pub fn version(&self) -> Result<VersionId> {
        self.live.version()
    }

    /// The session's live reference.
    pub fn reference(&self) -> &Arc<VersionedRef> {
        &self.live
    }

    /// A frozen reference at the live reference's current version.
    pub fn freeze(&self) -> Result<Arc<VersionedRef>> {
        self.arena.frozen_at(self.live.version()?, &self.live)
    }

    /// Advance the live reference to the latest commit and freeze it there.
    pub fn refresh(&self) -> Result<Arc<VersionedRef>> {
        self.live.check_open()?;
        let version = self.engine.refresh(self.live.handle())?;
        self.arena.frozen_at(version, &self.live)
    }

    pub fn versions(&self) -> Result<VersionData> {
        Ok(VersionData {
            current: self.live.version()?,
            active: self.arena.active(),
        })
    }

    /// Release frozen versions nothing but the session still holds.
    pub fn release_unused_versions(&self) -> usize {
        self.arena.release_unused()
    }

    /// Run `f` in a write transaction on the live reference. Commits when
    /// `f` returns `Ok`, rolls back otherwise.
    pub fn write<R>(&self, f: impl FnOnce(&WriteTransaction<'_>) -> Result<R>) -> Result<R> {
        self.live.check_open()?;
        let db = self.live.handle();
        self.engine.begin_write(db)?;
        let txn = WriteTransaction { session: self };
        match f(&txn) {
            Ok(out) => {
                let version = self.engine.commit(db)?;
                tracing::debug!(database = %self.id(), %version, "write committed");
                Ok(out)
            }
            Err(err) => {
                if let Err(rollback) = self.engine.rollback(db) {
                    tracing::warn!(error = %rollback, "rollback failed");
                }
                Err(err)
            }
        }
    }

    /// The object `key` of `class` at the live version.
    pub fn find(&self, class: &str, key: ObjectKey) -> Result<Option<ObjectEntity>> {
        self.live.check_open()?;
        match self.engine.object_find(self.live.handle(), class, key)? {
            Some(handle) => Ok(Some(ObjectEntity::new(BoundObject::new(
                handle,
                self.live.clone(),
            )?))),
            None => Ok(None),
        }
    }

    /// Objects of `class` matching `filter` at the live version.
    pub fn query(&self, class: &str, filter: Filter) -> Result<ResultsEntity> {
        self.live.check_open()?;
        let query = self
            .engine
            .query(self.live.handle(), class, filter.clone())?;
        let handle = self.engine.query_find_all(&query)?;
        Ok(ResultsEntity::new(BoundResults {
            handle,
            reference: self.live.clone(),
            class: class.to_string(),
            filter,
        }))
    }

    /// `entity` at the live version, `None` if it no longer exists.
    pub fn latest<T: Observable>(&self, entity: &T) -> Result<Option<T>> {
        entity.resolve_in(&self.live)
    }

    /// Stream the changes of `entity`, starting with its state at the
    /// latest version.
    pub fn subscribe<T: Observable>(&self, entity: &T) -> ChangeStream<T> {
        stream::subscribe(entity, self.stream_context())
    }

    /// Stream a frozen reference per commit, starting with the latest
    /// version.
    pub fn changes(&self) -> DatabaseChangeStream {
        stream::database_changes(&self.live, self.stream_context())
    }

    pub fn registry_stats(&self) -> RegistryStats {
        self.registry.stats()
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// End every stream, release the arena, and close the live reference.
    pub fn close(&self) -> Result<()> {
        if self.closed.send_replace(true) {
            return Ok(());
        }
        self.arena.clear();
        self.live.close()?;
        tracing::info!(path = %self.path, "session closed");
        Ok(())
    }

    pub(crate) fn stream_context(&self) -> StreamContext {
        StreamContext {
            database: self.live.database(),
            arena: self.arena.clone(),
            registry: self.registry.clone(),
            config: self.notifier.clone(),
            closed: self.closed.subscribe(),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.closed.send_replace(true);
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("path", &self.path)
            .field("live", &self.live)
            .field("arena", &self.arena)
            .field("registry", &self.registry)
            .finish()
    }
}

/// Mutations inside [`Session::write`].
///
/// Entities passed in must be bound to the session's live reference;
/// entities from a frozen reference fail with `FrozenWrite`.
pub struct WriteTransaction<'a> {
    session: &'a Session,
}

impl WriteTransaction<'_> {
    fn engine(&self) -> &dyn NativeEngine {
        self.session.engine.as_ref()
    }

    pub fn create(&self, class: &str) -> Result<ObjectEntity> {
        let handle = self
            .engine()
            .object_create(self.session.live.handle(), class)?;
        Ok(ObjectEntity::new(BoundObject::new(
            handle,
            self.session.live.clone(),
        )?))
    }

    /// Like [`Session::find`], seeing this transaction's own writes.
    pub fn find(&self, class: &str, key: ObjectKey) -> Result<Option<ObjectEntity>> {
        self.session.find(class, key)
    }

    pub fn set(&self, object: &ObjectEntity, field: &str, value: impl Into<Value>) -> Result<()> {
        let bound = object.bound()?;
        Ok(self.engine().object_set(&bound.handle, field, value.into())?)
    }

    pub fn delete(&self, object: &ObjectEntity) -> Result<()> {
        let bound = object.bound()?;
        Ok(self.engine().object_delete(&bound.handle)?)
    }

    pub fn list(&self, object: &ObjectEntity, field: &str) -> Result<ListEntity> {
        object.list(field)
    }

    pub fn list_insert(&self, list: &ListEntity, index: usize, value: impl Into<Value>) -> Result<()> {
        let bound = list.bound()?;
        Ok(self
            .engine()
            .list_insert(&bound.handle, index, value.into())?)
    }

    pub fn list_push(&self, list: &ListEntity, value: impl Into<Value>) -> Result<()> {
        let len = list.len()?;
        self.list_insert(list, len, value)
    }

    pub fn list_set(&self, list: &ListEntity, index: usize, value: impl Into<Value>) -> Result<()> {
        let bound = list.bound()?;
        Ok(self.engine().list_set(&bound.handle, index, value.into())?)
    }

    pub fn list_remove(&self, list: &ListEntity, index: usize) -> Result<()> {
        let bound = list.bound()?;
        Ok(self.engine().list_erase(&bound.handle, index)?)
    }

    pub fn list_move(&self, list: &ListEntity, from: usize, to: usize) -> Result<()> {
        let bound = list.bound()?;
        Ok(self.engine().list_move(&bound.handle, from, to)?)
    }
}

impl fmt::Debug for WriteTransaction<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteTransaction")
            .field("database", &self.session.id())
            .finish()
    }
}
