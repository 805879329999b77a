//! Versioned references.
//!
//! A [`VersionedRef`] owns one database handle and knows whether it is live
//! (follows commits) or frozen (pinned at one version). References are
//! shared through `Arc`; the last holder releases the native handle.

use snapflow_core::{Database, DatabaseId, Error, NativeHandle, Result, VersionId};
use snapflow_engine::{EngineConfig, NativeEngine};
use std::fmt;
use std::sync::Arc;

pub struct VersionedRef {
    engine: Arc<dyn NativeEngine>,
    handle: NativeHandle<Database>,
    database: DatabaseId,
    /// `Some` for frozen references. Never changes after construction.
    frozen_at: Option<VersionId>,
}

impl VersionedRef {
    pub(crate) fn open(
        engine: Arc<dyn NativeEngine>,
        path: &str,
        config: &EngineConfig,
    ) -> Result<Arc<Self>> {
        let handle = engine.open(path, config)?;
        Self::adopt(engine, handle)
    }

    /// Wrap a database handle freshly returned by the engine.
    pub(crate) fn adopt(
        engine: Arc<dyn NativeEngine>,
        handle: NativeHandle<Database>,
    ) -> Result<Arc<Self>> {
        let database = engine.database_id(&handle)?;
        let frozen_at = if engine.is_frozen(&handle)? {
            Some(engine.version(&handle)?)
        } else {
            None
        };
        Ok(Arc::new(Self {
            engine,
            handle,
            database,
            frozen_at,
        }))
    }

    pub fn database(&self) -> DatabaseId {
        self.database
    }

    pub fn is_live(&self) -> bool {
        self.frozen_at.is_none()
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen_at.is_some()
    }

    /// Version this reference reads at.
    ///
    /// Non-decreasing for a live reference; constant for a frozen one.
    pub fn version(&self) -> Result<VersionId> {
        match self.frozen_at {
            Some(version) => Ok(version),
            None => {
                self.check_open()?;
                Ok(self.engine.version(&self.handle)?)
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.engine.is_closed(&self.handle)
    }

    pub(crate) fn check_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::InvalidatedReference(format!(
                "{} reference to {} is closed",
                self.liveness(),
                self.database
            )));
        }
        Ok(())
    }

    pub(crate) fn close(&self) -> Result<()> {
        if self.is_closed() {
            return Ok(());
        }
        Ok(self.engine.close(&self.handle)?)
    }

    pub(crate) fn engine(&self) -> &Arc<dyn NativeEngine> {
        &self.engine
    }

    pub(crate) fn handle(&self) -> &NativeHandle<Database> {
        &self.handle
    }

    fn liveness(&self) -> &'static str {
        if self.is_live() { "live" } else { "frozen" }
    }
}

impl fmt::Debug for VersionedRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = f.debug_struct("VersionedRef");
        out.field("database", &self.database)
            .field("handle", &self.handle.raw());
        match self.frozen_at {
            Some(version) => out.field("frozen_at", &version),
            None => out.field("live", &true),
        };
        out.finish()
    }
}
