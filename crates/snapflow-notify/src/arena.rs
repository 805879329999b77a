//! Frozen references shared by every stream of a session.
//!
//! Each committed version is frozen at most once. An entry is released as
//! soon as a newer version is interned and nothing outside the arena still
//! holds it, so pinned versions track what consumers actually retain.

use parking_lot::Mutex;
use snapflow_core::{Result, VersionId};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::reference::VersionedRef;
use crate::resolver;

#[derive(Default)]
pub struct VersionArena {
    entries: Mutex<BTreeMap<VersionId, Arc<VersionedRef>>>,
}

impl VersionArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// The frozen reference at `version`, freezing `live` if none is cached.
    ///
    /// `live` must currently read at `version`.
    pub fn frozen_at(&self, version: VersionId, live: &VersionedRef) -> Result<Arc<VersionedRef>> {
        if let Some(frozen) = self.entries.lock().get(&version) {
            return Ok(frozen.clone());
        }
        let frozen = resolver::freeze(live)?;
        let actual = frozen.version()?;
        if actual != version {
            tracing::debug!(%version, %actual, "live reference moved before freeze");
        }
        let (kept, released) = {
            let mut entries = self.entries.lock();
            let kept = entries
                .entry(actual)
                .or_insert_with(|| frozen.clone())
                .clone();
            (kept, Self::sweep(&mut entries))
        };
        // Native releases take the engine lock; never hold ours meanwhile.
        drop(frozen);
        Self::log_released(&released);
        drop(released);
        Ok(kept)
    }

    /// Release every entry older than the newest that only the arena holds.
    pub fn release_unused(&self) -> usize {
        let released = Self::sweep(&mut self.entries.lock());
        Self::log_released(&released);
        released.len()
    }

    /// Versions currently held, oldest first.
    pub fn active(&self) -> Vec<VersionId> {
        self.entries.lock().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Drop every entry. References still held elsewhere stay valid.
    pub fn clear(&self) {
        let entries = std::mem::take(&mut *self.entries.lock());
        drop(entries);
    }

    fn sweep(entries: &mut BTreeMap<VersionId, Arc<VersionedRef>>) -> Vec<Arc<VersionedRef>> {
        let Some(&newest) = entries.keys().next_back() else {
            return Vec::new();
        };
        let stale: Vec<VersionId> = entries
            .iter()
            .filter(|(version, frozen)| **version < newest && Arc::strong_count(frozen) == 1)
            .map(|(version, _)| *version)
            .collect();
        stale
            .into_iter()
            .filter_map(|version| entries.remove(&version))
            .collect()
    }

    fn log_released(released: &[Arc<VersionedRef>]) {
        for frozen in released {
            tracing::trace!(version = ?frozen.version().ok(), "released frozen version");
        }
    }
}

impl fmt::Debug for VersionArena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VersionArena")
            .field("active", &self.active())
            .finish()
    }
}

/// Snapshot of the versions a session is holding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionData {
    /// Version of the session's live reference.
    pub current: VersionId,
    /// Versions pinned by frozen references in the arena, oldest first.
    pub active: Vec<VersionId>,
}

impl fmt::Display for VersionData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let active: Vec<String> = self.active.iter().map(ToString::to_string).collect();
        write!(f, "current={} active=[{}]", self.current, active.join(", "))
    }
}
