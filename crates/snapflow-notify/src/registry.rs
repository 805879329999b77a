//! Callback registrations and their tokens.
//!
//! Unregistering is idempotent. A token forgets its native handle the
//! first time it is unregistered, so a second call cannot reach a handle
//! identifier the engine has since reused.

use snapflow_core::{NativeHandle, NotificationToken, Result};
#[cfg(test)]
use snapflow_core::RawHandle;
use snapflow_engine::{ChangeCallback, DatabaseChangedCallback};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::entity::EntityRef;
use crate::reference::VersionedRef;

/// Counts of registrations made and released through one registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub registered: u64,
    pub unregistered: u64,
}

impl RegistryStats {
    pub fn outstanding(&self) -> u64 {
        self.registered - self.unregistered
    }
}

#[derive(Default)]
pub struct NotificationRegistry {
    next_id: AtomicU64,
    registered: AtomicU64,
    unregistered: AtomicU64,
}

impl NotificationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for changes of `entity`, which must be bound to a
    /// live reference.
    pub fn register(
        &self,
        entity: EntityRef<'_>,
        callback: ChangeCallback,
    ) -> Result<RegistrationToken> {
        let reference = entity.reference();
        reference.check_open()?;
        let engine = reference.engine();
        let handle = match entity {
            EntityRef::Object(bound) => {
                engine.object_add_notification_callback(&bound.handle, callback)?
            }
            EntityRef::List(bound) => {
                engine.list_add_notification_callback(&bound.handle, callback)?
            }
            EntityRef::Results(bound) => {
                engine.results_add_notification_callback(&bound.handle, callback)?
            }
        };
        let token = self.issue(handle);
        tracing::debug!(token = token.id, %entity, "registered change callback");
        Ok(token)
    }

    /// Register `callback` for every commit observed through `reference`.
    pub fn register_database(
        &self,
        reference: &VersionedRef,
        callback: DatabaseChangedCallback,
    ) -> Result<RegistrationToken> {
        reference.check_open()?;
        let handle = reference
            .engine()
            .add_database_changed_callback(reference.handle(), callback)?;
        let token = self.issue(handle);
        tracing::debug!(token = token.id, database = %reference.database(), "registered database callback");
        Ok(token)
    }

    /// Release the native registration behind `token`, once.
    ///
    /// Returns whether this call released anything.
    pub fn unregister(&self, token: &mut RegistrationToken) -> bool {
        let Some(handle) = token.handle.take() else {
            tracing::trace!(token = token.id, "token already unregistered");
            return false;
        };
        // Dropping the handle releases it through the engine that minted it.
        drop(handle);
        self.unregistered.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(token = token.id, "unregistered callback");
        true
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            registered: self.registered.load(Ordering::Relaxed),
            unregistered: self.unregistered.load(Ordering::Relaxed),
        }
    }

    fn issue(&self, handle: NativeHandle<NotificationToken>) -> RegistrationToken {
        self.registered.fetch_add(1, Ordering::Relaxed);
        RegistrationToken {
            id: self.next_id.fetch_add(1, Ordering::Relaxed) + 1,
            handle: Some(handle),
        }
    }
}

impl fmt::Debug for NotificationRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationRegistry")
            .field("stats", &self.stats())
            .finish()
    }
}

/// Handle to one registered callback.
///
/// Dropping a token without unregistering still releases the native
/// registration, but is not counted by [`NotificationRegistry::stats`].
#[derive(Debug)]
pub struct RegistrationToken {
    id: u64,
    handle: Option<NativeHandle<NotificationToken>>,
}

impl RegistrationToken {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_registered(&self) -> bool {
        self.handle.is_some()
    }

    #[cfg(test)]
    pub(crate) fn raw(&self) -> Option<RawHandle> {
        self.handle.as_ref().map(NativeHandle::raw)
    }
}
