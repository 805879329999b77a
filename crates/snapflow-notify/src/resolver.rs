//! Freeze, thaw, and resolve.
//!
//! One implementation per entity kind, selected by the [`EntityRef`] tag.
//! A missing entity is `Ok(None)`; only structural problems are errors.

use snapflow_core::{Error, Result};
use std::sync::Arc;

use crate::entity::{BoundList, BoundObject, BoundResults, Entity, EntityRef};
use crate::reference::VersionedRef;

/// Pin `reference`'s current version in a new frozen reference.
///
/// The source reference is unaffected.
pub fn freeze(reference: &VersionedRef) -> Result<Arc<VersionedRef>> {
    reference.check_open()?;
    let engine = reference.engine();
    let handle = engine.freeze(reference.handle())?;
    let frozen = VersionedRef::adopt(engine.clone(), handle)?;
    tracing::trace!(database = %frozen.database(), version = ?frozen.version().ok(), "froze reference");
    Ok(frozen)
}

/// A new live reference to the same database, at its latest version.
///
/// Every call returns an independent reference; callers in different
/// execution contexts never share one.
pub fn thaw(reference: &VersionedRef) -> Result<Arc<VersionedRef>> {
    reference.check_open()?;
    let engine = reference.engine();
    let handle = engine.thaw(reference.handle())?;
    VersionedRef::adopt(engine.clone(), handle)
}

/// The entity equivalent to `entity` under `target`.
pub fn resolve(entity: EntityRef<'_>, target: &Arc<VersionedRef>) -> Result<Option<Entity>> {
    let source = entity.reference();
    source.check_open()?;
    target.check_open()?;
    if source.database() != target.database() {
        return Err(Error::WrongDatabase {
            entity: source.database(),
            target: target.database(),
        });
    }
    let engine = target.engine();
    let db = target.handle();
    let resolved = match entity {
        EntityRef::Object(bound) => engine
            .object_resolve_in(&bound.handle, db)?
            .map(|handle| {
                Entity::Object(BoundObject {
                    handle,
                    reference: target.clone(),
                    class: bound.class.clone(),
                    key: bound.key,
                })
            }),
        EntityRef::List(bound) => engine.list_resolve_in(&bound.handle, db)?.map(|handle| {
            Entity::List(BoundList {
                handle,
                reference: target.clone(),
                class: bound.class.clone(),
                key: bound.key,
                field: bound.field.clone(),
            })
        }),
        EntityRef::Results(bound) => {
            let handle = engine.results_resolve_in(&bound.handle, db)?;
            Some(Entity::Results(BoundResults {
                handle,
                reference: target.clone(),
                class: bound.class.clone(),
                filter: bound.filter.clone(),
            }))
        }
    };
    if resolved.is_none() {
        tracing::trace!(%entity, "entity does not exist at target version");
    }
    Ok(resolved)
}
