//! Change streams.
//!
//! A stream owns a private live reference thawed at subscription. The
//! engine invokes the registered callback on its notifier thread after
//! advancing that reference to the committed version; the callback freezes
//! the version through the session arena and hands it to the consumer over
//! a channel. The consumer resolves the entity into the frozen version, so
//! every event carries a queryable, shareable entity.
//!
//! The callback never blocks. A full bounded channel ends the stream with
//! [`EngineError::DeliveryOverflow`] after the buffered events.

use snapflow_core::{DatabaseId, EngineError, Error, Result};
use snapflow_engine::{ChangeCallback, DatabaseChangedCallback, RawChanges};
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};
use tokio::sync::{mpsc, watch};
use tokio_stream::Stream;

use crate::arena::VersionArena;
use crate::config::NotifierConfig;
use crate::entity::Observable;
use crate::reference::VersionedRef;
use crate::registry::{NotificationRegistry, RegistrationToken};
use crate::resolver;

/// One event of a [`ChangeStream`].
pub enum ChangeEvent<T: Observable> {
    /// State at subscription. Always the first event.
    Initial(T),
    /// State after a commit, with what that commit changed.
    Updated(T, T::Changes),
    /// The entity no longer exists. Always the last event.
    Deleted,
}

impl<T: Observable> ChangeEvent<T> {
    pub fn entity(&self) -> Option<&T> {
        match self {
            Self::Initial(entity) | Self::Updated(entity, _) => Some(entity),
            Self::Deleted => None,
        }
    }

    pub fn changes(&self) -> Option<&T::Changes> {
        match self {
            Self::Updated(_, changes) => Some(changes),
            _ => None,
        }
    }

    pub fn is_deleted(&self) -> bool {
        matches!(self, Self::Deleted)
    }
}

impl<T: Observable + fmt::Debug> fmt::Debug for ChangeEvent<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initial(entity) => f.debug_tuple("Initial").field(entity).finish(),
            Self::Updated(entity, changes) => f
                .debug_tuple("Updated")
                .field(entity)
                .field(changes)
                .finish(),
            Self::Deleted => f.write_str("Deleted"),
        }
    }
}

/// One event of a [`DatabaseChangeStream`].
#[derive(Debug, Clone)]
pub enum DatabaseChange {
    Initial(Arc<VersionedRef>),
    Updated(Arc<VersionedRef>),
}

impl DatabaseChange {
    /// Frozen reference at the version this event describes.
    pub fn reference(&self) -> &Arc<VersionedRef> {
        match self {
            Self::Initial(reference) | Self::Updated(reference) => reference,
        }
    }
}

type BoxStream<I> = Pin<Box<dyn Stream<Item = Result<I>> + Send>>;

/// Ordered change events of one entity. Dropping the stream cancels it.
pub struct ChangeStream<T: Observable> {
    inner: BoxStream<ChangeEvent<T>>,
}

impl<T: Observable> Stream for ChangeStream<T> {
    type Item = Result<ChangeEvent<T>>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl<T: Observable> fmt::Debug for ChangeStream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeStream").finish_non_exhaustive()
    }
}

/// Frozen references to every committed version of a database.
pub struct DatabaseChangeStream {
    inner: BoxStream<DatabaseChange>,
}

impl Stream for DatabaseChangeStream {
    type Item = Result<DatabaseChange>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl fmt::Debug for DatabaseChangeStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseChangeStream")
            .finish_non_exhaustive()
    }
}

/// What a stream borrows from its session.
#[derive(Clone)]
pub(crate) struct StreamContext {
    pub database: DatabaseId,
    pub arena: Arc<VersionArena>,
    pub registry: Arc<NotificationRegistry>,
    pub config: NotifierConfig,
    pub closed: watch::Receiver<bool>,
}

enum Delivery<M> {
    Ready(M),
    Deleted,
    Failed(Error),
}

enum DeliverySender<M> {
    Bounded(mpsc::Sender<M>),
    Unbounded(mpsc::UnboundedSender<M>),
}

enum DeliveryReceiver<M> {
    Bounded(mpsc::Receiver<M>),
    Unbounded(mpsc::UnboundedReceiver<M>),
}

impl<M> DeliveryReceiver<M> {
    async fn recv(&mut self) -> Option<M> {
        match self {
            Self::Bounded(receiver) => receiver.recv().await,
            Self::Unbounded(receiver) => receiver.recv().await,
        }
    }
}

fn channel<M>(capacity: Option<usize>) -> (DeliverySender<M>, DeliveryReceiver<M>) {
    match capacity {
        Some(capacity) => {
            let (sender, receiver) = mpsc::channel(capacity.max(1));
            (
                DeliverySender::Bounded(sender),
                DeliveryReceiver::Bounded(receiver),
            )
        }
        None => {
            let (sender, receiver) = mpsc::unbounded_channel();
            (
                DeliverySender::Unbounded(sender),
                DeliveryReceiver::Unbounded(receiver),
            )
        }
    }
}

enum Refused {
    Full,
    Closed,
}

/// Producer half, owned by the native callback.
struct Sink<M> {
    sender: Option<DeliverySender<Delivery<M>>>,
    overflowed: Arc<AtomicBool>,
}

impl<M> Sink<M> {
    fn is_open(&self) -> bool {
        self.sender.is_some()
    }

    fn push(&mut self, delivery: Delivery<M>) {
        let Some(sender) = &self.sender else {
            return;
        };
        let refused = match sender {
            DeliverySender::Bounded(sender) => sender.try_send(delivery).err().map(|err| match err {
                mpsc::error::TrySendError::Full(_) => Refused::Full,
                mpsc::error::TrySendError::Closed(_) => Refused::Closed,
            }),
            DeliverySender::Unbounded(sender) => sender.send(delivery).err().map(|_| Refused::Closed),
        };
        match refused {
            None => {}
            Some(Refused::Full) => {
                tracing::warn!("delivery channel full, ending stream");
                self.overflowed.store(true, Ordering::Release);
                self.sender = None;
            }
            Some(Refused::Closed) => {
                tracing::trace!("stream consumer gone");
                self.sender = None;
            }
        }
    }

    /// Deliver a terminal failure and stop.
    fn fail(&mut self, err: Error) {
        tracing::warn!(error = %err, "change delivery failed");
        self.push(Delivery::Failed(err));
        self.close();
    }

    /// Stop delivering. The consumer still drains what was sent before.
    fn close(&mut self) {
        self.sender = None;
    }

    /// Close once the owning session has closed. Commits made after that
    /// never reach the consumer.
    fn close_if_session_closed(&mut self, closed: &watch::Receiver<bool>) -> bool {
        if *closed.borrow() {
            tracing::trace!("session closed, dropping delivery");
            self.close();
        }
        !self.is_open()
    }
}

/// Unregisters its token when the stream goes away, before anything else
/// the stream owns is released.
struct Subscription {
    registry: Arc<NotificationRegistry>,
    token: RegistrationToken,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.registry.unregister(&mut self.token);
    }
}

/// Streams share the session arena, which holds one database only.
fn check_database(reference: &VersionedRef, context: &StreamContext) -> Result<()> {
    if reference.database() != context.database {
        return Err(Error::WrongDatabase {
            entity: reference.database(),
            target: context.database,
        });
    }
    Ok(())
}

async fn session_closed(closed: &mut watch::Receiver<bool>) {
    // An error means the session itself is gone.
    let _ = closed.wait_for(|closed| *closed).await;
}

/// A committed version and what changed in it.
type Update<T> = (Arc<VersionedRef>, <T as Observable>::Changes);

// Fields drop in declaration order: the token must go before any handle.
struct Subscribed<T: Observable> {
    subscription: Subscription,
    initial: T,
    anchor: T,
    receiver: DeliveryReceiver<Delivery<Update<T>>>,
}

/// Everything up to the initial event. `None` if the entity no longer
/// exists at the latest version.
fn start<T: Observable>(
    entity: &T,
    context: &StreamContext,
    overflowed: &Arc<AtomicBool>,
) -> Result<Option<Subscribed<T>>> {
    check_database(entity.reference(), context)?;
    let live = resolver::thaw(entity.reference())?;
    let Some(anchor) = entity.resolve_in(&live)? else {
        return Ok(None);
    };
    // No callback is registered through `live` yet, so it stays at this
    // version until the registration below picks it up.
    let frozen = context.arena.frozen_at(live.version()?, &live)?;
    let initial = anchor.resolve_in(&frozen)?.ok_or_else(|| {
        Error::InvalidatedReference("entity vanished from its own snapshot".to_string())
    })?;

    let (sender, receiver) = channel(context.config.channel_capacity);
    let mut sink: Sink<Update<T>> = Sink {
        sender: Some(sender),
        overflowed: overflowed.clone(),
    };
    let arena = context.arena.clone();
    let closed = context.closed.clone();
    let emit_empty = context.config.emit_empty_updates;
    let callback: ChangeCallback = Box::new(move |raw: &dyn RawChanges| {
        if sink.close_if_session_closed(&closed) {
            return;
        }
        if raw.is_deleted() {
            sink.push(Delivery::Deleted);
            return;
        }
        let changes = T::decode(raw);
        if !emit_empty && !T::has_changes(&changes) {
            tracing::trace!(version = %raw.version(), "skipping empty change");
            return;
        }
        match arena.frozen_at(raw.version(), &live) {
            Ok(frozen) => sink.push(Delivery::Ready((frozen, changes))),
            Err(err) => sink.fail(err),
        }
    });
    let token = context.registry.register(anchor.entity(), callback)?;
    Ok(Some(Subscribed {
        subscription: Subscription {
            registry: context.registry.clone(),
            token,
        },
        initial,
        anchor,
        receiver,
    }))
}

pub(crate) fn subscribe<T: Observable>(entity: &T, context: StreamContext) -> ChangeStream<T> {
    let overflowed = Arc::new(AtomicBool::new(false));
    let started = start(entity, &context, &overflowed);
    let mut closed = context.closed;

    let inner = async_stream::stream! {
        let Subscribed { subscription, initial, anchor, mut receiver } = match started {
            Ok(Some(subscribed)) => subscribed,
            Ok(None) => {
                yield Ok(ChangeEvent::Deleted);
                return;
            }
            Err(err) => {
                yield Err(err);
                return;
            }
        };
        let _subscription = subscription;
        yield Ok(ChangeEvent::Initial(initial));

        loop {
            let delivery = tokio::select! {
                biased;
                delivery = receiver.recv() => delivery,
                () = session_closed(&mut closed) => {
                    tracing::debug!("session closed, ending change stream");
                    break;
                }
            };
            let Some(delivery) = delivery else {
                if overflowed.load(Ordering::Acquire) {
                    yield Err(Error::Engine(EngineError::DeliveryOverflow));
                }
                break;
            };
            match delivery {
                Delivery::Ready((frozen, changes)) => match anchor.resolve_in(&frozen) {
                    Ok(Some(entity)) => yield Ok(ChangeEvent::Updated(entity, changes)),
                    Ok(None) => {
                        yield Ok(ChangeEvent::Deleted);
                        break;
                    }
                    Err(err) => {
                        yield Err(err);
                        break;
                    }
                },
                Delivery::Deleted => {
                    yield Ok(ChangeEvent::Deleted);
                    break;
                }
                Delivery::Failed(err) => {
                    yield Err(err);
                    break;
                }
            }
        }
    };
    ChangeStream {
        inner: Box::pin(inner),
    }
}

struct DatabaseSubscribed {
    subscription: Subscription,
    initial: Arc<VersionedRef>,
    receiver: DeliveryReceiver<Delivery<Arc<VersionedRef>>>,
}

fn start_database(
    reference: &VersionedRef,
    context: &StreamContext,
    overflowed: &Arc<AtomicBool>,
) -> Result<DatabaseSubscribed> {
    check_database(reference, context)?;
    let live = resolver::thaw(reference)?;
    let initial = context.arena.frozen_at(live.version()?, &live)?;

    let (sender, receiver) = channel(context.config.channel_capacity);
    let mut sink = Sink {
        sender: Some(sender),
        overflowed: overflowed.clone(),
    };
    let arena = context.arena.clone();
    let closed = context.closed.clone();
    let registered = live.clone();
    let callback: DatabaseChangedCallback = Box::new(move |version| {
        if sink.close_if_session_closed(&closed) {
            return;
        }
        match arena.frozen_at(version, &live) {
            Ok(frozen) => sink.push(Delivery::Ready(frozen)),
            Err(err) => sink.fail(err),
        }
    });
    let token = context.registry.register_database(&registered, callback)?;
    Ok(DatabaseSubscribed {
        subscription: Subscription {
            registry: context.registry.clone(),
            token,
        },
        initial,
        receiver,
    })
}

pub(crate) fn database_changes(
    reference: &VersionedRef,
    context: StreamContext,
) -> DatabaseChangeStream {
    let overflowed = Arc::new(AtomicBool::new(false));
    let started = start_database(reference, &context, &overflowed);
    let mut closed = context.closed;

    let inner = async_stream::stream! {
        let DatabaseSubscribed { subscription, initial, mut receiver } = match started {
            Ok(subscribed) => subscribed,
            Err(err) => {
                yield Err(err);
                return;
            }
        };
        let _subscription = subscription;
        yield Ok(DatabaseChange::Initial(initial));

        loop {
            let delivery = tokio::select! {
                biased;
                delivery = receiver.recv() => delivery,
                () = session_closed(&mut closed) => {
                    tracing::debug!("session closed, ending database stream");
                    break;
                }
            };
            match delivery {
                Some(Delivery::Ready(frozen)) => yield Ok(DatabaseChange::Updated(frozen)),
                Some(Delivery::Failed(err)) => {
                    yield Err(err);
                    break;
                }
                Some(Delivery::Deleted) => break,
                None => {
                    if overflowed.load(Ordering::Acquire) {
                        yield Err(Error::Engine(EngineError::DeliveryOverflow));
                    }
                    break;
                }
            }
        }
    };
    DatabaseChangeStream {
        inner: Box::pin(inner),
    }
}
