//! Per-database notifier thread.
//!
//! Every commit enqueues a [`Job::Commit`]. The notifier walks each
//! registration forward one version at a time from the last version it
//! delivered, so a callback sees exactly one invocation per commit that
//! touched what it observes, in commit order.
//!
//! Lock order: a registration's progress lock, then the engine state lock.
//! The state lock is never held while a callback runs.

use parking_lot::Mutex;
use snapflow_core::VersionId;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Weak;
use std::thread;
use tokio::sync::{mpsc, oneshot};

use super::Shared;
use super::state::History;
use super::store::{MemoryChanges, Target};
use crate::api::{ChangeCallback, DatabaseChangedCallback, RawChanges};

pub(crate) fn version_at(index: usize) -> VersionId {
    let n = index as u64;
    VersionId::new(n, n)
}

pub(crate) enum Callback {
    Change(ChangeCallback),
    Database(DatabaseChangedCallback),
}

struct Progress {
    callback: Option<Callback>,
}

/// One native callback binding.
pub(crate) struct Registration {
    pub id: u64,
    /// Raw id of the live database handle the callback is bound through.
    pub db: u64,
    pub target: Target,
    /// History index of the last version this registration was diffed to.
    /// Only advanced under the progress lock.
    delivered: AtomicUsize,
    progress: Mutex<Progress>,
}

impl Registration {
    pub fn new(id: u64, db: u64, target: Target, callback: Callback, delivered: usize) -> Self {
        Self {
            id,
            db,
            target,
            delivered: AtomicUsize::new(delivered),
            progress: Mutex::new(Progress {
                callback: Some(callback),
            }),
        }
    }

    pub fn delivered(&self) -> usize {
        self.delivered.load(Ordering::Acquire)
    }

    fn is_database(&self) -> bool {
        matches!(self.target, Target::Database)
    }

    /// Detach the callback. Blocks while it is running on the notifier.
    ///
    /// The caller drops the returned callback after every lock is released.
    pub fn finish(&self) -> Option<Callback> {
        self.progress.lock().callback.take()
    }
}

pub(crate) enum Job {
    Commit { index: usize },
    CatchUp { registration: u64 },
    Barrier(oneshot::Sender<()>),
}

pub(crate) fn spawn(
    name: String,
    path: String,
    shared: Weak<Shared>,
) -> std::io::Result<mpsc::UnboundedSender<Job>> {
    let (jobs, mut queue) = mpsc::unbounded_channel();
    thread::Builder::new().name(name).spawn(move || {
        tracing::debug!(path, "notifier started");
        while let Some(job) = queue.blocking_recv() {
            let Some(shared) = shared.upgrade() else {
                break;
            };
            match job {
                Job::Commit { index } => run_commit(&shared, &path, index),
                Job::CatchUp { registration } => run_catch_up(&shared, &path, registration),
                Job::Barrier(done) => {
                    let _ = done.send(());
                }
            }
        }
        tracing::debug!(path, "notifier stopped");
    })?;
    Ok(jobs)
}

fn run_commit(shared: &Shared, path: &str, index: usize) {
    let Some((history, registrations)) = shared.registrations_of(path) else {
        return;
    };
    tracing::trace!(
        path,
        version = %version_at(index),
        registrations = registrations.len(),
        "processing commit"
    );
    // Database callbacks advance the notifier's own references first.
    let (databases, entities): (Vec<_>, Vec<_>) =
        registrations.into_iter().partition(|r| r.is_database());
    for registration in databases.iter().chain(entities.iter()) {
        deliver(shared, registration, &history, index);
    }
}

fn run_catch_up(shared: &Shared, path: &str, id: u64) {
    let Some((history, registrations)) = shared.registrations_of(path) else {
        return;
    };
    if let Some(registration) = registrations.iter().find(|r| r.id == id) {
        deliver(shared, registration, &history, history.latest());
    }
}

fn deliver(shared: &Shared, registration: &Registration, history: &History, up_to: usize) {
    let up_to = up_to.min(history.latest());
    let mut progress = registration.progress.lock();
    let mut finished = false;
    let mut delivered = 0;

    while registration.delivered() < up_to && progress.callback.is_some() {
        let from = registration.delivered();
        let to = from + 1;
        registration.delivered.store(to, Ordering::Release);
        if !shared.advance_live(registration.db, to) {
            finished = true;
            break;
        }
        let version = version_at(to);
        match progress.callback.as_mut() {
            Some(Callback::Database(callback)) => {
                callback(version);
                delivered += 1;
            }
            Some(Callback::Change(callback)) => {
                let (Some(before), Some(after)) = (history.get(from), history.get(to)) else {
                    tracing::warn!(registration = registration.id, %version, "history trimmed past registration");
                    finished = true;
                    break;
                };
                let Some(changes) =
                    MemoryChanges::between(&registration.target, before, after, version)
                else {
                    continue;
                };
                tracing::trace!(
                    registration = registration.id,
                    %version,
                    deleted = changes.is_deleted(),
                    "delivering change"
                );
                callback(&changes);
                delivered += 1;
                if changes.is_deleted() {
                    finished = true;
                    break;
                }
            }
            None => break,
        }
    }

    let callback = if finished {
        progress.callback.take()
    } else {
        None
    };
    drop(progress);
    drop(callback);
    shared
        .stats
        .deliveries
        .fetch_add(delivered, Ordering::Relaxed);
}
