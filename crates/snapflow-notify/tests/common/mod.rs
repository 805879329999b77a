#![allow(dead_code)]

use futures::{Stream, StreamExt};
use snapflow_engine::MemoryEngine;
use snapflow_notify::{ObjectEntity, ObjectKey, Session, SessionConfig};
use std::sync::Arc;
use std::time::Duration;

pub fn open(engine: &MemoryEngine, path: &str) -> Session {
    open_with(engine, path, &SessionConfig::default())
}

pub fn open_with(engine: &MemoryEngine, path: &str, config: &SessionConfig) -> Session {
    Session::open(Arc::new(engine.clone()), path, config).expect("session should open")
}

pub fn create_dog(session: &Session, name: &str) -> ObjectKey {
    session
        .write(|txn| {
            let dog = txn.create("Dog")?;
            txn.set(&dog, "name", name)?;
            Ok(dog.key())
        })
        .expect("create should commit")
}

pub fn rename(session: &Session, key: ObjectKey, name: &str) {
    session
        .write(|txn| {
            let dog = txn.find("Dog", key)?.expect("dog should exist");
            txn.set(&dog, "name", name)
        })
        .expect("rename should commit");
}

pub fn delete(session: &Session, key: ObjectKey) {
    session
        .write(|txn| {
            let dog = txn.find("Dog", key)?.expect("dog should exist");
            txn.delete(&dog)
        })
        .expect("delete should commit");
}

pub fn find(session: &Session, key: ObjectKey) -> ObjectEntity {
    session
        .find("Dog", key)
        .expect("find should succeed")
        .expect("dog should exist")
}

/// Next item, failing the test if the stream stalls.
pub async fn next<S: Stream + Unpin>(stream: &mut S) -> Option<S::Item> {
    tokio::time::timeout(Duration::from_secs(5), stream.next())
        .await
        .expect("stream should make progress")
}

/// Whether the stream stays silent for a short while.
pub async fn is_idle<S: Stream + Unpin>(stream: &mut S) -> bool {
    tokio::time::timeout(Duration::from_millis(50), stream.next())
        .await
        .is_err()
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
