use super::*;
use std::sync::mpsc;

const PATH: &str = "memory://tests";

fn open(engine: &MemoryEngine) -> NativeHandle<Database> {
    engine
        .open(PATH, &EngineConfig::default())
        .expect("open should succeed")
}

fn create_dog(engine: &MemoryEngine, db: &NativeHandle<Database>, name: &str) -> ObjectKey {
    engine.begin_write(db).expect("begin_write should succeed");
    let dog = engine.object_create(db, "Dog").expect("create should succeed");
    engine
        .object_set(&dog, "name", Value::from(name))
        .expect("set should succeed");
    engine.commit(db).expect("commit should succeed");
    engine.object_key(&dog).expect("key should be readable")
}

#[test]
fn live_reference_advances_and_frozen_stays() {
    let engine = MemoryEngine::new();
    let live = open(&engine);
    let v0 = engine.version(&live).expect("version");
    let frozen = engine.freeze(&live).expect("freeze should succeed");

    create_dog(&engine, &live, "rex");
    let v1 = engine.version(&live).expect("version");
    assert!(v1 > v0);
    assert_eq!(engine.version(&frozen).expect("version"), v0);
    assert!(engine.is_frozen(&frozen).expect("frozen flag"));

    let other = engine.thaw(&frozen).expect("thaw should succeed");
    assert_eq!(engine.version(&other).expect("version"), v1);
    assert!(!engine.is_frozen(&other).expect("frozen flag"));
}

#[test]
fn refresh_moves_a_stale_live_reference_to_latest() {
    let engine = MemoryEngine::new();
    let writer = open(&engine);
    let reader = open(&engine);
    create_dog(&engine, &writer, "rex");
    assert!(engine.version(&reader).expect("version") < engine.version(&writer).expect("version"));

    let refreshed = engine.refresh(&reader).expect("refresh should succeed");
    assert_eq!(refreshed, engine.version(&writer).expect("version"));

    let frozen = engine.freeze(&reader).expect("freeze");
    assert_eq!(engine.refresh(&frozen), Err(EngineError::NotLive));
}

#[test]
fn writes_require_a_live_writer() {
    let engine = MemoryEngine::new();
    let db = open(&engine);
    let other = open(&engine);
    let frozen = engine.freeze(&db).expect("freeze");

    assert_eq!(engine.begin_write(&frozen), Err(EngineError::FrozenWrite));
    assert!(matches!(
        engine.object_create(&db, "Dog"),
        Err(EngineError::NoWriteTransaction)
    ));

    engine.begin_write(&db).expect("first writer");
    assert_eq!(engine.begin_write(&other), Err(EngineError::WriteInProgress));
    assert!(engine.is_in_transaction(&db));
    engine.rollback(&db).expect("rollback");
    assert!(!engine.is_in_transaction(&db));
    engine.begin_write(&other).expect("writer slot is free after rollback");
}

#[test]
fn rollback_discards_pending_objects() {
    let engine = MemoryEngine::new();
    let db = open(&engine);
    engine.begin_write(&db).expect("begin");
    let dog = engine.object_create(&db, "Dog").expect("create");
    let key = engine.object_key(&dog).expect("key");
    assert!(engine.object_is_valid(&dog));
    engine.rollback(&db).expect("rollback");

    assert!(!engine.object_is_valid(&dog));
    assert!(
        engine
            .object_find(&db, "Dog", key)
            .expect("find should succeed")
            .is_none()
    );
}

#[test]
fn resolve_reports_missing_objects_as_none() {
    let engine = MemoryEngine::new();
    let db = open(&engine);
    let key = create_dog(&engine, &db, "rex");
    let before = engine.freeze(&db).expect("freeze");
    let dog = engine
        .object_find(&before, "Dog", key)
        .expect("find")
        .expect("dog exists at v1");

    engine.begin_write(&db).expect("begin");
    let live_dog = engine
        .object_resolve_in(&dog, &db)
        .expect("resolve")
        .expect("dog exists in the write");
    engine.object_delete(&live_dog).expect("delete");
    engine.commit(&db).expect("commit");

    let after = engine.freeze(&db).expect("freeze");
    assert!(engine.object_resolve_in(&dog, &after).expect("resolve").is_none());
    let again = engine
        .object_resolve_in(&dog, &before)
        .expect("resolve")
        .expect("dog still exists at the frozen version");
    assert_eq!(
        engine.object_get(&again, "name").expect("read"),
        Some(Value::from("rex"))
    );
}

#[test]
fn resolve_across_databases_is_rejected() {
    let engine = MemoryEngine::new();
    let db = open(&engine);
    let elsewhere = engine
        .open("memory://elsewhere", &EngineConfig::default())
        .expect("open second database");
    let key = create_dog(&engine, &db, "rex");
    let dog = engine.object_find(&db, "Dog", key).expect("find").expect("dog");
    assert!(matches!(
        engine.object_resolve_in(&dog, &elsewhere),
        Err(EngineError::WrongDatabase)
    ));
    assert_ne!(
        engine.database_id(&db).expect("id"),
        engine.database_id(&elsewhere).expect("id")
    );
}

#[test]
fn results_follow_their_reference_version() {
    let engine = MemoryEngine::new();
    let db = open(&engine);
    create_dog(&engine, &db, "rex");
    let frozen = engine.freeze(&db).expect("freeze");
    create_dog(&engine, &db, "fido");

    let query = engine.query(&db, "Dog", Filter::All).expect("query");
    let results = engine.query_find_all(&query).expect("find_all");
    assert_eq!(engine.results_size(&results).expect("size"), 2);

    let pinned = engine
        .results_resolve_in(&results, &frozen)
        .expect("results always resolve");
    assert_eq!(engine.results_size(&pinned).expect("size"), 1);

    let only_fido = engine
        .query(&db, "Dog", Filter::eq("name", "fido"))
        .and_then(|q| engine.query_find_all(&q))
        .expect("filtered results");
    let fido = engine.results_get(&only_fido, 0).expect("first match");
    assert_eq!(
        engine.object_get(&fido, "name").expect("read"),
        Some(Value::from("fido"))
    );
    assert!(matches!(
        engine.results_get(&only_fido, 1),
        Err(EngineError::IndexOutOfBounds { index: 1, len: 1 })
    ));
}

#[test]
fn list_mutations_keep_element_order() {
    let engine = MemoryEngine::new();
    let db = open(&engine);
    engine.begin_write(&db).expect("begin");
    let dog = engine.object_create(&db, "Dog").expect("create");
    let toys = engine.object_get_list(&dog, "toys").expect("list");
    for (i, toy) in ["ball", "bone", "rope"].into_iter().enumerate() {
        engine.list_insert(&toys, i, Value::from(toy)).expect("insert");
    }
    engine.list_move(&toys, 2, 0).expect("move");
    engine.list_erase(&toys, 1).expect("erase");
    engine.list_set(&toys, 1, Value::from("stick")).expect("set");
    engine.commit(&db).expect("commit");

    let values: Vec<Value> = (0..engine.list_size(&toys).expect("size"))
        .map(|i| engine.list_get(&toys, i).expect("get"))
        .collect();
    assert_eq!(values, vec![Value::from("rope"), Value::from("stick")]);
    assert!(matches!(
        engine.list_get(&toys, 2),
        Err(EngineError::IndexOutOfBounds { index: 2, len: 2 })
    ));
}

#[test]
fn released_identifiers_are_reused_most_recent_first() {
    let engine = MemoryEngine::new();
    let db = open(&engine);
    let first = engine.freeze(&db).expect("freeze");
    let raw = first.raw();
    drop(first);
    let second = engine.freeze(&db).expect("freeze");
    assert_eq!(second.raw(), raw);
}

#[test]
fn version_limit_bounds_frozen_references() {
    let engine = MemoryEngine::new();
    let config = EngineConfig {
        max_active_versions: Some(1),
        ..EngineConfig::default()
    };
    let db = engine.open(PATH, &config).expect("open");
    let v0 = engine.freeze(&db).expect("first pin");
    let same_version = engine.freeze(&db).expect("same version shares the pin");
    create_dog(&engine, &db, "rex");
    assert_eq!(
        engine.freeze(&db).map(|_| ()),
        Err(EngineError::TooManyVersions { limit: 1 })
    );
    assert_eq!(engine.pinned_versions(PATH), 1);

    drop(v0);
    drop(same_version);
    assert_eq!(engine.pinned_versions(PATH), 0);
    engine.freeze(&db).expect("pin is free again");
}

#[test]
fn dropping_everything_releases_every_handle() {
    let engine = MemoryEngine::new();
    {
        let db = open(&engine);
        let key = create_dog(&engine, &db, "rex");
        let frozen = engine.freeze(&db).expect("freeze");
        let _dog = engine.object_find(&frozen, "Dog", key).expect("find");
        // The frozen reference outlives its own handle while the object
        // minted through it is alive.
        drop(frozen);
        assert_eq!(engine.pinned_versions(PATH), 1);
    }
    assert_eq!(engine.stats().live_handles, 0);
    assert_eq!(engine.pinned_versions(PATH), 0);
}

#[test]
fn read_fault_fails_freeze_thaw_and_resolve() {
    let engine = MemoryEngine::new();
    let db = open(&engine);
    let key = create_dog(&engine, &db, "rex");
    let dog = engine.object_find(&db, "Dog", key).expect("find").expect("dog");

    engine.inject_read_fault(PATH, Some("bad page".to_string()));
    let storage = Err(EngineError::Storage("bad page".to_string()));
    assert_eq!(engine.freeze(&db).map(|_| ()), storage);
    assert_eq!(engine.thaw(&db).map(|_| ()), storage);
    assert_eq!(engine.object_resolve_in(&dog, &db).map(|_| ()), storage);

    engine.inject_read_fault(PATH, None);
    engine.freeze(&db).expect("fault cleared");
}

#[test]
fn closed_reference_rejects_calls() {
    let engine = MemoryEngine::new();
    let db = open(&engine);
    engine.close(&db).expect("close");
    assert!(engine.is_closed(&db));
    assert_eq!(engine.version(&db), Err(EngineError::Closed));
    assert_eq!(engine.freeze(&db).map(|_| ()), Err(EngineError::Closed));
}

#[tokio::test]
async fn object_callback_receives_modified_properties_per_commit() {
    let engine = MemoryEngine::new();
    let db = open(&engine);
    let key = create_dog(&engine, &db, "rex");
    let dog = engine.object_find(&db, "Dog", key).expect("find").expect("dog");

    let (tx, rx) = mpsc::channel();
    let token = engine
        .object_add_notification_callback(
            &dog,
            Box::new(move |changes| {
                let _ = tx.send((
                    changes.version(),
                    changes.is_deleted(),
                    changes.modified_properties(),
                ));
            }),
        )
        .expect("register");

    for age in [3, 4] {
        engine.begin_write(&db).expect("begin");
        engine.object_set(&dog, "age", Value::Int(age)).expect("set");
        engine.commit(&db).expect("commit");
    }
    engine.begin_write(&db).expect("begin");
    engine.object_delete(&dog).expect("delete");
    engine.commit(&db).expect("commit");
    create_dog(&engine, &db, "fido");
    engine.flush(PATH).await;

    let seen: Vec<_> = rx.try_iter().collect();
    assert_eq!(
        seen,
        vec![
            (VersionId::new(2, 2), false, vec!["age".to_string()]),
            (VersionId::new(3, 3), false, vec!["age".to_string()]),
            (VersionId::new(4, 4), true, vec![]),
        ]
    );
    drop(token);
    let stats = engine.stats();
    assert_eq!(stats.registrations, 1);
    assert_eq!(stats.unregistrations, 1);
}

#[tokio::test]
async fn database_callback_runs_first_on_an_advanced_reference() {
    let engine = MemoryEngine::new();
    let notifier = open(&engine);
    let writer = open(&engine);

    let (tx, rx) = mpsc::channel();
    let db_tx = tx.clone();
    let _db_token = engine
        .add_database_changed_callback(
            &notifier,
            Box::new(move |version| {
                let _ = db_tx.send(format!("database {version}"));
            }),
        )
        .expect("register database callback");

    let query = engine.query(&notifier, "Dog", Filter::All).expect("query");
    let results = engine.query_find_all(&query).expect("results");
    let _results_token = engine
        .results_add_notification_callback(
            &results,
            Box::new(move |changes| {
                let _ = tx.send(format!(
                    "results {} +{}",
                    changes.version(),
                    changes.num_changes().insertions
                ));
            }),
        )
        .expect("register results callback");

    create_dog(&engine, &writer, "rex");
    engine.flush(PATH).await;

    let seen: Vec<String> = rx.try_iter().collect();
    assert_eq!(seen, vec!["database v1.1", "results v1.1 +1"]);
    assert_eq!(
        engine.version(&notifier).expect("version"),
        VersionId::new(1, 1)
    );
}

#[tokio::test]
async fn registration_catches_up_on_commits_it_missed() {
    let engine = MemoryEngine::new();
    let stale = open(&engine);
    let writer = open(&engine);
    create_dog(&engine, &writer, "rex");
    create_dog(&engine, &writer, "fido");

    let (tx, rx) = mpsc::channel();
    let results = engine
        .query(&stale, "Dog", Filter::All)
        .and_then(|q| engine.query_find_all(&q))
        .expect("results");
    let _token = engine
        .results_add_notification_callback(
            &results,
            Box::new(move |changes| {
                let _ = tx.send(changes.version());
            }),
        )
        .expect("register");
    engine.flush(PATH).await;

    let seen: Vec<VersionId> = rx.try_iter().collect();
    assert_eq!(seen, vec![VersionId::new(1, 1), VersionId::new(2, 2)]);
}

#[tokio::test]
async fn released_token_stops_delivery() {
    let engine = MemoryEngine::new();
    let db = open(&engine);
    let results = engine
        .query(&db, "Dog", Filter::All)
        .and_then(|q| engine.query_find_all(&q))
        .expect("results");
    let (tx, rx) = mpsc::channel();
    let token = engine
        .results_add_notification_callback(
            &results,
            Box::new(move |changes| {
                let _ = tx.send(changes.version());
            }),
        )
        .expect("register");
    engine.unregister_notification_callback(token);

    let writer = open(&engine);
    create_dog(&engine, &writer, "rex");
    engine.flush(PATH).await;

    assert!(rx.try_iter().next().is_none());
    assert_eq!(engine.stats().unregistrations, 1);
}

#[test]
fn frozen_references_cannot_register() {
    let engine = MemoryEngine::new();
    let db = open(&engine);
    let frozen = engine.freeze(&db).expect("freeze");
    let err = engine
        .add_database_changed_callback(&frozen, Box::new(|_| {}))
        .expect_err("frozen references do not advance");
    assert_eq!(err, EngineError::NotLive);
}

#[test]
fn history_keeps_only_versions_still_in_use() {
    let engine = MemoryEngine::new();
    let db = open(&engine);
    create_dog(&engine, &db, "rex");
    assert_eq!(engine.retained_versions(PATH), 1);

    let frozen = engine.freeze(&db).expect("freeze");
    create_dog(&engine, &db, "fido");
    create_dog(&engine, &db, "bo");
    assert_eq!(engine.retained_versions(PATH), 3);
    let dogs = engine
        .query(&frozen, "Dog", Filter::All)
        .and_then(|query| engine.query_find_all(&query))
        .expect("query the pinned version");
    assert_eq!(engine.results_size(&dogs).expect("size"), 1);
    drop(dogs);

    drop(frozen);
    assert_eq!(engine.retained_versions(PATH), 1);
    insta::assert_debug_snapshot!(engine.stats(), @r"
    EngineStats {
        registrations: 0,
        unregistrations: 0,
        deliveries: 0,
        releases: 6,
        live_handles: 1,
    }
    ");
}

#[tokio::test]
async fn history_waits_for_lagging_registrations() {
    let engine = MemoryEngine::new();
    let db = open(&engine);
    let observer = engine.thaw(&db).expect("thaw");
    let (sender, receiver) = mpsc::channel();
    let token = engine
        .add_database_changed_callback(
            &observer,
            Box::new(move |version| {
                let _ = sender.send(version);
            }),
        )
        .expect("register");

    create_dog(&engine, &db, "rex");
    create_dog(&engine, &db, "fido");
    engine.flush(PATH).await;
    let seen: Vec<_> = receiver.try_iter().collect();
    assert_eq!(seen, vec![VersionId::new(1, 1), VersionId::new(2, 2)]);

    engine.unregister_notification_callback(token);
    drop(observer);
    assert_eq!(engine.retained_versions(PATH), 1);
}
