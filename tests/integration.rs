//! Integration tests against the in-memory service.

mod common;

use common::{fields, init_tracing};
use docwire::{
    ClientConfig, Database, DocumentLookup, MemoryTransport, Operation, ReadPolicy, SetOptions,
    SnapshotEvent, SnapshotMetadata, SubscriptionState,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_millis(200);

fn test_db() -> (Arc<MemoryTransport>, Database) {
    init_tracing();
    let service = Arc::new(MemoryTransport::new());
    let db = Database::new(common::config("test"), service.clone());
    (service, db)
}

fn expect_snapshot(event: SnapshotEvent) -> docwire::DocumentSnapshot {
    match event {
        SnapshotEvent::Snapshot(snapshot) => snapshot,
        other => panic!("expected Snapshot, got {:?}", other),
    }
}

// --- Point Operations ---

#[test]
fn test_user_document_lifecycle() {
    let (_service, db) = test_db();
    let user = db.doc("/users/42").unwrap();

    user.set(fields(json!({"name": "A"})), SetOptions::default())
        .unwrap();

    let snapshot = user.get(ReadPolicy::default()).unwrap().into_option().unwrap();
    assert_eq!(snapshot.fields(), &fields(json!({"name": "A"})));
    assert_eq!(
        snapshot.metadata(),
        SnapshotMetadata {
            has_pending_writes: false,
            is_from_cache: false,
        }
    );

    user.delete().unwrap();
    assert_eq!(user.get(ReadPolicy::default()).unwrap(), DocumentLookup::Absent);
}

#[test]
fn test_set_replaces_and_merge_unions() {
    let (_service, db) = test_db();
    let doc = db.doc("settings/main").unwrap();

    doc.set(fields(json!({"a": 1, "b": 1})), SetOptions::default())
        .unwrap();
    doc.set(fields(json!({"b": 2, "c": 3})), SetOptions::merge())
        .unwrap();

    let merged = doc.get(ReadPolicy::ServerOnly).unwrap().into_option().unwrap();
    assert_eq!(merged.fields(), &fields(json!({"a": 1, "b": 2, "c": 3})));

    doc.set(fields(json!({"z": true})), SetOptions::default())
        .unwrap();
    let replaced = doc.get(ReadPolicy::ServerOnly).unwrap().into_option().unwrap();
    assert_eq!(replaced.fields(), &fields(json!({"z": true})));
}

#[test]
fn test_update_merges_into_existing() {
    let (_service, db) = test_db();
    let doc = db.doc("users/7").unwrap();

    doc.set(fields(json!({"name": "B", "age": 30})), SetOptions::default())
        .unwrap();
    doc.update(fields(json!({"age": 31}))).unwrap();

    let snapshot = doc.get(ReadPolicy::default()).unwrap().into_option().unwrap();
    assert_eq!(snapshot.get("name"), Some(&json!("B")));
    assert_eq!(snapshot.get("age"), Some(&json!(31)));
}

#[test]
fn test_empty_document_exists() {
    let (_service, db) = test_db();
    let doc = db.doc("markers/x").unwrap();

    doc.set(fields(json!({})), SetOptions::default()).unwrap();

    let lookup = doc.get(ReadPolicy::default()).unwrap();
    assert!(lookup.exists());
    assert!(lookup.snapshot().unwrap().fields().is_empty());
}

#[test]
fn test_read_policy_is_sent_as_given() {
    let (service, db) = test_db();
    let doc = db.doc("users/1").unwrap();

    let lookup = doc.get(ReadPolicy::CacheOnly).unwrap();
    assert_eq!(lookup, DocumentLookup::Absent);
    doc.get(ReadPolicy::ServerOnly).unwrap();

    let policies: Vec<_> = service
        .requests()
        .into_iter()
        .filter(|r| r.operation == Operation::GetDocument)
        .map(|r| r.payload["readPolicy"].clone())
        .collect();
    assert_eq!(policies, vec![json!("cache-only"), json!("server-only")]);
}

#[test]
fn test_typed_data() {
    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Profile {
        name: String,
        tags: Vec<String>,
    }

    let (_service, db) = test_db();
    let doc = db.doc("profiles/p1").unwrap();
    let profile = Profile {
        name: "A".into(),
        tags: vec!["x".into()],
    };

    doc.set_data(&profile, SetOptions::default()).unwrap();

    let snapshot = doc.get(ReadPolicy::default()).unwrap().into_option().unwrap();
    assert_eq!(snapshot.to_typed::<Profile>().unwrap(), profile);
}

#[test]
fn test_requests_carry_instance() {
    let (service, db) = test_db();
    db.doc("users/1").unwrap().delete().unwrap();

    let request = &service.requests()[0];
    assert_eq!(request.payload["instance"], "test");
    assert_eq!(request.payload["path"], "users/1");
}

// --- Navigation & Identity ---

#[test]
fn test_navigation() {
    let (_service, db) = test_db();

    let comment = db.doc("users/42/posts/7").unwrap();
    assert_eq!(comment.id(), "7");

    let posts = comment.parent();
    assert_eq!(posts.path(), "users/42/posts");
    assert_eq!(posts.id(), "posts");

    let user = posts.parent().unwrap();
    assert_eq!(user.path(), "users/42");
    assert!(user.parent().parent().is_none());

    let back = user.collection("posts").unwrap().doc("7").unwrap();
    assert_eq!(back, comment);

    let deep = user.collection("posts/7/comments").unwrap();
    assert_eq!(deep.path(), "users/42/posts/7/comments");
}

#[test]
fn test_reference_equality_and_hash() {
    let (_service, db) = test_db();

    let a = db.doc("users/42").unwrap();
    let b = db.collection("users").unwrap().doc("42").unwrap();
    let c = db.doc("users").err();
    assert!(c.is_some());

    assert_eq!(a, b);
    let set: HashSet<_> = [a.clone(), b.clone()].into_iter().collect();
    assert_eq!(set.len(), 1);

    let other_service = Arc::new(MemoryTransport::new());
    let other = Database::new(
        ClientConfig {
            instance: "other".into(),
            ..Default::default()
        },
        other_service,
    );
    assert_ne!(a, other.doc("users/42").unwrap());
}

// --- Live Snapshots ---

#[test]
fn test_snapshots_follow_writes() {
    let (service, db) = test_db();
    let doc = db.doc("rooms/r1").unwrap();

    let stream = doc.snapshots(false);
    assert_eq!(service.request_count(Operation::SubscribeDocument), 0);

    let listener = stream.listen();
    assert!(matches!(stream.state(), SubscriptionState::Active(_)));

    // initial state: nothing there yet
    assert!(matches!(
        listener.recv_timeout(TIMEOUT).unwrap(),
        SnapshotEvent::Missing { .. }
    ));

    doc.set(fields(json!({"topic": "x"})), SetOptions::default())
        .unwrap();
    let snapshot = expect_snapshot(listener.recv_timeout(TIMEOUT).unwrap());
    assert_eq!(snapshot.get("topic"), Some(&json!("x")));

    doc.delete().unwrap();
    assert!(matches!(
        listener.recv_timeout(TIMEOUT).unwrap(),
        SnapshotEvent::Missing { .. }
    ));
}

#[test]
fn test_detach_unsubscribes_once() {
    let (service, db) = test_db();
    let doc = db.doc("rooms/r2").unwrap();
    let stream = doc.snapshots(true);

    let first = stream.listen();
    let second = stream.listen();
    assert_eq!(service.request_count(Operation::SubscribeDocument), 1);
    assert_eq!(db.active_listeners(), 1);

    let handle = service.active_watches()[0];
    assert_eq!(service.includes_metadata_changes(handle), Some(true));

    drop(first);
    assert_eq!(service.request_count(Operation::Unsubscribe), 0);

    second.cancel();
    assert_eq!(service.request_count(Operation::Unsubscribe), 1);
    assert_eq!(db.active_listeners(), 0);
    assert!(service.active_watches().is_empty());
    assert_eq!(stream.state(), SubscriptionState::Unsubscribed);

    // later writes reach nobody and trigger nothing
    doc.set(fields(json!({"n": 1})), SetOptions::default())
        .unwrap();
    assert_eq!(service.request_count(Operation::Unsubscribe), 1);
}

#[test]
fn test_stream_resubscribes_after_going_idle() {
    let (service, db) = test_db();
    let doc = db.doc("rooms/r3").unwrap();
    let stream = doc.snapshots(false);

    stream.listen().cancel();
    let listener = stream.listen();

    assert_eq!(service.request_count(Operation::SubscribeDocument), 2);
    assert_eq!(service.request_count(Operation::Unsubscribe), 1);
    assert!(matches!(
        listener.recv_timeout(TIMEOUT).unwrap(),
        SnapshotEvent::Missing { .. }
    ));
}

#[test]
fn test_shutdown_unsubscribes_everything() {
    let (service, db) = test_db();
    let a = db.doc("rooms/a").unwrap().snapshots(false).listen();
    let b = db.doc("rooms/b").unwrap().snapshots(false).listen();
    assert_eq!(db.active_listeners(), 2);

    db.shutdown();

    assert!(db.is_shut_down());
    assert_eq!(service.request_count(Operation::Unsubscribe), 2);
    assert!(service.active_watches().is_empty());

    for listener in [&a, &b] {
        let events: Vec<_> = listener.iter().collect();
        assert!(events.last().unwrap().is_terminal());
    }
}
