//! Subscription behaviour against the in-process mock backend: absent
//! sentinel, wholesale replacement, deduplication, late joiners and release.

use detector_link::{
    mock_backend::MockBackend, FailureKind, QueryRef, QueryResult,
};
use serde_json::json;
use std::sync::{Arc, Mutex};

mod common;
use common::{connect, eventually, next_result, wait_for_listeners, WAIT};

const TASKS: &str = "tasks:get";

#[tokio::test]
async fn test_result_is_absent_until_first_push() {
    let backend = MockBackend::start().await.unwrap();
    let connection = connect(&backend);

    let mut tasks = connection.subscribe(QueryRef::new(TASKS)).unwrap();
    assert!(tasks.current().is_absent());

    let query_id = backend.wait_for_query(TASKS, WAIT).await.unwrap();
    assert!(tasks.current().is_absent());

    backend.push_value(query_id, json!([{"_id": "t1", "text": "Buy milk"}]));
    assert_eq!(
        next_result(&mut tasks).await,
        QueryResult::Ready(json!([{"_id": "t1", "text": "Buy milk"}]))
    );
}

#[tokio::test]
async fn test_each_push_replaces_previous_value() {
    let backend = MockBackend::start().await.unwrap();
    let connection = connect(&backend);
    let mut tasks = connection.subscribe(QueryRef::new(TASKS)).unwrap();
    let query_id = backend.wait_for_query(TASKS, WAIT).await.unwrap();

    backend.push_value(query_id, json!([{"_id": "a", "text": "one"}, {"_id": "b", "text": "two"}]));
    let first = next_result(&mut tasks).await;
    assert_eq!(first.value().and_then(|v| v.as_array()).map(Vec::len), Some(2));

    backend.push_value(query_id, json!([]));
    assert_eq!(next_result(&mut tasks).await, QueryResult::Ready(json!([])));
    assert_eq!(tasks.current(), QueryResult::Ready(json!([])));
}

#[tokio::test]
async fn test_identical_queries_share_one_backend_subscription() {
    let backend = MockBackend::start().await.unwrap();
    let connection = connect(&backend);

    let mut first = connection.subscribe(QueryRef::new(TASKS)).unwrap();
    let query_id = backend.wait_for_query(TASKS, WAIT).await.unwrap();
    let mut second = connection.subscribe(QueryRef::new(TASKS)).unwrap();
    assert!(wait_for_listeners(&connection, TASKS, 2).await);

    backend.push_value(query_id, json!(["shared"]));
    assert_eq!(next_result(&mut first).await, QueryResult::Ready(json!(["shared"])));
    assert_eq!(next_result(&mut second).await, QueryResult::Ready(json!(["shared"])));

    assert_eq!(backend.modify_count(), 1);
    let subscriptions = connection.list_subscriptions().await;
    assert_eq!(subscriptions.len(), 1);
    assert_eq!(subscriptions[0].listeners, 2);
    assert!(subscriptions[0].has_value);
}

#[tokio::test]
async fn test_late_subscriber_sees_latest_value() {
    let backend = MockBackend::start().await.unwrap();
    let connection = connect(&backend);

    let mut early = connection.subscribe(QueryRef::new(TASKS)).unwrap();
    let query_id = backend.wait_for_query(TASKS, WAIT).await.unwrap();
    backend.push_value(query_id, json!(["v1"]));
    next_result(&mut early).await;

    let mut late = connection.subscribe(QueryRef::new(TASKS)).unwrap();
    assert_eq!(next_result(&mut late).await, QueryResult::Ready(json!(["v1"])));
}

#[tokio::test]
async fn test_dropping_last_consumer_removes_query() {
    let backend = MockBackend::start().await.unwrap();
    let connection = connect(&backend);

    let first = connection.subscribe(QueryRef::new(TASKS)).unwrap();
    backend.wait_for_query(TASKS, WAIT).await.unwrap();
    let second = connection.subscribe(QueryRef::new(TASKS)).unwrap();
    assert!(wait_for_listeners(&connection, TASKS, 2).await);

    drop(first);
    assert!(wait_for_listeners(&connection, TASKS, 1).await);
    assert!(backend.query_id(TASKS).is_some());

    drop(second);
    assert!(backend.wait_until_query_removed(TASKS, WAIT).await);
    assert!(eventually(|| backend.modify_count() == 2).await);
    assert!(connection.list_subscriptions().await.is_empty());
}

#[tokio::test]
async fn test_close_is_explicit_release() {
    let backend = MockBackend::start().await.unwrap();
    let connection = connect(&backend);

    let mut tasks = connection.subscribe(QueryRef::new(TASKS)).unwrap();
    backend.wait_for_query(TASKS, WAIT).await.unwrap();

    tasks.close();
    assert!(!tasks.is_active());
    assert!(tasks.next().await.is_none());
    assert!(backend.wait_until_query_removed(TASKS, WAIT).await);
}

#[tokio::test]
async fn test_backend_query_failure_is_delivered() {
    let backend = MockBackend::start().await.unwrap();
    let connection = connect(&backend);
    let mut tasks = connection.subscribe(QueryRef::new(TASKS)).unwrap();
    let query_id = backend.wait_for_query(TASKS, WAIT).await.unwrap();

    backend.push_failure(query_id, "Uncaught Error: table missing");
    let failure = next_result(&mut tasks).await;
    let failure = failure.failure().expect("expected a failure");
    assert_eq!(failure.kind, FailureKind::Query);
    assert_eq!(failure.message, "Uncaught Error: table missing");

    backend.push_value(query_id, json!([]));
    assert_eq!(next_result(&mut tasks).await, QueryResult::Ready(json!([])));
}

#[tokio::test]
async fn test_callbacks_observe_pushes_in_order() {
    let backend = MockBackend::start().await.unwrap();
    let connection = connect(&backend);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let handle = connection
        .on_update(QueryRef::new(TASKS), move |result| {
            sink.lock().unwrap().push(result.clone());
        })
        .unwrap();
    let query_id = backend.wait_for_query(TASKS, WAIT).await.unwrap();

    for n in 1..=3 {
        backend.push_value(query_id, json!(n));
    }
    assert!(eventually(|| seen.lock().unwrap().len() == 3).await);
    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            QueryResult::Ready(json!(1)),
            QueryResult::Ready(json!(2)),
            QueryResult::Ready(json!(3)),
        ]
    );

    handle.unsubscribe();
    assert!(backend.wait_until_query_removed(TASKS, WAIT).await);
}
