//! One-shot query and mutation calls over HTTP.

use detector_link::{mock_backend::MockBackend, Connection, LinkError, QueryRef};
use serde_json::json;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

mod common;
use common::{connect, fast_options};

#[tokio::test]
async fn test_query_returns_backend_value() {
    let backend = MockBackend::start().await.unwrap();
    backend.set_function_value("tasks:get", json!([{"_id": "t1", "text": "Ship it"}]));
    let connection = connect(&backend);

    let value = connection.query(&QueryRef::new("tasks:get")).await.unwrap();
    assert_eq!(value, json!([{"_id": "t1", "text": "Ship it"}]));

    let calls = backend.function_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].path, "tasks:get");
    assert_eq!(calls[0].args, json!({}));
    assert_eq!(calls[0].format, "json");
}

#[tokio::test]
async fn test_mutation_sends_arguments() {
    let backend = MockBackend::start().await.unwrap();
    backend.set_function_value("tasks:create", json!("t2"));
    let connection = connect(&backend);

    let mutation = QueryRef::new("tasks:create").arg("text", json!("Write tests"));
    let value = connection.mutation(&mutation).await.unwrap();
    assert_eq!(value, json!("t2"));
    assert_eq!(backend.function_calls()[0].args, json!({"text": "Write tests"}));
}

#[tokio::test]
async fn test_backend_error_is_query_error() {
    let backend = MockBackend::start().await.unwrap();
    let connection = connect(&backend);

    let err = connection
        .query(&QueryRef::new("tasks:missing"))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        LinkError::QueryError("Could not find function tasks:missing".to_string())
    );
}

#[tokio::test]
async fn test_token_is_sent_as_bearer() {
    let backend = MockBackend::start_with_token("secret").await.unwrap();
    backend.set_function_value("tasks:get", json!([]));

    let anonymous = connect(&backend);
    let err = anonymous
        .query(&QueryRef::new("tasks:get"))
        .await
        .unwrap_err();
    assert!(matches!(err, LinkError::ServerError { status_code: 401, .. }));

    let authorized = Connection::builder()
        .base_url(backend.base_url())
        .token("secret")
        .connection_options(fast_options())
        .build()
        .unwrap();
    assert_eq!(
        authorized.query(&QueryRef::new("tasks:get")).await.unwrap(),
        json!([])
    );
}

/// A localhost address nothing listens on.
fn unused_addr() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap()
}

fn offline_connection(addr: SocketAddr, max_retries: u32) -> Connection {
    Connection::builder()
        .base_url(format!("http://{}", addr))
        .max_retries(max_retries)
        .connection_options(fast_options().with_auto_reconnect(false))
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_connect_error_is_retried_until_backend_is_up() {
    let addr = unused_addr();
    let connection = offline_connection(addr, 3);

    // First attempt is refused; the backend is up before the first retry.
    let starter = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(40)).await;
        let backend = MockBackend::start_on(addr).await.unwrap();
        backend.set_function_value("tasks:get", json!(["late"]));
        backend
    });

    let started = Instant::now();
    let value = connection.query(&QueryRef::new("tasks:get")).await.unwrap();
    assert_eq!(value, json!(["late"]));
    assert!(started.elapsed() >= Duration::from_millis(100));

    let backend = starter.await.unwrap();
    assert_eq!(backend.function_calls().len(), 1);
}

#[tokio::test]
async fn test_connect_error_gives_up_after_max_retries() {
    let connection = offline_connection(unused_addr(), 2);

    let started = Instant::now();
    let err = connection
        .query(&QueryRef::new("tasks:get"))
        .await
        .unwrap_err();
    assert!(matches!(err, LinkError::NetworkError(_)), "got {:?}", err);
    // Two retries back off 100 ms, then 200 ms.
    assert!(started.elapsed() >= Duration::from_millis(300));
}
