//! Shared helpers for detector-link integration tests.

#![allow(dead_code)]

use detector_link::{
    mock_backend::MockBackend, Connection, ConnectionOptions, EventHandlers, LinkTimeouts,
    QueryResult, QuerySubscription,
};
use std::time::Duration;
use tokio::time::timeout;

/// Upper bound for anything a test waits on.
pub const WAIT: Duration = Duration::from_secs(5);

/// Reconnect quickly so the suite stays fast.
pub fn fast_options() -> ConnectionOptions {
    ConnectionOptions::new()
        .with_reconnect_delay_ms(20)
        .with_max_reconnect_delay_ms(100)
}

pub fn connect(backend: &MockBackend) -> Connection {
    connect_with(backend, fast_options(), EventHandlers::new())
}

pub fn connect_with(
    backend: &MockBackend,
    options: ConnectionOptions,
    handlers: EventHandlers,
) -> Connection {
    Connection::builder()
        .base_url(backend.base_url())
        .timeouts(LinkTimeouts::fast())
        .connection_options(options)
        .event_handlers(handlers)
        .build()
        .expect("connection should build")
}

/// Next result of `sub`, failing the test if nothing arrives in time.
pub async fn next_result(sub: &mut QuerySubscription) -> QueryResult {
    timeout(WAIT, sub.changed())
        .await
        .expect("timed out waiting for a query result")
        .expect("subscription ended unexpectedly")
}

/// Poll until `path` has `count` listeners on the connection.
pub async fn wait_for_listeners(connection: &Connection, path: &str, count: usize) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        let listeners = connection
            .list_subscriptions()
            .await
            .into_iter()
            .find(|info| info.udf_path == path)
            .map_or(0, |info| info.listeners);
        if listeners == count {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Poll `check` until it holds or the wait budget runs out.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
