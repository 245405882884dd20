//! # detector-link
//!
//! Reactive query client for the Agent Detector backend.
//!
//! A single [`Connection`] keeps one sync socket open to the backend and
//! multiplexes every live query over it. Consumers either pull results from a
//! [`QuerySubscription`] or register a callback with
//! [`Connection::on_update`]; both are released when dropped.
//!
//! ```rust,no_run
//! use detector_link::{Connection, QueryRef, QueryResult};
//!
//! # async fn example() -> detector_link::Result<()> {
//! let connection = Connection::builder()
//!     .base_url("https://happy-otter-123.example.cloud")
//!     .build()?;
//!
//! let mut tasks = connection.subscribe(QueryRef::new("tasks:get"))?;
//! assert!(tasks.current().is_absent());
//!
//! while let Some(result) = tasks.next().await {
//!     match result {
//!         QueryResult::Ready(value) => println!("tasks: {}", value),
//!         QueryResult::Failed(failure) => eprintln!("{}", failure),
//!         QueryResult::Absent => {},
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod client;
mod connection;
pub mod error;
pub mod event_handlers;
#[cfg(feature = "test-util")]
pub mod mock_backend;
pub mod models;
pub mod query;
pub mod subscription;
pub mod timeouts;

pub use auth::AuthProvider;
pub use client::{Connection, ConnectionBuilder};
pub use error::{LinkError, Result};
pub use event_handlers::{ConnectionError, DisconnectReason, EventHandlers};
pub use models::{
    ConnectionOptions, FailureKind, QueryFailure, QueryRef, QueryResult, SubscriptionInfo,
};
pub use query::QueryExecutor;
pub use subscription::{QuerySubscription, SubscriptionHandle};
pub use timeouts::{LinkTimeouts, LinkTimeoutsBuilder};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
