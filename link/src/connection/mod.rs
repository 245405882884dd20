//! Sync socket management.
//!
//! This module contains:
//! - [`websocket`]: low-level helpers (URL resolution, dialing, auth handshake,
//!   frame encoding, keepalive jitter)
//! - [`query_set`]: the deduplicated query/listener bookkeeping
//! - [`shared`]: the single background task that owns the socket, routes
//!   results to listeners and reconnects with backoff

pub mod query_set;
pub mod shared;
pub mod websocket;

pub(crate) use query_set::{Listener, ListenerId};
pub(crate) use shared::{ConnCmd, SharedConnection};

/// Maximum accepted text frame size (64 MiB).
pub(crate) const MAX_WS_TEXT_MESSAGE_BYTES: usize = 64 << 20;

/// A duration far enough in the future (~100 years) to act as "never" for
/// deadline calculations without overflowing `Instant::now() + dur`.
pub(crate) const FAR_FUTURE: std::time::Duration =
    std::time::Duration::from_secs(100 * 365 * 24 * 3600);
