//! Read-only snapshot of the queries a connection is tracking.

use serde::{Deserialize, Serialize};

/// Snapshot of one deduplicated query on a connection.
///
/// Returned by [`Connection::list_subscriptions`](crate::Connection::list_subscriptions).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionInfo {
    /// Query id on the sync socket.
    pub query_id: u32,
    /// Function path, e.g. `tasks:get`.
    pub udf_path: String,
    /// Number of local subscribers sharing this query.
    pub listeners: usize,
    /// Whether a value (not a failure) has been received.
    pub has_value: bool,
    /// Number of results received so far.
    pub updates: u64,
    pub created_at_ms: u64,
    pub last_update_ms: Option<u64>,
}
