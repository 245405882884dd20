//! Caller-owned subscription handles.
//!
//! Both handle types detach from the shared connection when dropped, so a
//! consumer's lifetime bounds its subscription.

use crate::{
    connection::{ConnCmd, ListenerId},
    error::{LinkError, Result},
    models::{QueryRef, QueryResult},
};
use tokio::sync::{mpsc, watch};

/// Registration of a callback listener.
///
/// Dropping the handle (or calling [`unsubscribe`](Self::unsubscribe))
/// detaches the listener; the query itself is removed from the backend once
/// its last listener is gone.
pub struct SubscriptionHandle {
    listener_id: ListenerId,
    query: QueryRef,
    cmd_tx: mpsc::UnboundedSender<ConnCmd>,
    active: bool,
}

impl SubscriptionHandle {
    pub(crate) fn new(
        listener_id: ListenerId,
        query: QueryRef,
        cmd_tx: mpsc::UnboundedSender<ConnCmd>,
    ) -> Self {
        Self {
            listener_id,
            query,
            cmd_tx,
            active: true,
        }
    }

    /// Process-unique listener id.
    pub fn id(&self) -> u64 {
        self.listener_id
    }

    pub fn query(&self) -> &QueryRef {
        &self.query
    }

    /// `false` once released or after the connection was shut down.
    pub fn is_active(&self) -> bool {
        self.active && !self.cmd_tx.is_closed()
    }

    /// Detach the listener now instead of at drop time.
    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        log::debug!(
            "[detector-link] Releasing listener {} on {}",
            self.listener_id,
            self.query
        );
        // The task may already be gone; nothing left to detach from then.
        let _ = self.cmd_tx.send(ConnCmd::Unsubscribe {
            listener_id: self.listener_id,
        });
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.listener_id)
            .field("query", &self.query)
            .field("active", &self.active)
            .finish()
    }
}

/// Pull-style view of a live query.
///
/// Holds the latest result, starting at [`QueryResult::Absent`]. Every push
/// from the backend replaces it wholesale.
///
/// # Examples
///
/// ```rust,no_run
/// use detector_link::{Connection, QueryRef};
///
/// # async fn example() -> detector_link::Result<()> {
/// let connection = Connection::builder()
///     .base_url("https://happy-otter-123.example.cloud")
///     .build()?;
///
/// let mut tasks = connection.subscribe(QueryRef::new("tasks:get"))?;
/// while let Some(result) = tasks.next().await {
///     println!("tasks: {:?}", result.value());
/// }
/// # Ok(())
/// # }
/// ```
pub struct QuerySubscription {
    handle: SubscriptionHandle,
    rx: watch::Receiver<QueryResult>,
}

impl QuerySubscription {
    pub(crate) fn new(handle: SubscriptionHandle, rx: watch::Receiver<QueryResult>) -> Self {
        Self { handle, rx }
    }

    /// Latest result without waiting.
    pub fn current(&self) -> QueryResult {
        self.rx.borrow().clone()
    }

    /// Wait for the next result.
    ///
    /// Fails with [`LinkError::Cancelled`] once the subscription was closed
    /// or the connection shut down.
    pub async fn changed(&mut self) -> Result<QueryResult> {
        if !self.handle.active {
            return Err(LinkError::Cancelled);
        }
        self.rx.changed().await.map_err(|_| LinkError::Cancelled)?;
        Ok(self.rx.borrow_and_update().clone())
    }

    /// Like [`changed`](Self::changed), but ends the stream with `None`.
    pub async fn next(&mut self) -> Option<QueryResult> {
        self.changed().await.ok()
    }

    pub fn id(&self) -> u64 {
        self.handle.id()
    }

    pub fn query(&self) -> &QueryRef {
        self.handle.query()
    }

    pub fn is_active(&self) -> bool {
        self.handle.is_active()
    }

    /// Stop receiving results. Idempotent.
    pub fn close(&mut self) {
        self.handle.release();
    }
}

impl std::fmt::Debug for QuerySubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuerySubscription")
            .field("handle", &self.handle)
            .field("current", &*self.rx.borrow())
            .finish()
    }
}
