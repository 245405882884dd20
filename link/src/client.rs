//! The reactive backend connection and its builder.

use crate::{
    auth::AuthProvider,
    connection::{websocket, Listener, SharedConnection},
    error::{LinkError, Result},
    event_handlers::EventHandlers,
    models::{ConnectionOptions, FunctionKind, QueryRef, QueryResult, SubscriptionInfo},
    query::QueryExecutor,
    subscription::{QuerySubscription, SubscriptionHandle},
    timeouts::LinkTimeouts,
};
use serde_json::Value as JsonValue;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use tokio::sync::watch;

/// Long-lived session with the reactive backend.
///
/// One `Connection` multiplexes every live query of the process over a single
/// sync socket. It is meant to be built once and shared (usually behind an
/// [`Arc`]) with every consumer that needs data; dropping the last reference
/// shuts the socket down.
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
/// let _handle = connection.on_update(QueryRef::new("tasks:get"), |result| {
///     println!("tasks changed: {:?}", result);
/// })?;
///
/// let snapshot = connection.query(&QueryRef::new("tasks:get")).await?;
/// println!("one-shot: {}", snapshot);
/// # Ok(())
/// # }
/// ```
pub struct Connection {
    base_url: String,
    shared: SharedConnection,
    query_executor: QueryExecutor,
    timeouts: LinkTimeouts,
    next_listener_id: AtomicU64,
}

impl Connection {
    /// Create a new builder for configuring the connection
    pub fn builder() -> ConnectionBuilder {
        ConnectionBuilder::new()
    }

    /// Subscribe to `query` and observe its results through a
    /// [`QuerySubscription`].
    ///
    /// The subscription starts at [`QueryResult::Absent`]; it is released when
    /// dropped or [closed](QuerySubscription::close).
    pub fn subscribe(&self, query: QueryRef) -> Result<QuerySubscription> {
        let (tx, rx) = watch::channel(QueryResult::Absent);
        let handle = self.on_update(query, move |result| {
            tx.send_replace(result.clone());
        })?;
        Ok(QuerySubscription::new(handle, rx))
    }

    /// Register `callback` for every result of `query`.
    ///
    /// The callback runs on the connection task, in arrival order, and must
    /// not block. It stays registered until the returned handle is dropped.
    pub fn on_update<F>(&self, query: QueryRef, callback: F) -> Result<SubscriptionHandle>
    where
        F: Fn(&QueryResult) + Send + Sync + 'static,
    {
        query.validate()?;
        let listener_id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);
        let listener: Listener = Arc::new(callback);
        self.shared.subscribe(listener_id, query.clone(), listener)?;
        Ok(SubscriptionHandle::new(
            listener_id,
            query,
            self.shared.command_tx(),
        ))
    }

    /// Run a query once over HTTP.
    pub async fn query(&self, query: &QueryRef) -> Result<JsonValue> {
        self.query_executor.execute(FunctionKind::Query, query).await
    }

    /// Run a mutation over HTTP.
    pub async fn mutation(&self, mutation: &QueryRef) -> Result<JsonValue> {
        self.query_executor
            .execute(FunctionKind::Mutation, mutation)
            .await
    }

    /// Snapshot of the queries currently kept live on the socket.
    pub async fn list_subscriptions(&self) -> Vec<SubscriptionInfo> {
        self.shared.list_subscriptions().await
    }

    pub fn is_connected(&self) -> bool {
        self.shared.is_connected()
    }

    /// Failed reconnection attempts since the last successful connect.
    pub fn reconnect_attempts(&self) -> u32 {
        self.shared.reconnect_attempts()
    }

    /// Close the socket and stop the connection task.
    ///
    /// Live subscriptions end; later `subscribe` calls fail with
    /// [`LinkError::Cancelled`].
    pub async fn disconnect(&self) {
        self.shared.disconnect().await;
    }

    /// Normalized HTTP origin of the backend.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn timeouts(&self) -> &LinkTimeouts {
        &self.timeouts
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("base_url", &self.base_url)
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// Builder for configuring [`Connection`] instances.
pub struct ConnectionBuilder {
    base_url: Option<String>,
    auth: AuthProvider,
    max_retries: u32,
    timeouts: LinkTimeouts,
    connection_options: ConnectionOptions,
    event_handlers: EventHandlers,
}

impl ConnectionBuilder {
    fn new() -> Self {
        Self {
            base_url: None,
            auth: AuthProvider::none(),
            max_retries: 3,
            timeouts: LinkTimeouts::default(),
            connection_options: ConnectionOptions::default(),
            event_handlers: EventHandlers::default(),
        }
    }

    /// Set the deployment URL (`http(s)://` or `ws(s)://`, no path needed)
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Set authentication provider directly
    pub fn auth(mut self, auth: AuthProvider) -> Self {
        self.auth = auth;
        self
    }

    /// Shorthand for `auth(AuthProvider::token(..))`
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.auth = AuthProvider::token(token);
        self
    }

    /// Set maximum number of retries for failed HTTP calls
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn timeouts(mut self, timeouts: LinkTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Set reconnection behaviour of the sync socket
    pub fn connection_options(mut self, options: ConnectionOptions) -> Self {
        self.connection_options = options;
        self
    }

    /// Register lifecycle callbacks
    pub fn event_handlers(mut self, handlers: EventHandlers) -> Self {
        self.event_handlers = handlers;
        self
    }

    /// Build the connection and start its background task.
    ///
    /// Must be called from within a Tokio runtime. Fails only on
    /// configuration problems; the socket itself is dialed in the background.
    pub fn build(self) -> Result<Connection> {
        let raw_url = self
            .base_url
            .ok_or_else(|| LinkError::ConfigurationError("base_url is required".into()))?;
        let url = websocket::parse_base_url(&raw_url)?;
        let base_url = websocket::http_base(&url);
        let ws_url = websocket::resolve_ws_url(&url)?;

        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            LinkError::ConfigurationError(
                "Connection::build must be called from within a Tokio runtime".into(),
            )
        })?;

        let mut client_builder = reqwest::Client::builder()
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(std::time::Duration::from_secs(90));
        if !LinkTimeouts::is_no_timeout(self.timeouts.request_timeout) {
            client_builder = client_builder.timeout(self.timeouts.request_timeout);
        }
        if !LinkTimeouts::is_no_timeout(self.timeouts.connection_timeout) {
            client_builder = client_builder.connect_timeout(self.timeouts.connection_timeout);
        }
        let http_client = client_builder
            .build()
            .map_err(|e| LinkError::ConfigurationError(e.to_string()))?;

        let query_executor = QueryExecutor::new(
            base_url.clone(),
            http_client,
            self.auth.clone(),
            self.max_retries,
        );

        log::info!("[detector-link] Connecting to {}", ws_url);
        let shared = SharedConnection::spawn(
            &runtime,
            ws_url,
            self.auth,
            self.timeouts.clone(),
            self.connection_options,
            self.event_handlers,
        );

        Ok(Connection {
            base_url,
            shared,
            query_executor,
            timeouts: self.timeouts,
            next_listener_id: AtomicU64::new(1),
        })
    }
}
