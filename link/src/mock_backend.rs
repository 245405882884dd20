//! In-process stand-in for the reactive backend.
//!
//! An axum router on one ephemeral port: the sync protocol on `/api/sync`
//! and the function API on `POST /api/query` and `POST /api/mutation`. Tests
//! drive it explicitly: wait for a query to be subscribed, push values or
//! failures, drop or freeze sockets, reject or stall upgrades.

use crate::{
    error::{LinkError, Result},
    models::{
        ClientMessage, FunctionRequest, FunctionResponse, QuerySetModification, ServerMessage,
        StateModification,
    },
};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::Value as JsonValue;
use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex, MutexGuard,
    },
    time::Duration,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone)]
enum MockCmd {
    Send(ServerMessage),
    CloseAll,
    /// Stop reading and writing on every open socket without closing it.
    Freeze,
}

#[derive(Default)]
struct MockState {
    received: Vec<ClientMessage>,
    /// Live queries by function path, owned by the socket that last restarted
    /// the query set.
    queries: HashMap<String, u32>,
    queries_owner: Option<usize>,
    functions: HashMap<String, FunctionResponse>,
    function_calls: Vec<FunctionRequest>,
}

struct Shared {
    state: Mutex<MockState>,
    required_token: Option<String>,
    upgrade_requests: AtomicUsize,
    accepted: AtomicUsize,
    reject_upgrades: AtomicBool,
    stall_upgrades: AtomicBool,
    cmd_tx: broadcast::Sender<MockCmd>,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

type AppState = Arc<Shared>;

/// Mock backend bound to a localhost port.
pub struct MockBackend {
    addr: SocketAddr,
    shared: Arc<Shared>,
    server_task: JoinHandle<()>,
}

impl MockBackend {
    /// Start an anonymous backend on an ephemeral port.
    pub async fn start() -> Result<Self> {
        Self::spawn(SocketAddr::from(([127, 0, 0, 1], 0)), None).await
    }

    /// Start a backend that only accepts `token`.
    pub async fn start_with_token(token: impl Into<String>) -> Result<Self> {
        Self::spawn(SocketAddr::from(([127, 0, 0, 1], 0)), Some(token.into())).await
    }

    /// Start an anonymous backend on a fixed address.
    pub async fn start_on(addr: SocketAddr) -> Result<Self> {
        Self::spawn(addr, None).await
    }

    async fn spawn(bind_addr: SocketAddr, required_token: Option<String>) -> Result<Self> {
        let listener = TcpListener::bind(bind_addr)
            .await
            .map_err(|e| LinkError::InternalError(format!("Mock backend bind failed: {}", e)))?;
        let addr = listener
            .local_addr()
            .map_err(|e| LinkError::InternalError(e.to_string()))?;
        let (cmd_tx, _) = broadcast::channel(64);
        let shared = Arc::new(Shared {
            state: Mutex::new(MockState::default()),
            required_token,
            upgrade_requests: AtomicUsize::new(0),
            accepted: AtomicUsize::new(0),
            reject_upgrades: AtomicBool::new(false),
            stall_upgrades: AtomicBool::new(false),
            cmd_tx,
        });

        let app = Router::new()
            .route("/api/sync", get(sync_handler))
            .route("/api/query", post(function_handler))
            .route("/api/mutation", post(function_handler))
            .with_state(shared.clone());

        let server_task = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                log::debug!("[mock-backend] Server stopped: {}", e);
            }
        });

        log::debug!("[mock-backend] Listening on {}", addr);
        Ok(Self {
            addr,
            shared,
            server_task,
        })
    }

    /// `http://127.0.0.1:<port>`
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Number of sync sockets accepted so far.
    pub fn connections_accepted(&self) -> usize {
        self.shared.accepted.load(Ordering::SeqCst)
    }

    /// Number of upgrade requests seen on `/api/sync`, accepted or not.
    pub fn upgrade_requests(&self) -> usize {
        self.shared.upgrade_requests.load(Ordering::SeqCst)
    }

    pub async fn wait_for_connections(&self, count: usize, timeout: Duration) -> bool {
        poll_until(timeout, || (self.connections_accepted() >= count).then_some(()))
            .await
            .is_some()
    }

    pub async fn wait_for_upgrade_requests(&self, count: usize, timeout: Duration) -> bool {
        poll_until(timeout, || (self.upgrade_requests() >= count).then_some(()))
            .await
            .is_some()
    }

    /// Wait until the client subscribed to `udf_path`; returns its query id.
    pub async fn wait_for_query(&self, udf_path: &str, timeout: Duration) -> Option<u32> {
        poll_until(timeout, || self.query_id(udf_path)).await
    }

    pub async fn wait_until_query_removed(&self, udf_path: &str, timeout: Duration) -> bool {
        poll_until(timeout, || self.query_id(udf_path).is_none().then_some(()))
            .await
            .is_some()
    }

    pub fn query_id(&self, udf_path: &str) -> Option<u32> {
        self.shared.state().queries.get(udf_path).copied()
    }

    /// Every client frame received so far, across sockets.
    pub fn received(&self) -> Vec<ClientMessage> {
        self.shared.state().received.clone()
    }

    /// Number of `modify_query_set` frames received so far.
    pub fn modify_count(&self) -> usize {
        self.shared
            .state()
            .received
            .iter()
            .filter(|m| matches!(m, ClientMessage::ModifyQuerySet { .. }))
            .count()
    }

    /// Push a new value for `query_id` to every open socket.
    pub fn push_value(&self, query_id: u32, value: JsonValue) {
        self.send(ServerMessage::Transition {
            modifications: vec![StateModification::QueryUpdated { query_id, value }],
        });
    }

    pub fn push_failure(&self, query_id: u32, error_message: impl Into<String>) {
        self.send(ServerMessage::Transition {
            modifications: vec![StateModification::QueryFailed {
                query_id,
                error_message: error_message.into(),
            }],
        });
    }

    pub fn send(&self, message: ServerMessage) {
        let _ = self.shared.cmd_tx.send(MockCmd::Send(message));
    }

    /// Close every open sync socket; new connections are still accepted.
    pub fn drop_connections(&self) {
        let _ = self.shared.cmd_tx.send(MockCmd::CloseAll);
    }

    /// Leave every open sync socket hanging: nothing is read (so pings go
    /// unanswered) and nothing is sent. New connections behave normally.
    pub fn freeze_connections(&self) {
        let _ = self.shared.cmd_tx.send(MockCmd::Freeze);
    }

    /// Answer sync upgrades with `401 Unauthorized`.
    pub fn set_reject_upgrades(&self, reject: bool) {
        self.shared.reject_upgrades.store(reject, Ordering::SeqCst);
    }

    /// Never answer sync upgrades.
    pub fn set_stall_upgrades(&self, stall: bool) {
        self.shared.stall_upgrades.store(stall, Ordering::SeqCst);
    }

    /// Stop accepting connections and close the open ones.
    pub fn stop(&self) {
        self.server_task.abort();
        self.drop_connections();
    }

    /// Answer HTTP calls to `path` with `value`.
    pub fn set_function_value(&self, path: impl Into<String>, value: JsonValue) {
        self.shared.state().functions.insert(
            path.into(),
            FunctionResponse::Success {
                value,
                log_lines: Vec::new(),
            },
        );
    }

    /// Answer HTTP calls to `path` with an error.
    pub fn set_function_error(&self, path: impl Into<String>, message: impl Into<String>) {
        self.shared.state().functions.insert(
            path.into(),
            FunctionResponse::Error {
                error_message: message.into(),
                error_data: None,
                log_lines: Vec::new(),
            },
        );
    }

    /// HTTP function calls received so far.
    pub fn function_calls(&self) -> Vec<FunctionRequest> {
        self.shared.state().function_calls.clone()
    }
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn poll_until<T>(timeout: Duration, mut check: impl FnMut() -> Option<T>) -> Option<T> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Some(found) = check() {
            return Some(found);
        }
        if tokio::time::Instant::now() >= deadline {
            return None;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

// ── Sync socket ─────────────────────────────────────────────────────────────

async fn sync_handler(State(shared): State<AppState>, ws: WebSocketUpgrade) -> Response {
    shared.upgrade_requests.fetch_add(1, Ordering::SeqCst);
    if shared.stall_upgrades.load(Ordering::SeqCst) {
        std::future::pending::<()>().await;
    }
    if shared.reject_upgrades.load(Ordering::SeqCst) {
        return (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
    }
    ws.on_upgrade(move |socket| serve_socket(socket, shared))
}

async fn serve_socket(mut socket: WebSocket, shared: AppState) {
    let mut cmd_rx = shared.cmd_tx.subscribe();
    let socket_id = shared.accepted.fetch_add(1, Ordering::SeqCst) + 1;
    let mut frozen = false;

    loop {
        tokio::select! {
            frame = socket.recv(), if !frozen => {
                let text = match frame {
                    Some(Ok(Message::Text(text))) => text.as_str().to_string(),
                    Some(Ok(Message::Ping(payload))) => {
                        let _ = socket.send(Message::Pong(payload)).await;
                        continue;
                    },
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => continue,
                };
                let Ok(message) = serde_json::from_str::<ClientMessage>(&text) else {
                    log::debug!("[mock-backend] Ignoring unparsable frame: {}", text);
                    continue;
                };
                if let Some(reply) = handle_client_message(&shared, socket_id, message) {
                    let reject = matches!(reply, ServerMessage::AuthError { .. });
                    if send_json(&mut socket, &reply).await.is_err() || reject {
                        let _ = socket.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
            cmd = cmd_rx.recv() => {
                match cmd {
                    Ok(MockCmd::Send(_)) if frozen => {},
                    Ok(MockCmd::Send(message)) => {
                        if send_json(&mut socket, &message).await.is_err() {
                            break;
                        }
                    },
                    Ok(MockCmd::Freeze) => {
                        log::debug!("[mock-backend] Socket {} frozen", socket_id);
                        frozen = true;
                    },
                    Ok(MockCmd::CloseAll) | Err(broadcast::error::RecvError::Closed) => {
                        let _ = socket.send(Message::Close(None)).await;
                        break;
                    },
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                }
            }
        }
    }

    // The client re-adds its queries on the next socket.
    let mut state = shared.state();
    if state.queries_owner == Some(socket_id) {
        state.queries.clear();
        state.queries_owner = None;
    }
}

fn handle_client_message(
    shared: &Shared,
    socket_id: usize,
    message: ClientMessage,
) -> Option<ServerMessage> {
    let mut state = shared.state();
    state.received.push(message.clone());
    match message {
        ClientMessage::Authenticate { token } => match &shared.required_token {
            Some(required) if *required != token => Some(ServerMessage::AuthError {
                message: "Invalid token".to_string(),
            }),
            _ => Some(ServerMessage::AuthSuccess),
        },
        ClientMessage::ModifyQuerySet {
            base_version,
            modifications,
            ..
        } => {
            if base_version == 0 {
                state.queries.clear();
                state.queries_owner = Some(socket_id);
            }
            for modification in modifications {
                match modification {
                    QuerySetModification::Add {
                        query_id, udf_path, ..
                    } => {
                        state.queries.insert(udf_path, query_id);
                    },
                    QuerySetModification::Remove { query_id } => {
                        state.queries.retain(|_, id| *id != query_id);
                    },
                }
            }
            None
        },
    }
}

async fn send_json(socket: &mut WebSocket, message: &ServerMessage) -> Result<()> {
    let payload = serde_json::to_string(message)?;
    socket
        .send(Message::Text(payload.into()))
        .await
        .map_err(|_| LinkError::WebSocketError("Mock backend send failed".to_string()))
}

// ── Function API ────────────────────────────────────────────────────────────

async fn function_handler(
    State(shared): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<FunctionRequest>,
) -> Response {
    if let Some(required) = &shared.required_token {
        let expected = format!("Bearer {}", required);
        let authorization = headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok());
        if authorization != Some(expected.as_str()) {
            return (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
        }
    }

    let response = {
        let mut state = shared.state();
        state.function_calls.push(request.clone());
        state.functions.get(&request.path).cloned().unwrap_or_else(|| {
            FunctionResponse::Error {
                error_message: format!("Could not find function {}", request.path),
                error_data: None,
                log_lines: Vec::new(),
            }
        })
    };
    let status = match response {
        FunctionResponse::Success { .. } => StatusCode::OK,
        FunctionResponse::Error { .. } => StatusCode::BAD_REQUEST,
    };
    (status, Json(response)).into_response()
}
