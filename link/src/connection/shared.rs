//! Shared sync-socket connection.
//!
//! One background task owns the socket for the whole process and multiplexes
//! every subscribed query over it. It handles:
//!
//! - Deduplication of identical queries (one server-side query, many listeners)
//! - Routing of `transition` frames to the listeners of each query
//! - Automatic reconnection with exponential backoff
//! - Re-adding every active query after a reconnect
//! - Connection lifecycle events (`on_connect`, `on_disconnect`, `on_error`)
//! - Keepalive pings

use crate::{
    auth::AuthProvider,
    connection::{
        query_set::{Listener, ListenerId, QuerySet},
        websocket::{
            connect_ws, jitter_keepalive_interval, parse_message, send_auth_and_wait,
            send_client_message, WebSocketStream,
        },
        FAR_FUTURE, MAX_WS_TEXT_MESSAGE_BYTES,
    },
    error::{LinkError, Result},
    event_handlers::{ConnectionError, DisconnectReason, EventHandlers},
    models::{ConnectionOptions, QueryRef, ServerMessage, SubscriptionInfo},
    timeouts::LinkTimeouts,
};
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use std::{
    sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant as TokioInstant;
use tokio_tungstenite::tungstenite::protocol::Message;

// ── Commands ────────────────────────────────────────────────────────────────

/// Commands sent from the public API to the background connection task.
pub(crate) enum ConnCmd {
    Subscribe {
        listener_id: ListenerId,
        query: QueryRef,
        listener: Listener,
    },
    Unsubscribe {
        listener_id: ListenerId,
    },
    ListSubscriptions {
        result_tx: oneshot::Sender<Vec<SubscriptionInfo>>,
    },
    Shutdown {
        done_tx: Option<oneshot::Sender<()>>,
    },
}

// ── SharedConnection (public handle) ────────────────────────────────────────

pub(crate) struct SharedConnection {
    cmd_tx: mpsc::UnboundedSender<ConnCmd>,
    connected: Arc<AtomicBool>,
    reconnect_attempts: Arc<AtomicU32>,
    _task: JoinHandle<()>,
}

impl SharedConnection {
    /// Spawn the connection task on `runtime`.
    ///
    /// Returns immediately; the first dial happens in the background, and
    /// subscriptions registered before it completes are sent once connected.
    pub fn spawn(
        runtime: &Handle,
        ws_url: String,
        auth: AuthProvider,
        timeouts: LinkTimeouts,
        connection_options: ConnectionOptions,
        event_handlers: EventHandlers,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<ConnCmd>();
        let connected = Arc::new(AtomicBool::new(false));
        let reconnect_attempts = Arc::new(AtomicU32::new(0));

        let task = runtime.spawn(connection_task(
            cmd_rx,
            ws_url,
            auth,
            timeouts,
            connection_options,
            event_handlers,
            connected.clone(),
            reconnect_attempts.clone(),
        ));

        Self {
            cmd_tx,
            connected,
            reconnect_attempts,
            _task: task,
        }
    }

    pub fn subscribe(
        &self,
        listener_id: ListenerId,
        query: QueryRef,
        listener: Listener,
    ) -> Result<()> {
        self.cmd_tx
            .send(ConnCmd::Subscribe {
                listener_id,
                query,
                listener,
            })
            .map_err(|_| LinkError::Cancelled)
    }

    pub async fn disconnect(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(ConnCmd::Shutdown {
                done_tx: Some(done_tx),
            })
            .is_ok()
        {
            let _ = done_rx.await;
        }
    }

    pub async fn list_subscriptions(&self) -> Vec<SubscriptionInfo> {
        let (result_tx, result_rx) = oneshot::channel();
        if self.cmd_tx.send(ConnCmd::ListSubscriptions { result_tx }).is_err() {
            return Vec::new();
        }
        result_rx.await.unwrap_or_default()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Failed reconnection attempts since the last successful connect.
    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts.load(Ordering::Relaxed)
    }

    /// Sender used by subscription handles to detach themselves on drop.
    pub(crate) fn command_tx(&self) -> mpsc::UnboundedSender<ConnCmd> {
        self.cmd_tx.clone()
    }
}

impl Drop for SharedConnection {
    fn drop(&mut self) {
        let _ = self.cmd_tx.send(ConnCmd::Shutdown { done_tx: None });
    }
}

// ── Background connection task ──────────────────────────────────────────────

async fn establish_ws(
    ws_url: &str,
    auth: &AuthProvider,
    timeouts: &LinkTimeouts,
    event_handlers: &EventHandlers,
) -> Result<WebSocketStream> {
    log::debug!("[detector-link] Establishing sync connection to {}", ws_url);
    let mut ws_stream = connect_ws(ws_url, timeouts, event_handlers).await?;

    if let Err(e) =
        send_auth_and_wait(&mut ws_stream, auth, timeouts.auth_timeout, event_handlers).await
    {
        let recoverable = !matches!(e, LinkError::AuthenticationError(_));
        event_handlers.emit_error(ConnectionError::new(e.to_string(), recoverable));
        let _ = ws_stream.close(None).await;
        return Err(e);
    }
    if auth.is_authenticated() {
        log::info!("[detector-link] Sync connection authenticated");
    }

    Ok(ws_stream)
}

/// Decode one server frame and apply it. Returns a disconnect reason when
/// the backend asked us to drop the socket.
fn handle_server_text(
    text: &str,
    queries: &mut QuerySet,
    event_handlers: &EventHandlers,
) -> Option<DisconnectReason> {
    event_handlers.emit_receive(text);
    match parse_message(text) {
        Ok(ServerMessage::Transition { modifications }) => {
            let total = modifications.len();
            let applied = queries.apply_transition(modifications);
            log::debug!(
                "[detector-link] Applied transition ({}/{} modifications matched)",
                applied,
                total
            );
            None
        },
        Ok(ServerMessage::FatalError { error }) => {
            log::warn!("[detector-link] Backend reported fatal error: {}", error);
            event_handlers.emit_error(ConnectionError::new(&error, true));
            Some(DisconnectReason::new(format!("Backend fatal error: {}", error)))
        },
        Ok(ServerMessage::AuthSuccess | ServerMessage::AuthError { .. }) => {
            log::debug!("[detector-link] Ignoring late auth verdict");
            None
        },
        Err(e) => {
            log::warn!("[detector-link] Failed to parse sync frame: {}", e);
            None
        },
    }
}

/// Apply a command while no socket is open. Returns `true` on shutdown.
///
/// New listeners are only recorded; the full query set goes out once the
/// next socket is up.
fn apply_offline_command(
    cmd: Option<ConnCmd>,
    queries: &mut QuerySet,
    shutdown_ack: &mut Option<oneshot::Sender<()>>,
) -> bool {
    match cmd {
        Some(ConnCmd::Subscribe {
            listener_id,
            query,
            listener,
        }) => {
            queries.add_listener(listener_id, query, listener);
            false
        },
        Some(ConnCmd::Unsubscribe { listener_id }) => {
            queries.remove_listener(listener_id);
            false
        },
        Some(ConnCmd::ListSubscriptions { result_tx }) => {
            let _ = result_tx.send(queries.snapshot());
            false
        },
        Some(ConnCmd::Shutdown { done_tx }) => {
            *shutdown_ack = done_tx;
            true
        },
        None => true,
    }
}

/// Reason handed to listeners once the connection is given up for good.
fn give_up_reason(connection_options: &ConnectionOptions) -> String {
    match connection_options.max_reconnect_attempts {
        _ if !connection_options.auto_reconnect => {
            "Connection lost and auto-reconnect is disabled".to_string()
        },
        Some(max) => format!("Max reconnection attempts ({}) reached", max),
        None => "Connection lost".to_string(),
    }
}

#[allow(clippy::too_many_arguments)]
async fn connection_task(
    mut cmd_rx: mpsc::UnboundedReceiver<ConnCmd>,
    ws_url: String,
    auth: AuthProvider,
    timeouts: LinkTimeouts,
    connection_options: ConnectionOptions,
    event_handlers: EventHandlers,
    connected: Arc<AtomicBool>,
    reconnect_attempts: Arc<AtomicU32>,
) {
    let mut queries = QuerySet::new();
    let mut ws_stream: Option<WebSocketStream> = None;
    let mut shutdown_requested = false;
    let mut shutdown_ack: Option<oneshot::Sender<()>> = None;
    let mut given_up: Option<String> = None;
    let mut first_attempt = true;

    let keepalive_dur = if timeouts.keepalive_interval.is_zero() {
        FAR_FUTURE
    } else {
        jitter_keepalive_interval(timeouts.keepalive_interval, &ws_url)
    };
    let has_keepalive = !timeouts.keepalive_interval.is_zero();
    let mut idle_deadline = TokioInstant::now() + keepalive_dur;

    let pong_timeout_dur = timeouts.pong_timeout;
    let has_pong_timeout = has_keepalive && !pong_timeout_dur.is_zero();
    let mut awaiting_pong = false;
    let mut pong_deadline = TokioInstant::now() + FAR_FUTURE;

    loop {
        if shutdown_requested {
            if let Some(ref mut ws) = ws_stream {
                let _ = ws.close(None).await;
            }
            let was_connected = connected.swap(false, Ordering::SeqCst);
            if was_connected {
                event_handlers.emit_disconnect(DisconnectReason::new("Client disconnected"));
            }
            log::debug!("[detector-link] Connection task stopped");
            if let Some(tx) = shutdown_ack.take() {
                let _ = tx.send(());
            }
            return;
        }

        if let Some(ref mut ws) = ws_stream {
            let idle_sleep = tokio::time::sleep_until(idle_deadline);
            tokio::pin!(idle_sleep);

            let pong_sleep = tokio::time::sleep_until(pong_deadline);
            tokio::pin!(pong_sleep);

            tokio::select! {
                biased;

                _ = &mut pong_sleep, if has_pong_timeout && awaiting_pong => {
                    log::warn!(
                        "[detector-link] Pong timeout ({:?}), backend unresponsive",
                        pong_timeout_dur,
                    );
                    event_handlers.emit_disconnect(DisconnectReason::new(format!(
                        "Pong timeout ({:?})",
                        pong_timeout_dur,
                    )));
                    connected.store(false, Ordering::SeqCst);
                    awaiting_pong = false;
                    ws_stream = None;
                    continue;
                }

                cmd = cmd_rx.recv() => {
                    let modification = match cmd {
                        Some(ConnCmd::Subscribe { listener_id, query, listener }) => {
                            log::debug!("[detector-link] Listener {} subscribes to {}", listener_id, query);
                            queries.add_listener(listener_id, query, listener)
                        },
                        Some(ConnCmd::Unsubscribe { listener_id }) => {
                            log::debug!("[detector-link] Listener {} unsubscribed", listener_id);
                            queries.remove_listener(listener_id)
                        },
                        Some(ConnCmd::ListSubscriptions { result_tx }) => {
                            let _ = result_tx.send(queries.snapshot());
                            None
                        },
                        Some(ConnCmd::Shutdown { done_tx }) => {
                            shutdown_ack = done_tx;
                            shutdown_requested = true;
                            continue;
                        },
                        None => {
                            shutdown_requested = true;
                            continue;
                        },
                    };

                    if let Some(modification) = modification {
                        let message = queries.next_message(vec![modification]);
                        if let Err(e) = send_client_message(ws, &message, &event_handlers).await {
                            log::warn!("[detector-link] Failed to send query set update: {}", e);
                            event_handlers.emit_error(ConnectionError::new(e.to_string(), true));
                            event_handlers.emit_disconnect(DisconnectReason::new(format!(
                                "Send failed: {}", e
                            )));
                            connected.store(false, Ordering::SeqCst);
                            awaiting_pong = false;
                            ws_stream = None;
                            continue;
                        }
                    }
                }

                _ = &mut idle_sleep, if has_keepalive && !awaiting_pong => {
                    if let Err(e) = ws.send(Message::Ping(Bytes::new())).await {
                        log::warn!("[detector-link] Keepalive ping failed: {}", e);
                        event_handlers.emit_disconnect(DisconnectReason::new(format!(
                            "Keepalive ping failed: {}", e
                        )));
                        connected.store(false, Ordering::SeqCst);
                        awaiting_pong = false;
                        ws_stream = None;
                        continue;
                    }
                    event_handlers.emit_send("[ping]");
                    if has_pong_timeout {
                        awaiting_pong = true;
                        pong_deadline = TokioInstant::now() + pong_timeout_dur;
                    }
                    idle_deadline = TokioInstant::now() + keepalive_dur;
                }

                frame = ws.next() => {
                    idle_deadline = TokioInstant::now() + keepalive_dur;
                    if awaiting_pong {
                        awaiting_pong = false;
                        pong_deadline = TokioInstant::now() + FAR_FUTURE;
                    }

                    let lost = match frame {
                        Some(Ok(Message::Text(text))) => {
                            if text.len() > MAX_WS_TEXT_MESSAGE_BYTES {
                                log::warn!("[detector-link] Text frame too large ({} bytes)", text.len());
                                continue;
                            }
                            handle_server_text(&text, &mut queries, &event_handlers)
                        },
                        Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                            Ok(text) => handle_server_text(text, &mut queries, &event_handlers),
                            Err(_) => {
                                log::warn!("[detector-link] Ignoring non UTF-8 binary frame ({} bytes)", data.len());
                                None
                            },
                        },
                        Some(Ok(Message::Close(frame))) => Some(match frame {
                            Some(f) => DisconnectReason::with_code(f.reason.to_string(), f.code.into()),
                            None => DisconnectReason::new("Backend closed connection"),
                        }),
                        Some(Ok(Message::Ping(payload))) => {
                            let _ = ws.send(Message::Pong(payload)).await;
                            None
                        },
                        Some(Ok(Message::Pong(_))) => {
                            log::debug!("[detector-link] Keepalive: received Pong");
                            None
                        },
                        Some(Ok(Message::Frame(_))) => None,
                        Some(Err(e)) => {
                            let msg = e.to_string();
                            event_handlers.emit_error(ConnectionError::new(&msg, true));
                            Some(DisconnectReason::new(format!("WebSocket error: {}", msg)))
                        },
                        None => Some(DisconnectReason::new("WebSocket stream ended")),
                    };

                    if let Some(reason) = lost {
                        log::info!("[detector-link] Sync connection lost: {}", reason);
                        event_handlers.emit_disconnect(reason);
                        connected.store(false, Ordering::SeqCst);
                        awaiting_pong = false;
                        ws_stream = None;
                        continue;
                    }
                }
            }
        } else if let Some(ref reason) = given_up {
            // ── Gave up: keep serving commands, fail every new listener ─
            match cmd_rx.recv().await {
                Some(ConnCmd::Subscribe {
                    listener_id,
                    query,
                    listener,
                }) => {
                    if queries.add_listener(listener_id, query, listener).is_some() {
                        queries.fail_listener_query(listener_id, reason);
                    }
                },
                Some(ConnCmd::Unsubscribe { listener_id }) => {
                    queries.remove_listener(listener_id);
                },
                Some(ConnCmd::ListSubscriptions { result_tx }) => {
                    let _ = result_tx.send(queries.snapshot());
                },
                Some(ConnCmd::Shutdown { done_tx }) => {
                    shutdown_ack = done_tx;
                    shutdown_requested = true;
                },
                None => shutdown_requested = true,
            }
        } else {
            // ── Not connected: reconnect with backoff or give up ────────
            if !first_attempt {
                let attempt = reconnect_attempts.load(Ordering::SeqCst);
                if !connection_options.allows_attempt(attempt) {
                    let reason = give_up_reason(&connection_options);
                    log::warn!("[detector-link] {}; failing {} queries", reason, queries.len());
                    event_handlers.emit_error(ConnectionError::new(&reason, false));
                    queries.fail_all(&reason);
                    given_up = Some(reason);
                    continue;
                }

                let delay = connection_options.backoff_delay_ms(attempt);
                log::info!(
                    "[detector-link] Attempting reconnection in {}ms (attempt {})",
                    delay,
                    attempt + 1
                );

                let sleep_fut = tokio::time::sleep(Duration::from_millis(delay));
                tokio::pin!(sleep_fut);

                loop {
                    tokio::select! {
                        biased;
                        cmd = cmd_rx.recv() => {
                            if apply_offline_command(cmd, &mut queries, &mut shutdown_ack) {
                                shutdown_requested = true;
                                break;
                            }
                        }
                        _ = &mut sleep_fut => { break; }
                    }
                }

                if shutdown_requested {
                    continue;
                }
                reconnect_attempts.fetch_add(1, Ordering::SeqCst);
            }
            first_attempt = false;

            // Keep serving commands while the dial and handshake are in flight.
            let dial = establish_ws(&ws_url, &auth, &timeouts, &event_handlers);
            tokio::pin!(dial);
            let outcome = loop {
                tokio::select! {
                    biased;
                    cmd = cmd_rx.recv() => {
                        if apply_offline_command(cmd, &mut queries, &mut shutdown_ack) {
                            break None;
                        }
                    }
                    result = &mut dial => break Some(result),
                }
            };
            let Some(outcome) = outcome else {
                log::debug!("[detector-link] Shutdown requested while connecting");
                shutdown_requested = true;
                continue;
            };

            match outcome {
                Ok(mut stream) => {
                    if let Some(message) = queries.restart() {
                        log::info!(
                            "[detector-link] Subscribing {} active quer{} on new connection",
                            queries.len(),
                            if queries.len() == 1 { "y" } else { "ies" }
                        );
                        if let Err(e) =
                            send_client_message(&mut stream, &message, &event_handlers).await
                        {
                            log::warn!("[detector-link] Failed to restore query set: {}", e);
                            event_handlers.emit_error(ConnectionError::new(e.to_string(), true));
                            continue;
                        }
                    }
                    log::info!("[detector-link] Sync connection established");
                    reconnect_attempts.store(0, Ordering::SeqCst);
                    connected.store(true, Ordering::SeqCst);
                    event_handlers.emit_connect();
                    ws_stream = Some(stream);
                    idle_deadline = TokioInstant::now() + keepalive_dur;
                    awaiting_pong = false;
                    pong_deadline = TokioInstant::now() + FAR_FUTURE;
                },
                Err(LinkError::AuthenticationError(message)) => {
                    // A rejected token will not improve by retrying.
                    log::warn!("[detector-link] {}", message);
                    queries.fail_all(&message);
                    given_up = Some(message);
                },
                Err(e) => {
                    log::warn!("[detector-link] Connection attempt failed: {}", e);
                },
            }
        }
    }
}
