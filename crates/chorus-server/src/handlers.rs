//! Connection handlers for Chorus server.
//!
//! Each WebSocket connection is served by one task that owns its
//! [`Session`] and multiplexes inbound frames, queued outbound messages and
//! liveness probes.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use chorus_core::{ConnectionHandle, Outgoing, RoomDirectory, Session, Verdict};
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// The room directory.
    pub directory: Arc<RoomDirectory>,
    /// Server configuration.
    pub config: Config,
    /// Number of open connections.
    connections: AtomicUsize,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            directory: Arc::new(RoomDirectory::with_config(config.limits.directory())),
            config,
            connections: AtomicUsize::new(0),
        }
    }

    /// Number of open connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

/// A reserved connection slot, released on drop.
struct ConnectionSlot(Arc<AppState>);

impl ConnectionSlot {
    fn acquire(state: &Arc<AppState>) -> Option<Self> {
        let max = state.config.limits.max_connections;
        state
            .connections
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < max).then_some(n + 1)
            })
            .ok()
            .map(|_| Self(Arc::clone(state)))
    }
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.0.connections.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Build the HTTP router.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route(&state.config.transport.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(config.clone()));

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    // Bind and serve
    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;

    info!("Chorus server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    axum::serve(listener, app(state)).await?;

    Ok(())
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "ok",
        "rooms": state.directory.snapshot(),
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// WebSocket upgrade handler. Plain requests get a short status line.
async fn ws_handler(
    ws: Option<WebSocketUpgrade>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let Some(ws) = ws else {
        return (StatusCode::OK, "Chorus relay is running").into_response();
    };

    let Some(slot) = ConnectionSlot::acquire(&state) else {
        warn!(
            limit = state.config.limits.max_connections,
            "Connection limit reached, rejecting upgrade"
        );
        metrics::record_error("connection_limit");
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    };

    ws.max_message_size(state.config.limits.max_message_size)
        .on_upgrade(move |socket| handle_websocket(socket, state, slot))
}

/// Handle a WebSocket connection.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>, _slot: ConnectionSlot) {
    // Record connection metrics
    let _metrics_guard = ConnectionMetricsGuard::new();

    let (handle, mut mailbox) = ConnectionHandle::open(state.config.limits.outbound_queue);
    let mut session = Session::new(
        Arc::clone(&state.directory),
        handle,
        state.config.heartbeat.liveness(),
    );
    let connection_id = session.id().clone();

    debug!(
        connection = %connection_id,
        open = state.connection_count(),
        "WebSocket connected"
    );

    // Split the WebSocket
    let (mut sender, mut receiver) = socket.split();

    let interval = state.config.heartbeat.interval();
    let mut heartbeat = tokio::time::interval_at(Instant::now() + interval, interval);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    // Message processing loop
    loop {
        tokio::select! {
            biased;

            // Messages queued by this session or by other members' broadcasts
            outgoing = mailbox.next() => {
                match outgoing {
                    Some(Outgoing::Message(text)) => {
                        metrics::record_message(text.len(), "outbound");
                        if sender.send(Message::Text(text.to_string())).await.is_err() {
                            break;
                        }
                    }
                    Some(Outgoing::Evicted) => {
                        warn!(connection = %connection_id, "Evicted for falling behind");
                        metrics::record_error("evicted");
                        break;
                    }
                    None => break,
                }
            }

            // Liveness probe
            _ = heartbeat.tick() => {
                match session.check_liveness(Instant::now()) {
                    Verdict::Expired => {
                        info!(connection = %connection_id, "Liveness timeout");
                        metrics::record_error("timeout");
                        break;
                    }
                    Verdict::Probe => match session.probe() {
                        Ok(ping) => {
                            if sender.send(Message::Text(ping.to_string())).await.is_err() {
                                debug!(connection = %connection_id, "Probe failed");
                                break;
                            }
                        }
                        Err(e) => error!(connection = %connection_id, error = %e, "Failed to encode probe"),
                    },
                }
            }

            // Receive from WebSocket
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        handle_inbound(&state, &mut session, text.as_bytes());
                    }
                    Some(Ok(Message::Binary(data))) => {
                        handle_inbound(&state, &mut session, &data);
                    }
                    Some(Ok(Message::Ping(data))) => {
                        session.touch();
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        session.touch();
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!(connection = %connection_id, "Received close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(connection = %connection_id, error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break;
                    }
                    None => {
                        debug!(connection = %connection_id, "WebSocket stream ended");
                        break;
                    }
                }
            }
        }
    }

    // Cleanup: implicit leave
    let report = session.close();
    metrics::record_broadcast(&report);
    metrics::set_active_rooms(state.directory.snapshot());

    debug!(connection = %connection_id, "WebSocket disconnected");
}

/// Handle one inbound data frame. Bad frames are logged and dropped.
fn handle_inbound(state: &AppState, session: &mut Session, data: &[u8]) {
    let start = Instant::now();
    metrics::record_message(data.len(), "inbound");

    let room_before = session.room_id().map(str::to_owned);

    match session.receive(data) {
        Ok(report) => metrics::record_broadcast(&report),
        Err(e) => {
            warn!(connection = %session.id(), error = %e, "Discarded message");
            metrics::record_error(e.label());
        }
    }

    if session.room_id() != room_before.as_deref() {
        if session.room_id().is_some() {
            metrics::record_join();
        }
        metrics::set_active_rooms(state.directory.snapshot());
    }

    metrics::record_latency(start.elapsed().as_secs_f64());
}
