//! Connection handling and frame dispatch.
//!
//! One task per WebSocket connection runs a `select!` loop over the
//! socket and the connection's outbound queue, so a stalled peer only
//! ever blocks itself. Inbound frames are dispatched to the hub; the
//! hub pushes outbound frames onto per-connection queues drained here.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use bytes::BytesMut;
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use stagecast_core::{ConnectionId, Hub, HubConfig, RoomError};
use stagecast_protocol::{codec, reject, Frame, PROTOCOL_VERSION};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// The realtime core.
    pub hub: Hub,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let hub_config = HubConfig {
            max_connections: config.limits.max_connections,
            max_rooms_per_connection: config.limits.max_rooms_per_connection,
            outbound_queue_depth: config.limits.outbound_queue_depth,
        };

        Self {
            hub: Hub::with_config(hub_config),
            config,
        }
    }
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to bind or the accept loop
/// fails; both are process-fatal and left to supervision.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(config.clone()));

    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let app = Router::new()
        .route(&config.websocket_path, get(ws_handler))
        .route("/notify/:user", post(notify_handler))
        .route("/health", get(health_handler))
        .with_state(state);

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;

    info!("Stagecast relay listening on {}", addr);
    info!("WebSocket endpoint: ws://{}{}", addr, config.websocket_path);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Live-delivery entry point for the durable notification store: fan a
/// notification out to every connection of one identity. The caller is
/// expected to have written the durable record already; an identity with
/// no live connections simply reports zero deliveries.
async fn notify_handler(
    State(state): State<Arc<AppState>>,
    Path(user): Path<String>,
    Json(payload): Json<serde_json::Value>,
) -> impl IntoResponse {
    let delivered = state.hub.notify(&user, payload);
    metrics::record_notifications(delivered);
    debug!(user = %user, delivered, "Notification fan-out");
    Json(serde_json::json!({ "delivered": delivered }))
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_websocket(socket, state))
}

/// Handle one WebSocket connection for its whole lifetime.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>) {
    let _metrics_guard = ConnectionMetricsGuard::new();
    let (mut sender, mut receiver) = socket.split();

    // Admit the connection; at capacity the connection is refused with a
    // reason code, the designed exhaustion valve.
    let (connection_id, mut outbound) = match state.hub.connect() {
        Ok(pair) => pair,
        Err(e) => {
            warn!(error = %e, "Connection refused");
            metrics::record_error("capacity");
            let refusal = Frame::reject(0, reject::SERVER_FULL, e.to_string());
            if let Ok(data) = codec::encode(&refusal) {
                let _ = sender.send(Message::Binary(data.to_vec())).await;
            }
            return;
        }
    };

    debug!(connection = %connection_id, "WebSocket connected");

    // Hand the client its id; signals are addressed with it.
    let hello = Frame::connected(
        connection_id.as_str(),
        state.config.heartbeat.interval_ms as u32,
    );
    if let Ok(data) = codec::encode(&hello) {
        if sender.send(Message::Binary(data.to_vec())).await.is_err() {
            state.hub.disconnect(&connection_id);
            return;
        }
    }

    let mut read_buffer = BytesMut::with_capacity(4096);
    let idle_timeout = Duration::from_millis(state.config.heartbeat.timeout_ms);
    let mut idle_check =
        tokio::time::interval(Duration::from_millis((idle_timeout.as_millis() as u64 / 4).max(1_000)));
    let mut last_activity = Instant::now();

    'session: loop {
        tokio::select! {
            biased;

            // Drain the connection's outbound queue.
            maybe_frame = outbound.recv() => {
                match maybe_frame {
                    Some(frame) => {
                        match codec::encode(&frame) {
                            Ok(data) => {
                                metrics::record_frame(data.len(), "outbound");
                                if sender.send(Message::Binary(data.to_vec())).await.is_err() {
                                    break 'session;
                                }
                            }
                            Err(e) => {
                                error!(connection = %connection_id, error = %e, "Outbound encode failed");
                                metrics::record_error("encode");
                            }
                        }
                    }
                    // The hub dropped our handle: disconnected server-side
                    // (queue overflow escalation).
                    None => break 'session,
                }
            }

            // Receive from the socket.
            msg = receiver.next() => {
                // Binary and text messages both carry frame bytes and
                // feed the same decode loop.
                let data = match msg {
                    Some(Ok(Message::Binary(data))) => data,
                    Some(Ok(Message::Text(text))) => text.into_bytes(),
                    Some(Ok(Message::Ping(data))) => {
                        last_activity = Instant::now();
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break 'session;
                        }
                        continue 'session;
                    }
                    Some(Ok(Message::Pong(_))) => {
                        last_activity = Instant::now();
                        continue 'session;
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!(connection = %connection_id, "Received close frame");
                        break 'session;
                    }
                    Some(Err(e)) => {
                        warn!(connection = %connection_id, error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break 'session;
                    }
                    None => {
                        debug!(connection = %connection_id, "WebSocket stream ended");
                        break 'session;
                    }
                };

                last_activity = Instant::now();
                let start = Instant::now();
                metrics::record_frame(data.len(), "inbound");
                read_buffer.extend_from_slice(&data);

                loop {
                    match codec::decode_from(&mut read_buffer) {
                        Ok(Some(frame)) => {
                            if let Err(e) =
                                handle_frame(frame, &connection_id, &state, &mut sender).await
                            {
                                debug!(connection = %connection_id, error = %e, "Frame handling ended session");
                                break 'session;
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            // The stream is no longer frame-aligned;
                            // nothing after this can be trusted.
                            warn!(connection = %connection_id, error = %e, "Malformed frame, closing");
                            metrics::record_error("protocol");
                            let frame = Frame::reject(0, reject::INVALID_FRAME, e.to_string());
                            let _ = send_frame(&mut sender, &frame).await;
                            break 'session;
                        }
                    }
                }

                metrics::record_latency(start.elapsed().as_secs_f64());
            }

            // Idle/heartbeat timeout guarantees eventual cleanup of
            // abandoned connections.
            _ = idle_check.tick() => {
                if last_activity.elapsed() > idle_timeout {
                    warn!(connection = %connection_id, "Idle timeout, closing");
                    break 'session;
                }
            }
        }
    }

    // Cascade: leave every room, unbind identity, drop from the live set.
    state.hub.disconnect(&connection_id);
    metrics::set_active_rooms(state.hub.stats().rooms);

    debug!(connection = %connection_id, "WebSocket disconnected");
}

/// Dispatch one decoded frame.
///
/// The returned error means the socket send failed; everything else is
/// handled here, as a rejection to the offender or a silent drop.
async fn handle_frame(
    frame: Frame,
    connection_id: &ConnectionId,
    state: &Arc<AppState>,
    sender: &mut SplitSink<WebSocket, Message>,
) -> Result<()> {
    match frame {
        Frame::Join { id, room } => {
            let response = match state.hub.join_room(connection_id, &room) {
                Ok(count) => {
                    debug!(connection = %connection_id, room = %room, count, "Joined");
                    metrics::set_active_rooms(state.hub.stats().rooms);
                    Frame::ack(id)
                }
                Err(RoomError::InvalidName(reason)) => {
                    metrics::record_rejection();
                    Frame::reject(id, reject::INVALID_ROOM, reason)
                }
                Err(e @ RoomError::LimitReached) => {
                    metrics::record_rejection();
                    Frame::reject(id, reject::ROOM_LIMIT, e.to_string())
                }
            };
            send_frame(sender, &response).await?;
        }

        Frame::Leave { id, room } => {
            let count = state.hub.leave_room(connection_id, &room);
            debug!(connection = %connection_id, room = %room, count, "Left");
            metrics::set_active_rooms(state.hub.stats().rooms);
            send_frame(sender, &Frame::ack(id)).await?;
        }

        Frame::Register { id, user } => {
            let response = match state.hub.bind_identity(connection_id, &user) {
                Ok(()) => Frame::ack(id),
                Err(e) => {
                    warn!(connection = %connection_id, user = %user, "Rebind attempt rejected");
                    metrics::record_rejection();
                    Frame::reject(id, reject::ALREADY_BOUND, e.to_string())
                }
            };
            send_frame(sender, &response).await?;
        }

        Frame::Signal { target, payload } => {
            // Fire-and-forget; a vanished target never errors back.
            state
                .hub
                .relay(connection_id, &ConnectionId::from(target), payload);
            metrics::record_signal();
        }

        Frame::Chat { room, text } => {
            let delivered = state.hub.chat(connection_id, &room, &text);
            metrics::record_fanout(delivered);
            debug!(connection = %connection_id, room = %room, delivered, "Chat fan-out");
        }

        Frame::Ping { timestamp } => {
            send_frame(sender, &Frame::pong(timestamp)).await?;
        }

        Frame::Connect { version } => {
            if let Some(refusal) = negotiate(version) {
                warn!(connection = %connection_id, version, "Unsupported protocol version");
                metrics::record_rejection();
                send_frame(sender, &refusal).await?;
                anyhow::bail!("unsupported protocol version {version}");
            }
            // The server already completed the handshake on accept.
            debug!(connection = %connection_id, version, "Connect frame (already connected)");
        }

        other => {
            warn!(connection = %connection_id, kind = other.kind(), "Unexpected frame");
            metrics::record_rejection();
            let frame = Frame::reject(0, reject::INVALID_FRAME, "unexpected frame");
            send_frame(sender, &frame).await?;
        }
    }

    Ok(())
}

/// Response to a `connect` frame: `None` when the client's version is
/// supported, otherwise the rejection to send before closing.
fn negotiate(version: u8) -> Option<Frame> {
    if version == PROTOCOL_VERSION {
        return None;
    }
    Some(Frame::reject(
        0,
        reject::UNSUPPORTED_VERSION,
        format!("unsupported protocol version {version}"),
    ))
}

/// Encode and send one frame on the socket.
async fn send_frame(sender: &mut SplitSink<WebSocket, Message>, frame: &Frame) -> Result<()> {
    let data = codec::encode(frame)?;
    metrics::record_frame(data.len(), "outbound");
    sender.send(Message::Binary(data.to_vec())).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negotiate_accepts_current_version() {
        assert!(negotiate(PROTOCOL_VERSION).is_none());
    }

    #[test]
    fn test_negotiate_rejects_unknown_version() {
        match negotiate(99) {
            Some(Frame::Reject { id, code, reason }) => {
                assert_eq!(id, 0);
                assert_eq!(code, reject::UNSUPPORTED_VERSION);
                assert!(reason.contains("99"));
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }
}
