//! WebSocket upgrade handler and the per-connection read/write loops.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::time;

use crate::auth::identity::Identity;
use crate::auth::middleware::BearerCredential;
use crate::config::GatewayConfig;
use crate::error::ApiError;
use crate::AppState;

use super::connection::{CloseReason, ConnectionHandle};
use super::dispatcher;
use super::error::GatewayError;
use super::hub::Hub;
use super::outbound::{self, OutboundReceiver};

/// Close codes (4000-range for application-level).
const CLOSE_NORMAL: u16 = 1000;
const CLOSE_REPLACED: u16 = 4001;
const CLOSE_IDLE: u16 = 4002;

type WsSink = SplitSink<WebSocket, Message>;
type WsStream = SplitStream<WebSocket>;

pub fn router() -> Router<AppState> {
    Router::new().route("/ws", get(ws_upgrade))
}

/// The credential is checked before the upgrade; a rejected handshake never
/// gets a socket.
async fn ws_upgrade(
    BearerCredential(token): BearerCredential,
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, ApiError> {
    let identity = state.identity.verify(&token).map_err(|e| {
        tracing::debug!(%e, "websocket handshake rejected");
        ApiError::unauthorized("Invalid or expired access token")
    })?;

    let hub = state.hub.clone();
    Ok(ws
        .max_message_size(state.config.gateway.max_message_size)
        .on_failed_upgrade(|e| tracing::debug!(%e, "websocket upgrade failed"))
        .on_upgrade(move |socket| handle_connection(socket, hub, identity)))
}

/// Drive one authenticated socket from registration to teardown.
pub async fn handle_connection(socket: WebSocket, hub: Arc<Hub>, identity: Identity) {
    let config = hub.config().clone();
    let (ws_tx, ws_rx) = socket.split();
    let (outbound_tx, outbound_rx) = outbound::channel(config.send_queue_capacity);
    let conn = ConnectionHandle::new(&identity, outbound_tx);

    let writer = tokio::spawn(write_loop(conn.clone(), ws_tx, outbound_rx, config));

    hub.connect(&conn).await;
    read_loop(&hub, &conn, ws_rx).await;

    conn.close(CloseReason::Normal);
    if let Err(e) = writer.await {
        tracing::warn!(?e, connection_id = %conn.id(), "write loop aborted");
    }
    hub.disconnect(&conn).await;
    conn.mark_closed();
}

/// Inbound half. Every frame renews the liveness deadline; text frames are
/// dispatched in arrival order.
async fn read_loop(hub: &Arc<Hub>, conn: &ConnectionHandle, mut ws_rx: WsStream) {
    let pong_wait = hub.config().pong_wait;

    loop {
        let next = tokio::select! {
            _ = conn.closed() => break,
            next = time::timeout(pong_wait, ws_rx.next()) => next,
        };

        let msg = match next {
            Err(_elapsed) => {
                tracing::debug!(connection_id = %conn.id(), "read deadline passed");
                conn.close(CloseReason::Idle);
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                tracing::debug!(?e, connection_id = %conn.id(), "ws read error");
                break;
            }
            Ok(Some(Ok(msg))) => msg,
        };

        conn.touch();
        match msg {
            Message::Text(text) => dispatcher::handle_frame(hub, conn, text.as_str()).await,
            Message::Close(_) => break,
            // Pings are answered by the socket itself.
            Message::Ping(_) | Message::Pong(_) => {}
            Message::Binary(_) => {
                tracing::debug!(connection_id = %conn.id(), "ignoring binary frame");
            }
        }
    }
}

/// Outbound half and the only writer on the socket: drains the send queue,
/// pings on a fixed interval and sends the close frame.
async fn write_loop(
    conn: ConnectionHandle,
    mut ws_tx: WsSink,
    mut outbound: OutboundReceiver,
    config: GatewayConfig,
) {
    let mut ping_timer = time::interval(config.ping_interval);
    ping_timer.tick().await; // First tick fires immediately; skip it.

    loop {
        tokio::select! {
            _ = conn.closed() => break,

            frame = outbound.recv() => {
                let Some(frame) = frame else { break };
                if let Err(e) = write(&mut ws_tx, Message::Text(frame), config.write_timeout).await {
                    tracing::debug!(%e, connection_id = %conn.id(), "write failed");
                    conn.close(CloseReason::Transport);
                    break;
                }
            }

            _ = ping_timer.tick() => {
                if conn.idle_for() > config.pong_wait {
                    tracing::debug!(connection_id = %conn.id(), "liveness timeout, closing connection");
                    conn.close(CloseReason::Idle);
                    break;
                }
                if let Err(e) = write(&mut ws_tx, Message::Ping(Default::default()), config.write_timeout).await {
                    tracing::debug!(%e, connection_id = %conn.id(), "ping failed");
                    conn.close(CloseReason::Transport);
                    break;
                }
            }
        }
    }

    outbound.close();
    let frame = match conn.close_reason() {
        Some(CloseReason::Transport) => None,
        Some(CloseReason::Replaced) => Some((CLOSE_REPLACED, "Replaced by a new connection")),
        Some(CloseReason::Idle) => Some((CLOSE_IDLE, "Liveness timeout")),
        Some(CloseReason::Normal) | None => Some((CLOSE_NORMAL, "Closing")),
    };
    if let Some((code, reason)) = frame {
        let _ = time::timeout(config.write_timeout, send_close(&mut ws_tx, code, reason)).await;
    }
}

async fn write(ws_tx: &mut WsSink, msg: Message, deadline: Duration) -> Result<(), GatewayError> {
    match time::timeout(deadline, ws_tx.send(msg)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(GatewayError::Transport(e.to_string())),
        Err(_) => Err(GatewayError::Transport("write deadline exceeded".to_string())),
    }
}

/// Send a WebSocket close frame with a code and reason.
async fn send_close(ws_tx: &mut WsSink, code: u16, reason: &str) -> Result<(), axum::Error> {
    let close_msg = Message::Close(Some(CloseFrame {
        code,
        reason: reason.to_string().into(),
    }));
    ws_tx.send(close_msg).await
}
