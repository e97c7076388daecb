//! services/api/src/web/ws_handler.rs
//!
//! This is the main entry point and control loop for a WebSocket connection.
//! Inbound frames are decoded and handed to the connection's state machine;
//! outbound messages flow through an unbounded channel into a writer task that
//! also sends heartbeat pings.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};
use uuid::Uuid;

use crate::web::{
    connection::Connection,
    protocol::{ClientMessage, ServerMessage},
    state::AppState,
};

/// Interval between heartbeat pings.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// The handler for upgrading HTTP requests to WebSocket connections.
///
/// Socket tasks are tracked on the app state so shutdown can wait for every
/// connection to leave its session.
pub async fn ws_handler(ws: WebSocketUpgrade, State(app_state): State<Arc<AppState>>) -> Response {
    let connections = app_state.connections.clone();
    ws.on_upgrade(move |socket| connections.track_future(handle_socket(socket, app_state)))
}

async fn handle_socket(socket: WebSocket, app_state: Arc<AppState>) {
    let conn_id = Uuid::new_v4();
    info!(conn_id = %conn_id, "WebSocket connected");

    let (mut sink, stream) = socket.split();
    let (outbox, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    // Writer task: forward queued messages to the socket and keep it alive.
    let writer = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        loop {
            tokio::select! {
                queued = rx.recv() => {
                    let Some(msg) = queued else { break };
                    let json = match serde_json::to_string(&msg) {
                        Ok(json) => json,
                        Err(e) => {
                            error!(conn_id = %conn_id, "Failed to serialize server message: {}", e);
                            continue;
                        }
                    };
                    if sink.send(Message::Text(json.into())).await.is_err() {
                        debug!(conn_id = %conn_id, "WebSocket sink closed");
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if sink.send(Message::Ping(Bytes::new())).await.is_err() {
                        debug!(conn_id = %conn_id, "WebSocket sink closed during heartbeat");
                        break;
                    }
                }
            }
        }
    });

    let mut connection = Connection::new(
        conn_id,
        app_state.registry.clone(),
        app_state.gate.clone(),
        outbox,
    );

    pump_frames(stream, &mut connection, &app_state.shutdown).await;

    // Graceful or not, the session sees exactly one leave for this connection.
    connection.close().await;
    drop(connection);
    writer.abort();
    info!(conn_id = %conn_id, "WebSocket disconnected");
}

/// Feeds decoded frames to `connection` until the client goes away or the
/// server starts shutting down.
async fn pump_frames<S>(mut stream: S, connection: &mut Connection, shutdown: &CancellationToken)
where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    let conn_id = connection.id();
    loop {
        let frame = tokio::select! {
            frame = stream.next() => frame,
            _ = shutdown.cancelled() => {
                info!(conn_id = %conn_id, "Server shutting down, closing connection");
                break;
            }
        };
        let Some(result) = frame else { break };
        match result {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(text.as_str()) {
                Ok(msg) => connection.handle(msg).await,
                Err(e) => connection.reject_malformed(&e.to_string()),
            },
            Ok(Message::Close(_)) => {
                info!(conn_id = %conn_id, "Client sent close message.");
                break;
            }
            Ok(Message::Pong(_)) => {
                trace!(conn_id = %conn_id, "Pong received");
            }
            Ok(_) => {}
            Err(e) => {
                debug!(conn_id = %conn_id, error = %e, "WebSocket receive error");
                break;
            }
        }
    }
}
