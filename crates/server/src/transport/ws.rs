//! Stream transport: a long-lived WebSocket carrying one call per frame.
//!
//! Frames on one connection are handled strictly in order. The next frame is
//! not read until the previous reply has been written, so replies always come
//! back in request order.

use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::ws::{CloseFrame, Message, WebSocket},
    extract::{State, WebSocketUpgrade},
    response::Response,
};
use bytes::Bytes;
use tokio::io::AsyncRead;

use crate::metrics::CallTimer;
use crate::state::AppState;

/// Sent once, right after the upgrade completes.
pub const CONNECTED_FRAME: &str = r#"{"status":"connected"}"#;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Close code sent when the server is shutting down (1001 "going away").
const CLOSE_GOING_AWAY: u16 = 1001;

/// GET /ws-rpc - upgrade and serve calls until the peer goes away.
pub async fn ws_rpc_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| serve_socket(socket, state))
}

/// Frame mode of the inbound message; the reply uses the same one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameMode {
    Text,
    Binary,
}

/// What one read from the socket asks the loop to do.
#[derive(Debug, PartialEq)]
enum Inbound {
    Call(FrameMode, Bytes),
    Ping(Bytes),
    Ignore,
    Closed,
}

impl Inbound {
    fn classify(frame: Option<Result<Message, axum::Error>>) -> Self {
        match frame {
            Some(Ok(Message::Text(text))) => {
                Inbound::Call(FrameMode::Text, Bytes::copy_from_slice(text.as_str().as_bytes()))
            }
            Some(Ok(Message::Binary(data))) => Inbound::Call(FrameMode::Binary, data),
            Some(Ok(Message::Ping(data))) => Inbound::Ping(data),
            Some(Ok(Message::Pong(_))) => Inbound::Ignore,
            Some(Ok(Message::Close(_))) | None => Inbound::Closed,
            Some(Err(e)) => {
                tracing::debug!(error = %e, "stream read failed");
                Inbound::Closed
            }
        }
    }
}

async fn serve_socket(socket: WebSocket, state: Arc<AppState>) {
    let connections = Arc::clone(&state.connections);
    connections
        .run(|conn_id| drive_socket(socket, state, conn_id))
        .await;
}

async fn drive_socket(mut socket: WebSocket, state: Arc<AppState>, conn_id: u64) {
    if socket
        .send(Message::Text(CONNECTED_FRAME.into()))
        .await
        .is_err()
    {
        tracing::debug!(conn_id, "client gone before acknowledgement");
        return;
    }
    tracing::info!(conn_id, open = state.connections.open(), "stream connection opened");

    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    // Skip the first immediate tick
    heartbeat.tick().await;

    let mut calls: u64 = 0;
    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => {
                tracing::debug!(conn_id, "server shutting down, closing idle connection");
                let _ = socket
                    .send(Message::Close(Some(CloseFrame {
                        code: CLOSE_GOING_AWAY,
                        reason: "server shutting down".into(),
                    })))
                    .await;
                break;
            }

            frame = socket.recv() => {
                let keep_going = match Inbound::classify(frame) {
                    Inbound::Call(mode, payload) => {
                        calls += 1;
                        handle_call(&mut socket, &state, conn_id, Cursor::new(payload), mode).await
                    }
                    Inbound::Ping(data) => socket.send(Message::Pong(data)).await.is_ok(),
                    Inbound::Ignore => true,
                    Inbound::Closed => false,
                };
                if !keep_going {
                    break;
                }
            }

            _ = heartbeat.tick() => {
                if socket.send(Message::Ping(Bytes::new())).await.is_err() {
                    tracing::debug!(conn_id, "heartbeat failed, peer gone");
                    break;
                }
            }
        }
    }

    tracing::info!(conn_id, calls, "stream connection closed");
}

/// Dispatch one frame and write its reply. Returns false once the connection
/// can no longer be used.
async fn handle_call<R>(
    socket: &mut WebSocket,
    state: &AppState,
    conn_id: u64,
    frame: R,
    mode: FrameMode,
) -> bool
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let timer = CallTimer::new("ws");
    let reply = match state.codec.dispatch(frame).await {
        Ok(reply) => reply,
        Err(e) => {
            tracing::warn!(conn_id, error = %e, "reading call frame failed");
            timer.finish("transport");
            return false;
        }
    };
    timer.finish(reply.outcome());
    if let Some(err) = &reply.error {
        tracing::debug!(conn_id, method = ?reply.method, error = %err, "call failed");
    }

    let message = match mode {
        FrameMode::Binary => Message::Binary(Bytes::from(reply.body)),
        FrameMode::Text => match String::from_utf8(reply.body) {
            Ok(text) => Message::Text(text.into()),
            Err(e) => Message::Binary(Bytes::from(e.into_bytes())),
        },
    };

    if let Err(e) = socket.send(message).await {
        tracing::debug!(conn_id, error = %e, "writing reply failed");
        return false;
    }
    true
}
