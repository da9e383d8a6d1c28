//! WebSocket upgrade handler and message loop
//!
//! Identity is established before the socket is admitted. A rejected client
//! is still upgraded so it receives a close frame with a meaningful code
//! instead of a bare HTTP error its browser API cannot read.
//!
//! Each admitted connection gets:
//!
//! 1. A write loop draining the connection's outbound queue
//! 2. A read loop feeding text frames to the manager
//! 3. Cleanup once either side stops

use super::manager::{ConnectionHandle, ConnectionManager};
use super::protocol::OutboundFrame;
use crate::core::auth::ConnectRequest;
use crate::core::identity::UserIdentity;
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::Response;
use futures::SinkExt;
use futures::stream::{SplitSink, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

/// WebSocket upgrade handler for GET /ws
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
    State(manager): State<Arc<ConnectionManager>>,
) -> Response {
    let request = ConnectRequest::new(headers, query);

    match manager.authenticate(&request).await {
        Ok(user) => ws.on_upgrade(move |socket| handle_socket(socket, manager, user)),
        Err(e) => {
            let code = e.close_code();
            let reason = e.close_reason();
            tracing::warn!(close_code = code, error = %e, "WebSocket connection rejected");

            ws.on_upgrade(move |mut socket| async move {
                let _ = socket
                    .send(Message::Close(Some(CloseFrame {
                        code,
                        reason: reason.into(),
                    })))
                    .await;
            })
        }
    }
}

/// Run one admitted connection until either side goes away
async fn handle_socket(socket: WebSocket, manager: Arc<ConnectionManager>, user: UserIdentity) {
    let (connection, outbound) = manager.connect(user);
    let (ws_write, mut ws_read) = socket.split();

    let mut write_handle = tokio::spawn(write_loop(
        ws_write,
        outbound,
        connection.id().to_string(),
    ));

    loop {
        tokio::select! {
            // Write side finished: server-initiated close or transport failure
            _ = &mut write_handle => break,
            incoming = ws_read.next() => match incoming {
                Some(Ok(Message::Text(text))) => manager.on_message(&connection, text.as_str()),
                Some(Ok(Message::Binary(bytes))) => read_binary(&manager, &connection, &bytes),
                Some(Ok(Message::Close(_))) | None => {
                    tracing::debug!(connection_id = %connection.id(), "Client closed connection");
                    break;
                }
                Some(Ok(_)) => {
                    // axum answers pings itself
                }
                Some(Err(e)) => {
                    tracing::debug!(
                        connection_id = %connection.id(),
                        error = %e,
                        "WebSocket read error"
                    );
                    break;
                }
            }
        }
    }

    manager.disconnect(&connection);
    write_handle.abort();
}

fn read_binary(manager: &ConnectionManager, connection: &ConnectionHandle, bytes: &[u8]) {
    match std::str::from_utf8(bytes) {
        Ok(text) => manager.on_message(connection, text),
        Err(_) => {
            tracing::debug!(connection_id = %connection.id(), "Ignoring non UTF-8 binary frame");
        }
    }
}

/// Forward queued frames to the socket until closed
async fn write_loop(
    mut ws_write: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::UnboundedReceiver<OutboundFrame>,
    connection_id: String,
) {
    while let Some(frame) = outbound.recv().await {
        match frame {
            OutboundFrame::Message(msg) => match serde_json::to_string(&msg) {
                Ok(json) => {
                    if ws_write.send(Message::Text(json.into())).await.is_err() {
                        tracing::debug!(
                            connection_id = %connection_id,
                            "WebSocket write failed, closing"
                        );
                        return;
                    }
                }
                Err(e) => {
                    tracing::error!(
                        connection_id = %connection_id,
                        error = %e,
                        "Failed to serialize ServerMessage"
                    );
                }
            },
            OutboundFrame::Close { code, reason } => {
                let _ = ws_write
                    .send(Message::Close(Some(CloseFrame {
                        code,
                        reason: reason.into(),
                    })))
                    .await;
                return;
            }
        }
    }
}
