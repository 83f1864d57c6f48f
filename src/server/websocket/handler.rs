//! WebSocket upgrade handling and the status subscriber task.
//!
//! Workers publish status events onto the in-process broadcast channel; the
//! subscriber task (one per server, with its own receiver) decodes them and
//! forwards them to every connected client.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::connection::ConnectionManager;
use super::messages::{msg_types, ClientMessage, ServerMessage};
use crate::server::state::ServerState;
use crate::status::{StatusBroadcaster, StatusEvent};

/// `GET /ws/status` upgrade endpoint.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<ServerState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state.connections.clone()))
}

async fn handle_socket(socket: WebSocket, connections: Arc<ConnectionManager>) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    let connection_id = connections.register(tx.clone());
    let _ = tx.send(ServerMessage::new(
        msg_types::CONNECTED,
        serde_json::json!({ "connection_id": connection_id }),
    ));

    let mut send_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let Ok(text) = serde_json::to_string(&message) else {
                continue;
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let pong_tx = tx.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(message)) = stream.next().await {
            match message {
                Message::Text(text) => {
                    match serde_json::from_str::<ClientMessage>(&text) {
                        Ok(client_message) if client_message.msg_type == msg_types::PING => {
                            let _ = pong_tx.send(ServerMessage::empty(msg_types::PONG));
                        }
                        Ok(other) => {
                            debug!(msg_type = %other.msg_type, "ignoring client message");
                        }
                        Err(error) => {
                            warn!(%error, "unparseable client message");
                        }
                    }
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    connections.unregister(connection_id);
}

/// Long-lived task forwarding status events to connected clients. Uses its
/// own receiver on the broadcast channel, distinct from any worker handle.
pub async fn run_status_subscriber(
    broadcaster: StatusBroadcaster,
    connections: Arc<ConnectionManager>,
    cancel: CancellationToken,
) {
    let mut rx = broadcaster.subscribe();
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = rx.recv() => event,
        };
        match event {
            Ok(event) => {
                let message = match &event {
                    StatusEvent::FolderStatus(update) => {
                        ServerMessage::new(msg_types::FOLDER_STATUS, update)
                    }
                    StatusEvent::JobStatus(update) => {
                        ServerMessage::new(msg_types::JOB_STATUS, update)
                    }
                    StatusEvent::FileSystem(update) => {
                        ServerMessage::new(msg_types::FS_UPDATE, update)
                    }
                };
                connections.broadcast(message);
            }
            Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                warn!(missed, "status subscriber lagged behind");
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        }
    }
    debug!("status subscriber stopped");
}
