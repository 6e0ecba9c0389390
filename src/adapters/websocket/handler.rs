//! WebSocket upgrade handler for live subscription snapshots.
//!
//! Connection lifecycle:
//! 1. Validate the subject id
//! 2. Upgrade to WebSocket
//! 3. Subscribe to the subject's channel, then send the current snapshot
//! 4. Forward snapshots and answer client messages until disconnect

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::{stream::SplitSink, SinkExt, StreamExt};
use tokio::sync::broadcast::error::RecvError;

use crate::domain::foundation::{SubjectId, Timestamp};
use crate::domain::subscription::SubscriptionState;
use crate::ports::{StatePublisher, SubscriptionStore};

use super::channels::{ClientId, SubjectChannels};
use super::messages::{
    ClientMessage, ConnectedMessage, ErrorMessage, PongMessage, ServerMessage, SnapshotMessage,
};

/// State required for WebSocket handling.
#[derive(Clone)]
pub struct WebSocketState {
    pub channels: Arc<SubjectChannels>,
    pub store: Arc<dyn SubscriptionStore>,
}

impl WebSocketState {
    pub fn new(channels: Arc<SubjectChannels>, store: Arc<dyn SubscriptionStore>) -> Self {
        Self { channels, store }
    }
}

/// Handle WebSocket upgrade requests.
///
/// Route: `GET /api/subjects/:subject_id/live`
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(subject_id): Path<String>,
    State(state): State<WebSocketState>,
) -> Response {
    let subject_id = match SubjectId::new(subject_id) {
        Ok(id) => id,
        Err(_) => return (StatusCode::BAD_REQUEST, "Invalid subject ID").into_response(),
    };

    ws.on_upgrade(move |socket| handle_socket(socket, subject_id, state))
}

async fn handle_socket(socket: WebSocket, subject_id: SubjectId, state: WebSocketState) {
    let (mut sender, mut receiver) = socket.split();
    let client_id = ClientId::new();

    // Subscribe before reading the snapshot so no projection falls between.
    let mut updates = state.channels.subscribe(&subject_id);

    let connected = ServerMessage::Connected(ConnectedMessage {
        subject_id: subject_id.to_string(),
        client_id: client_id.to_string(),
        timestamp: Timestamp::now().as_datetime().to_rfc3339(),
    });
    if let Err(e) = send_message(&mut sender, &connected).await {
        tracing::debug!("Failed to send connected message: {}", e);
        return;
    }
    if send_current(&mut sender, &state, &subject_id).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Ok(snapshot) => {
                    let msg = ServerMessage::Snapshot(SnapshotMessage::new((*snapshot).clone()));
                    if let Err(e) = send_message(&mut sender, &msg).await {
                        tracing::debug!(client_id = %client_id, "Send error, closing connection: {}", e);
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(client_id = %client_id, skipped, "Subscriber lagged, resending current state");
                    if send_current(&mut sender, &state, &subject_id).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Closed) => break,
            },
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    let reply = match serde_json::from_str::<ClientMessage>(&text) {
                        Ok(ClientMessage::Ping) => Some(ServerMessage::Pong(PongMessage {
                            timestamp: Timestamp::now().as_datetime().to_rfc3339(),
                        })),
                        Ok(ClientMessage::RequestState) => {
                            if send_current(&mut sender, &state, &subject_id).await.is_err() {
                                break;
                            }
                            None
                        }
                        Err(_) => Some(ServerMessage::Error(ErrorMessage::new(
                            "INVALID_MESSAGE",
                            "Unrecognized message",
                        ))),
                    };
                    if let Some(reply) = reply {
                        if send_message(&mut sender, &reply).await.is_err() {
                            break;
                        }
                    }
                }
                Some(Ok(Message::Binary(_))) => {
                    tracing::warn!(client_id = %client_id, "Received unsupported binary message");
                }
                // Protocol-level ping/pong is handled by axum
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {}
                Some(Ok(Message::Close(_))) | None => {
                    tracing::debug!(client_id = %client_id, "Client closed connection");
                    break;
                }
                Some(Err(e)) => {
                    tracing::debug!(client_id = %client_id, "Receive error: {}", e);
                    break;
                }
            },
        }
    }

    drop(updates);
    state.channels.prune_idle();
}

/// Sends the stored snapshot, or a fresh default if the subject is unknown.
///
/// A store failure is reported to the client as an error message; the
/// connection stays open and keeps receiving live snapshots.
async fn send_current(
    sender: &mut SplitSink<WebSocket, Message>,
    state: &WebSocketState,
    subject_id: &SubjectId,
) -> Result<(), axum::Error> {
    let msg = match state.store.get(subject_id).await {
        Ok(current) => {
            let snapshot = current
                .unwrap_or_else(|| SubscriptionState::new(subject_id.clone(), Timestamp::now()));
            ServerMessage::Snapshot(SnapshotMessage::new(snapshot))
        }
        Err(e) => {
            tracing::warn!(subject_id = %subject_id, error = %e, "Snapshot read failed");
            ServerMessage::Error(ErrorMessage::new(
                "STATE_UNAVAILABLE",
                "Current state is temporarily unavailable",
            ))
        }
    };
    send_message(sender, &msg).await
}

async fn send_message(
    sender: &mut SplitSink<WebSocket, Message>,
    msg: &ServerMessage,
) -> Result<(), axum::Error> {
    let json = serde_json::to_string(msg).map_err(axum::Error::new)?;
    sender.send(Message::Text(json)).await
}

/// Create axum router for the WebSocket endpoint.
pub fn websocket_router() -> axum::Router<WebSocketState> {
    use axum::routing::get;

    axum::Router::new().route("/api/subjects/:subject_id/live", get(ws_handler))
}
