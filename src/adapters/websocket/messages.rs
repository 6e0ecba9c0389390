//! WebSocket message protocol for live subscription snapshots.
//!
//! - Server → Client: connection status, snapshots, errors, pongs
//! - Client → Server: pings, state requests

use serde::{Deserialize, Serialize};

use crate::domain::foundation::Timestamp;
use crate::domain::subscription::SubscriptionState;

// ============================================
// Server → Client Messages
// ============================================

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Connection established and subscribed to the subject.
    Connected(ConnectedMessage),

    /// Full state snapshot. Sent on connect, on request, and after every
    /// projection for the subject.
    #[serde(rename = "subscription.snapshot")]
    Snapshot(SnapshotMessage),

    Error(ErrorMessage),

    Pong(PongMessage),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedMessage {
    pub subject_id: String,
    pub client_id: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMessage {
    pub state: SubscriptionState,
    pub safety_access: bool,
}

impl SnapshotMessage {
    pub fn new(state: SubscriptionState) -> Self {
        Self {
            safety_access: state.has_safety_access(),
            state,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorMessage {
    pub code: String,
    pub message: String,
    pub timestamp: String,
}

impl ErrorMessage {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            timestamp: Timestamp::now().as_datetime().to_rfc3339(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PongMessage {
    pub timestamp: String,
}

// ============================================
// Client → Server Messages
// ============================================

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Ping,

    /// Request the current snapshot (after reconnection).
    #[serde(rename = "request.state")]
    RequestState,
}
