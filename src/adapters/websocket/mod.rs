//! WebSocket adapters for live subscription snapshots.
//!
//! ```text
//! StateProjector ──publish──▶ SubjectChannels ──broadcast──▶ ws clients of that subject
//! ```
//!
//! - [`channels`] - Per-subject broadcast registry (implements `StatePublisher`)
//! - [`handler`] - Axum WebSocket upgrade handler
//! - [`messages`] - Wire protocol

pub mod channels;
pub mod handler;
pub mod messages;

pub use channels::{ClientId, SubjectChannels};
pub use handler::{websocket_router, ws_handler, WebSocketState};
pub use messages::{ClientMessage, ServerMessage, SnapshotMessage};
