//! HTTP adapters - REST API for the provider and the crisis subsystem.
//!
//! - `POST /api/webhooks/provider` - signed provider deliveries
//! - `/api/subjects/:subject_id/...` - safety access, state, crisis signals,
//!   operator deactivation

pub mod dto;
pub mod handlers;
pub mod routes;

pub use handlers::{AppState, SIGNATURE_HEADER};
pub use routes::api_router;
