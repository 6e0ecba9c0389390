//! Ports - Interfaces for external dependencies.
//!
//! Following hexagonal architecture, ports define the contracts between
//! the domain and the outside world. Adapters implement these ports.
//!
//! - `SubscriptionStore` - Per-subject state with compare-and-set
//! - `Deduplicator` - At-most-once tracking of provider event ids
//! - `AuditSink` - Append-only audit trail
//! - `StatePublisher` - Live snapshot fan-out

mod audit_sink;
mod deduplicator;
mod state_publisher;
mod subscription_store;

pub use audit_sink::AuditSink;
pub use deduplicator::{DedupOutcome, DeduplicationEntry, Deduplicator};
pub use state_publisher::StatePublisher;
pub use subscription_store::{CasOutcome, SubscriptionStore};
