//! In-memory adapters.
//!
//! Used by tests and by the `memory` storage backend. The fault-injecting
//! wrappers let outage drills exercise fail-open and fail-closed paths.

mod audit_log;
mod deduplicator;
mod faulty;
mod subscription_store;

pub use audit_log::InMemoryAuditLog;
pub use deduplicator::InMemoryDeduplicator;
pub use faulty::{FaultSwitch, FaultyDeduplicator, FaultySubscriptionStore};
pub use subscription_store::InMemorySubscriptionStore;
