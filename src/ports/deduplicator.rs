//! Deduplicator port - Interface for at-most-once event application.
//!
//! Providers deliver the same event more than once:
//! - Network timeouts
//! - 5xx responses from our endpoint (triggers retry)
//! - Our endpoint returning success but the provider not receiving it
//!
//! The deduplicator remembers event ids for a retention window so only the
//! first delivery is processed.

use async_trait::async_trait;

use crate::domain::foundation::{DomainError, EventId, Timestamp};

/// Record of a seen event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeduplicationEntry {
    pub event_id: EventId,
    pub seen_at: Timestamp,
}

/// Result of attempting to record an event id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupOutcome {
    /// Record was inserted (first time seeing this event).
    FirstSeen,
    /// Record already exists (duplicate event).
    Duplicate,
}

impl DedupOutcome {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, DedupOutcome::Duplicate)
    }
}

/// Port for tracking recently-seen event ids.
///
/// `check_and_record` must be atomic: when several deliveries of the same id
/// race, exactly one observes `FirstSeen`.
#[async_trait]
pub trait Deduplicator: Send + Sync {
    /// Checks membership and records the id in one step.
    async fn check_and_record(
        &self,
        event_id: &EventId,
        seen_at: Timestamp,
    ) -> Result<DedupOutcome, DomainError>;

    /// Forgets an id so a provider retry is processed again.
    ///
    /// Called when processing failed transiently after the id was recorded.
    async fn release(&self, event_id: &EventId) -> Result<(), DomainError>;

    /// Removes entries whose retention window has passed.
    ///
    /// Returns the number of entries removed. Adapters with native expiry
    /// may return 0.
    async fn purge_expired(&self, now: Timestamp) -> Result<u64, DomainError>;
}
