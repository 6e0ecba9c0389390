//! SubscriptionStore port - Persistent per-subject state with optimistic
//! concurrency.

use async_trait::async_trait;

use crate::domain::foundation::{DomainError, SubjectId, Timestamp};
use crate::domain::subscription::SubscriptionState;

/// Result of a compare-and-set write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CasOutcome {
    /// The write succeeded; carries the stored state with its new version.
    Applied(SubscriptionState),
    /// Another writer got there first. Carries the current state so the
    /// caller can retry without a second read.
    Conflict(Option<SubscriptionState>),
}

/// Port for reading and writing subscription snapshots.
///
/// Versions start at 1 on first write; `expected_version == 0` means "the
/// subject must not exist yet". On success the store assigns
/// `expected_version + 1`.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Loads a subject's state, or `None` if it has never been written.
    async fn get(&self, subject_id: &SubjectId) -> Result<Option<SubscriptionState>, DomainError>;

    /// Writes `new_state` if the stored version equals `expected_version`.
    async fn compare_and_set(
        &self,
        subject_id: &SubjectId,
        expected_version: u64,
        new_state: SubscriptionState,
    ) -> Result<CasOutcome, DomainError>;

    /// Lists every subject with a grace period or override due at `now`.
    async fn list_with_deadlines(&self, now: Timestamp)
        -> Result<Vec<SubscriptionState>, DomainError>;
}
