//! In-memory subscription store.
//!
//! Suitable for tests and single-process deployments. Compare-and-set is
//! serialized by a single write lock, which is held only for the version
//! check and the insert.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::foundation::{DomainError, SubjectId, Timestamp};
use crate::domain::subscription::SubscriptionState;
use crate::ports::{CasOutcome, SubscriptionStore};

#[derive(Default)]
pub struct InMemorySubscriptionStore {
    states: RwLock<HashMap<SubjectId, SubscriptionState>>,
}

impl InMemorySubscriptionStore {
    pub fn new() -> Self {
        Self::default()
    }

    // === Test Helpers ===

    /// Number of subjects stored.
    pub async fn len(&self) -> usize {
        self.states.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.states.read().await.is_empty()
    }
}

#[async_trait]
impl SubscriptionStore for InMemorySubscriptionStore {
    async fn get(&self, subject_id: &SubjectId) -> Result<Option<SubscriptionState>, DomainError> {
        Ok(self.states.read().await.get(subject_id).cloned())
    }

    async fn compare_and_set(
        &self,
        subject_id: &SubjectId,
        expected_version: u64,
        mut new_state: SubscriptionState,
    ) -> Result<CasOutcome, DomainError> {
        let mut states = self.states.write().await;
        let current = states.get(subject_id);
        let current_version = current.map_or(0, |s| s.version);

        if current_version != expected_version {
            return Ok(CasOutcome::Conflict(current.cloned()));
        }

        new_state.version = expected_version + 1;
        states.insert(subject_id.clone(), new_state.clone());
        Ok(CasOutcome::Applied(new_state))
    }

    async fn list_with_deadlines(
        &self,
        now: Timestamp,
    ) -> Result<Vec<SubscriptionState>, DomainError> {
        Ok(self
            .states
            .read()
            .await
            .values()
            .filter(|s| s.has_due_deadline(now))
            .cloned()
            .collect())
    }
}
