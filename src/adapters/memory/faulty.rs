//! Fault-injecting wrappers for outage drills and tests.
//!
//! A shared [`FaultSwitch`] controls whether wrapped adapters fail with
//! `StoreUnavailable` and how much latency they add before answering.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::foundation::{DomainError, EventId, SubjectId, Timestamp};
use crate::domain::subscription::SubscriptionState;
use crate::ports::{CasOutcome, DedupOutcome, Deduplicator, SubscriptionStore};

/// Shared on/off switch for injected faults.
#[derive(Debug, Default)]
pub struct FaultSwitch {
    unavailable: AtomicBool,
    latency_ms: AtomicU64,
}

impl FaultSwitch {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Makes every wrapped call fail (or succeed again).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn is_unavailable(&self) -> bool {
        self.unavailable.load(Ordering::SeqCst)
    }

    /// Adds latency to every wrapped call.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    async fn check(&self, what: &str) -> Result<(), DomainError> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.is_unavailable() {
            return Err(DomainError::unavailable(format!("{} unavailable (injected)", what)));
        }
        Ok(())
    }
}

/// Subscription store that fails on demand.
pub struct FaultySubscriptionStore {
    inner: Arc<dyn SubscriptionStore>,
    switch: Arc<FaultSwitch>,
}

impl FaultySubscriptionStore {
    pub fn new(inner: Arc<dyn SubscriptionStore>, switch: Arc<FaultSwitch>) -> Self {
        Self { inner, switch }
    }
}

#[async_trait]
impl SubscriptionStore for FaultySubscriptionStore {
    async fn get(&self, subject_id: &SubjectId) -> Result<Option<SubscriptionState>, DomainError> {
        self.switch.check("subscription store").await?;
        self.inner.get(subject_id).await
    }

    async fn compare_and_set(
        &self,
        subject_id: &SubjectId,
        expected_version: u64,
        new_state: SubscriptionState,
    ) -> Result<CasOutcome, DomainError> {
        self.switch.check("subscription store").await?;
        self.inner
            .compare_and_set(subject_id, expected_version, new_state)
            .await
    }

    async fn list_with_deadlines(
        &self,
        now: Timestamp,
    ) -> Result<Vec<SubscriptionState>, DomainError> {
        self.switch.check("subscription store").await?;
        self.inner.list_with_deadlines(now).await
    }
}

/// Deduplicator that fails on demand.
pub struct FaultyDeduplicator {
    inner: Arc<dyn Deduplicator>,
    switch: Arc<FaultSwitch>,
}

impl FaultyDeduplicator {
    pub fn new(inner: Arc<dyn Deduplicator>, switch: Arc<FaultSwitch>) -> Self {
        Self { inner, switch }
    }
}

#[async_trait]
impl Deduplicator for FaultyDeduplicator {
    async fn check_and_record(
        &self,
        event_id: &EventId,
        seen_at: Timestamp,
    ) -> Result<DedupOutcome, DomainError> {
        self.switch.check("deduplicator").await?;
        self.inner.check_and_record(event_id, seen_at).await
    }

    async fn release(&self, event_id: &EventId) -> Result<(), DomainError> {
        self.switch.check("deduplicator").await?;
        self.inner.release(event_id).await
    }

    async fn purge_expired(&self, now: Timestamp) -> Result<u64, DomainError> {
        self.switch.check("deduplicator").await?;
        self.inner.purge_expired(now).await
    }
}
