//! In-memory deduplicator with a retention window.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Duration;
use tokio::sync::Mutex;

use crate::domain::foundation::{DomainError, EventId, Timestamp};
use crate::ports::{DedupOutcome, DeduplicationEntry, Deduplicator};

/// Remembers event ids for `retention`.
///
/// An entry older than the retention window no longer counts as a duplicate
/// even before `purge_expired` removes it.
pub struct InMemoryDeduplicator {
    entries: Mutex<HashMap<EventId, Timestamp>>,
    retention: Duration,
}

impl InMemoryDeduplicator {
    pub fn new(retention: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            retention,
        }
    }

    /// Snapshot of current entries.
    pub async fn entries(&self) -> Vec<DeduplicationEntry> {
        self.entries
            .lock()
            .await
            .iter()
            .map(|(event_id, seen_at)| DeduplicationEntry {
                event_id: event_id.clone(),
                seen_at: *seen_at,
            })
            .collect()
    }

    fn is_live(&self, seen_at: Timestamp, now: Timestamp) -> bool {
        now.duration_since(&seen_at) < self.retention
    }
}

#[async_trait]
impl Deduplicator for InMemoryDeduplicator {
    async fn check_and_record(
        &self,
        event_id: &EventId,
        seen_at: Timestamp,
    ) -> Result<DedupOutcome, DomainError> {
        let mut entries = self.entries.lock().await;
        if let Some(existing) = entries.get(event_id) {
            if self.is_live(*existing, seen_at) {
                return Ok(DedupOutcome::Duplicate);
            }
        }
        entries.insert(event_id.clone(), seen_at);
        Ok(DedupOutcome::FirstSeen)
    }

    async fn release(&self, event_id: &EventId) -> Result<(), DomainError> {
        self.entries.lock().await.remove(event_id);
        Ok(())
    }

    async fn purge_expired(&self, now: Timestamp) -> Result<u64, DomainError> {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, seen_at| now.duration_since(seen_at) < self.retention);
        Ok((before - entries.len()) as u64)
    }
}
