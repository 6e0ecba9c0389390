//! Per-subject broadcast channels for live snapshot delivery.
//!
//! # Architecture
//!
//! ```text
//! Channel: subject-u1    Channel: subject-u2
//! ├── client-a           ├── client-d
//! └── client-b           └── client-e
//! ```
//!
//! When the projector writes a snapshot for u1, only clients a and b receive it.
//! Each channel delivers snapshots in version order; a snapshot older than
//! one already sent on the channel is dropped.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tokio::sync::broadcast;
use uuid::Uuid;

use crate::domain::foundation::SubjectId;
use crate::domain::subscription::SubscriptionState;
use crate::ports::StatePublisher;

/// Unique identifier for a WebSocket client connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientId(Uuid);

impl ClientId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct SubjectChannel {
    sender: broadcast::Sender<Arc<SubscriptionState>>,
    /// Highest version sent; held while sending to keep delivery ordered.
    last_version: Mutex<u64>,
}

impl SubjectChannel {
    fn new(capacity: usize) -> Self {
        Self {
            sender: broadcast::channel(capacity).0,
            last_version: Mutex::new(0),
        }
    }

    fn send(&self, snapshot: &SubscriptionState) -> usize {
        let mut last = self.last_version.lock().unwrap_or_else(PoisonError::into_inner);
        if snapshot.version < *last {
            tracing::debug!(
                subject_id = %snapshot.subject_id,
                version = snapshot.version,
                last_sent = *last,
                "Dropping stale snapshot"
            );
            return 0;
        }
        *last = snapshot.version;
        // No receivers is fine.
        self.sender.send(Arc::new(snapshot.clone())).unwrap_or(0)
    }
}

/// Registry of per-subject broadcast senders.
///
/// Uses a std `RwLock` because publishing happens from synchronous code and
/// the lock is never held across an await. Publishes (reads) vastly
/// outnumber subscribes (writes).
pub struct SubjectChannels {
    channels: RwLock<HashMap<SubjectId, SubjectChannel>>,
    channel_capacity: usize,
}

impl SubjectChannels {
    /// Creates a registry whose channels buffer `channel_capacity` snapshots.
    ///
    /// A subscriber that falls further behind skips to newer snapshots.
    pub fn new(channel_capacity: usize) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            channel_capacity: channel_capacity.max(1),
        }
    }

    /// Number of live subscribers for a subject.
    pub fn subscriber_count(&self, subject_id: &SubjectId) -> usize {
        self.channels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(subject_id)
            .map(|c| c.sender.receiver_count())
            .unwrap_or(0)
    }

    /// Subjects with an open channel (for monitoring).
    pub fn active_subjects(&self) -> Vec<SubjectId> {
        self.channels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// Drops channels that no longer have subscribers.
    pub fn prune_idle(&self) -> usize {
        let mut channels = self.channels.write().unwrap_or_else(PoisonError::into_inner);
        let before = channels.len();
        channels.retain(|_, channel| channel.sender.receiver_count() > 0);
        before - channels.len()
    }
}

impl Default for SubjectChannels {
    fn default() -> Self {
        Self::new(128)
    }
}

impl StatePublisher for SubjectChannels {
    fn publish(&self, snapshot: &SubscriptionState) -> usize {
        let channels = self.channels.read().unwrap_or_else(PoisonError::into_inner);
        channels
            .get(&snapshot.subject_id)
            .map_or(0, |channel| channel.send(snapshot))
    }

    fn subscribe(&self, subject_id: &SubjectId) -> broadcast::Receiver<Arc<SubscriptionState>> {
        let mut channels = self.channels.write().unwrap_or_else(PoisonError::into_inner);
        channels
            .entry(subject_id.clone())
            .or_insert_with(|| SubjectChannel::new(self.channel_capacity))
            .sender
            .subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::foundation::Timestamp;

    fn subject(id: &str) -> SubjectId {
        SubjectId::new(id).unwrap()
    }

    fn snapshot(id: &str) -> SubscriptionState {
        SubscriptionState::new(subject(id), Timestamp::now())
    }

    #[tokio::test]
    async fn subscribers_receive_published_snapshots() {
        let channels = SubjectChannels::default();
        let mut rx1 = channels.subscribe(&subject("u1"));
        let mut rx2 = channels.subscribe(&subject("u1"));

        let reached = channels.publish(&snapshot("u1"));

        assert_eq!(reached, 2);
        assert_eq!(rx1.recv().await.unwrap().subject_id, subject("u1"));
        assert_eq!(rx2.recv().await.unwrap().subject_id, subject("u1"));
    }

    #[tokio::test]
    async fn subjects_are_isolated() {
        let channels = SubjectChannels::default();
        let mut rx_u1 = channels.subscribe(&subject("u1"));
        let _rx_u2 = channels.subscribe(&subject("u2"));

        channels.publish(&snapshot("u2"));
        channels.publish(&snapshot("u1"));

        assert_eq!(rx_u1.recv().await.unwrap().subject_id, subject("u1"));
        assert_eq!(channels.subscriber_count(&subject("u2")), 1);
    }

    #[tokio::test]
    async fn stale_snapshot_is_not_delivered_after_newer_one() {
        let channels = SubjectChannels::default();
        let mut rx = channels.subscribe(&subject("u1"));
        let mut newer = snapshot("u1");
        newer.version = 2;
        let mut older = snapshot("u1");
        older.version = 1;

        assert_eq!(channels.publish(&newer), 1);
        assert_eq!(channels.publish(&older), 0);

        assert_eq!(rx.recv().await.unwrap().version, 2);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn publish_without_subscribers_is_noop() {
        let channels = SubjectChannels::default();
        assert_eq!(channels.publish(&snapshot("u1")), 0);
        assert!(channels.active_subjects().is_empty());
    }

    #[test]
    fn prune_drops_idle_channels() {
        let channels = SubjectChannels::default();
        {
            let _rx = channels.subscribe(&subject("u1"));
        }
        let _kept = channels.subscribe(&subject("u2"));

        assert_eq!(channels.prune_idle(), 1);
        assert_eq!(channels.active_subjects(), vec![subject("u2")]);
    }
}
