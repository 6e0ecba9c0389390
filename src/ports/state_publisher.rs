//! StatePublisher port - Live fan-out of subscription snapshots.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::domain::foundation::SubjectId;
use crate::domain::subscription::SubscriptionState;

/// Port for pushing full snapshots to live subscribers of a subject.
///
/// Delivery is at-least-once per live subscriber; a lagging subscriber may
/// miss intermediate snapshots but always receives a later one. Publishing
/// never blocks.
pub trait StatePublisher: Send + Sync {
    /// Publishes a snapshot. Returns the number of subscribers reached.
    fn publish(&self, snapshot: &SubscriptionState) -> usize;

    /// Subscribes to a subject's snapshots.
    fn subscribe(&self, subject_id: &SubjectId) -> broadcast::Receiver<Arc<SubscriptionState>>;
}
