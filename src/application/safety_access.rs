//! SafetyAccessIndex - In-process answer to "does this subject have safety access?"
//!
//! The crisis subsystem asks this question on its own hot path, so the answer
//! must not depend on the state store being reachable. Every projection
//! refreshes the index; the store is only consulted on a cold miss.
//!
//! # Failure policy
//!
//! | Situation                         | Answer              |
//! |-----------------------------------|---------------------|
//! | Indexed subject                   | From last snapshot  |
//! | Forced completion not yet stored  | `true` until pin ends |
//! | Cold miss, store answers          | From stored state   |
//! | Cold miss, subject unknown        | `false`             |
//! | Cold miss, store unavailable      | `true` (fail open)  |

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::domain::foundation::{SubjectId, Timestamp};
use crate::domain::subscription::SubscriptionState;
use crate::ports::SubscriptionStore;

#[derive(Debug, Clone, Copy, Default)]
struct SafetyEntry {
    /// Version of the snapshot the flags came from.
    version: u64,
    grace_active: bool,
    override_active: bool,
    /// Set when an override was promised but not yet persisted.
    pinned_until: Option<Timestamp>,
}

impl SafetyEntry {
    fn has_access(&self, now: Timestamp) -> bool {
        self.grace_active
            || self.override_active
            || self.pinned_until.map_or(false, |until| now.is_before(&until))
    }

    fn is_idle(&self, now: Timestamp) -> bool {
        !self.has_access(now)
    }
}

/// Sticky per-subject safety-access cache.
pub struct SafetyAccessIndex {
    entries: RwLock<HashMap<SubjectId, SafetyEntry>>,
    store: Arc<dyn SubscriptionStore>,
}

impl SafetyAccessIndex {
    pub fn new(store: Arc<dyn SubscriptionStore>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            store,
        }
    }

    /// Refreshes the entry from a freshly projected snapshot.
    ///
    /// Snapshots older than the indexed one are ignored, so concurrent
    /// projections may record in any order. A pin survives until a snapshot
    /// with an active override lands.
    pub fn record(&self, state: &SubscriptionState) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let entry = entries.entry(state.subject_id.clone()).or_default();
        if state.version < entry.version {
            tracing::debug!(
                subject_id = %state.subject_id,
                version = state.version,
                indexed = entry.version,
                "Ignoring stale snapshot"
            );
            return;
        }
        entry.version = state.version;
        entry.grace_active = state.grace_active();
        entry.override_active = state.override_active();
        if entry.override_active {
            entry.pinned_until = None;
        }
    }

    /// Grants access immediately, ahead of the override being persisted.
    pub fn pin(&self, subject_id: &SubjectId, until: Timestamp) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let entry = entries.entry(subject_id.clone()).or_default();
        entry.pinned_until = Some(entry.pinned_until.map_or(until, |p| p.latest(until)));
    }

    /// Returns true whenever a grace period or an emergency override is
    /// active for the subject.
    pub async fn has_safety_access(&self, subject_id: &SubjectId) -> bool {
        let now = Timestamp::now();
        if let Some(entry) = self.cached(subject_id) {
            return entry.has_access(now);
        }

        match self.store.get(subject_id).await {
            Ok(Some(state)) => {
                self.record(&state);
                state.has_safety_access()
            }
            Ok(None) => false,
            Err(e) => {
                tracing::warn!(
                    subject_id = %subject_id,
                    error = %e,
                    "State store unavailable on cold safety lookup, granting access"
                );
                true
            }
        }
    }

    /// Drops entries that grant nothing at `now`: no grace period, no
    /// override, and no live pin. A later lookup repopulates from the store.
    pub fn prune(&self, now: Timestamp) -> usize {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_idle(now));
        before - entries.len()
    }

    /// Number of indexed subjects.
    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn cached(&self, subject_id: &SubjectId) -> Option<SafetyEntry> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(subject_id)
            .copied()
    }
}
