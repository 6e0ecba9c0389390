//! StateProjector - The only writer of `SubscriptionState`.
//!
//! Every change to a subject, whether from a webhook, a crisis signal, an
//! operator, or the expiry sweep, goes through [`StateProjector::project`]:
//!
//! 1. Read the current snapshot (or start a fresh one)
//! 2. Skip if the event was already applied
//! 3. Ask the caller for a `HandlerOutcome` against that snapshot (an empty
//!    one writes nothing)
//! 4. Fold it with `apply` and compare-and-set on `version`
//! 5. On conflict, retry from the fresher snapshot the store returned
//! 6. Publish, refresh the safety index, and queue an audit record
//!
//! Same-subject writers serialize through the CAS loop; there is no lock.

use std::future::Future;
use std::sync::Arc;

use thiserror::Error;

use crate::domain::foundation::{DomainError, ErrorCode, EventId, SubjectId, Timestamp};
use crate::domain::subscription::{
    apply, AppliedTransition, AuditOutcome, AuditRecord, HandlerOutcome, SubscriptionState,
    TransitionRules,
};
use crate::domain::webhook::WebhookError;
use crate::ports::{CasOutcome, StatePublisher, SubscriptionStore};

use super::audit_dispatcher::AuditQueue;
use super::safety_access::SafetyAccessIndex;

/// Default bound on compare-and-set attempts per projection.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 16;

/// Why a projection did not land.
#[derive(Debug, Error)]
pub enum ProjectionError {
    /// The outcome function refused the snapshot.
    #[error(transparent)]
    Rejected(WebhookError),

    #[error("State store error: {0}")]
    Store(DomainError),

    #[error("Gave up after {attempts} conflicting writes")]
    Contention { attempts: u32 },
}

impl From<ProjectionError> for WebhookError {
    fn from(err: ProjectionError) -> Self {
        match err {
            ProjectionError::Rejected(e) => e,
            ProjectionError::Store(e) => e.into(),
            ProjectionError::Contention { .. } => WebhookError::Infrastructure(err.to_string()),
        }
    }
}

impl From<ProjectionError> for DomainError {
    fn from(err: ProjectionError) -> Self {
        match err {
            ProjectionError::Store(e) => e,
            ProjectionError::Contention { .. } => {
                DomainError::new(ErrorCode::VersionConflict, err.to_string())
            }
            ProjectionError::Rejected(e) => DomainError::new(ErrorCode::InternalError, e.to_string()),
        }
    }
}

/// Result of a projection.
#[derive(Debug, Clone)]
pub enum Projection {
    /// A new snapshot was stored.
    Applied(AppliedTransition),
    /// The event id was already on the snapshot; nothing was written.
    AlreadyApplied(SubscriptionState),
    /// The outcome was empty; nothing was written.
    Unchanged(SubscriptionState),
}

impl Projection {
    pub fn state(&self) -> &SubscriptionState {
        match self {
            Projection::Applied(t) => &t.state,
            Projection::AlreadyApplied(s) | Projection::Unchanged(s) => s,
        }
    }

    pub fn into_state(self) -> SubscriptionState {
        match self {
            Projection::Applied(t) => t.state,
            Projection::AlreadyApplied(s) | Projection::Unchanged(s) => s,
        }
    }
}

pub struct StateProjector {
    store: Arc<dyn SubscriptionStore>,
    publisher: Arc<dyn StatePublisher>,
    index: Arc<SafetyAccessIndex>,
    audit: AuditQueue,
    rules: TransitionRules,
    max_attempts: u32,
}

impl StateProjector {
    pub fn new(
        store: Arc<dyn SubscriptionStore>,
        publisher: Arc<dyn StatePublisher>,
        index: Arc<SafetyAccessIndex>,
        audit: AuditQueue,
        rules: TransitionRules,
    ) -> Self {
        Self {
            store,
            publisher,
            index,
            audit,
            rules,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn rules(&self) -> &TransitionRules {
        &self.rules
    }

    pub fn index(&self) -> &Arc<SafetyAccessIndex> {
        &self.index
    }

    pub fn audit(&self) -> &AuditQueue {
        &self.audit
    }

    /// Reads a subject's snapshot without modifying it.
    pub async fn current(&self, subject_id: &SubjectId) -> Result<SubscriptionState, DomainError> {
        Ok(self
            .store
            .get(subject_id)
            .await?
            .unwrap_or_else(|| SubscriptionState::new(subject_id.clone(), Timestamp::now())))
    }

    /// Applies the outcome `decide` computes against the latest snapshot.
    ///
    /// `decide` may run more than once when writers race; it must be a pure
    /// function of the snapshot it is given. `kind` labels the audit record.
    ///
    /// # Errors
    ///
    /// - `Rejected` - `decide` returned an error
    /// - `Store` - the store could not be read or written
    /// - `Contention` - every attempt lost the compare-and-set
    pub async fn project<F>(
        &self,
        subject_id: &SubjectId,
        event_id: Option<&EventId>,
        kind: AuditOutcome,
        decide: F,
    ) -> Result<Projection, ProjectionError>
    where
        F: FnMut(&SubscriptionState) -> Result<HandlerOutcome, WebhookError> + Send,
    {
        self.project_at(subject_id, event_id, kind, Timestamp::now(), decide)
            .await
    }

    /// Like [`project`](Self::project), with transitions evaluated at `now`.
    pub async fn project_at<F>(
        &self,
        subject_id: &SubjectId,
        event_id: Option<&EventId>,
        kind: AuditOutcome,
        now: Timestamp,
        mut decide: F,
    ) -> Result<Projection, ProjectionError>
    where
        F: FnMut(&SubscriptionState) -> Result<HandlerOutcome, WebhookError> + Send,
    {
        self.project_with(subject_id, event_id, kind, now, move |state| {
            std::future::ready(decide(state))
        })
        .await
    }

    /// Like [`project_at`](Self::project_at), for outcomes computed off the
    /// async worker (for example on the blocking pool).
    ///
    /// The future must own whatever it needs from the snapshot.
    pub async fn project_with<F, Fut>(
        &self,
        subject_id: &SubjectId,
        event_id: Option<&EventId>,
        kind: AuditOutcome,
        now: Timestamp,
        mut decide: F,
    ) -> Result<Projection, ProjectionError>
    where
        F: FnMut(&SubscriptionState) -> Fut + Send,
        Fut: Future<Output = Result<HandlerOutcome, WebhookError>> + Send,
    {
        let mut current = self
            .current(subject_id)
            .await
            .map_err(ProjectionError::Store)?;

        for attempt in 1..=self.max_attempts {
            if let Some(id) = event_id {
                if current.has_applied(id) {
                    tracing::debug!(event_id = %id, subject_id = %subject_id, "Event already applied");
                    self.audit.emit(
                        AuditRecord::new(AuditOutcome::AlreadyApplied, Timestamp::now())
                            .for_event(id)
                            .for_subject(subject_id),
                    );
                    return Ok(Projection::AlreadyApplied(current));
                }
            }

            let outcome = decide(&current).await.map_err(ProjectionError::Rejected)?;
            if outcome.is_empty() {
                return Ok(Projection::Unchanged(current));
            }
            let transition = apply(&current, &outcome, &self.rules, event_id, now);

            match self
                .store
                .compare_and_set(subject_id, current.version, transition.state.clone())
                .await
                .map_err(ProjectionError::Store)?
            {
                CasOutcome::Applied(stored) => {
                    let transition = AppliedTransition {
                        state: stored,
                        ..transition
                    };
                    self.publish(&transition, event_id, kind);
                    return Ok(Projection::Applied(transition));
                }
                CasOutcome::Conflict(fresh) => {
                    tracing::debug!(
                        subject_id = %subject_id,
                        attempt,
                        "Version conflict, retrying projection"
                    );
                    current = match fresh {
                        Some(state) => state,
                        None => self
                            .current(subject_id)
                            .await
                            .map_err(ProjectionError::Store)?,
                    };
                }
            }
        }

        tracing::error!(
            subject_id = %subject_id,
            attempts = self.max_attempts,
            "Projection abandoned after repeated conflicts"
        );
        Err(ProjectionError::Contention {
            attempts: self.max_attempts,
        })
    }

    fn publish(&self, transition: &AppliedTransition, event_id: Option<&EventId>, kind: AuditOutcome) {
        let state = &transition.state;
        self.index.record(state);
        let reached = self.publisher.publish(state);

        if transition.status_changed() {
            tracing::info!(
                subject_id = %state.subject_id,
                version = state.version,
                from = %transition.from_status,
                to = %transition.to_status,
                subscribers = reached,
                "Subscription status changed"
            );
        } else {
            tracing::debug!(
                subject_id = %state.subject_id,
                version = state.version,
                status = %transition.to_status,
                subscribers = reached,
                "Projected subscription state"
            );
        }

        let mut record = AuditRecord::new(kind, state.updated_at)
            .for_subject(&state.subject_id)
            .with_transition(transition.from_status, transition.to_status);
        if let Some(id) = event_id {
            record = record.for_event(id);
        }
        if !transition.notes.is_empty() {
            record = record.with_detail(transition.notes.join("; "));
        }
        self.audit.emit(record);
    }
}
