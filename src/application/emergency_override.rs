//! EmergencyOverrideController - Activation, deactivation, and crisis signals.
//!
//! Overrides are only ever cleared by expiry or by an explicit, audited
//! [`deactivate`](EmergencyOverrideController::deactivate). Clearing crisis
//! context leaves an active override in place.

use std::sync::Arc;

use crate::domain::foundation::{DomainError, SubjectId, Timestamp};
use crate::domain::subscription::{
    AccessLevel, AuditOutcome, HandlerOutcome, OverrideReason, SideEffect, StateChange,
    SubscriptionState,
};

use super::projector::StateProjector;

/// Result of an operator deactivation.
#[derive(Debug, Clone)]
pub struct Deactivation {
    pub state: SubscriptionState,
    /// False if there was no active override to clear.
    pub deactivated: bool,
}

pub struct EmergencyOverrideController {
    projector: Arc<StateProjector>,
}

impl EmergencyOverrideController {
    pub fn new(projector: Arc<StateProjector>) -> Self {
        Self { projector }
    }

    /// Activates (or strengthens) a subject's override.
    pub async fn activate(
        &self,
        subject_id: &SubjectId,
        reason: OverrideReason,
        access_level: AccessLevel,
    ) -> Result<SubscriptionState, DomainError> {
        tracing::warn!(
            subject_id = %subject_id,
            reason = %reason,
            "Activating emergency override"
        );
        let projection = self
            .projector
            .project(subject_id, None, AuditOutcome::ForcedCompletion, |_| {
                Ok(HandlerOutcome::new().effect(SideEffect::ActivateEmergencyOverride {
                    reason,
                    access_level,
                }))
            })
            .await?;
        Ok(projection.into_state())
    }

    /// Grants access through the safety index for one override duration,
    /// without touching the store.
    pub fn pin_access(&self, subject_id: &SubjectId) {
        let until = Timestamp::from_datetime(
            *Timestamp::now().as_datetime() + self.projector.rules().overrides.duration(),
        );
        self.projector.index().pin(subject_id, until);
    }

    /// Clears an active override on behalf of an operator.
    pub async fn deactivate(
        &self,
        subject_id: &SubjectId,
        actor: &str,
        note: Option<&str>,
    ) -> Result<Deactivation, DomainError> {
        let mut deactivated = false;
        let projection = self
            .projector
            .project(subject_id, None, AuditOutcome::ManualDeactivation, |current| {
                deactivated = current.override_active();
                Ok(HandlerOutcome::new().effect(SideEffect::DeactivateEmergencyOverride {
                    actor: actor.to_string(),
                    note: note.map(str::to_string),
                }))
            })
            .await?;

        tracing::info!(
            subject_id = %subject_id,
            actor,
            deactivated,
            "Emergency override deactivation requested"
        );
        Ok(Deactivation {
            state: projection.into_state(),
            deactivated,
        })
    }

    /// Applies a crisis signal from the crisis subsystem.
    ///
    /// `active = true` sets crisis context, extends an active grace period,
    /// and activates a `crisis_detected` override. `active = false` only
    /// clears crisis context.
    pub async fn crisis_signal(
        &self,
        subject_id: &SubjectId,
        active: bool,
    ) -> Result<SubscriptionState, DomainError> {
        tracing::info!(subject_id = %subject_id, active, "Crisis signal received");
        let projection = self
            .projector
            .project(subject_id, None, AuditOutcome::CrisisSignal, |current| {
                let mut outcome = HandlerOutcome::new().change(StateChange::SetCrisisContext(active));
                if active {
                    if current.grace_active() {
                        outcome = outcome.effect(SideEffect::ExtendGracePeriod);
                    }
                    outcome = outcome.effect(SideEffect::ActivateEmergencyOverride {
                        reason: OverrideReason::CrisisDetected,
                        access_level: AccessLevel::Full,
                    });
                }
                Ok(outcome)
            })
            .await?;
        Ok(projection.into_state())
    }
}
