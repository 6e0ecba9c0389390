//! Subscription state snapshot and the pure transition function.
//!
//! Handlers never mutate `SubscriptionState` directly. They describe what
//! should change as a [`HandlerOutcome`] (state changes plus side effects), and
//! [`apply`] folds that outcome into a new snapshot. The projector is the only
//! caller that persists the result.

use std::collections::VecDeque;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::domain::foundation::{EventId, SubjectId, Timestamp};

use super::{
    capabilities_for, AccessLevel, BillingStatus, CapabilitySet, EmergencyOverride, GracePeriod,
    GracePeriodStateMachine, GraceReason, OverridePolicy, OverrideReason, SubscriptionStatus,
    SubscriptionTier,
};

/// Number of applied event ids remembered on the snapshot.
pub const RECENT_EVENT_WINDOW: usize = 32;

/// Pending provider-side payment retry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRetry {
    pub attempt_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_attempt_at: Option<Timestamp>,
}

/// Client-visible subscription snapshot for one subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionState {
    pub subject_id: SubjectId,
    pub tier: SubscriptionTier,
    pub status: SubscriptionStatus,
    pub base_status: BillingStatus,
    pub grace_period: Option<GracePeriod>,
    pub emergency_override: Option<EmergencyOverride>,
    pub last_applied_event_id: Option<EventId>,
    pub updated_at: Timestamp,
    /// Compare-and-set token. Zero means never persisted.
    pub version: u64,
    pub crisis_context: bool,
    pub capabilities: CapabilitySet,
    pub last_payment_succeeded_at: Option<Timestamp>,
    pub last_payment_failed_at: Option<Timestamp>,
    pub payment_retry: Option<PaymentRetry>,
    #[serde(default)]
    pub recent_event_ids: VecDeque<EventId>,
}

impl SubscriptionState {
    /// Creates the initial state for a subject the store has never seen.
    pub fn new(subject_id: SubjectId, now: Timestamp) -> Self {
        let tier = SubscriptionTier::default();
        let status = SubscriptionStatus::Active;
        Self {
            subject_id,
            tier,
            status,
            base_status: BillingStatus::Active,
            grace_period: None,
            emergency_override: None,
            last_applied_event_id: None,
            updated_at: now,
            version: 0,
            crisis_context: false,
            capabilities: capabilities_for(tier, status, None),
            last_payment_succeeded_at: None,
            last_payment_failed_at: None,
            payment_retry: None,
            recent_event_ids: VecDeque::new(),
        }
    }

    pub fn grace_active(&self) -> bool {
        self.grace_period.as_ref().map_or(false, GracePeriod::is_active)
    }

    pub fn override_active(&self) -> bool {
        self.emergency_override
            .as_ref()
            .map_or(false, EmergencyOverride::is_active)
    }

    /// True whenever a grace period or an emergency override is active.
    pub fn has_safety_access(&self) -> bool {
        self.grace_active() || self.override_active()
    }

    /// Returns true if the event was one of the recently applied ones.
    pub fn has_applied(&self, event_id: &EventId) -> bool {
        self.recent_event_ids.iter().any(|id| id == event_id)
    }

    /// Returns true if a sweep has something to do at `now`.
    pub fn has_due_deadline(&self, now: Timestamp) -> bool {
        self.grace_period.as_ref().map_or(false, |g| g.is_due_at(now))
            || self
                .emergency_override
                .as_ref()
                .map_or(false, |o| o.is_expired_at(now))
    }

    /// Earliest pending deadline, if any.
    pub fn next_deadline(&self) -> Option<Timestamp> {
        let grace = self
            .grace_period
            .as_ref()
            .filter(|g| g.is_active())
            .map(|g| g.ends_at);
        let over = self
            .emergency_override
            .as_ref()
            .filter(|o| o.is_active())
            .and_then(|o| o.expires_at);
        match (grace, over) {
            (Some(a), Some(b)) => Some(if a.is_before(&b) { a } else { b }),
            (a, b) => a.or(b),
        }
    }

    fn recompute(&mut self) {
        self.status = SubscriptionStatus::derive(
            self.base_status,
            self.grace_active(),
            self.override_active(),
        );
        let level = self
            .emergency_override
            .as_ref()
            .filter(|o| o.is_active())
            .map(|o| o.access_level);
        self.capabilities = capabilities_for(self.tier, self.status, level);
    }

    fn remember(&mut self, event_id: &EventId) {
        if self.has_applied(event_id) {
            return;
        }
        self.recent_event_ids.push_back(event_id.clone());
        while self.recent_event_ids.len() > RECENT_EVENT_WINDOW {
            self.recent_event_ids.pop_front();
        }
    }
}

/// A direct change to snapshot fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateChange {
    SetTier(SubscriptionTier),
    SetBillingStatus(BillingStatus),
    RecordPaymentSucceeded { at: Timestamp },
    RecordPaymentFailed { at: Timestamp },
    SetCrisisContext(bool),
    ClearPaymentRetry,
}

/// A transition of one of the safety state machines, or an audit note.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SideEffect {
    ActivateGracePeriod {
        reason: GraceReason,
        triggered_at: Timestamp,
    },
    ExtendGracePeriod,
    CloseGracePeriod {
        paid_at: Timestamp,
    },
    ExpireGracePeriod,
    ActivateEmergencyOverride {
        reason: OverrideReason,
        access_level: AccessLevel,
    },
    ExpireEmergencyOverride,
    DeactivateEmergencyOverride {
        actor: String,
        note: Option<String>,
    },
    SchedulePaymentRetry {
        attempt_count: u32,
        next_attempt_at: Option<Timestamp>,
    },
    EmitAudit {
        detail: String,
    },
}

/// What a handler (or a signal) wants to happen to a subject's state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandlerOutcome {
    pub changes: Vec<StateChange>,
    pub effects: Vec<SideEffect>,
}

impl HandlerOutcome {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn change(mut self, change: StateChange) -> Self {
        self.changes.push(change);
        self
    }

    pub fn effect(mut self, effect: SideEffect) -> Self {
        self.effects.push(effect);
        self
    }

    pub fn note(self, detail: impl Into<String>) -> Self {
        self.effect(SideEffect::EmitAudit {
            detail: detail.into(),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty() && self.effects.is_empty()
    }

    /// Appends another outcome after this one.
    pub fn merge(mut self, other: HandlerOutcome) -> Self {
        self.changes.extend(other.changes);
        self.effects.extend(other.effects);
        self
    }
}

/// Configured durations for the safety state machines.
#[derive(Debug, Clone, Copy)]
pub struct TransitionRules {
    pub grace: GracePeriodStateMachine,
    pub overrides: OverridePolicy,
}

impl TransitionRules {
    pub fn new(grace_period: Duration, emergency_override: Duration) -> Self {
        Self {
            grace: GracePeriodStateMachine::new(grace_period),
            overrides: OverridePolicy::new(emergency_override),
        }
    }
}

/// Result of folding an outcome into a snapshot.
#[derive(Debug, Clone)]
pub struct AppliedTransition {
    pub state: SubscriptionState,
    pub from_status: SubscriptionStatus,
    pub to_status: SubscriptionStatus,
    /// Audit notes collected from `EmitAudit` effects and from effects that
    /// had nothing to act on.
    pub notes: Vec<String>,
}

impl AppliedTransition {
    pub fn status_changed(&self) -> bool {
        self.from_status != self.to_status
    }
}

/// Folds `outcome` into `current`.
///
/// Changes apply before effects; effects apply in order. Status and
/// capabilities are recomputed afterwards. The returned snapshot keeps the
/// input `version`; the store assigns the next one on write.
pub fn apply(
    current: &SubscriptionState,
    outcome: &HandlerOutcome,
    rules: &TransitionRules,
    event_id: Option<&EventId>,
    now: Timestamp,
) -> AppliedTransition {
    let mut state = current.clone();
    let mut notes = Vec::new();

    for change in &outcome.changes {
        match change {
            StateChange::SetTier(tier) => state.tier = *tier,
            StateChange::SetBillingStatus(status) => state.base_status = *status,
            StateChange::RecordPaymentSucceeded { at } => {
                state.last_payment_succeeded_at =
                    Some(state.last_payment_succeeded_at.map_or(*at, |p| p.latest(*at)));
            }
            StateChange::RecordPaymentFailed { at } => {
                state.last_payment_failed_at =
                    Some(state.last_payment_failed_at.map_or(*at, |p| p.latest(*at)));
            }
            StateChange::SetCrisisContext(active) => state.crisis_context = *active,
            StateChange::ClearPaymentRetry => state.payment_retry = None,
        }
    }

    for effect in &outcome.effects {
        match effect {
            SideEffect::ActivateGracePeriod {
                reason,
                triggered_at,
            } => {
                state.grace_period = Some(rules.grace.activate(
                    state.grace_period.as_ref(),
                    *reason,
                    *triggered_at,
                    now,
                ));
            }
            SideEffect::ExtendGracePeriod => {
                match rules.grace.extend(state.grace_period.as_ref(), now) {
                    Some(grace) => state.grace_period = Some(grace),
                    None => notes.push("no active grace period to extend".to_string()),
                }
            }
            SideEffect::CloseGracePeriod { paid_at } => {
                if let Some(grace) =
                    rules
                        .grace
                        .close_on_payment(state.grace_period.as_ref(), *paid_at, now)
                {
                    state.grace_period = Some(grace);
                } else if state.grace_active() {
                    notes.push("grace period kept: payment predates its trigger".to_string());
                }
            }
            SideEffect::ExpireGracePeriod => {
                if let Some(expiry) =
                    rules
                        .grace
                        .expire(state.grace_period.as_ref(), state.crisis_context, now)
                {
                    if expiry.override_required {
                        state.emergency_override = Some(rules.overrides.activate(
                            state.emergency_override.as_ref(),
                            OverrideReason::GraceExpiredInCrisis,
                            AccessLevel::SafetyOnly,
                            now,
                        ));
                        notes.push("grace expired in crisis: emergency override activated".to_string());
                    }
                    state.grace_period = Some(expiry.closed);
                }
            }
            SideEffect::ActivateEmergencyOverride {
                reason,
                access_level,
            } => {
                state.emergency_override = Some(rules.overrides.activate(
                    state.emergency_override.as_ref(),
                    *reason,
                    *access_level,
                    now,
                ));
            }
            SideEffect::ExpireEmergencyOverride => {
                if let Some(expired) = rules
                    .overrides
                    .expire(state.emergency_override.as_ref(), now)
                {
                    state.emergency_override = Some(expired);
                }
            }
            SideEffect::DeactivateEmergencyOverride { actor, note } => {
                match rules.overrides.deactivate(
                    state.emergency_override.as_ref(),
                    actor,
                    note.as_deref(),
                    now,
                ) {
                    Some(off) => {
                        state.emergency_override = Some(off);
                        notes.push(format!("emergency override deactivated by {}", actor));
                    }
                    None => notes.push("no active emergency override to deactivate".to_string()),
                }
            }
            SideEffect::SchedulePaymentRetry {
                attempt_count,
                next_attempt_at,
            } => {
                state.payment_retry = Some(PaymentRetry {
                    attempt_count: *attempt_count,
                    next_attempt_at: *next_attempt_at,
                });
            }
            SideEffect::EmitAudit { detail } => notes.push(detail.clone()),
        }
    }

    state.recompute();
    state.updated_at = now;
    if let Some(id) = event_id {
        state.last_applied_event_id = Some(id.clone());
        state.remember(id);
    }

    AppliedTransition {
        from_status: current.status,
        to_status: state.status,
        state,
        notes,
    }
}
