//! Grace period state machine.
//!
//! A grace period is a time-boxed, degraded-but-safe access state that follows
//! a payment failure or cancellation. While it is active, safety access is
//! guaranteed; this is enforced by the constructors, not by callers.
//!
//! ```text
//! inactive ──activate──▶ active ──crisis signal──▶ extended
//!    ▲                     │  │                       │
//!    │◀──payment succeeded─┘  └──sweep (now ≥ ends)──▶ expiring ──▶ inactive
//! ```

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::domain::foundation::{StateMachine, Timestamp};

/// Lifecycle phase of a grace period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GracePhase {
    Inactive,
    Active,
    Extended,
    Expiring,
}

impl StateMachine for GracePhase {
    fn can_transition_to(&self, target: &Self) -> bool {
        use GracePhase::*;
        matches!(
            (self, target),
            (Inactive, Active)
                | (Active, Extended)
                | (Active, Expiring)
                | (Active, Inactive)
                | (Extended, Extended)
                | (Extended, Expiring)
                | (Extended, Inactive)
                | (Expiring, Inactive)
        )
    }

    fn valid_transitions(&self) -> Vec<Self> {
        use GracePhase::*;
        match self {
            Inactive => vec![Active],
            Active => vec![Extended, Expiring, Inactive],
            Extended => vec![Extended, Expiring, Inactive],
            Expiring => vec![Inactive],
        }
    }
}

/// Why a grace period was opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GraceReason {
    PaymentFailed,
    SubscriptionCanceled,
}

/// Why a grace period was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GraceCloseReason {
    PaymentSucceeded,
    Expired,
}

/// Time-boxed degraded access state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GracePeriod {
    pub active: bool,
    pub phase: GracePhase,
    pub reason: GraceReason,
    pub started_at: Timestamp,
    pub ends_at: Timestamp,
    /// Provider creation time of the newest event that opened or re-opened
    /// this period. Payments older than this cannot close it.
    pub triggered_at: Timestamp,
    /// Always true while `active`.
    pub safety_access_guaranteed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<Timestamp>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub close_reason: Option<GraceCloseReason>,
}

impl GracePeriod {
    /// Returns true while the period grants safety access.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Returns true if the period is active and its deadline has passed.
    pub fn is_due_at(&self, now: Timestamp) -> bool {
        self.active && !now.is_before(&self.ends_at)
    }

    /// Copies the period into `target`, or `None` if the phase forbids it.
    fn advance(&self, target: GracePhase) -> Option<Self> {
        match self.phase.transition_to(target) {
            Ok(phase) => Some(GracePeriod {
                phase,
                ..self.clone()
            }),
            Err(e) => {
                tracing::warn!(error = %e, "Rejected grace period transition");
                None
            }
        }
    }

    fn closed(&self, reason: GraceCloseReason, now: Timestamp) -> Option<Self> {
        Some(GracePeriod {
            active: false,
            safety_access_guaranteed: false,
            closed_at: Some(now),
            close_reason: Some(reason),
            ..self.advance(GracePhase::Inactive)?
        })
    }
}

/// Result of sweeping an expired grace period.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraceExpiry {
    /// The closed period.
    pub closed: GracePeriod,
    /// True if an emergency override must take the period's place because
    /// the subject is still in crisis context.
    pub override_required: bool,
}

/// Pure transition functions for grace periods.
///
/// Holds the configured grace duration; every transition takes the current
/// period (if any) and returns the next one, so the caller decides how the
/// result is persisted.
#[derive(Debug, Clone, Copy)]
pub struct GracePeriodStateMachine {
    duration: Duration,
}

impl GracePeriodStateMachine {
    /// Creates a state machine whose periods last `duration`.
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }

    /// Returns the configured grace duration.
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// `inactive → active`.
    ///
    /// Idempotent: activating an already-active period keeps its start and
    /// reason, moves `ends_at` forward only, and records the newest trigger.
    pub fn activate(
        &self,
        current: Option<&GracePeriod>,
        reason: GraceReason,
        triggered_at: Timestamp,
        now: Timestamp,
    ) -> GracePeriod {
        let proposed_end = Timestamp::from_datetime(*now.as_datetime() + self.duration);
        match current.filter(|g| g.is_active()) {
            Some(existing) => GracePeriod {
                ends_at: existing.ends_at.latest(proposed_end),
                triggered_at: existing.triggered_at.latest(triggered_at),
                safety_access_guaranteed: true,
                ..existing.clone()
            },
            None => GracePeriod {
                active: true,
                phase: reopened_phase(current),
                reason,
                started_at: now,
                ends_at: proposed_end,
                triggered_at,
                safety_access_guaranteed: true,
                closed_at: None,
                close_reason: None,
            },
        }
    }

    /// `active → extended` on a crisis signal.
    ///
    /// Resets `ends_at` to `now + duration` when that is later; durations
    /// never stack. Returns `None` if there is no active period.
    pub fn extend(&self, current: Option<&GracePeriod>, now: Timestamp) -> Option<GracePeriod> {
        let existing = current.filter(|g| g.is_active())?;
        let extended = existing.advance(GracePhase::Extended)?;
        let proposed_end = Timestamp::from_datetime(*now.as_datetime() + self.duration);
        Some(GracePeriod {
            ends_at: existing.ends_at.latest(proposed_end),
            safety_access_guaranteed: true,
            ..extended
        })
    }

    /// `active|extended → inactive` on a successful payment.
    ///
    /// A payment older than the period's trigger cannot close it, so an
    /// out-of-order delivery of an older success leaves the period in place.
    pub fn close_on_payment(
        &self,
        current: Option<&GracePeriod>,
        paid_at: Timestamp,
        now: Timestamp,
    ) -> Option<GracePeriod> {
        let existing = current.filter(|g| g.is_active())?;
        if paid_at.is_before(&existing.triggered_at) {
            return None;
        }
        existing.closed(GraceCloseReason::PaymentSucceeded, now)
    }

    /// `active|extended → expiring → inactive` when the deadline has passed.
    ///
    /// Returns `None` if the period is not due.
    pub fn expire(
        &self,
        current: Option<&GracePeriod>,
        crisis_context: bool,
        now: Timestamp,
    ) -> Option<GraceExpiry> {
        let existing = current.filter(|g| g.is_due_at(now))?;
        // An expiry interrupted after the first step resumes from `expiring`.
        let expiring = if existing.phase == GracePhase::Expiring {
            existing.clone()
        } else {
            existing.advance(GracePhase::Expiring)?
        };
        Some(GraceExpiry {
            closed: expiring.closed(GraceCloseReason::Expired, now)?,
            override_required: crisis_context,
        })
    }
}

/// Phase for a newly opened period.
///
/// A closed period is `inactive`. Any other leftover phase is logged and
/// replaced, since opening a period must never be refused.
fn reopened_phase(previous: Option<&GracePeriod>) -> GracePhase {
    let from = previous.map_or(GracePhase::Inactive, |g| g.phase);
    from.transition_to(GracePhase::Active).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Opening grace period from an unexpected phase");
        GracePhase::Active
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine() -> GracePeriodStateMachine {
        GracePeriodStateMachine::new(Duration::hours(24))
    }

    fn t(secs: i64) -> Timestamp {
        Timestamp::from_unix_secs(1_700_000_000 + secs).unwrap()
    }

    // ══════════════════════════════════════════════════════════════
    // Activation
    // ══════════════════════════════════════════════════════════════

    #[test]
    fn activate_opens_period_with_safety_guarantee() {
        let grace = machine().activate(None, GraceReason::PaymentFailed, t(0), t(5));

        assert!(grace.active);
        assert_eq!(grace.phase, GracePhase::Active);
        assert!(grace.safety_access_guaranteed);
        assert_eq!(grace.started_at, t(5));
        assert_eq!(grace.ends_at, t(5).plus_hours(24));
    }

    #[test]
    fn activate_is_idempotent_and_never_shortens() {
        let m = machine();
        let first = m.activate(None, GraceReason::SubscriptionCanceled, t(0), t(0));
        let again = m.activate(Some(&first), GraceReason::PaymentFailed, t(10), t(10));

        assert_eq!(again.started_at, first.started_at);
        assert_eq!(again.reason, GraceReason::SubscriptionCanceled);
        assert_eq!(again.ends_at, t(10).plus_hours(24));
        assert_eq!(again.triggered_at, t(10));

        let stale = m.activate(Some(&again), GraceReason::PaymentFailed, t(1), t(1));
        assert_eq!(stale.ends_at, again.ends_at);
        assert_eq!(stale.triggered_at, t(10));
    }

    #[test]
    fn activate_after_close_starts_fresh_period() {
        let m = machine();
        let first = m.activate(None, GraceReason::PaymentFailed, t(0), t(0));
        let closed = m.close_on_payment(Some(&first), t(5), t(5)).unwrap();
        let reopened = m.activate(Some(&closed), GraceReason::PaymentFailed, t(20), t(20));

        assert!(reopened.active);
        assert_eq!(reopened.started_at, t(20));
        assert!(reopened.closed_at.is_none());
    }

    // ══════════════════════════════════════════════════════════════
    // Extension
    // ══════════════════════════════════════════════════════════════

    #[test]
    fn extend_resets_end_forward_without_stacking() {
        let m = machine();
        let grace = m.activate(None, GraceReason::PaymentFailed, t(0), t(0));
        let extended = m.extend(Some(&grace), t(3600)).unwrap();

        assert_eq!(extended.phase, GracePhase::Extended);
        assert_eq!(extended.ends_at, t(3600).plus_hours(24));

        let twice = m.extend(Some(&extended), t(3600)).unwrap();
        assert_eq!(twice.ends_at, extended.ends_at);
        assert!(twice.safety_access_guaranteed);
    }

    #[test]
    fn extend_without_active_period_is_none() {
        assert!(machine().extend(None, t(0)).is_none());
    }

    // ══════════════════════════════════════════════════════════════
    // Closing
    // ══════════════════════════════════════════════════════════════

    #[test]
    fn newer_payment_closes_period() {
        let m = machine();
        let grace = m.activate(None, GraceReason::PaymentFailed, t(0), t(0));
        let closed = m.close_on_payment(Some(&grace), t(10), t(11)).unwrap();

        assert!(!closed.active);
        assert_eq!(closed.phase, GracePhase::Inactive);
        assert!(!closed.safety_access_guaranteed);
        assert_eq!(closed.close_reason, Some(GraceCloseReason::PaymentSucceeded));
        assert_eq!(closed.closed_at, Some(t(11)));
    }

    #[test]
    fn older_payment_cannot_close_period() {
        let m = machine();
        let grace = m.activate(None, GraceReason::PaymentFailed, t(100), t(100));

        assert!(m.close_on_payment(Some(&grace), t(50), t(101)).is_none());
    }

    // ══════════════════════════════════════════════════════════════
    // Expiry
    // ══════════════════════════════════════════════════════════════

    #[test]
    fn expire_before_deadline_is_none() {
        let m = machine();
        let grace = m.activate(None, GraceReason::PaymentFailed, t(0), t(0));
        assert!(m.expire(Some(&grace), false, t(60)).is_none());
    }

    #[test]
    fn expire_after_deadline_closes_period() {
        let m = machine();
        let grace = m.activate(None, GraceReason::PaymentFailed, t(0), t(0));
        let expiry = m.expire(Some(&grace), false, grace.ends_at).unwrap();

        assert!(!expiry.closed.active);
        assert_eq!(expiry.closed.close_reason, Some(GraceCloseReason::Expired));
        assert!(!expiry.override_required);
    }

    #[test]
    fn expire_in_crisis_requires_override() {
        let m = machine();
        let grace = m.activate(None, GraceReason::SubscriptionCanceled, t(0), t(0));
        let expiry = m.expire(Some(&grace), true, grace.ends_at.plus_secs(1)).unwrap();

        assert!(expiry.override_required);
    }

    // ══════════════════════════════════════════════════════════════
    // Phase Machine
    // ══════════════════════════════════════════════════════════════

    #[test]
    fn phase_machine_allows_documented_paths() {
        assert!(GracePhase::Inactive.can_transition_to(&GracePhase::Active));
        assert!(GracePhase::Active.can_transition_to(&GracePhase::Extended));
        assert!(GracePhase::Extended.can_transition_to(&GracePhase::Expiring));
        assert!(GracePhase::Expiring.can_transition_to(&GracePhase::Inactive));
        assert!(!GracePhase::Inactive.can_transition_to(&GracePhase::Expiring));
        assert!(!GracePhase::Expiring.can_transition_to(&GracePhase::Active));
    }

    fn stuck_in_expiring() -> GracePeriod {
        let grace = machine().activate(None, GraceReason::PaymentFailed, t(0), t(0));
        GracePeriod {
            phase: GracePhase::Expiring,
            ..grace
        }
    }

    #[test]
    fn extend_is_refused_once_expiring() {
        assert!(machine().extend(Some(&stuck_in_expiring()), t(60)).is_none());
    }

    #[test]
    fn interrupted_expiry_resumes_to_inactive() {
        let grace = stuck_in_expiring();
        let expiry = machine().expire(Some(&grace), false, grace.ends_at).unwrap();

        assert_eq!(expiry.closed.phase, GracePhase::Inactive);
        assert!(!expiry.closed.active);
    }

    #[test]
    fn payment_closes_an_expiring_period() {
        let closed = machine()
            .close_on_payment(Some(&stuck_in_expiring()), t(10), t(10))
            .unwrap();

        assert_eq!(closed.phase, GracePhase::Inactive);
    }

    #[test]
    fn reopening_from_leftover_phase_still_opens() {
        let m = machine();
        let leftover = GracePeriod {
            active: false,
            ..stuck_in_expiring()
        };
        let reopened = m.activate(Some(&leftover), GraceReason::PaymentFailed, t(50), t(50));

        assert!(reopened.active);
        assert_eq!(reopened.phase, GracePhase::Active);
    }

    #[test]
    fn lifecycle_only_takes_legal_phase_steps() {
        let m = machine();
        let active = m.activate(None, GraceReason::PaymentFailed, t(0), t(0));
        let extended = m.extend(Some(&active), t(60)).unwrap();
        let expired = m.expire(Some(&extended), false, extended.ends_at).unwrap().closed;

        assert!(GracePhase::Inactive.can_transition_to(&active.phase));
        assert!(active.phase.can_transition_to(&extended.phase));
        assert!(extended.phase.can_transition_to(&GracePhase::Expiring));
        assert!(GracePhase::Expiring.can_transition_to(&expired.phase));
    }
}
