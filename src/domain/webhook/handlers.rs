//! Event handlers.
//!
//! Each handler is a pure function of `(event, current state)` returning a
//! [`HandlerOutcome`]. Handlers never touch storage; the projector applies
//! their outcome under compare-and-set.

use serde_json::Value;

use crate::domain::foundation::Timestamp;
use crate::domain::subscription::{
    AccessLevel, BillingStatus, GraceReason, HandlerOutcome, OverrideReason, SideEffect,
    StateChange, SubscriptionState, SubscriptionTier,
};

use super::{EventType, InboundEvent, WebhookError};

/// Handler for one or more event types.
///
/// Implementations should be stateless and free of I/O.
pub trait EventHandler: Send + Sync {
    /// Short name used in logs and audit details.
    fn name(&self) -> &'static str;

    /// Returns the event type(s) this handler processes.
    fn handles(&self) -> Vec<EventType>;

    fn handle(
        &self,
        event: &InboundEvent,
        state: &SubscriptionState,
    ) -> Result<HandlerOutcome, WebhookError>;
}

/// Reads the tier from `plan.tier`, `metadata.tier`, or `plan.id`.
fn read_tier(object: &Value) -> Option<Result<SubscriptionTier, WebhookError>> {
    let raw = object
        .pointer("/plan/tier")
        .or_else(|| object.pointer("/metadata/tier"))
        .or_else(|| object.pointer("/plan/id"))
        .and_then(Value::as_str)?;
    Some(SubscriptionTier::parse(raw).map_err(|e| WebhookError::ParseError(e.to_string())))
}

// ════════════════════════════════════════════════════════════════════════════
// Subscription created / updated
// ════════════════════════════════════════════════════════════════════════════

/// Syncs tier and billing status from the provider's subscription object.
///
/// Never touches the emergency override.
pub struct SubscriptionChangedHandler;

impl EventHandler for SubscriptionChangedHandler {
    fn name(&self) -> &'static str {
        "subscription_changed"
    }

    fn handles(&self) -> Vec<EventType> {
        vec![EventType::SubscriptionCreated, EventType::SubscriptionUpdated]
    }

    fn handle(
        &self,
        event: &InboundEvent,
        _state: &SubscriptionState,
    ) -> Result<HandlerOutcome, WebhookError> {
        let raw_status = event.object_str("status");
        let billing = raw_status.and_then(BillingStatus::from_provider);
        let tier = read_tier(event.object()).transpose()?;

        if billing.is_none() && tier.is_none() {
            return Err(WebhookError::MissingField("status"));
        }

        let mut outcome = HandlerOutcome::new();
        if let Some(tier) = tier {
            outcome = outcome.change(StateChange::SetTier(tier));
        }

        match billing {
            Some(BillingStatus::Active) => {
                outcome = outcome
                    .change(StateChange::SetBillingStatus(BillingStatus::Active))
                    .effect(SideEffect::CloseGracePeriod {
                        paid_at: event.created_at,
                    });
            }
            Some(BillingStatus::PastDue) => {
                outcome = outcome.change(StateChange::SetBillingStatus(BillingStatus::PastDue));
            }
            Some(BillingStatus::Canceled) => {
                outcome = outcome
                    .change(StateChange::SetBillingStatus(BillingStatus::Canceled))
                    .effect(SideEffect::ActivateGracePeriod {
                        reason: GraceReason::SubscriptionCanceled,
                        triggered_at: event.created_at,
                    });
            }
            None => {
                if let Some(status) = raw_status {
                    outcome = outcome.note(format!("unrecognized provider status '{}'", status));
                }
            }
        }

        Ok(outcome)
    }
}

// ════════════════════════════════════════════════════════════════════════════
// Subscription canceled
// ════════════════════════════════════════════════════════════════════════════

/// Cancellation always opens a grace period with safety access guaranteed.
pub struct SubscriptionCanceledHandler;

impl EventHandler for SubscriptionCanceledHandler {
    fn name(&self) -> &'static str {
        "subscription_canceled"
    }

    fn handles(&self) -> Vec<EventType> {
        vec![EventType::SubscriptionCanceled]
    }

    fn handle(
        &self,
        event: &InboundEvent,
        _state: &SubscriptionState,
    ) -> Result<HandlerOutcome, WebhookError> {
        Ok(HandlerOutcome::new()
            .change(StateChange::SetBillingStatus(BillingStatus::Canceled))
            .effect(SideEffect::ActivateGracePeriod {
                reason: GraceReason::SubscriptionCanceled,
                triggered_at: event.created_at,
            }))
    }
}

// ════════════════════════════════════════════════════════════════════════════
// Invoice payment failed
// ════════════════════════════════════════════════════════════════════════════

/// Moves the subject to past due behind a grace period.
///
/// A failure older than an already-recorded success is noted and otherwise
/// ignored. A subject in crisis context also gets an emergency override.
pub struct PaymentFailedHandler;

impl EventHandler for PaymentFailedHandler {
    fn name(&self) -> &'static str {
        "payment_failed"
    }

    fn handles(&self) -> Vec<EventType> {
        vec![EventType::InvoicePaymentFailed]
    }

    fn handle(
        &self,
        event: &InboundEvent,
        state: &SubscriptionState,
    ) -> Result<HandlerOutcome, WebhookError> {
        let failed_at = event.created_at;
        let mut outcome =
            HandlerOutcome::new().change(StateChange::RecordPaymentFailed { at: failed_at });

        let superseded = state
            .last_payment_succeeded_at
            .map_or(false, |paid| !paid.is_before(&failed_at));

        if superseded {
            outcome = outcome.note("payment failure superseded by a newer successful payment");
        } else {
            outcome = outcome
                .change(StateChange::SetBillingStatus(BillingStatus::PastDue))
                .effect(SideEffect::ActivateGracePeriod {
                    reason: GraceReason::PaymentFailed,
                    triggered_at: failed_at,
                });

            let attempt_count = event
                .object()
                .get("attempt_count")
                .and_then(Value::as_u64)
                .unwrap_or(1);
            let next_attempt_at = event
                .object()
                .get("next_payment_attempt")
                .and_then(Value::as_i64)
                .and_then(Timestamp::from_unix_secs);
            outcome = outcome.effect(SideEffect::SchedulePaymentRetry {
                attempt_count: u32::try_from(attempt_count).unwrap_or(u32::MAX),
                next_attempt_at,
            });
        }

        if state.crisis_context {
            outcome = outcome.effect(SideEffect::ActivateEmergencyOverride {
                reason: OverrideReason::PaymentFailedInCrisis,
                access_level: AccessLevel::SafetyOnly,
            });
        }

        Ok(outcome)
    }
}

// ════════════════════════════════════════════════════════════════════════════
// Invoice payment succeeded
// ════════════════════════════════════════════════════════════════════════════

/// Records the payment and closes a grace period it post-dates.
///
/// The emergency override is left untouched.
pub struct PaymentSucceededHandler;

impl EventHandler for PaymentSucceededHandler {
    fn name(&self) -> &'static str {
        "payment_succeeded"
    }

    fn handles(&self) -> Vec<EventType> {
        vec![EventType::InvoicePaymentSucceeded]
    }

    fn handle(
        &self,
        event: &InboundEvent,
        state: &SubscriptionState,
    ) -> Result<HandlerOutcome, WebhookError> {
        let paid_at = event.created_at;
        let mut outcome = HandlerOutcome::new()
            .change(StateChange::RecordPaymentSucceeded { at: paid_at })
            .effect(SideEffect::CloseGracePeriod { paid_at });

        let newer_failure = state
            .last_payment_failed_at
            .map_or(false, |failed| failed.is_after(&paid_at));

        if newer_failure {
            outcome = outcome.note("payment success predates a newer failure");
        } else {
            outcome = outcome
                .change(StateChange::SetBillingStatus(BillingStatus::Active))
                .change(StateChange::ClearPaymentRetry);
        }

        Ok(outcome)
    }
}
