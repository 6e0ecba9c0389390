//! Subscription domain - per-subject billing and safety state.
//!
//! Safety state is always per subject: a grace period, an emergency override,
//! and a crisis-context flag live on each `SubscriptionState`, never in a
//! process-wide mode.

mod audit;
mod capabilities;
mod emergency_override;
mod grace_period;
mod state;
mod status;
mod tier;

pub use audit::{AuditOutcome, AuditRecord};
pub use capabilities::{capabilities_for, Capability, CapabilitySet};
pub use emergency_override::{AccessLevel, EmergencyOverride, OverridePolicy, OverrideReason};
pub use grace_period::{
    GraceCloseReason, GraceExpiry, GracePeriod, GracePeriodStateMachine, GracePhase, GraceReason,
};
pub use state::{
    apply, AppliedTransition, HandlerOutcome, PaymentRetry, SideEffect, StateChange,
    SubscriptionState, TransitionRules, RECENT_EVENT_WINDOW,
};
pub use status::{BillingStatus, SubscriptionStatus};
pub use tier::SubscriptionTier;
