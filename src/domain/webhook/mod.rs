//! Webhook domain - inbound provider events from signature to handler outcome.
//!
//! Stages are explicit and typed:
//!
//! ```text
//! raw body ─▶ SignatureValidator ─▶ InboundEvent ─▶ UrgencyClassifier ─▶ EventRouter ─▶ HandlerOutcome
//! ```
//!
//! Deduplication and projection need storage and live in the application layer.

mod errors;
pub(crate) mod event;
mod handlers;
mod router;
mod signature;
mod urgency;

pub use errors::{ErrorKind, WebhookError};
pub use event::{EventType, InboundEvent, ProviderEvent, ProviderEventData};
pub use handlers::{
    EventHandler, PaymentFailedHandler, PaymentSucceededHandler, SubscriptionCanceledHandler,
    SubscriptionChangedHandler,
};
pub use router::EventRouter;
pub use signature::{sign_payload, ReplayWindows, SignatureCheck, SignatureHeader, SignatureValidator};
pub use urgency::{
    CrisisContext, LatencyBudgets, ProcessingContext, UrgencyClassifier, UrgencyReason,
};
