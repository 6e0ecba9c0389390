//! Event router - dispatches events to typed handlers.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crate::domain::subscription::{HandlerOutcome, SubscriptionState};

use super::handlers::{
    EventHandler, PaymentFailedHandler, PaymentSucceededHandler, SubscriptionCanceledHandler,
    SubscriptionChangedHandler,
};
use super::{EventType, InboundEvent, WebhookError};

/// Registry of handlers keyed by event type.
///
/// Handler errors and panics never cross the router boundary as anything
/// other than a `WebhookError`.
#[derive(Clone, Default)]
pub struct EventRouter {
    handlers: HashMap<EventType, Arc<dyn EventHandler>>,
}

impl EventRouter {
    /// Creates an empty router.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a router with the built-in subscription and invoice handlers.
    pub fn with_default_handlers() -> Self {
        let mut router = Self::new();
        router.register(Arc::new(SubscriptionChangedHandler));
        router.register(Arc::new(SubscriptionCanceledHandler));
        router.register(Arc::new(PaymentFailedHandler));
        router.register(Arc::new(PaymentSucceededHandler));
        router
    }

    /// Registers a handler for every type it declares, replacing any
    /// previous handler for those types.
    pub fn register(&mut self, handler: Arc<dyn EventHandler>) {
        for event_type in handler.handles() {
            self.handlers.insert(event_type, Arc::clone(&handler));
        }
    }

    /// Returns true if a handler is registered for the type.
    pub fn supports(&self, event_type: &EventType) -> bool {
        self.handlers.contains_key(event_type)
    }

    /// Dispatches an event to its handler.
    ///
    /// # Errors
    ///
    /// - `UnsupportedEventType` - no handler registered
    /// - `HandlerFailed` - the handler panicked
    /// - whatever the handler itself returned
    pub fn route(
        &self,
        event: &InboundEvent,
        state: &SubscriptionState,
    ) -> Result<HandlerOutcome, WebhookError> {
        let handler = self
            .handlers
            .get(&event.event_type)
            .ok_or_else(|| WebhookError::UnsupportedEventType(event.event_type.to_string()))?;

        match catch_unwind(AssertUnwindSafe(|| handler.handle(event, state))) {
            Ok(result) => result,
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                tracing::error!(
                    handler = handler.name(),
                    event_id = %event.id,
                    panic = %message,
                    "Event handler panicked"
                );
                Err(WebhookError::HandlerFailed(format!(
                    "{} panicked: {}",
                    handler.name(),
                    message
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::foundation::{SubjectId, Timestamp};
    use crate::domain::webhook::event::ProviderEventBuilder;

    struct PanickingHandler;

    impl EventHandler for PanickingHandler {
        fn name(&self) -> &'static str {
            "panicking"
        }

        fn handles(&self) -> Vec<EventType> {
            vec![EventType::InvoicePaymentFailed]
        }

        fn handle(
            &self,
            _event: &InboundEvent,
            _state: &SubscriptionState,
        ) -> Result<HandlerOutcome, WebhookError> {
            panic!("boom")
        }
    }

    fn state() -> SubscriptionState {
        SubscriptionState::new(SubjectId::new("u1").unwrap(), Timestamp::now())
    }

    #[test]
    fn default_router_supports_all_known_types() {
        let router = EventRouter::with_default_handlers();
        for t in [
            EventType::SubscriptionCreated,
            EventType::SubscriptionUpdated,
            EventType::SubscriptionCanceled,
            EventType::InvoicePaymentFailed,
            EventType::InvoicePaymentSucceeded,
        ] {
            assert!(router.supports(&t), "missing handler for {}", t);
        }
    }

    #[test]
    fn unknown_type_is_unsupported() {
        let router = EventRouter::with_default_handlers();
        let event = ProviderEventBuilder::new().event_type("charge.refunded").build();

        assert!(matches!(
            router.route(&event, &state()),
            Err(WebhookError::UnsupportedEventType(t)) if t == "charge.refunded"
        ));
    }

    #[test]
    fn routes_to_registered_handler() {
        let router = EventRouter::with_default_handlers();
        let event = ProviderEventBuilder::new()
            .event_type("customer.subscription.deleted")
            .build();

        let outcome = router.route(&event, &state()).unwrap();
        assert!(!outcome.effects.is_empty());
    }

    #[test]
    fn handler_panic_becomes_handler_failed() {
        let mut router = EventRouter::with_default_handlers();
        router.register(Arc::new(PanickingHandler));
        let event = ProviderEventBuilder::new()
            .event_type("invoice.payment_failed")
            .build();

        let result = router.route(&event, &state());
        assert!(matches!(result, Err(WebhookError::HandlerFailed(msg)) if msg.contains("boom")));
    }
}
