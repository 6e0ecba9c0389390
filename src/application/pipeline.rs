//! WebhookPipeline - From raw request to projected state.
//!
//! ```text
//! validate ─▶ parse ─▶ classify ─▶ dedup ─▶ route + project (governed)
//! ```
//!
//! Classification runs before deduplication because both the replay window
//! and the dedup failure policy depend on urgency:
//!
//! | Stage      | Standard event              | Urgent event                 |
//! |------------|-----------------------------|------------------------------|
//! | Signature  | 300s window                 | 600s window                  |
//! | Dedup down | fail closed (5xx)           | fail open (proceed)          |
//! | Overrun    | wait, audit SLA miss        | forced completion            |
//!
//! A transient failure after the event id was recorded releases the record
//! so the provider's retry is processed.

use std::sync::Arc;

use axum::http::StatusCode;

use crate::domain::foundation::{EventId, Timestamp};
use crate::domain::subscription::{AuditOutcome, AuditRecord};
use crate::domain::webhook::{
    CrisisContext, ErrorKind, EventRouter, InboundEvent, ProcessingContext, SignatureCheck,
    SignatureValidator, UrgencyClassifier, WebhookError,
};
use crate::ports::{DedupOutcome, Deduplicator};

use super::governor::{GovernedOutcome, PerformanceGovernor};
use super::projector::{Projection, StateProjector};

/// An event that was processed, or safely completed.
#[derive(Debug, Clone)]
pub struct Accepted {
    pub event_id: EventId,
    pub urgent: bool,
    pub forced: bool,
    pub already_applied: bool,
    pub elapsed_ms: u64,
}

impl Accepted {
    /// Short note for the response body, if the event was not applied the
    /// ordinary way.
    pub fn note(&self) -> Option<&'static str> {
        if self.forced {
            Some("forced_completion")
        } else if self.already_applied {
            Some("already_applied")
        } else {
            None
        }
    }
}

/// An event that was not processed.
#[derive(Debug)]
pub struct Rejection {
    /// Present once the payload was parsed.
    pub event_id: Option<EventId>,
    pub error: WebhookError,
}

impl Rejection {
    fn new(event_id: Option<&EventId>, error: WebhookError) -> Self {
        Self {
            event_id: event_id.cloned(),
            error,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }

    pub fn status_code(&self) -> StatusCode {
        self.error.status_code()
    }
}

pub struct WebhookPipeline {
    validator: SignatureValidator,
    classifier: UrgencyClassifier,
    router: Arc<EventRouter>,
    dedup: Arc<dyn Deduplicator>,
    projector: Arc<StateProjector>,
    governor: PerformanceGovernor,
}

impl WebhookPipeline {
    pub fn new(
        validator: SignatureValidator,
        classifier: UrgencyClassifier,
        router: Arc<EventRouter>,
        dedup: Arc<dyn Deduplicator>,
        projector: Arc<StateProjector>,
        governor: PerformanceGovernor,
    ) -> Self {
        Self {
            validator,
            classifier,
            router,
            dedup,
            projector,
            governor,
        }
    }

    /// Processes one delivery.
    pub async fn process(&self, raw_body: &[u8], signature: &str) -> Result<Accepted, Rejection> {
        let received_at = Timestamp::now();

        let check = self
            .validator
            .verify(raw_body, signature, received_at)
            .map_err(|e| self.reject(None, e))?;

        let event = InboundEvent::parse(raw_body, signature, received_at)
            .map_err(|e| self.reject(None, e))?;
        let event_id = event.id.clone();

        let crisis = self.crisis_context(&event).await;
        let ctx = self.classifier.classify(&event, crisis);

        if check == SignatureCheck::ExtendedWindowOnly && !ctx.urgent {
            return Err(self.reject(Some(&event_id), WebhookError::TimestampOutOfRange));
        }

        if !self.router.supports(&event.event_type) {
            tracing::info!(
                event_id = %event_id,
                event_type = %event.event_type,
                "Ignoring unsupported event type"
            );
            return Err(self.reject(
                Some(&event_id),
                WebhookError::UnsupportedEventType(event.event_type.to_string()),
            ));
        }

        let recorded = self.deduplicate(&event_id, &ctx, received_at).await?;

        match self.dispatch(event, &ctx).await {
            Ok(outcome) => {
                let (forced, already_applied) = match &outcome {
                    GovernedOutcome::Completed {
                        projection: Projection::AlreadyApplied(_),
                        ..
                    } => (false, true),
                    GovernedOutcome::Completed { .. } => (false, false),
                    GovernedOutcome::ForcedCompletion { .. } => (true, false),
                };
                tracing::info!(
                    event_id = %event_id,
                    subject_id = %ctx.subject_id,
                    urgent = ctx.urgent,
                    elapsed_ms = outcome.elapsed_ms(),
                    forced,
                    "Webhook processed"
                );
                Ok(Accepted {
                    event_id,
                    urgent: ctx.urgent,
                    forced,
                    already_applied,
                    elapsed_ms: outcome.elapsed_ms(),
                })
            }
            Err(error) => {
                if recorded && error.is_retryable() {
                    if let Err(e) = self.dedup.release(&event_id).await {
                        tracing::error!(
                            event_id = %event_id,
                            error = %e,
                            "Failed to release dedup record; provider retry will be dropped"
                        );
                    }
                }
                tracing::error!(
                    event_id = %event_id,
                    subject_id = %ctx.subject_id,
                    urgent = ctx.urgent,
                    error = %error,
                    retryable = error.is_retryable(),
                    "Webhook processing failed"
                );
                self.projector.audit().emit(
                    AuditRecord::new(AuditOutcome::Failed, Timestamp::now())
                        .for_event(&event_id)
                        .for_subject(&ctx.subject_id)
                        .urgent(ctx.urgent)
                        .with_detail(format!("{}: {}", error.kind(), error)),
                );
                Err(Rejection::new(Some(&event_id), error))
            }
        }
    }

    /// Reads crisis context for classification. An unreadable store yields
    /// `Unknown`, which classifies access-threatening events as urgent.
    async fn crisis_context(&self, event: &InboundEvent) -> CrisisContext {
        match self.projector.current(&event.subject_id).await {
            Ok(state) => CrisisContext::from_flag(state.crisis_context),
            Err(e) => {
                tracing::warn!(
                    event_id = %event.id,
                    subject_id = %event.subject_id,
                    error = %e,
                    "Crisis context unavailable"
                );
                CrisisContext::Unknown
            }
        }
    }

    /// Records the event id. Returns whether a record was written.
    async fn deduplicate(
        &self,
        event_id: &EventId,
        ctx: &ProcessingContext,
        now: Timestamp,
    ) -> Result<bool, Rejection> {
        match self.dedup.check_and_record(event_id, now).await {
            Ok(DedupOutcome::FirstSeen) => Ok(true),
            Ok(DedupOutcome::Duplicate) => {
                tracing::info!(event_id = %event_id, "Duplicate delivery ignored");
                Err(self.reject(Some(event_id), WebhookError::Duplicate))
            }
            Err(e) if ctx.urgent => {
                tracing::warn!(
                    event_id = %event_id,
                    subject_id = %ctx.subject_id,
                    error = %e,
                    "Dedup store unavailable, proceeding with urgent event"
                );
                Ok(false)
            }
            Err(e) => {
                tracing::error!(event_id = %event_id, error = %e, "Dedup store unavailable");
                Err(self.reject(Some(event_id), e.into()))
            }
        }
    }

    async fn dispatch(
        &self,
        event: InboundEvent,
        ctx: &ProcessingContext,
    ) -> Result<GovernedOutcome, WebhookError> {
        let event_id = event.id.clone();
        let subject_id = event.subject_id.clone();
        let event = Arc::new(event);
        let router = Arc::clone(&self.router);
        let projector = Arc::clone(&self.projector);

        // Handlers are synchronous and may block; run them on the blocking
        // pool so the governor's timer keeps firing on this worker.
        let work = async move {
            projector
                .project_with(
                    &subject_id,
                    Some(&event.id),
                    AuditOutcome::Applied,
                    Timestamp::now(),
                    |state| {
                        let router = Arc::clone(&router);
                        let event = Arc::clone(&event);
                        let state = state.clone();
                        async move {
                            tokio::task::spawn_blocking(move || router.route(&event, &state))
                                .await
                                .map_err(|e| {
                                    WebhookError::HandlerFailed(format!("handler task failed: {}", e))
                                })?
                        }
                    },
                )
                .await
                .map_err(WebhookError::from)
        };

        self.governor.run(ctx, &event_id, work).await
    }

    fn reject(&self, event_id: Option<&EventId>, error: WebhookError) -> Rejection {
        tracing::warn!(
            event_id = ?event_id.map(EventId::as_str),
            kind = %error.kind(),
            error = %error,
            "Webhook rejected"
        );
        let mut record = AuditRecord::new(AuditOutcome::Rejected, Timestamp::now())
            .with_detail(format!("{}: {}", error.kind(), error));
        if let Some(id) = event_id {
            record = record.for_event(id);
        }
        self.projector.audit().emit(record);
        Rejection::new(event_id, error)
    }
}
