//! PerformanceGovernor - Latency budgets for event processing.
//!
//! Dispatch and projection run on their own task. The governor decides how
//! long the caller waits for it:
//!
//! - **Urgent**: at most `latency_budget_ms - forced_completion_reserve_ms`.
//!   On overrun the subject is pinned in the safety index and a
//!   `processing_timeout` override is written within the reserve before the
//!   caller gets a synthetic success. Work that returns after the budget
//!   (a late timer) is forced the same way. The original task is not
//!   cancelled; its result merges through the projector's compare-and-set
//!   when it finishes.
//! - **Standard**: waits to completion. Overruns are audited with
//!   `sla_compliant = false`.
//!
//! Handler failures on urgent (or bypass-requested) contexts complete through
//! a `handler_failure` override instead of surfacing an error. Infrastructure
//! failures still surface so the provider retries, but access is pinned first.
//!
//! If the store cannot take the override within the reserve, the write
//! continues in the background, the pin keeps access, and the audit record
//! says so.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::domain::foundation::{EventId, SubjectId, Timestamp};
use crate::domain::subscription::{AccessLevel, AuditOutcome, AuditRecord, OverrideReason};
use crate::domain::webhook::{ProcessingContext, WebhookError};

use super::audit_dispatcher::AuditQueue;
use super::emergency_override::EmergencyOverrideController;
use super::projector::Projection;

/// Default time kept back from the urgent budget to answer the caller.
pub const DEFAULT_FORCED_COMPLETION_RESERVE_MS: u64 = 50;

/// How a governed piece of work finished, from the caller's point of view.
#[derive(Debug, Clone)]
pub enum GovernedOutcome {
    /// The work finished and its projection is available.
    Completed { projection: Projection, elapsed_ms: u64 },
    /// The work overran or failed on an urgent path and was completed
    /// through an emergency override.
    ForcedCompletion {
        reason: OverrideReason,
        elapsed_ms: u64,
        /// False when the override write outlasted the reserve or failed;
        /// the safety-index pin covers the subject until it lands.
        override_persisted: bool,
    },
}

impl GovernedOutcome {
    pub fn elapsed_ms(&self) -> u64 {
        match self {
            GovernedOutcome::Completed { elapsed_ms, .. }
            | GovernedOutcome::ForcedCompletion { elapsed_ms, .. } => *elapsed_ms,
        }
    }

    pub fn is_forced(&self) -> bool {
        matches!(self, GovernedOutcome::ForcedCompletion { .. })
    }
}

pub struct PerformanceGovernor {
    overrides: Arc<EmergencyOverrideController>,
    audit: AuditQueue,
    reserve_ms: u64,
}

impl PerformanceGovernor {
    pub fn new(overrides: Arc<EmergencyOverrideController>, audit: AuditQueue) -> Self {
        Self {
            overrides,
            audit,
            reserve_ms: DEFAULT_FORCED_COMPLETION_RESERVE_MS,
        }
    }

    pub fn with_reserve_ms(mut self, reserve_ms: u64) -> Self {
        self.reserve_ms = reserve_ms;
        self
    }

    /// Runs `work` under the context's latency budget.
    pub async fn run<F>(
        &self,
        ctx: &ProcessingContext,
        event_id: &EventId,
        work: F,
    ) -> Result<GovernedOutcome, WebhookError>
    where
        F: Future<Output = Result<Projection, WebhookError>> + Send + 'static,
    {
        let started = Instant::now();
        let mut handle = tokio::spawn(work);

        if !ctx.urgent {
            let joined = (&mut handle).await;
            let elapsed_ms = elapsed_ms(started);
            let result = match joined {
                Ok(result) => result,
                Err(e) => Err(WebhookError::HandlerFailed(format!("processing task failed: {}", e))),
            };
            return match result {
                Ok(projection) => {
                    self.audit_standard(ctx, event_id, elapsed_ms);
                    Ok(GovernedOutcome::Completed {
                        projection,
                        elapsed_ms,
                    })
                }
                Err(e) if ctx.emergency_bypass_requested && !is_infrastructure(&e) => Ok(self
                    .force(ctx, event_id, OverrideReason::HandlerFailure, &e.to_string(), started)
                    .await),
                Err(e) => Err(e),
            };
        }

        let wait = Duration::from_millis(ctx.latency_budget_ms.saturating_sub(self.reserve_ms));
        match tokio::time::timeout(wait, &mut handle).await {
            Ok(Ok(Ok(projection))) => {
                let elapsed_ms = elapsed_ms(started);
                if elapsed_ms > ctx.latency_budget_ms {
                    // The timer fired late; the caller still gets the override.
                    return Ok(self
                        .force(
                            ctx,
                            event_id,
                            OverrideReason::ProcessingTimeout,
                            "urgent work returned after its latency budget",
                            started,
                        )
                        .await);
                }
                self.audit.emit(
                    AuditRecord::new(AuditOutcome::Applied, Timestamp::now())
                        .for_event(event_id)
                        .for_subject(&ctx.subject_id)
                        .with_timing(elapsed_ms, true, ctx.latency_budget_ms)
                        .with_detail("urgent latency budget met"),
                );
                Ok(GovernedOutcome::Completed {
                    projection,
                    elapsed_ms,
                })
            }
            Ok(Ok(Err(e))) if is_infrastructure(&e) => {
                // Keep access while the provider retries.
                self.pin(&ctx.subject_id);
                tracing::error!(
                    event_id = %event_id,
                    subject_id = %ctx.subject_id,
                    error = %e,
                    "Urgent event hit an infrastructure failure"
                );
                Err(e)
            }
            Ok(Ok(Err(e))) => Ok(self
                .force(ctx, event_id, OverrideReason::HandlerFailure, &e.to_string(), started)
                .await),
            Ok(Err(join_error)) => Ok(self
                .force(
                    ctx,
                    event_id,
                    OverrideReason::HandlerFailure,
                    &format!("processing task failed: {}", join_error),
                    started,
                )
                .await),
            Err(_) => {
                // The task keeps running; dropping the handle detaches it.
                Ok(self
                    .force(
                        ctx,
                        event_id,
                        OverrideReason::ProcessingTimeout,
                        "urgent latency budget exceeded",
                        started,
                    )
                    .await)
            }
        }
    }

    /// Pins access, then writes the override within the reserve.
    async fn force(
        &self,
        ctx: &ProcessingContext,
        event_id: &EventId,
        reason: OverrideReason,
        detail: &str,
        started: Instant,
    ) -> GovernedOutcome {
        self.pin(&ctx.subject_id);

        let overrides = Arc::clone(&self.overrides);
        let subject_id = ctx.subject_id.clone();
        let mut activation = tokio::spawn(async move {
            overrides
                .activate(&subject_id, reason, AccessLevel::SafetyOnly)
                .await
        });

        let reserve = Duration::from_millis(self.reserve_ms);
        let waited = tokio::time::timeout(reserve, &mut activation).await;
        let persistence = match waited {
            Ok(Ok(Ok(_))) => None,
            Ok(Ok(Err(e))) => Some(format!("override not persisted: {}", e)),
            Ok(Err(join_error)) => Some(format!("override task failed: {}", join_error)),
            Err(_) => {
                let subject_id = ctx.subject_id.clone();
                tokio::spawn(async move {
                    match activation.await {
                        Ok(Ok(_)) => tracing::info!(
                            subject_id = %subject_id,
                            "Background override write landed"
                        ),
                        Ok(Err(e)) => tracing::error!(
                            subject_id = %subject_id,
                            error = %e,
                            "Background override write failed"
                        ),
                        Err(e) => tracing::error!(
                            subject_id = %subject_id,
                            error = %e,
                            "Background override task failed"
                        ),
                    }
                });
                Some(format!(
                    "override still persisting after {}ms reserve, access pinned",
                    self.reserve_ms
                ))
            }
        };

        let elapsed_ms = elapsed_ms(started);
        tracing::warn!(
            event_id = %event_id,
            subject_id = %ctx.subject_id,
            urgent = ctx.urgent,
            elapsed_ms,
            reason = %reason,
            detail,
            override_persisted = persistence.is_none(),
            "Forced completion through emergency override"
        );
        if let Some(problem) = &persistence {
            tracing::error!(
                event_id = %event_id,
                subject_id = %ctx.subject_id,
                problem = %problem,
                "Forced-completion override not stored in time"
            );
        }

        let mut audit_detail = format!("{}: {}", reason, detail);
        if let Some(problem) = &persistence {
            audit_detail.push_str("; ");
            audit_detail.push_str(problem);
        }
        self.audit.emit(
            AuditRecord::new(AuditOutcome::ForcedCompletion, Timestamp::now())
                .for_event(event_id)
                .for_subject(&ctx.subject_id)
                .with_timing(elapsed_ms, ctx.urgent, ctx.latency_budget_ms)
                .with_detail(audit_detail),
        );
        GovernedOutcome::ForcedCompletion {
            reason,
            elapsed_ms,
            override_persisted: persistence.is_none(),
        }
    }

    fn pin(&self, subject_id: &SubjectId) {
        self.overrides.pin_access(subject_id);
    }

    fn audit_standard(&self, ctx: &ProcessingContext, event_id: &EventId, elapsed_ms: u64) {
        if elapsed_ms <= ctx.latency_budget_ms {
            return;
        }
        tracing::warn!(
            event_id = %event_id,
            subject_id = %ctx.subject_id,
            elapsed_ms,
            budget_ms = ctx.latency_budget_ms,
            "Standard event exceeded its latency budget"
        );
        self.audit.emit(
            AuditRecord::new(AuditOutcome::Applied, Timestamp::now())
                .for_event(event_id)
                .for_subject(&ctx.subject_id)
                .with_timing(elapsed_ms, false, ctx.latency_budget_ms)
                .with_detail(
                    WebhookError::SlaViolation {
                        elapsed_ms,
                        budget_ms: ctx.latency_budget_ms,
                    }
                    .to_string(),
                ),
        );
    }
}

fn is_infrastructure(err: &WebhookError) -> bool {
    matches!(err, WebhookError::Infrastructure(_))
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
