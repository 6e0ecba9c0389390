//! ExpirySweeper - Background service for scheduled expiries.
//!
//! Each cycle:
//! 1. Lists subjects whose grace period or override is due
//! 2. Expires overrides, then grace periods (a grace period that expires
//!    while the subject is in crisis hands off to a fresh override)
//! 3. Purges dedup entries past their retention window
//! 4. Drops safety-index entries that no longer grant anything
//!
//! ## Configuration
//!
//! | Setting | Default | Description |
//! |---------|---------|-------------|
//! | `interval` | 30s | How often to sweep |
//!
//! ## Graceful Shutdown
//!
//! The service listens for a shutdown signal and runs one final sweep
//! before stopping.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time;

use crate::domain::foundation::{DomainError, Timestamp};
use crate::domain::subscription::{AuditOutcome, HandlerOutcome, SideEffect};
use crate::ports::{Deduplicator, SubscriptionStore};

use super::projector::{Projection, StateProjector};

/// Configuration for the ExpirySweeper service.
#[derive(Debug, Clone)]
pub struct ExpirySweeperConfig {
    pub interval: Duration,
}

impl Default for ExpirySweeperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
        }
    }
}

impl ExpirySweeperConfig {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

/// Counts from one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Subjects whose state changed.
    pub expired: usize,
    /// Subjects that could not be written this cycle.
    pub failed: usize,
    /// Dedup entries removed.
    pub purged: u64,
    /// Idle safety-index entries dropped.
    pub pruned: usize,
}

pub struct ExpirySweeper {
    store: Arc<dyn SubscriptionStore>,
    dedup: Arc<dyn Deduplicator>,
    projector: Arc<StateProjector>,
    config: ExpirySweeperConfig,
}

impl ExpirySweeper {
    pub fn new(
        store: Arc<dyn SubscriptionStore>,
        dedup: Arc<dyn Deduplicator>,
        projector: Arc<StateProjector>,
    ) -> Self {
        Self::with_config(store, dedup, projector, ExpirySweeperConfig::default())
    }

    pub fn with_config(
        store: Arc<dyn SubscriptionStore>,
        dedup: Arc<dyn Deduplicator>,
        projector: Arc<StateProjector>,
        config: ExpirySweeperConfig,
    ) -> Self {
        Self {
            store,
            dedup,
            projector,
            config,
        }
    }

    /// Run the sweep loop until shutdown signal is received.
    ///
    /// A failed sweep is logged and retried on the next tick.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = time::interval(self.config.interval);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        self.sweep_logged().await;
                        return;
                    }
                }

                _ = interval.tick() => {
                    self.sweep_logged().await;
                }
            }
        }
    }

    /// Runs exactly one sweep at `now`.
    pub async fn sweep_once(&self, now: Timestamp) -> Result<SweepReport, DomainError> {
        let due = self.store.list_with_deadlines(now).await?;
        let mut report = SweepReport::default();

        for state in due {
            let result = self
                .projector
                .project_at(&state.subject_id, None, AuditOutcome::Expired, now, |current| {
                    let mut outcome = HandlerOutcome::new();
                    if current
                        .emergency_override
                        .as_ref()
                        .map_or(false, |o| o.is_expired_at(now))
                    {
                        outcome = outcome.effect(SideEffect::ExpireEmergencyOverride);
                    }
                    if current.grace_period.as_ref().map_or(false, |g| g.is_due_at(now)) {
                        outcome = outcome.effect(SideEffect::ExpireGracePeriod);
                    }
                    Ok(outcome)
                })
                .await;

            match result {
                Ok(Projection::Applied(_)) => report.expired += 1,
                Ok(_) => {}
                Err(e) => {
                    tracing::error!(
                        subject_id = %state.subject_id,
                        error = %e,
                        "Failed to expire subject state"
                    );
                    report.failed += 1;
                }
            }
        }

        report.purged = self.dedup.purge_expired(now).await?;
        report.pruned = self.projector.index().prune(now);
        Ok(report)
    }

    async fn sweep_logged(&self) {
        match self.sweep_once(Timestamp::now()).await {
            Ok(report) if report != SweepReport::default() => {
                tracing::info!(
                    expired = report.expired,
                    failed = report.failed,
                    purged = report.purged,
                    pruned = report.pruned,
                    "Expiry sweep completed"
                );
            }
            Ok(_) => {}
            Err(e) => tracing::error!(error = %e, "Expiry sweep failed"),
        }
    }
}
