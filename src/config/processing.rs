//! Processing configuration (latency budgets, safety durations, workers)

use serde::Deserialize;
use std::time::Duration;

use crate::domain::subscription::TransitionRules;
use crate::domain::webhook::LatencyBudgets;

use super::error::ValidationError;

/// Processing configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ProcessingConfig {
    #[serde(default = "default_urgent_budget")]
    pub urgent_budget_ms: u64,

    #[serde(default = "default_standard_budget")]
    pub standard_budget_ms: u64,

    /// Time kept back from the urgent budget to answer the provider
    #[serde(default = "default_forced_completion_reserve")]
    pub forced_completion_reserve_ms: u64,

    #[serde(default = "default_grace_period_hours")]
    pub grace_period_hours: i64,

    #[serde(default = "default_emergency_override_hours")]
    pub emergency_override_hours: i64,

    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Compare-and-set attempts before a projection is abandoned
    #[serde(default = "default_max_projection_attempts")]
    pub max_projection_attempts: u32,

    #[serde(default = "default_audit_queue_capacity")]
    pub audit_queue_capacity: usize,

    /// Buffered snapshots per live subscriber channel
    #[serde(default = "default_subscriber_channel_capacity")]
    pub subscriber_channel_capacity: usize,
}

impl ProcessingConfig {
    pub fn latency_budgets(&self) -> LatencyBudgets {
        LatencyBudgets {
            urgent_ms: self.urgent_budget_ms,
            standard_ms: self.standard_budget_ms,
        }
    }

    pub fn transition_rules(&self) -> TransitionRules {
        TransitionRules::new(
            chrono::Duration::hours(self.grace_period_hours),
            chrono::Duration::hours(self.emergency_override_hours),
        )
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Validate processing configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.urgent_budget_ms == 0 {
            return Err(ValidationError::InvalidLatencyBudget("urgent budget is zero"));
        }
        if self.urgent_budget_ms > self.standard_budget_ms {
            return Err(ValidationError::InvalidLatencyBudget(
                "urgent budget exceeds standard budget",
            ));
        }
        if self.forced_completion_reserve_ms >= self.urgent_budget_ms {
            return Err(ValidationError::InvalidLatencyBudget(
                "reserve leaves no time for urgent processing",
            ));
        }
        if self.grace_period_hours <= 0 {
            return Err(ValidationError::NonPositiveDuration("grace_period_hours"));
        }
        if self.emergency_override_hours <= 0 {
            return Err(ValidationError::NonPositiveDuration("emergency_override_hours"));
        }
        if self.sweep_interval_secs == 0 {
            return Err(ValidationError::NonPositiveDuration("sweep_interval_secs"));
        }
        if self.max_projection_attempts == 0 {
            return Err(ValidationError::ZeroCapacity("max_projection_attempts"));
        }
        if self.audit_queue_capacity == 0 {
            return Err(ValidationError::ZeroCapacity("audit_queue_capacity"));
        }
        if self.subscriber_channel_capacity == 0 {
            return Err(ValidationError::ZeroCapacity("subscriber_channel_capacity"));
        }
        Ok(())
    }
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            urgent_budget_ms: default_urgent_budget(),
            standard_budget_ms: default_standard_budget(),
            forced_completion_reserve_ms: default_forced_completion_reserve(),
            grace_period_hours: default_grace_period_hours(),
            emergency_override_hours: default_emergency_override_hours(),
            sweep_interval_secs: default_sweep_interval(),
            max_projection_attempts: default_max_projection_attempts(),
            audit_queue_capacity: default_audit_queue_capacity(),
            subscriber_channel_capacity: default_subscriber_channel_capacity(),
        }
    }
}

fn default_urgent_budget() -> u64 {
    200
}

fn default_standard_budget() -> u64 {
    2000
}

fn default_forced_completion_reserve() -> u64 {
    50
}

fn default_grace_period_hours() -> i64 {
    168
}

fn default_emergency_override_hours() -> i64 {
    72
}

fn default_sweep_interval() -> u64 {
    30
}

fn default_max_projection_attempts() -> u32 {
    16
}

fn default_audit_queue_capacity() -> usize {
    1024
}

fn default_subscriber_channel_capacity() -> usize {
    128
}
