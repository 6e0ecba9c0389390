//! Webhook configuration

use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;

use crate::domain::webhook::ReplayWindows;

use super::error::ValidationError;

/// Inbound webhook configuration
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookConfig {
    /// Shared HMAC secret (`whsec_...`)
    pub signing_secret: Secret<String>,

    /// Replay window for standard events
    #[serde(default = "default_replay_window")]
    pub replay_window_secs: i64,

    /// Replay window for urgent events
    #[serde(default = "default_urgent_replay_window")]
    pub urgent_replay_window_secs: i64,

    /// Tolerated clock skew for timestamps in the future
    #[serde(default = "default_max_clock_skew")]
    pub max_clock_skew_secs: i64,

    /// How long event ids are remembered for deduplication
    #[serde(default = "default_dedup_retention")]
    pub dedup_retention_hours: i64,
}

impl WebhookConfig {
    pub fn replay_windows(&self) -> ReplayWindows {
        ReplayWindows {
            standard_secs: self.replay_window_secs,
            urgent_secs: self.urgent_replay_window_secs,
            max_clock_skew_secs: self.max_clock_skew_secs,
        }
    }

    pub fn dedup_retention(&self) -> chrono::Duration {
        chrono::Duration::hours(self.dedup_retention_hours)
    }

    /// Validate webhook configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        let secret = self.signing_secret.expose_secret();
        if secret.is_empty() {
            return Err(ValidationError::MissingRequired("WEBHOOK__SIGNING_SECRET"));
        }
        if !secret.starts_with("whsec_") {
            return Err(ValidationError::InvalidSigningSecret);
        }
        if self.replay_window_secs <= 0 {
            return Err(ValidationError::NonPositiveDuration("replay_window_secs"));
        }
        if self.urgent_replay_window_secs < self.replay_window_secs {
            return Err(ValidationError::InvalidReplayWindows);
        }
        if self.max_clock_skew_secs < 0 {
            return Err(ValidationError::NonPositiveDuration("max_clock_skew_secs"));
        }
        if self.dedup_retention_hours <= 0 {
            return Err(ValidationError::NonPositiveDuration("dedup_retention_hours"));
        }
        Ok(())
    }
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            signing_secret: Secret::new(String::new()),
            replay_window_secs: default_replay_window(),
            urgent_replay_window_secs: default_urgent_replay_window(),
            max_clock_skew_secs: default_max_clock_skew(),
            dedup_retention_hours: default_dedup_retention(),
        }
    }
}

fn default_replay_window() -> i64 {
    300
}

fn default_urgent_replay_window() -> i64 {
    600
}

fn default_max_clock_skew() -> i64 {
    60
}

fn default_dedup_retention() -> i64 {
    24
}
