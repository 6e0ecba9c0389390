//! Request and response bodies for the HTTP API.

use serde::{Deserialize, Serialize};

use crate::application::{Accepted, Deactivation, Rejection};
use crate::domain::subscription::SubscriptionState;

// ════════════════════════════════════════════════════════════════════════════════
// Webhook
// ════════════════════════════════════════════════════════════════════════════════

/// Body returned to the provider for every delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookResponse {
    /// Missing when the payload could not be parsed.
    pub event_id: Option<String>,
    pub accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl From<&Accepted> for WebhookResponse {
    fn from(accepted: &Accepted) -> Self {
        Self {
            event_id: Some(accepted.event_id.as_str().to_string()),
            accepted: true,
            reason: accepted.note().map(str::to_string),
        }
    }
}

impl From<&Rejection> for WebhookResponse {
    fn from(rejection: &Rejection) -> Self {
        Self {
            event_id: rejection.event_id.as_ref().map(|id| id.as_str().to_string()),
            accepted: false,
            reason: Some(rejection.kind().as_str().to_string()),
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// Subjects
// ════════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyAccessResponse {
    pub subject_id: String,
    pub has_safety_access: bool,
}

/// Signal from the crisis subsystem.
#[derive(Debug, Clone, Deserialize)]
pub struct CrisisSignalRequest {
    pub active: bool,
}

/// Operator request to clear an emergency override.
#[derive(Debug, Clone, Deserialize)]
pub struct DeactivateOverrideRequest {
    pub actor: String,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeactivateOverrideResponse {
    /// False if there was no active override.
    pub deactivated: bool,
    pub state: SubscriptionState,
}

impl From<Deactivation> for DeactivateOverrideResponse {
    fn from(result: Deactivation) -> Self {
        Self {
            deactivated: result.deactivated,
            state: result.state,
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// Errors
// ════════════════════════════════════════════════════════════════════════════════

/// Error body for the subject endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error_code: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(error_code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_code: error_code.into(),
            message: message.into(),
        }
    }
}
