//! Webhook error types.
//!
//! Every error maps to one of five kinds. Only `TransientInfraError` produces
//! a 5xx; everything else is acknowledged with a 2xx so the provider does not
//! retry a delivery that can never succeed.

use axum::http::StatusCode;
use serde::Serialize;
use thiserror::Error;

use crate::domain::foundation::DomainError;

/// Error taxonomy exposed to callers and audit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad signature or malformed payload. No state change.
    ValidationError,
    /// Already seen. No-op.
    DuplicateEvent,
    /// No handler registered for the event type.
    UnsupportedEventType,
    /// A dependency failed; the provider should retry.
    TransientInfraError,
    /// Processing overran its budget. Never surfaced to the caller.
    SlaViolation,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ValidationError => "validation_error",
            ErrorKind::DuplicateEvent => "duplicate_event",
            ErrorKind::UnsupportedEventType => "unsupported_event_type",
            ErrorKind::TransientInfraError => "transient_infra_error",
            ErrorKind::SlaViolation => "sla_violation",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that occur during webhook processing.
#[derive(Debug, Error)]
pub enum WebhookError {
    /// Signature verification failed.
    #[error("Invalid signature")]
    InvalidSignature,

    /// Signature timestamp is older than the replay window allows.
    #[error("Timestamp out of range")]
    TimestampOutOfRange,

    /// Signature timestamp is in the future beyond clock skew tolerance.
    #[error("Invalid timestamp")]
    InvalidTimestamp,

    /// Failed to parse the payload or the signature header.
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Required field missing from the payload.
    #[error("Missing field: {0}")]
    MissingField(&'static str),

    #[error("Duplicate event")]
    Duplicate,

    #[error("Unsupported event type: {0}")]
    UnsupportedEventType(String),

    /// A handler returned an error or panicked.
    #[error("Handler failed: {0}")]
    HandlerFailed(String),

    /// A store or cache could not be reached.
    #[error("Infrastructure error: {0}")]
    Infrastructure(String),

    #[error("Processing exceeded budget: {elapsed_ms}ms > {budget_ms}ms")]
    SlaViolation { elapsed_ms: u64, budget_ms: u64 },
}

impl WebhookError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            WebhookError::InvalidSignature
            | WebhookError::TimestampOutOfRange
            | WebhookError::InvalidTimestamp
            | WebhookError::ParseError(_)
            | WebhookError::MissingField(_) => ErrorKind::ValidationError,
            WebhookError::Duplicate => ErrorKind::DuplicateEvent,
            WebhookError::UnsupportedEventType(_) => ErrorKind::UnsupportedEventType,
            WebhookError::HandlerFailed(_) | WebhookError::Infrastructure(_) => {
                ErrorKind::TransientInfraError
            }
            WebhookError::SlaViolation { .. } => ErrorKind::SlaViolation,
        }
    }

    /// Returns true if the provider should retry delivering this event.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::TransientInfraError
    }

    /// Maps the error to the HTTP status returned to the provider.
    ///
    /// - 2xx: processed or safely rejected, no retry
    /// - 5xx: transient failure, provider retries
    pub fn status_code(&self) -> StatusCode {
        if self.is_retryable() {
            StatusCode::SERVICE_UNAVAILABLE
        } else {
            StatusCode::OK
        }
    }
}

impl From<DomainError> for WebhookError {
    fn from(err: DomainError) -> Self {
        if err.is_transient() {
            WebhookError::Infrastructure(err.to_string())
        } else {
            WebhookError::HandlerFailed(err.to_string())
        }
    }
}
