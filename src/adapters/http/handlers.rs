//! HTTP handlers for the webhook and subject endpoints.
//!
//! These handlers connect Axum routes to the application services.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Json, Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::application::{EmergencyOverrideController, StateProjector, WebhookPipeline};
use crate::domain::foundation::{DomainError, ErrorCode, SubjectId};

use super::dto::{
    CrisisSignalRequest, DeactivateOverrideRequest, DeactivateOverrideResponse, ErrorResponse,
    SafetyAccessResponse, WebhookResponse,
};

/// Header carrying the provider's `t=...,v1=...` signature.
pub const SIGNATURE_HEADER: &str = "Provider-Signature";

// ════════════════════════════════════════════════════════════════════════════════
// Application State
// ════════════════════════════════════════════════════════════════════════════════

/// Shared state for the HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<WebhookPipeline>,
    pub overrides: Arc<EmergencyOverrideController>,
    pub projector: Arc<StateProjector>,
}

impl AppState {
    pub fn new(
        pipeline: Arc<WebhookPipeline>,
        overrides: Arc<EmergencyOverrideController>,
        projector: Arc<StateProjector>,
    ) -> Self {
        Self {
            pipeline,
            overrides,
            projector,
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// Webhook
// ════════════════════════════════════════════════════════════════════════════════

/// POST /api/webhooks/provider
///
/// A missing signature header is handled like a bad signature so the
/// rejection is audited.
pub async fn receive_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    match state.pipeline.process(&body, signature).await {
        Ok(accepted) => (StatusCode::OK, Json(WebhookResponse::from(&accepted))).into_response(),
        Err(rejection) => (
            rejection.status_code(),
            Json(WebhookResponse::from(&rejection)),
        )
            .into_response(),
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// Subjects
// ════════════════════════════════════════════════════════════════════════════════

/// GET /api/subjects/:subject_id/safety-access
pub async fn get_safety_access(
    State(state): State<AppState>,
    Path(subject_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let subject_id = SubjectId::new(subject_id).map_err(DomainError::from)?;
    let has_safety_access = state.projector.index().has_safety_access(&subject_id).await;

    Ok(Json(SafetyAccessResponse {
        subject_id: subject_id.to_string(),
        has_safety_access,
    }))
}

/// GET /api/subjects/:subject_id/state
pub async fn get_state(
    State(state): State<AppState>,
    Path(subject_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let subject_id = SubjectId::new(subject_id).map_err(DomainError::from)?;
    let snapshot = state.projector.current(&subject_id).await?;
    Ok(Json(snapshot))
}

/// POST /api/subjects/:subject_id/crisis
pub async fn post_crisis_signal(
    State(state): State<AppState>,
    Path(subject_id): Path<String>,
    Json(request): Json<CrisisSignalRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let subject_id = SubjectId::new(subject_id).map_err(DomainError::from)?;
    let snapshot = state
        .overrides
        .crisis_signal(&subject_id, request.active)
        .await?;
    Ok(Json(snapshot))
}

/// POST /api/subjects/:subject_id/emergency-override/deactivate
pub async fn deactivate_override(
    State(state): State<AppState>,
    Path(subject_id): Path<String>,
    Json(request): Json<DeactivateOverrideRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let subject_id = SubjectId::new(subject_id).map_err(DomainError::from)?;
    let actor = request.actor.trim();
    if actor.is_empty() {
        return Err(DomainError::validation("actor", "Actor is required").into());
    }

    let result = state
        .overrides
        .deactivate(&subject_id, actor, request.note.as_deref())
        .await?;
    Ok(Json(DeactivateOverrideResponse::from(result)))
}

// ════════════════════════════════════════════════════════════════════════════════
// Error Handling
// ════════════════════════════════════════════════════════════════════════════════

/// API error type that converts domain errors to HTTP responses.
#[derive(Debug)]
pub struct ApiError(DomainError);

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0.code {
            ErrorCode::ValidationFailed => StatusCode::BAD_REQUEST,
            ErrorCode::SubjectNotFound => StatusCode::NOT_FOUND,
            ErrorCode::VersionConflict => StatusCode::CONFLICT,
            _ if self.0.is_transient() => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            tracing::error!(error = %self.0, "Request failed");
        }

        let body = ErrorResponse::new(self.0.code.to_string(), self.0.message);
        (status, Json(body)).into_response()
    }
}
