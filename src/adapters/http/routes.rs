//! Axum router configuration for the HTTP API.

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use super::handlers::{
    deactivate_override, get_safety_access, get_state, post_crisis_signal, receive_webhook,
    AppState,
};

/// Provider webhook routes.
///
/// # Routes
/// - `POST /provider` - Signed provider deliveries
pub fn webhook_routes() -> Router<AppState> {
    Router::new().route("/provider", post(receive_webhook))
}

/// Per-subject routes.
///
/// # Routes
/// - `GET /:subject_id/safety-access` - Crisis subsystem access check
/// - `GET /:subject_id/state` - Current snapshot
/// - `POST /:subject_id/crisis` - Crisis signal
/// - `POST /:subject_id/emergency-override/deactivate` - Operator deactivation
pub fn subject_routes() -> Router<AppState> {
    Router::new()
        .route("/:subject_id/safety-access", get(get_safety_access))
        .route("/:subject_id/state", get(get_state))
        .route("/:subject_id/crisis", post(post_crisis_signal))
        .route(
            "/:subject_id/emergency-override/deactivate",
            post(deactivate_override),
        )
}

/// Complete HTTP API, mounted under `/api`, with request tracing.
pub fn api_router(state: AppState) -> Router {
    Router::new()
        .nest("/api/webhooks", webhook_routes())
        .nest("/api/subjects", subject_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::adapters::memory::{InMemoryAuditLog, InMemoryDeduplicator, InMemorySubscriptionStore};
    use crate::adapters::websocket::SubjectChannels;
    use crate::application::{
        AuditDispatcher, EmergencyOverrideController, PerformanceGovernor, SafetyAccessIndex,
        StateProjector, WebhookPipeline,
    };
    use crate::domain::foundation::Timestamp;
    use crate::domain::subscription::TransitionRules;
    use crate::domain::webhook::{
        sign_payload, EventRouter, LatencyBudgets, ReplayWindows, SignatureValidator,
        UrgencyClassifier,
    };
    use secrecy::Secret;

    const SECRET: &str = "whsec_routes_test";

    // ════════════════════════════════════════════════════════════════════════════
    // Test Setup
    // ════════════════════════════════════════════════════════════════════════════

    fn test_app() -> (Router, AuditDispatcher) {
        let store = Arc::new(InMemorySubscriptionStore::new());
        let (queue, dispatcher) = AuditDispatcher::channel(Arc::new(InMemoryAuditLog::default()), 256);
        let projector = Arc::new(StateProjector::new(
            store.clone(),
            Arc::new(SubjectChannels::default()),
            Arc::new(SafetyAccessIndex::new(store)),
            queue.clone(),
            TransitionRules::new(chrono::Duration::hours(168), chrono::Duration::hours(72)),
        ));
        let overrides = Arc::new(EmergencyOverrideController::new(Arc::clone(&projector)));
        let pipeline = Arc::new(WebhookPipeline::new(
            SignatureValidator::new(Secret::new(SECRET.to_string()), ReplayWindows::default()),
            UrgencyClassifier::new(LatencyBudgets::default()),
            Arc::new(EventRouter::with_default_handlers()),
            Arc::new(InMemoryDeduplicator::new(chrono::Duration::hours(24))),
            Arc::clone(&projector),
            PerformanceGovernor::new(Arc::clone(&overrides), queue),
        ));

        (api_router(AppState::new(pipeline, overrides, projector)), dispatcher)
    }

    fn webhook_request(body: &str, signature: Option<String>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/api/webhooks/provider")
            .header("content-type", "application/json");
        if let Some(signature) = signature {
            builder = builder.header("Provider-Signature", signature);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn read_json(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn cancellation(id: &str) -> String {
        json!({
            "id": id,
            "type": "customer.subscription.deleted",
            "created": Timestamp::now().as_unix_secs(),
            "subject": "u1",
            "data": { "object": {} },
        })
        .to_string()
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Webhook Endpoint
    // ════════════════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn signed_webhook_is_accepted() {
        let (app, _dispatcher) = test_app();
        let body = cancellation("evt_http_1");
        let signature = sign_payload(SECRET, Timestamp::now().as_unix_secs(), body.as_bytes());

        let response = app.oneshot(webhook_request(&body, Some(signature))).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = read_json(response).await;
        assert_eq!(json["event_id"], "evt_http_1");
        assert_eq!(json["accepted"], true);
    }

    #[tokio::test]
    async fn missing_signature_is_rejected_with_200() {
        let (app, _dispatcher) = test_app();

        let response = app
            .oneshot(webhook_request(&cancellation("evt_http_2"), None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = read_json(response).await;
        assert_eq!(json["accepted"], false);
        assert_eq!(json["reason"], "validation_error");
    }

    #[tokio::test]
    async fn redelivery_is_reported_as_duplicate() {
        let (app, _dispatcher) = test_app();
        let body = cancellation("evt_http_3");
        let signature = sign_payload(SECRET, Timestamp::now().as_unix_secs(), body.as_bytes());

        let first = app
            .clone()
            .oneshot(webhook_request(&body, Some(signature.clone())))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let second = app.oneshot(webhook_request(&body, Some(signature))).await.unwrap();

        assert_eq!(second.status(), StatusCode::OK);
        let json = read_json(second).await;
        assert_eq!(json["accepted"], false);
        assert_eq!(json["reason"], "duplicate_event");
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Subject Endpoints
    // ════════════════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn unknown_subject_has_no_safety_access() {
        let (app, _dispatcher) = test_app();

        let response = app.oneshot(get("/api/subjects/u9/safety-access")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = read_json(response).await;
        assert_eq!(json["subject_id"], "u9");
        assert_eq!(json["has_safety_access"], false);
    }

    #[tokio::test]
    async fn crisis_signal_grants_safety_access() {
        let (app, _dispatcher) = test_app();

        let response = app
            .clone()
            .oneshot(json_request("POST", "/api/subjects/u1/crisis", json!({ "active": true })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let snapshot = read_json(response).await;
        assert_eq!(snapshot["crisis_context"], true);

        let response = app.oneshot(get("/api/subjects/u1/safety-access")).await.unwrap();
        let json = read_json(response).await;
        assert_eq!(json["has_safety_access"], true);
    }

    #[tokio::test]
    async fn deactivation_clears_override() {
        let (app, _dispatcher) = test_app();
        app.clone()
            .oneshot(json_request("POST", "/api/subjects/u1/crisis", json!({ "active": true })))
            .await
            .unwrap();

        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/subjects/u1/emergency-override/deactivate",
                json!({ "actor": "ops@example.com", "note": "resolved" }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = read_json(response).await;
        assert_eq!(json["deactivated"], true);

        let response = app.oneshot(get("/api/subjects/u1/safety-access")).await.unwrap();
        assert_eq!(read_json(response).await["has_safety_access"], false);
    }

    #[tokio::test]
    async fn deactivation_requires_actor() {
        let (app, _dispatcher) = test_app();

        let response = app
            .oneshot(json_request(
                "POST",
                "/api/subjects/u1/emergency-override/deactivate",
                json!({ "actor": "  " }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(read_json(response).await["error_code"], "VALIDATION_FAILED");
    }

    #[tokio::test]
    async fn state_of_unknown_subject_is_default() {
        let (app, _dispatcher) = test_app();

        let response = app.oneshot(get("/api/subjects/u2/state")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = read_json(response).await;
        assert_eq!(json["subject_id"], "u2");
        assert_eq!(json["version"], 0);
    }
}
