//! Inbound provider events.
//!
//! Only fields the engine acts on are captured; the rest of the payload is
//! kept as JSON so handlers can read provider-specific attributes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::foundation::{EventId, SubjectId, Timestamp};

use super::WebhookError;

/// Provider webhook envelope.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderEvent {
    /// Unique identifier for the event (evt_xxx format).
    pub id: String,

    #[serde(rename = "type")]
    pub event_type: String,

    /// Time at which the provider created the event (Unix seconds).
    pub created: i64,

    /// Explicit subject, when the provider was told which account this is.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,

    pub data: ProviderEventData,
}

/// Container for event-specific data.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderEventData {
    /// The object that triggered the event (shape depends on the type).
    pub object: Value,
}

/// Event types with a registered meaning.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventType {
    SubscriptionCreated,
    SubscriptionUpdated,
    SubscriptionCanceled,
    InvoicePaymentFailed,
    InvoicePaymentSucceeded,
    /// Anything else; carries the provider's type string.
    Unknown(String),
}

impl EventType {
    /// Parses a provider type string. Both the `customer.subscription.*`
    /// and the short `subscription.*` spellings are accepted.
    pub fn parse(s: &str) -> Self {
        match s {
            "customer.subscription.created" | "subscription.created" => Self::SubscriptionCreated,
            "customer.subscription.updated" | "subscription.updated" => Self::SubscriptionUpdated,
            "customer.subscription.deleted" | "subscription.canceled" => Self::SubscriptionCanceled,
            "invoice.payment_failed" => Self::InvoicePaymentFailed,
            "invoice.payment_succeeded" => Self::InvoicePaymentSucceeded,
            other => Self::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::SubscriptionCreated => "customer.subscription.created",
            Self::SubscriptionUpdated => "customer.subscription.updated",
            Self::SubscriptionCanceled => "customer.subscription.deleted",
            Self::InvoicePaymentFailed => "invoice.payment_failed",
            Self::InvoicePaymentSucceeded => "invoice.payment_succeeded",
            Self::Unknown(s) => s,
        }
    }

    /// Cancellations and payment failures are the events that can take
    /// access away, so they are the ones urgency rules care about.
    pub fn threatens_access(&self) -> bool {
        matches!(self, Self::SubscriptionCanceled | Self::InvoicePaymentFailed)
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A verified, parsed event ready for classification and routing.
#[derive(Debug, Clone)]
pub struct InboundEvent {
    pub id: EventId,
    pub event_type: EventType,
    /// The full event JSON.
    pub payload: Value,
    pub received_at: Timestamp,
    pub created_at: Timestamp,
    pub subject_id: SubjectId,
    pub signature: String,
    pub raw_body: Vec<u8>,
}

impl InboundEvent {
    /// Parses a raw body into an event.
    ///
    /// The subject is resolved from, in order: the top-level `subject`,
    /// `data.object.metadata.subject_id`, then `data.object.customer`.
    ///
    /// # Errors
    ///
    /// - `ParseError` - body is not a provider event, or `created` is out of range
    /// - `MissingField` - no event id or no resolvable subject
    pub fn parse(
        raw_body: &[u8],
        signature: &str,
        received_at: Timestamp,
    ) -> Result<Self, WebhookError> {
        let payload: Value =
            serde_json::from_slice(raw_body).map_err(|e| WebhookError::ParseError(e.to_string()))?;
        let envelope: ProviderEvent = serde_json::from_value(payload.clone())
            .map_err(|e| WebhookError::ParseError(e.to_string()))?;

        if envelope.id.trim().is_empty() {
            return Err(WebhookError::MissingField("id"));
        }

        let created_at = Timestamp::from_unix_secs(envelope.created)
            .ok_or_else(|| WebhookError::ParseError("created out of range".to_string()))?;

        let subject = resolve_subject(&envelope).ok_or(WebhookError::MissingField("subject"))?;
        let subject_id =
            SubjectId::new(subject).map_err(|_| WebhookError::MissingField("subject"))?;

        Ok(Self {
            id: EventId::from_string(envelope.id),
            event_type: EventType::parse(&envelope.event_type),
            payload,
            received_at,
            created_at,
            subject_id,
            signature: signature.to_string(),
            raw_body: raw_body.to_vec(),
        })
    }

    /// The `data.object` of the payload.
    pub fn object(&self) -> &Value {
        &self.payload["data"]["object"]
    }

    /// Reads a string field of `data.object`.
    pub fn object_str(&self, key: &str) -> Option<&str> {
        self.object().get(key).and_then(Value::as_str)
    }

    /// Looks up a metadata key, checking the envelope's `metadata` first and
    /// then `data.object.metadata`.
    pub fn metadata(&self, key: &str) -> Option<&Value> {
        self.payload
            .get("metadata")
            .and_then(|m| m.get(key))
            .or_else(|| self.object().get("metadata").and_then(|m| m.get(key)))
    }
}

fn resolve_subject(envelope: &ProviderEvent) -> Option<String> {
    let non_empty = |s: &str| (!s.trim().is_empty()).then(|| s.to_string());
    let object = &envelope.data.object;

    envelope
        .subject
        .as_deref()
        .and_then(non_empty)
        .or_else(|| {
            object
                .get("metadata")
                .and_then(|m| m.get("subject_id"))
                .and_then(Value::as_str)
                .and_then(non_empty)
        })
        .or_else(|| object.get("customer").and_then(Value::as_str).and_then(non_empty))
}

/// Builder for creating test event payloads.
#[cfg(test)]
pub struct ProviderEventBuilder {
    id: String,
    event_type: String,
    created: i64,
    subject: Option<String>,
    object: Value,
}

#[cfg(test)]
impl Default for ProviderEventBuilder {
    fn default() -> Self {
        Self {
            id: "evt_test_123".to_string(),
            event_type: "invoice.payment_failed".to_string(),
            created: chrono::Utc::now().timestamp(),
            subject: Some("u1".to_string()),
            object: serde_json::json!({}),
        }
    }
}

#[cfg(test)]
impl ProviderEventBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = event_type.into();
        self
    }

    pub fn created(mut self, created: i64) -> Self {
        self.created = created;
        self
    }

    pub fn subject(mut self, subject: Option<&str>) -> Self {
        self.subject = subject.map(str::to_string);
        self
    }

    pub fn object(mut self, object: Value) -> Self {
        self.object = object;
        self
    }

    pub fn to_json(&self) -> String {
        let mut event = serde_json::json!({
            "id": self.id,
            "type": self.event_type,
            "created": self.created,
            "data": { "object": self.object },
        });
        if let Some(subject) = &self.subject {
            event["subject"] = Value::String(subject.clone());
        }
        event.to_string()
    }

    pub fn build(self) -> InboundEvent {
        let body = self.to_json();
        InboundEvent::parse(body.as_bytes(), "t=0,v1=00", Timestamp::now())
            .expect("builder produces a valid event")
    }
}
