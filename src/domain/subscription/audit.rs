//! Append-only audit records.

use serde::{Deserialize, Serialize};

use crate::domain::foundation::{AuditRecordId, EventId, SubjectId, Timestamp};

use super::SubscriptionStatus;

/// What happened to the event or subject being audited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    /// A projection was written.
    Applied,
    /// The event had already been applied to this subject.
    AlreadyApplied,
    /// Rejected before projection (signature, duplicate, unsupported type).
    Rejected,
    /// An urgent event overran its budget and completed through an override.
    ForcedCompletion,
    /// Processing failed and the event was left for provider retry.
    Failed,
    /// A scheduled expiry was processed.
    Expired,
    /// An emergency override was cleared by an operator.
    ManualDeactivation,
    /// A crisis signal was received.
    CrisisSignal,
}

impl AuditOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditOutcome::Applied => "applied",
            AuditOutcome::AlreadyApplied => "already_applied",
            AuditOutcome::Rejected => "rejected",
            AuditOutcome::ForcedCompletion => "forced_completion",
            AuditOutcome::Failed => "failed",
            AuditOutcome::Expired => "expired",
            AuditOutcome::ManualDeactivation => "manual_deactivation",
            AuditOutcome::CrisisSignal => "crisis_signal",
        }
    }
}

/// One audit entry. Never updated after it is written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: AuditRecordId,
    pub event_id: Option<EventId>,
    pub subject_id: Option<SubjectId>,
    pub transition_from: Option<SubscriptionStatus>,
    pub transition_to: Option<SubscriptionStatus>,
    pub processing_time_ms: Option<u64>,
    pub urgent: bool,
    pub sla_compliant: Option<bool>,
    pub outcome: AuditOutcome,
    pub detail: Option<String>,
    pub timestamp: Timestamp,
}

impl AuditRecord {
    pub fn new(outcome: AuditOutcome, timestamp: Timestamp) -> Self {
        Self {
            id: AuditRecordId::new(),
            event_id: None,
            subject_id: None,
            transition_from: None,
            transition_to: None,
            processing_time_ms: None,
            urgent: false,
            sla_compliant: None,
            outcome,
            detail: None,
            timestamp,
        }
    }

    pub fn for_event(mut self, event_id: &EventId) -> Self {
        self.event_id = Some(event_id.clone());
        self
    }

    pub fn for_subject(mut self, subject_id: &SubjectId) -> Self {
        self.subject_id = Some(subject_id.clone());
        self
    }

    pub fn with_transition(mut self, from: SubscriptionStatus, to: SubscriptionStatus) -> Self {
        self.transition_from = Some(from);
        self.transition_to = Some(to);
        self
    }

    /// Records the processing time and whether it met the budget.
    pub fn with_timing(mut self, elapsed_ms: u64, urgent: bool, budget_ms: u64) -> Self {
        self.processing_time_ms = Some(elapsed_ms);
        self.urgent = urgent;
        self.sla_compliant = Some(elapsed_ms <= budget_ms);
        self
    }

    pub fn urgent(mut self, urgent: bool) -> Self {
        self.urgent = urgent;
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timing_marks_sla_compliance() {
        let now = Timestamp::now();
        let ok = AuditRecord::new(AuditOutcome::Applied, now).with_timing(150, true, 200);
        let late = AuditRecord::new(AuditOutcome::Applied, now).with_timing(2500, false, 2000);

        assert_eq!(ok.sla_compliant, Some(true));
        assert!(ok.urgent);
        assert_eq!(late.sla_compliant, Some(false));
    }

    #[test]
    fn builder_sets_identity_and_transition() {
        let record = AuditRecord::new(AuditOutcome::Applied, Timestamp::now())
            .for_event(&EventId::from_string("evt_1"))
            .for_subject(&SubjectId::new("u1").unwrap())
            .with_transition(SubscriptionStatus::Active, SubscriptionStatus::GracePeriod)
            .with_detail("canceled");

        assert_eq!(record.event_id.unwrap().as_str(), "evt_1");
        assert_eq!(record.transition_to, Some(SubscriptionStatus::GracePeriod));
        assert_eq!(record.detail.as_deref(), Some("canceled"));
    }

    #[test]
    fn outcome_serializes_snake_case() {
        let json = serde_json::to_string(&AuditOutcome::ForcedCompletion).unwrap();
        assert_eq!(json, "\"forced_completion\"");
        assert_eq!(AuditOutcome::ForcedCompletion.as_str(), "forced_completion");
    }
}
