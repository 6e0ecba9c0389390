//! Urgency classification.
//!
//! Decides whether an event is on the safety-critical path. When in doubt the
//! classifier says urgent: a false positive costs a tighter budget, a false
//! negative can cost a subject their crisis resources.

use serde::Serialize;
use serde_json::Value;

use crate::domain::foundation::SubjectId;

use super::InboundEvent;

/// What the engine knows about a subject's crisis state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrisisContext {
    Active,
    Inactive,
    /// The state store could not be read.
    Unknown,
}

impl CrisisContext {
    pub fn from_flag(active: bool) -> Self {
        if active {
            CrisisContext::Active
        } else {
            CrisisContext::Inactive
        }
    }
}

/// Why an event was classified the way it was.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UrgencyReason {
    /// Access-threatening event on a subject in crisis context.
    SubjectInCrisis,
    /// The payload carries a truthy crisis flag.
    CrisisFlag,
    /// A crisis signal could not be interpreted.
    Ambiguous,
    Standard,
}

/// Latency budgets per path, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatencyBudgets {
    pub urgent_ms: u64,
    pub standard_ms: u64,
}

impl Default for LatencyBudgets {
    fn default() -> Self {
        Self {
            urgent_ms: 200,
            standard_ms: 2000,
        }
    }
}

/// Per-event processing parameters. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessingContext {
    pub urgent: bool,
    pub latency_budget_ms: u64,
    pub subject_id: SubjectId,
    /// A handler failure on this event completes through an emergency
    /// override instead of failing.
    pub emergency_bypass_requested: bool,
    pub reason: UrgencyReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flag {
    Absent,
    Set(bool),
    Unreadable,
}

fn read_flag(value: Option<&Value>) -> Flag {
    match value {
        None | Some(Value::Null) => Flag::Absent,
        Some(Value::Bool(b)) => Flag::Set(*b),
        Some(Value::Number(n)) => match n.as_i64() {
            Some(0) => Flag::Set(false),
            Some(1) => Flag::Set(true),
            _ => Flag::Unreadable,
        },
        Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Flag::Set(true),
            "false" | "0" | "no" | "" => Flag::Set(false),
            _ => Flag::Unreadable,
        },
        Some(_) => Flag::Unreadable,
    }
}

/// Assigns `standard` or `urgent` to each event. Pure.
#[derive(Debug, Clone, Copy, Default)]
pub struct UrgencyClassifier {
    budgets: LatencyBudgets,
}

impl UrgencyClassifier {
    pub fn new(budgets: LatencyBudgets) -> Self {
        Self { budgets }
    }

    pub fn budgets(&self) -> LatencyBudgets {
        self.budgets
    }

    /// Classifies an event.
    ///
    /// Urgent when the event threatens access for a subject in crisis, when
    /// the payload carries a crisis flag, or when either signal is ambiguous.
    pub fn classify(&self, event: &InboundEvent, crisis: CrisisContext) -> ProcessingContext {
        let threatens = event.event_type.threatens_access();
        let flag = read_flag(event.metadata("crisis"));

        let reason = if threatens && crisis == CrisisContext::Active {
            UrgencyReason::SubjectInCrisis
        } else if flag == Flag::Set(true) {
            UrgencyReason::CrisisFlag
        } else if flag == Flag::Unreadable || (threatens && crisis == CrisisContext::Unknown) {
            UrgencyReason::Ambiguous
        } else {
            UrgencyReason::Standard
        };
        let urgent = reason != UrgencyReason::Standard;

        let bypass_flag = read_flag(event.metadata("emergency_bypass")) == Flag::Set(true);

        ProcessingContext {
            urgent,
            latency_budget_ms: if urgent {
                self.budgets.urgent_ms
            } else {
                self.budgets.standard_ms
            },
            subject_id: event.subject_id.clone(),
            emergency_bypass_requested: bypass_flag || crisis == CrisisContext::Unknown,
            reason,
        }
    }
}
