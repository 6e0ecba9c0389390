//! Emergency override.
//!
//! An override is the strictly higher-priority safety state. While active it
//! dominates grace and billing status. Only expiry or an explicit, audited
//! deactivation clears it.

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::domain::foundation::Timestamp;

/// Access granted while an override is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AccessLevel {
    /// Safety-critical capabilities only.
    SafetyOnly,
    /// The subject's tier capabilities plus safety capabilities.
    Full,
}

impl AccessLevel {
    /// Returns the more permissive of two levels.
    pub fn upgrade(self, other: AccessLevel) -> AccessLevel {
        self.max(other)
    }
}

/// What activated an override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverrideReason {
    CrisisDetected,
    PaymentFailedInCrisis,
    ProcessingTimeout,
    GraceExpiredInCrisis,
    HandlerFailure,
}

impl OverrideReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            OverrideReason::CrisisDetected => "crisis_detected",
            OverrideReason::PaymentFailedInCrisis => "payment_failed_in_crisis",
            OverrideReason::ProcessingTimeout => "processing_timeout",
            OverrideReason::GraceExpiredInCrisis => "grace_expired_in_crisis",
            OverrideReason::HandlerFailure => "handler_failure",
        }
    }
}

impl std::fmt::Display for OverrideReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Emergency override record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmergencyOverride {
    pub active: bool,
    pub reason: OverrideReason,
    pub activated_at: Timestamp,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<Timestamp>,
    pub access_level: AccessLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deactivated_at: Option<Timestamp>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deactivated_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deactivation_note: Option<String>,
}

impl EmergencyOverride {
    /// Returns true while the override grants access.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Returns true if the override is active and past its expiry.
    pub fn is_expired_at(&self, now: Timestamp) -> bool {
        self.active
            && self
                .expires_at
                .map(|expires| !now.is_before(&expires))
                .unwrap_or(false)
    }
}

/// Creates, merges, and clears overrides.
///
/// Every override built here is time-boxed by `duration`.
#[derive(Debug, Clone, Copy)]
pub struct OverridePolicy {
    duration: Duration,
}

impl OverridePolicy {
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// `inactive → active`, or a merge into an already-active override.
    ///
    /// A merge keeps the earlier `activated_at` and reason, takes the later
    /// expiry, and upgrades the access level without ever downgrading it.
    pub fn activate(
        &self,
        current: Option<&EmergencyOverride>,
        reason: OverrideReason,
        access_level: AccessLevel,
        now: Timestamp,
    ) -> EmergencyOverride {
        let proposed_expiry = Timestamp::from_datetime(*now.as_datetime() + self.duration);
        match current.filter(|o| o.is_active()) {
            Some(existing) => EmergencyOverride {
                expires_at: Some(
                    existing
                        .expires_at
                        .map(|e| e.latest(proposed_expiry))
                        .unwrap_or(proposed_expiry),
                ),
                access_level: existing.access_level.upgrade(access_level),
                ..existing.clone()
            },
            None => EmergencyOverride {
                active: true,
                reason,
                activated_at: now,
                expires_at: Some(proposed_expiry),
                access_level,
                deactivated_at: None,
                deactivated_by: None,
                deactivation_note: None,
            },
        }
    }

    /// `active → inactive` once the override is past its expiry.
    ///
    /// Returns `None` if it is not due.
    pub fn expire(
        &self,
        current: Option<&EmergencyOverride>,
        now: Timestamp,
    ) -> Option<EmergencyOverride> {
        let existing = current.filter(|o| o.is_expired_at(now))?;
        Some(EmergencyOverride {
            active: false,
            deactivated_at: Some(now),
            deactivated_by: Some("expiry".to_string()),
            ..existing.clone()
        })
    }

    /// `active → inactive` on explicit request.
    ///
    /// Returns `None` if there is no active override.
    pub fn deactivate(
        &self,
        current: Option<&EmergencyOverride>,
        actor: &str,
        note: Option<&str>,
        now: Timestamp,
    ) -> Option<EmergencyOverride> {
        let existing = current.filter(|o| o.is_active())?;
        Some(EmergencyOverride {
            active: false,
            deactivated_at: Some(now),
            deactivated_by: Some(actor.to_string()),
            deactivation_note: note.map(str::to_string),
            ..existing.clone()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> OverridePolicy {
        OverridePolicy::new(Duration::hours(72))
    }

    fn t(secs: i64) -> Timestamp {
        Timestamp::from_unix_secs(1_700_000_000 + secs).unwrap()
    }

    #[test]
    fn activate_is_time_boxed() {
        let o = policy().activate(None, OverrideReason::CrisisDetected, AccessLevel::SafetyOnly, t(0));

        assert!(o.is_active());
        assert_eq!(o.activated_at, t(0));
        assert_eq!(o.expires_at, Some(t(0).plus_hours(72)));
    }

    #[test]
    fn merge_keeps_start_extends_expiry_and_upgrades() {
        let p = policy();
        let first = p.activate(None, OverrideReason::PaymentFailedInCrisis, AccessLevel::SafetyOnly, t(0));
        let merged = p.activate(Some(&first), OverrideReason::ProcessingTimeout, AccessLevel::Full, t(60));

        assert_eq!(merged.activated_at, t(0));
        assert_eq!(merged.reason, OverrideReason::PaymentFailedInCrisis);
        assert_eq!(merged.expires_at, Some(t(60).plus_hours(72)));
        assert_eq!(merged.access_level, AccessLevel::Full);
    }

    #[test]
    fn merge_never_downgrades_access() {
        let p = policy();
        let full = p.activate(None, OverrideReason::CrisisDetected, AccessLevel::Full, t(0));
        let merged = p.activate(Some(&full), OverrideReason::HandlerFailure, AccessLevel::SafetyOnly, t(1));

        assert_eq!(merged.access_level, AccessLevel::Full);
    }

    #[test]
    fn expire_only_after_deadline() {
        let p = policy();
        let o = p.activate(None, OverrideReason::CrisisDetected, AccessLevel::SafetyOnly, t(0));

        assert!(p.expire(Some(&o), t(60)).is_none());

        let expired = p.expire(Some(&o), t(0).plus_hours(72)).unwrap();
        assert!(!expired.is_active());
        assert_eq!(expired.deactivated_by.as_deref(), Some("expiry"));
    }

    #[test]
    fn deactivate_records_actor_and_note() {
        let p = policy();
        let o = p.activate(None, OverrideReason::CrisisDetected, AccessLevel::SafetyOnly, t(0));
        let off = p.deactivate(Some(&o), "clinician:42", Some("stabilized"), t(10)).unwrap();

        assert!(!off.is_active());
        assert_eq!(off.deactivated_at, Some(t(10)));
        assert_eq!(off.deactivated_by.as_deref(), Some("clinician:42"));
        assert_eq!(off.deactivation_note.as_deref(), Some("stabilized"));
    }

    #[test]
    fn deactivate_without_active_override_is_none() {
        assert!(policy().deactivate(None, "ops", None, t(0)).is_none());
    }

    #[test]
    fn access_level_serializes_kebab_case() {
        assert_eq!(
            serde_json::to_string(&AccessLevel::SafetyOnly).unwrap(),
            "\"safety-only\""
        );
    }
}
