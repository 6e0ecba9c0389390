//! Subscription status and its derivation from billing and safety state.

use serde::{Deserialize, Serialize};

/// Billing standing as reported by the payment provider.
///
/// This is the status a subject would have if no safety state existed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingStatus {
    /// Paid and current.
    Active,
    /// Latest invoice failed; the provider is retrying.
    PastDue,
    /// Subscription ended by the subject or the provider.
    Canceled,
}

impl BillingStatus {
    /// Maps a provider subscription status string.
    ///
    /// Unknown statuses return `None` so the caller can leave the current
    /// billing status untouched rather than guess.
    pub fn from_provider(status: &str) -> Option<Self> {
        match status {
            "active" | "trialing" => Some(BillingStatus::Active),
            "past_due" | "unpaid" | "incomplete" => Some(BillingStatus::PastDue),
            "canceled" | "cancelled" | "incomplete_expired" => Some(BillingStatus::Canceled),
            _ => None,
        }
    }
}

/// Client-visible subscription status.
///
/// `GracePeriod` and `CrisisAccess` are degraded-but-safe states layered on top
/// of the billing status; `CrisisAccess` always wins when both apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    PastDue,
    GracePeriod,
    CrisisAccess,
    Canceled,
}

impl SubscriptionStatus {
    /// Derives the visible status.
    pub fn derive(billing: BillingStatus, grace_active: bool, override_active: bool) -> Self {
        if override_active {
            SubscriptionStatus::CrisisAccess
        } else if grace_active {
            SubscriptionStatus::GracePeriod
        } else {
            match billing {
                BillingStatus::Active => SubscriptionStatus::Active,
                BillingStatus::PastDue => SubscriptionStatus::PastDue,
                BillingStatus::Canceled => SubscriptionStatus::Canceled,
            }
        }
    }

    /// Returns true for the degraded-but-safe statuses.
    pub fn is_safety_preserving(&self) -> bool {
        matches!(
            self,
            SubscriptionStatus::GracePeriod | SubscriptionStatus::CrisisAccess
        )
    }

    /// Returns the wire name of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::GracePeriod => "grace_period",
            SubscriptionStatus::CrisisAccess => "crisis_access",
            SubscriptionStatus::Canceled => "canceled",
        }
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
