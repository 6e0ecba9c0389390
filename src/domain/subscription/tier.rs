//! Subscription tier definitions.

use serde::{Deserialize, Serialize};

use crate::domain::foundation::ValidationError;

/// Subscription tier purchased from the payment provider.
///
/// Determines which non-safety capabilities a subject can use.
/// Safety-critical capabilities never depend on tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionTier {
    /// Unpaid tier. Safety capabilities and journaling only.
    Free,
    /// Paid tier with guided sessions.
    Standard,
    /// Paid tier with clinician messaging.
    Premium,
}

impl SubscriptionTier {
    /// Returns true if this tier is a paid tier.
    pub fn is_paid(&self) -> bool {
        !matches!(self, SubscriptionTier::Free)
    }

    /// Parses the provider's plan identifier.
    ///
    /// Accepts the bare tier name as well as common plan id shapes such as
    /// `plan_premium_monthly` by looking for the tier name as a token.
    pub fn parse(value: &str) -> Result<Self, ValidationError> {
        let lowered = value.to_ascii_lowercase();
        let tokens: Vec<&str> = lowered.split(|c: char| !c.is_ascii_alphanumeric()).collect();
        if tokens.contains(&"premium") {
            Ok(SubscriptionTier::Premium)
        } else if tokens.contains(&"standard") {
            Ok(SubscriptionTier::Standard)
        } else if tokens.contains(&"free") {
            Ok(SubscriptionTier::Free)
        } else {
            Err(ValidationError::invalid_format(
                "tier",
                format!("unknown tier '{}'", value),
            ))
        }
    }
}

impl Default for SubscriptionTier {
    fn default() -> Self {
        SubscriptionTier::Free
    }
}

impl std::fmt::Display for SubscriptionTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SubscriptionTier::Free => "free",
            SubscriptionTier::Standard => "standard",
            SubscriptionTier::Premium => "premium",
        };
        write!(f, "{}", s)
    }
}
