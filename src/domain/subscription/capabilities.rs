//! Capability lookup table.
//!
//! Maps `tier × status` to the set of capabilities a subject may use. The table
//! is evaluated once per state projection and stored on the snapshot, so call
//! sites read `state.capabilities` instead of re-deriving access rules.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::{AccessLevel, SubscriptionStatus, SubscriptionTier};

/// A single product capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Hotline numbers and crisis resource directory.
    CrisisResources,
    /// The subject's personal safety plan.
    SafetyPlan,
    /// One-tap contact of the subject's emergency contacts.
    EmergencyContacts,
    Journaling,
    GuidedSessions,
    ProgressInsights,
    ClinicianMessaging,
}

impl Capability {
    /// Capabilities that are safety-critical.
    pub const SAFETY: [Capability; 3] = [
        Capability::CrisisResources,
        Capability::SafetyPlan,
        Capability::EmergencyContacts,
    ];

    /// Returns true if this capability is safety-critical.
    pub fn is_safety_critical(&self) -> bool {
        Self::SAFETY.contains(self)
    }
}

/// Ordered set of capabilities.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilitySet(BTreeSet<Capability>);

impl CapabilitySet {
    /// Builds a set from a slice of capabilities.
    pub fn of(capabilities: &[Capability]) -> Self {
        Self(capabilities.iter().copied().collect())
    }

    /// Returns true if the capability is in the set.
    pub fn contains(&self, capability: Capability) -> bool {
        self.0.contains(&capability)
    }

    /// Returns true if every safety-critical capability is present.
    pub fn has_full_safety_access(&self) -> bool {
        Capability::SAFETY.iter().all(|c| self.0.contains(c))
    }

    /// Returns the union of two sets.
    pub fn union(&self, other: &CapabilitySet) -> Self {
        Self(self.0.union(&other.0).copied().collect())
    }

    /// Number of capabilities in the set.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the set is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates capabilities in a stable order.
    pub fn iter(&self) -> impl Iterator<Item = &Capability> {
        self.0.iter()
    }
}

/// Capabilities granted for a tier in good standing.
fn tier_capabilities(tier: SubscriptionTier) -> CapabilitySet {
    use Capability::*;
    match tier {
        SubscriptionTier::Free => CapabilitySet::of(&[
            CrisisResources,
            SafetyPlan,
            EmergencyContacts,
            Journaling,
        ]),
        SubscriptionTier::Standard => CapabilitySet::of(&[
            CrisisResources,
            SafetyPlan,
            EmergencyContacts,
            Journaling,
            GuidedSessions,
            ProgressInsights,
        ]),
        SubscriptionTier::Premium => CapabilitySet::of(&[
            CrisisResources,
            SafetyPlan,
            EmergencyContacts,
            Journaling,
            GuidedSessions,
            ProgressInsights,
            ClinicianMessaging,
        ]),
    }
}

/// Looks up the capability set for a projected state.
///
/// | Status | Capabilities |
/// |--------|--------------|
/// | active | tier set |
/// | past_due | tier set minus clinician messaging |
/// | grace_period | safety set + journaling |
/// | crisis_access (full) | tier set ∪ safety set |
/// | crisis_access (safety-only) | safety set |
/// | canceled | crisis resources only |
pub fn capabilities_for(
    tier: SubscriptionTier,
    status: SubscriptionStatus,
    override_level: Option<AccessLevel>,
) -> CapabilitySet {
    use Capability::*;
    let safety = CapabilitySet::of(&Capability::SAFETY);
    match status {
        SubscriptionStatus::Active => tier_capabilities(tier),
        SubscriptionStatus::PastDue => {
            let mut set = tier_capabilities(tier);
            set.0.remove(&ClinicianMessaging);
            set
        }
        SubscriptionStatus::GracePeriod => safety.union(&CapabilitySet::of(&[Journaling])),
        SubscriptionStatus::CrisisAccess => match override_level {
            Some(AccessLevel::Full) => tier_capabilities(tier).union(&safety),
            _ => safety,
        },
        SubscriptionStatus::Canceled => CapabilitySet::of(&[CrisisResources]),
    }
}
