//! Server capability document
//!
//! Fetched from the bootstrap URL at startup and on every refresh.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Capability tags recognized by this client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ability {
    /// Rule document distribution
    Rule,
    /// Peer snapshot submission
    Submit,
}

impl Ability {
    /// Wire tag of this capability
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rule => "rule",
            Self::Submit => "submit",
        }
    }
}

impl std::fmt::Display for Ability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Server-advertised capabilities and endpoints
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BtnConfig {
    /// Capability tags; unknown tags are kept but ignored
    #[serde(default)]
    pub ability: Vec<String>,

    /// Rule endpoint, present when `rule` is advertised
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ability_rule: Option<AbilityRule>,

    /// Submission endpoint and pacing, present when `submit` is advertised
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ability_submit: Option<AbilitySubmit>,
}

/// Rule capability details
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AbilityRule {
    /// Absolute URL of the rule document
    pub endpoint: String,
}

/// Submit capability details
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AbilitySubmit {
    /// Absolute URL pings are posted to
    pub endpoint: String,
    /// Pings per batch
    pub per_batch_size: usize,
    /// Delay after each posted ping, in milliseconds
    #[serde(default)]
    pub batch_period: u64,
}

impl AbilitySubmit {
    /// Pacing delay after each ping
    pub fn batch_period(&self) -> Duration {
        Duration::from_millis(self.batch_period)
    }
}

impl BtnConfig {
    /// Check whether the server advertises a capability
    pub fn has_ability(&self, ability: Ability) -> bool {
        self.ability.iter().any(|tag| tag == ability.as_str())
    }

    /// Rule details, only if the capability is advertised
    pub fn rule(&self) -> Option<&AbilityRule> {
        if self.has_ability(Ability::Rule) {
            self.ability_rule.as_ref()
        } else {
            None
        }
    }

    /// Submit details, only if the capability is advertised
    pub fn submit(&self) -> Option<&AbilitySubmit> {
        if self.has_ability(Ability::Submit) {
            self.ability_submit.as_ref()
        } else {
            None
        }
    }
}
