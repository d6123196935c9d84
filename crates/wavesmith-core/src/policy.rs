//! Learned policy document and the advisor seam used by dispatch.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{lenient_timestamp, FailureClass, Layer};

pub const POLICY_VERSION: &str = "1.0";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerPolicy {
    pub success_rate: f64,
    pub avg_duration_ms: Option<u64>,
    pub failure_pattern: Option<FailureClass>,
    pub suggestion: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentPolicy {
    pub success_rate: f64,
    pub suggestion: Option<String>,
}

/// `wave-policy.json`. Derived from run history; rebuilt, never edited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub layer_policies: BTreeMap<Layer, LayerPolicy>,
    #[serde(default)]
    pub agent_policies: BTreeMap<String, AgentPolicy>,
    #[serde(default)]
    pub wave_grouping_suggestion: Option<String>,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            version: default_version(),
            updated_at: None,
            layer_policies: BTreeMap::new(),
            agent_policies: BTreeMap::new(),
            wave_grouping_suggestion: None,
        }
    }
}

fn default_version() -> String {
    POLICY_VERSION.to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionKind {
    Layer,
    Agent,
    WaveGrouping,
}

impl SuggestionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SuggestionKind::Layer => "layer",
            SuggestionKind::Agent => "agent",
            SuggestionKind::WaveGrouping => "wave_grouping",
        }
    }
}

/// One advisory line, flattened out of a [`Policy`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicySuggestion {
    #[serde(rename = "type")]
    pub kind: SuggestionKind,
    pub target: Option<String>,
    pub message: String,
}

impl Policy {
    /// Flatten every non-empty suggestion: layers, then agents, then grouping.
    pub fn suggestions(&self) -> Vec<PolicySuggestion> {
        let layers = self.layer_policies.iter().filter_map(|(layer, p)| {
            p.suggestion.as_ref().map(|message| PolicySuggestion {
                kind: SuggestionKind::Layer,
                target: Some(layer.to_string()),
                message: message.clone(),
            })
        });
        let agents = self.agent_policies.iter().filter_map(|(agent, p)| {
            p.suggestion.as_ref().map(|message| PolicySuggestion {
                kind: SuggestionKind::Agent,
                target: Some(agent.clone()),
                message: message.clone(),
            })
        });
        let grouping = self.wave_grouping_suggestion.iter().map(|message| PolicySuggestion {
            kind: SuggestionKind::WaveGrouping,
            target: None,
            message: message.clone(),
        });
        layers.chain(agents).chain(grouping).collect()
    }
}

// ---------------------------------------------------------------------------
// Advisor capability
// ---------------------------------------------------------------------------

/// Source of learned policy, supplied at wiring time.
pub trait PolicyAdvisor {
    fn policy(&self) -> Option<Policy>;

    fn suggestions(&self) -> Vec<PolicySuggestion> {
        self.policy().map(|p| p.suggestions()).unwrap_or_default()
    }
}

/// Advisor used when no policy is available.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPolicy;

impl PolicyAdvisor for NoPolicy {
    fn policy(&self) -> Option<Policy> {
        None
    }
}

/// Advisor over an already-loaded policy.
impl PolicyAdvisor for Policy {
    fn policy(&self) -> Option<Policy> {
        Some(self.clone())
    }
}
