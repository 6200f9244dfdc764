//! Episode and audit records consumed by the engine.
//!
//! These are produced by the serving layer and are read-only here; the
//! engine never mutates or fabricates them.

use crate::error::ImprovementError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Read-only query boundary to the serving layer's episode and audit
/// storage. Implementations must not fabricate duplicates.
#[async_trait]
pub trait EpisodeSource: Send + Sync {
    async fn episodes(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<EpisodeEvent>, ImprovementError>;

    async fn audit_records(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<AuditRecord>, ImprovementError>;
}

/// Immutable record of one agent interaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodeEvent {
    pub id: Uuid,
    pub agent_id: String,
    /// Role/type of the agent, used to key drift baselines
    pub agent_type: String,
    pub timestamp: DateTime<Utc>,
    pub inputs: EpisodeInputs,
    pub predictions: EpisodePredictions,
    pub outcomes: EpisodeOutcomes,
    #[serde(default)]
    pub feedback: Vec<StakeholderFeedback>,
    #[serde(default)]
    pub interface_usage: Vec<InterfaceUsage>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EpisodeInputs {
    #[serde(default)]
    pub prompts: Vec<String>,
    #[serde(default)]
    pub tool_calls: Vec<String>,
    #[serde(default)]
    pub retrieved_context: Vec<ContextSnippet>,
}

/// One retrieved context snippet and how it fared in the episode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextSnippet {
    pub source: String,
    /// Whether the agent's final output drew on this snippet
    pub used: bool,
    /// Whether another retrieved snippet contradicted this one
    pub contradicted: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EpisodePredictions {
    pub output: String,
    /// Per-class confidence scores in [0,1]
    #[serde(default)]
    pub confidence_scores: HashMap<String, f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EpisodeOutcomes {
    /// Observed KPI values paired with their targets
    #[serde(default)]
    pub kpi_results: Vec<KpiResult>,
    /// Predicted vs actual class per decision item
    #[serde(default)]
    pub decisions: Vec<DecisionOutcome>,
    /// Overall verdict for the episode, when the serving layer knows it
    pub success: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KpiResult {
    pub name: String,
    pub target: f64,
    pub actual: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionOutcome {
    pub predicted_class: String,
    pub actual_class: String,
}

/// One stakeholder feedback entry attached to an episode or submitted
/// out-of-band in a feedback batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StakeholderFeedback {
    pub id: Uuid,
    pub stakeholder: String,
    pub feedback_type: String,
    /// Sentiment in [0,1]; 1 is fully positive
    pub sentiment: f64,
    /// Severity in [0,1]; 1 is most severe
    pub severity: f64,
    pub comment: String,
    pub timestamp: DateTime<Utc>,
}

/// Usage/health record for one external interface touched by the episode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterfaceUsage {
    pub interface: String,
    pub declared_version: String,
    pub actual_version: String,
    pub calls: u32,
    pub errors: u32,
    pub retries: u32,
    /// Time-to-recovery samples in milliseconds for failed calls
    #[serde(default)]
    pub recovery_times_ms: Vec<f64>,
}

/// Raw audit record from the episode/audit source.
///
/// Fields are optional because different event kinds carry different
/// payloads; the pattern analyzer only inspects what is present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: Uuid,
    pub agent_id: String,
    pub event_kind: String,
    pub timestamp: DateTime<Utc>,
    pub decision_confidence: Option<f64>,
    /// Agreement level across the roles that voted, in [0,1]
    pub consensus: Option<f64>,
    #[serde(default)]
    pub votes: Vec<RoleVote>,
    pub interface_success_rate: Option<f64>,
    pub interface_latency_ms: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleVote {
    pub role: String,
    pub confidence: f64,
}

impl EpisodeEvent {
    /// Minimal episode for a given agent; fields are filled in by the
    /// serving layer in production and by hand in tests.
    pub fn new(agent_id: impl Into<String>, agent_type: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            agent_id: agent_id.into(),
            agent_type: agent_type.into(),
            timestamp: Utc::now(),
            inputs: EpisodeInputs::default(),
            predictions: EpisodePredictions::default(),
            outcomes: EpisodeOutcomes::default(),
            feedback: Vec::new(),
            interface_usage: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_episode_roundtrip() {
        let mut episode = EpisodeEvent::new("agent-1", "researcher");
        episode.interface_usage.push(InterfaceUsage {
            interface: "search".to_string(),
            declared_version: "v2".to_string(),
            actual_version: "v2".to_string(),
            calls: 10,
            errors: 1,
            retries: 2,
            recovery_times_ms: vec![120.0, 340.0],
        });

        let json = serde_json::to_string(&episode).unwrap();
        let back: EpisodeEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.agent_id, "agent-1");
        assert_eq!(back.interface_usage.len(), 1);
        assert_eq!(back.interface_usage[0].calls, 10);
    }
}
