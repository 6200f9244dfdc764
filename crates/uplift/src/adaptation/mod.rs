//! Cost/risk-aware adaptation decisions and their execution.

pub mod executor;
pub mod policy;
pub mod prioritizer;

pub use executor::{AdaptationExecutor, AdaptationOutcome, DimensionHandler, HandlerOutcome};
pub use policy::{default_policies, DimensionPolicy};
pub use prioritizer::AdaptationPrioritizer;

use crate::patterns::{AdaptationStrategy, LearningDimension};
use crate::shadow::ShadowVerdict;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One proposed change to one dimension. Append-only once executed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaptationDecision {
    pub id: Uuid,
    pub agent_id: String,
    pub dimension: LearningDimension,
    pub trigger: String,
    pub strategy: AdaptationStrategy,
    /// Priority in [1,5]
    pub priority: u8,
    /// Estimated impact in [0,1]
    pub estimated_impact: f64,
    /// Estimated cost, unbounded positive
    pub estimated_cost: f64,
    /// Risk in [0,1]
    pub risk: f64,
    /// Dimensions that must be adapted before this one
    pub dependencies: Vec<LearningDimension>,
    pub rollback_plan: String,
    pub created_at: DateTime<Utc>,
}

/// Rolling per-(agent, dimension) state. Mutated only by the executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DimensionalMetrics {
    /// Current performance score in [0,1]
    pub current_score: f64,
    /// Most recent scores, bounded
    pub score_history: Vec<f64>,
    /// Stakeholder satisfaction in [0,1]
    pub satisfaction: f64,
    pub adaptation_count: u32,
    pub last_adaptation: Option<DateTime<Utc>>,
    pub cost_benefit_ratio: f64,
}

impl Default for DimensionalMetrics {
    fn default() -> Self {
        Self {
            current_score: 0.5,
            score_history: Vec::new(),
            satisfaction: 0.5,
            adaptation_count: 0,
            last_adaptation: None,
            cost_benefit_ratio: 1.0,
        }
    }
}

/// Append-only history entry for one executed decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaptationRecord {
    pub id: Uuid,
    pub decision: AdaptationDecision,
    pub before: DimensionalMetrics,
    pub after: DimensionalMetrics,
    pub changes: Vec<String>,
    pub success: bool,
    /// Verdict of the shadow gate, when the handler succeeded
    pub shadow: Option<ShadowVerdict>,
    /// Whether the change survived the shadow gate
    pub kept: bool,
    pub error: Option<String>,
    pub executed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dimensional_metrics_defaults() {
        let metrics = DimensionalMetrics::default();
        assert_eq!(metrics.current_score, 0.5);
        assert_eq!(metrics.adaptation_count, 0);
        assert!(metrics.last_adaptation.is_none());
    }
}
