//! Engine configuration.

use serde::{Deserialize, Serialize};

/// Top-level configuration for the improvement engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub routing: RoutingConfig,
    /// Patterns below this confidence are discarded by the analyzer
    pub min_pattern_confidence: f64,
    /// Paired scenarios used by the shadow gate after an adaptation
    pub shadow_scenarios: usize,
    /// Bounded length of each dimension's score history
    pub score_history_limit: usize,
    pub upgrade: UpgradeConfig,
}

/// Thresholds for the per-episode focus-area rule cascade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Rule 1: retrieval hit rate below this routes to Context
    pub retrieval_hit_threshold: f64,
    /// Rule 2: any interface error rate above 1 - this routes to Integration
    pub reliability_threshold: f64,
    /// Rule 3: injected prompt-sensitivity signal above this routes to Prompt
    pub prompt_sensitivity_threshold: f64,
    /// Rule 4: F1 below 1 - this, or calibration/reliability deviation above
    /// this, routes to ParameterAdapter
    pub error_rate_threshold: f64,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            retrieval_hit_threshold: 0.70,
            reliability_threshold: 0.95,
            prompt_sensitivity_threshold: 0.30,
            error_rate_threshold: 0.10,
        }
    }
}

/// Defaults for the model-upgrade pathway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpgradeConfig {
    /// Paired scenario evaluations run during ParallelEvaluation
    pub evaluation_scenarios: usize,
    /// Synthetic teacher-style examples generated per role when
    /// distillation is enabled
    pub distillation_samples_per_role: usize,
    /// Migration gate: required share of scenarios the new system wins
    pub min_win_rate: f64,
    /// Migration gate: required mean preference score
    pub min_mean_preference: f64,
}

impl Default for UpgradeConfig {
    fn default() -> Self {
        Self {
            evaluation_scenarios: 10,
            distillation_samples_per_role: 5,
            min_win_rate: 0.70,
            min_mean_preference: 0.60,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            routing: RoutingConfig::default(),
            min_pattern_confidence: 0.30,
            shadow_scenarios: 8,
            score_history_limit: 50,
            upgrade: UpgradeConfig::default(),
        }
    }
}
