//! Per-dimension activation thresholds, cost/risk figures and dependency
//! edges, kept as static configuration data so the routing logic and the
//! tuning numbers can be tested independently.

use crate::patterns::LearningDimension;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DimensionPolicy {
    /// Pattern score required before a decision is produced; ascending with
    /// the risk of changing the dimension
    pub activation_threshold: f64,
    /// Relative cost of one adaptation, unbounded positive
    pub cost: f64,
    /// Risk in [0,1]
    pub risk: f64,
    /// Dimensions that must be adapted before this one
    pub dependencies: Vec<LearningDimension>,
    pub rollback_plan: &'static str,
}

/// The fixed policy table. BaseModel is the most expensive and riskiest
/// lever and has the highest activation bar; Prompt is the cheapest and
/// safest with the lowest.
pub fn default_policies() -> HashMap<LearningDimension, DimensionPolicy> {
    use LearningDimension::*;

    let mut policies = HashMap::new();
    policies.insert(
        BaseModel,
        DimensionPolicy {
            activation_threshold: 0.80,
            cost: 10.0,
            risk: 0.90,
            dependencies: vec![ParameterWeights, Prompt],
            rollback_plan: "restore adapters, datasets and config from the job backup namespace",
        },
    );
    policies.insert(
        ParameterWeights,
        DimensionPolicy {
            activation_threshold: 0.60,
            cost: 3.0,
            risk: 0.60,
            dependencies: vec![Prompt],
            rollback_plan: "reload the previous adapter checkpoint",
        },
    );
    policies.insert(
        IntegrationFeatures,
        DimensionPolicy {
            activation_threshold: 0.50,
            cost: 2.0,
            risk: 0.50,
            dependencies: Vec::new(),
            rollback_plan: "revert interface bindings to the recorded versions",
        },
    );
    policies.insert(
        Context,
        DimensionPolicy {
            activation_threshold: 0.40,
            cost: 1.0,
            risk: 0.30,
            dependencies: Vec::new(),
            rollback_plan: "restore the previous retrieval configuration",
        },
    );
    policies.insert(
        Prompt,
        DimensionPolicy {
            activation_threshold: 0.30,
            cost: 0.5,
            risk: 0.20,
            dependencies: Vec::new(),
            rollback_plan: "restore the previous prompt template",
        },
    );
    policies
}
