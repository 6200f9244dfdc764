//! Scores feedback patterns into ranked, dependency-ordered adaptation
//! decisions.

use super::policy::{default_policies, DimensionPolicy};
use super::AdaptationDecision;
use crate::patterns::{FeedbackPattern, LearningDimension};
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;
use uuid::Uuid;

pub struct AdaptationPrioritizer {
    policies: HashMap<LearningDimension, DimensionPolicy>,
}

impl AdaptationPrioritizer {
    pub fn new() -> Self {
        Self {
            policies: default_policies(),
        }
    }

    /// Use a custom policy table (tests, tuning experiments).
    pub fn with_policies(policies: HashMap<LearningDimension, DimensionPolicy>) -> Self {
        Self { policies }
    }

    /// Group patterns by dimension, score each group, and emit one decision
    /// per dimension whose score clears its activation threshold. Decisions
    /// come back sorted by priority, with declared dependencies ahead of
    /// their dependents.
    pub fn prioritize(
        &self,
        agent_id: &str,
        patterns: &[FeedbackPattern],
    ) -> Vec<AdaptationDecision> {
        let mut groups: BTreeMap<LearningDimension, Vec<&FeedbackPattern>> = BTreeMap::new();
        for pattern in patterns {
            groups.entry(pattern.dimension).or_default().push(pattern);
        }

        let mut decisions = Vec::new();
        for (dimension, group) in groups {
            let Some(policy) = self.policies.get(&dimension) else {
                continue;
            };

            let severity = mean(group.iter().map(|p| p.severity));
            let confidence = mean(group.iter().map(|p| p.confidence));
            let total_frequency: u32 = group.iter().map(|p| p.frequency).sum();
            let score = severity * confidence * (total_frequency as f64 / 10.0);

            if score < policy.activation_threshold {
                debug!(
                    dimension = %dimension,
                    score,
                    threshold = policy.activation_threshold,
                    "pattern score below activation threshold"
                );
                continue;
            }

            // The most severe pattern names the trigger and the strategy.
            let Some(leading) = group.iter().max_by(|a, b| {
                a.severity
                    .partial_cmp(&b.severity)
                    .unwrap_or(std::cmp::Ordering::Equal)
            }) else {
                continue;
            };

            decisions.push(AdaptationDecision {
                id: Uuid::new_v4(),
                agent_id: agent_id.to_string(),
                dimension,
                trigger: leading.description.clone(),
                strategy: leading.suggested_strategy,
                priority: ((1.0 + 4.0 * score).clamp(1.0, 5.0)).round() as u8,
                estimated_impact: (1.5 * score).clamp(0.0, 1.0),
                estimated_cost: policy.cost,
                risk: policy.risk,
                dependencies: policy.dependencies.clone(),
                rollback_plan: policy.rollback_plan.to_string(),
                created_at: Utc::now(),
            });
        }

        decisions.sort_by(|a, b| {
            b.priority.cmp(&a.priority).then(
                b.estimated_impact
                    .partial_cmp(&a.estimated_impact)
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
        });
        order_dependencies_first(&mut decisions);
        decisions
    }
}

impl Default for AdaptationPrioritizer {
    fn default() -> Self {
        Self::new()
    }
}

/// Stable reorder so that any selected decision appears after the selected
/// decisions for its declared dependencies.
fn order_dependencies_first(decisions: &mut Vec<AdaptationDecision>) {
    let mut changed = true;
    while changed {
        changed = false;
        'outer: for i in 0..decisions.len() {
            for j in (i + 1)..decisions.len() {
                if decisions[i].dependencies.contains(&decisions[j].dimension) {
                    let dependency = decisions.remove(j);
                    decisions.insert(i, dependency);
                    changed = true;
                    break 'outer;
                }
            }
        }
    }
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let collected: Vec<f64> = values.filter(|v| v.is_finite()).collect();
    if collected.is_empty() {
        return 0.0;
    }
    collected.iter().sum::<f64>() / collected.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patterns::{AdaptationStrategy, TrendDirection};

    fn pattern(
        dimension: LearningDimension,
        severity: f64,
        confidence: f64,
        frequency: u32,
    ) -> FeedbackPattern {
        FeedbackPattern {
            id: Uuid::new_v4(),
            dimension,
            description: format!("recurring issue in {dimension}"),
            frequency,
            severity,
            trend: TrendDirection::Degrading,
            affected_roles: Vec::new(),
            suggested_strategy: AdaptationStrategy::Targeted,
            confidence,
        }
    }

    #[test]
    fn test_below_threshold_produces_no_decision() {
        let prioritizer = AdaptationPrioritizer::new();
        // score = 0.2 * 0.5 * 0.1 = 0.01, far below Prompt's 0.30
        let patterns = vec![pattern(LearningDimension::Prompt, 0.2, 0.5, 1)];
        assert!(prioritizer.prioritize("agent-1", &patterns).is_empty());
    }

    #[test]
    fn test_qualifying_dimension_gets_ranged_fields() {
        let prioritizer = AdaptationPrioritizer::new();
        // score = 0.9 * 0.9 * 1.0 = 0.81
        let patterns = vec![pattern(LearningDimension::Prompt, 0.9, 0.9, 10)];
        let decisions = prioritizer.prioritize("agent-1", &patterns);

        assert_eq!(decisions.len(), 1);
        let decision = &decisions[0];
        assert!((1..=5).contains(&decision.priority));
        assert!((0.0..=1.0).contains(&decision.estimated_impact));
        assert!((0.0..=1.0).contains(&decision.risk));
        assert!(decision.estimated_cost > 0.0);
        assert_eq!(decision.priority, 4); // round(1 + 4*0.81)
    }

    #[test]
    fn test_dependencies_ordered_before_dependents() {
        let prioritizer = AdaptationPrioritizer::new();
        let patterns = vec![
            pattern(LearningDimension::ParameterWeights, 0.95, 0.95, 20),
            pattern(LearningDimension::Prompt, 0.6, 0.7, 10),
        ];
        let decisions = prioritizer.prioritize("agent-1", &patterns);

        assert_eq!(decisions.len(), 2);
        // ParameterWeights has higher priority but declares Prompt as a
        // dependency, so Prompt executes first.
        assert_eq!(decisions[0].dimension, LearningDimension::Prompt);
        assert_eq!(decisions[1].dimension, LearningDimension::ParameterWeights);
    }

    #[test]
    fn test_sorted_by_priority_when_independent() {
        let prioritizer = AdaptationPrioritizer::new();
        let patterns = vec![
            pattern(LearningDimension::Context, 0.7, 0.7, 10),
            pattern(LearningDimension::IntegrationFeatures, 0.95, 0.95, 20),
        ];
        let decisions = prioritizer.prioritize("agent-1", &patterns);

        assert_eq!(decisions.len(), 2);
        assert_eq!(
            decisions[0].dimension,
            LearningDimension::IntegrationFeatures
        );
        assert!(decisions[0].priority >= decisions[1].priority);
    }
}
