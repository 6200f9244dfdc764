//! Per-episode derived metrics.
//!
//! Every sub-metric is independently optional and failure-isolated: a bad
//! input degrades only that field to `None`, never the rest of the record.
//! The calculation is deterministic and idempotent, so metrics can be
//! recomputed from the episode at any time.

pub mod baseline;

pub use baseline::BaselineCache;

use crate::episode::EpisodeEvent;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Quantitative signals derived from a single episode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DerivedMetrics {
    pub episode_id: Uuid,
    pub kpi_rms_error: Option<f64>,
    pub weighted_f1: Option<f64>,
    pub calibration_error: Option<f64>,
    pub reliability_deviation: Option<f64>,
    pub distribution_drift: Option<f64>,
    pub schema_mismatch_count: Option<u32>,
    pub interface_health: HashMap<String, InterfaceHealth>,
    pub retrieval_hit_rate: Option<f64>,
    pub context_conflict_density: Option<f64>,
}

/// Health figures for one external interface over the episode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterfaceHealth {
    pub error_rate: Option<f64>,
    pub retries: u32,
    pub mean_recovery_ms: Option<f64>,
}

/// Turns one raw episode into `DerivedMetrics`. Never fails.
pub struct DerivedMetricsCalculator {
    baselines: Arc<BaselineCache>,
}

impl DerivedMetricsCalculator {
    pub fn new(baselines: Arc<BaselineCache>) -> Self {
        Self { baselines }
    }

    pub fn calculate(&self, episode: &EpisodeEvent) -> DerivedMetrics {
        DerivedMetrics {
            episode_id: episode.id,
            kpi_rms_error: self.kpi_rms_error(episode),
            weighted_f1: self.weighted_f1(episode),
            calibration_error: self.calibration_error(episode),
            reliability_deviation: self.reliability_deviation(episode),
            distribution_drift: self.distribution_drift(episode),
            schema_mismatch_count: self.schema_mismatch_count(episode),
            interface_health: self.interface_health(episode),
            retrieval_hit_rate: self.retrieval_hit_rate(episode),
            context_conflict_density: self.context_conflict_density(episode),
        }
    }

    fn kpi_rms_error(&self, episode: &EpisodeEvent) -> Option<f64> {
        let deviations: Vec<f64> = episode
            .outcomes
            .kpi_results
            .iter()
            .filter(|k| k.target.is_finite() && k.actual.is_finite())
            .map(|k| (k.actual - k.target).powi(2))
            .collect();

        if deviations.is_empty() {
            debug!(episode = %episode.id, "no usable KPI results, skipping RMS error");
            return None;
        }

        Some((deviations.iter().sum::<f64>() / deviations.len() as f64).sqrt())
    }

    /// Weighted multi-class F1 over the episode's decision outcomes,
    /// weighted by per-class support.
    fn weighted_f1(&self, episode: &EpisodeEvent) -> Option<f64> {
        let decisions = &episode.outcomes.decisions;
        if decisions.is_empty() {
            return None;
        }

        let mut classes: Vec<String> = decisions
            .iter()
            .flat_map(|d| [d.predicted_class.clone(), d.actual_class.clone()])
            .collect();
        classes.sort();
        classes.dedup();

        let total = decisions.len() as f64;
        let mut weighted_sum = 0.0;

        for class in &classes {
            let tp = decisions
                .iter()
                .filter(|d| d.predicted_class == *class && d.actual_class == *class)
                .count() as f64;
            let fp = decisions
                .iter()
                .filter(|d| d.predicted_class == *class && d.actual_class != *class)
                .count() as f64;
            let fn_ = decisions
                .iter()
                .filter(|d| d.predicted_class != *class && d.actual_class == *class)
                .count() as f64;

            let support = tp + fn_;
            if support == 0.0 {
                continue;
            }

            let precision = if tp + fp > 0.0 { tp / (tp + fp) } else { 0.0 };
            let recall = tp / support;
            let f1 = if precision + recall > 0.0 {
                2.0 * precision * recall / (precision + recall)
            } else {
                0.0
            };

            weighted_sum += f1 * (support / total);
        }

        Some(weighted_sum)
    }

    /// |mean confidence - observed accuracy| over the decision outcomes.
    fn calibration_error(&self, episode: &EpisodeEvent) -> Option<f64> {
        let mean_confidence = mean_confidence(episode)?;
        let decisions = &episode.outcomes.decisions;
        if decisions.is_empty() {
            return None;
        }

        let accuracy = decisions
            .iter()
            .filter(|d| d.predicted_class == d.actual_class)
            .count() as f64
            / decisions.len() as f64;

        Some((mean_confidence - accuracy).abs())
    }

    /// |mean confidence - success indicator| for the episode verdict.
    fn reliability_deviation(&self, episode: &EpisodeEvent) -> Option<f64> {
        let mean_confidence = mean_confidence(episode)?;
        let success = episode.outcomes.success?;
        let indicator = if success { 1.0 } else { 0.0 };
        Some((mean_confidence - indicator).abs())
    }

    /// Divergence of the episode's confidence distribution against the
    /// cached per-agent-type baseline. `None` when no baseline exists.
    fn distribution_drift(&self, episode: &EpisodeEvent) -> Option<f64> {
        let samples: Vec<f64> = episode
            .predictions
            .confidence_scores
            .values()
            .copied()
            .filter(|c| c.is_finite())
            .collect();
        if samples.is_empty() {
            return None;
        }

        let baseline = self.baselines.get(&episode.agent_type)?;
        let observed = baseline::histogram(&samples);
        Some(baseline::population_stability_index(&baseline, &observed))
    }

    fn schema_mismatch_count(&self, episode: &EpisodeEvent) -> Option<u32> {
        if episode.interface_usage.is_empty() {
            return None;
        }
        Some(
            episode
                .interface_usage
                .iter()
                .filter(|u| u.declared_version != u.actual_version)
                .count() as u32,
        )
    }

    fn interface_health(&self, episode: &EpisodeEvent) -> HashMap<String, InterfaceHealth> {
        episode
            .interface_usage
            .iter()
            .map(|usage| {
                let error_rate = if usage.calls > 0 {
                    Some(usage.errors as f64 / usage.calls as f64)
                } else {
                    debug!(interface = %usage.interface, "no calls recorded, skipping error rate");
                    None
                };

                let recovery: Vec<f64> = usage
                    .recovery_times_ms
                    .iter()
                    .copied()
                    .filter(|t| t.is_finite())
                    .collect();
                let mean_recovery_ms = if recovery.is_empty() {
                    None
                } else {
                    Some(recovery.iter().sum::<f64>() / recovery.len() as f64)
                };

                (
                    usage.interface.clone(),
                    InterfaceHealth {
                        error_rate,
                        retries: usage.retries,
                        mean_recovery_ms,
                    },
                )
            })
            .collect()
    }

    fn retrieval_hit_rate(&self, episode: &EpisodeEvent) -> Option<f64> {
        let snippets = &episode.inputs.retrieved_context;
        if snippets.is_empty() {
            return None;
        }
        let used = snippets.iter().filter(|s| s.used).count() as f64;
        Some(used / snippets.len() as f64)
    }

    fn context_conflict_density(&self, episode: &EpisodeEvent) -> Option<f64> {
        let snippets = &episode.inputs.retrieved_context;
        if snippets.is_empty() {
            return None;
        }
        let contradicted = snippets.iter().filter(|s| s.contradicted).count() as f64;
        Some(contradicted / snippets.len() as f64)
    }
}

fn mean_confidence(episode: &EpisodeEvent) -> Option<f64> {
    let confidences: Vec<f64> = episode
        .predictions
        .confidence_scores
        .values()
        .copied()
        .filter(|c| c.is_finite())
        .collect();
    if confidences.is_empty() {
        return None;
    }
    Some(confidences.iter().sum::<f64>() / confidences.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::episode::{ContextSnippet, DecisionOutcome, InterfaceUsage, KpiResult};

    fn calculator() -> DerivedMetricsCalculator {
        DerivedMetricsCalculator::new(Arc::new(BaselineCache::new()))
    }

    #[test]
    fn test_empty_episode_degrades_to_none() {
        let episode = EpisodeEvent::new("a", "worker");
        let metrics = calculator().calculate(&episode);

        assert!(metrics.kpi_rms_error.is_none());
        assert!(metrics.weighted_f1.is_none());
        assert!(metrics.calibration_error.is_none());
        assert!(metrics.reliability_deviation.is_none());
        assert!(metrics.distribution_drift.is_none());
        assert!(metrics.schema_mismatch_count.is_none());
        assert!(metrics.retrieval_hit_rate.is_none());
        assert!(metrics.interface_health.is_empty());
    }

    #[test]
    fn test_kpi_rms_error_skips_non_finite() {
        let mut episode = EpisodeEvent::new("a", "worker");
        episode.outcomes.kpi_results = vec![
            KpiResult {
                name: "latency".to_string(),
                target: 1.0,
                actual: 4.0,
            },
            KpiResult {
                name: "bad".to_string(),
                target: f64::NAN,
                actual: 2.0,
            },
        ];

        let metrics = calculator().calculate(&episode);
        assert_eq!(metrics.kpi_rms_error, Some(3.0));
    }

    #[test]
    fn test_weighted_f1_perfect_predictions() {
        let mut episode = EpisodeEvent::new("a", "worker");
        episode.outcomes.decisions = vec![
            DecisionOutcome {
                predicted_class: "approve".to_string(),
                actual_class: "approve".to_string(),
            },
            DecisionOutcome {
                predicted_class: "reject".to_string(),
                actual_class: "reject".to_string(),
            },
        ];

        let metrics = calculator().calculate(&episode);
        assert_eq!(metrics.weighted_f1, Some(1.0));
    }

    #[test]
    fn test_reliability_deviation() {
        let mut episode = EpisodeEvent::new("a", "worker");
        episode
            .predictions
            .confidence_scores
            .insert("approve".to_string(), 0.9);
        episode.outcomes.success = Some(false);

        let metrics = calculator().calculate(&episode);
        assert!((metrics.reliability_deviation.unwrap() - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_drift_requires_baseline() {
        let baselines = Arc::new(BaselineCache::new());
        let calc = DerivedMetricsCalculator::new(baselines.clone());

        let mut episode = EpisodeEvent::new("a", "worker");
        episode
            .predictions
            .confidence_scores
            .insert("approve".to_string(), 0.8);

        assert!(calc.calculate(&episode).distribution_drift.is_none());

        baselines.set_baseline("worker", &[0.1, 0.2, 0.3, 0.8, 0.9]);
        let drift = calc.calculate(&episode).distribution_drift;
        assert!(drift.is_some());
        assert!(drift.unwrap() >= 0.0);
    }

    #[test]
    fn test_schema_mismatch_and_interface_health() {
        let mut episode = EpisodeEvent::new("a", "worker");
        episode.interface_usage = vec![InterfaceUsage {
            interface: "crm".to_string(),
            declared_version: "v1".to_string(),
            actual_version: "v2".to_string(),
            calls: 20,
            errors: 5,
            retries: 3,
            recovery_times_ms: vec![100.0, 300.0],
        }];

        let metrics = calculator().calculate(&episode);
        assert_eq!(metrics.schema_mismatch_count, Some(1));

        let health = &metrics.interface_health["crm"];
        assert_eq!(health.error_rate, Some(0.25));
        assert_eq!(health.retries, 3);
        assert_eq!(health.mean_recovery_ms, Some(200.0));
    }

    #[test]
    fn test_retrieval_and_conflict_rates() {
        let mut episode = EpisodeEvent::new("a", "worker");
        episode.inputs.retrieved_context = vec![
            ContextSnippet {
                source: "kb".to_string(),
                used: true,
                contradicted: false,
            },
            ContextSnippet {
                source: "kb".to_string(),
                used: false,
                contradicted: true,
            },
        ];

        let metrics = calculator().calculate(&episode);
        assert_eq!(metrics.retrieval_hit_rate, Some(0.5));
        assert_eq!(metrics.context_conflict_density, Some(0.5));
    }
}
