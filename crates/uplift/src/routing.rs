//! Per-episode focus-area routing.
//!
//! An ordered rule cascade over the derived metrics; the first matching
//! rule wins. The ordering is the tie-break, deliberately not a weighted
//! score: a context-utility problem outranks a systematic-error signal even
//! when both are present.

use crate::config::RoutingConfig;
use crate::episode::EpisodeEvent;
use crate::metrics::DerivedMetrics;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use strum::{Display, EnumIter};

/// The category of lever chosen to fix an observed deficiency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumIter)]
#[serde(rename_all = "snake_case")]
pub enum FocusArea {
    Context,
    Prompt,
    ParameterAdapter,
    Integration,
}

/// Pluggable prompt-sensitivity signal feeding routing rule 3.
///
/// There is no fixed formula for this signal; deployments inject whatever
/// probe fits their prompt stack. Absent a probe (or a reading), the rule
/// is skipped.
pub trait PromptSensitivityProbe: Send + Sync {
    fn sensitivity(&self, episode: &EpisodeEvent, metrics: &DerivedMetrics) -> Option<f64>;
}

/// Routes one episode's metrics to exactly one focus area.
///
/// Synchronous and pure; no state is mutated.
pub struct DecisionEngine {
    config: RoutingConfig,
    probe: Option<Arc<dyn PromptSensitivityProbe>>,
}

impl DecisionEngine {
    pub fn new(config: RoutingConfig) -> Self {
        Self {
            config,
            probe: None,
        }
    }

    pub fn with_probe(mut self, probe: Arc<dyn PromptSensitivityProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn decide(&self, metrics: &DerivedMetrics, episode: &EpisodeEvent) -> FocusArea {
        // Rule 1: context-utility issue
        if let Some(hit_rate) = metrics.retrieval_hit_rate {
            if hit_rate < self.config.retrieval_hit_threshold {
                return FocusArea::Context;
            }
        }
        if let Some(conflict) = metrics.context_conflict_density {
            if conflict > 1.0 - self.config.retrieval_hit_threshold {
                return FocusArea::Context;
            }
        }

        // Rule 2: interface-reliability issue
        let max_error_rate = 1.0 - self.config.reliability_threshold;
        let unreliable = metrics
            .interface_health
            .values()
            .filter_map(|h| h.error_rate)
            .any(|rate| rate > max_error_rate);
        if unreliable {
            return FocusArea::Integration;
        }

        // Rule 3: prompt-sensitivity signal, when a probe is wired in
        if let Some(probe) = &self.probe {
            if let Some(sensitivity) = probe.sensitivity(episode, metrics) {
                if sensitivity > self.config.prompt_sensitivity_threshold {
                    return FocusArea::Prompt;
                }
            }
        }

        // Rule 4: systematic error
        if let Some(f1) = metrics.weighted_f1 {
            if f1 < 1.0 - self.config.error_rate_threshold {
                return FocusArea::ParameterAdapter;
            }
        }
        let deviated = [metrics.calibration_error, metrics.reliability_deviation]
            .into_iter()
            .flatten()
            .any(|d| d > self.config.error_rate_threshold);
        if deviated {
            return FocusArea::ParameterAdapter;
        }

        // Rule 5: default
        FocusArea::ParameterAdapter
    }
}
