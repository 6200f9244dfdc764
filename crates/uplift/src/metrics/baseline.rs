//! Per-agent-type confidence-distribution baselines for drift detection.

use std::collections::HashMap;
use std::sync::RwLock;

pub const BUCKETS: usize = 10;
const SMOOTHING: f64 = 1e-6;

/// Cached reference distributions keyed by agent type.
///
/// Updated outside the metrics calculator (typically from a trailing window
/// of healthy episodes); reads are synchronous so metric computation never
/// suspends.
pub struct BaselineCache {
    inner: RwLock<HashMap<String, Vec<f64>>>,
}

impl BaselineCache {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }

    /// Replace the baseline for an agent type with the histogram of the
    /// given confidence samples. Non-finite samples are ignored.
    pub fn set_baseline(&self, agent_type: &str, samples: &[f64]) {
        let usable: Vec<f64> = samples.iter().copied().filter(|s| s.is_finite()).collect();
        if usable.is_empty() {
            return;
        }
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.insert(agent_type.to_string(), histogram(&usable));
    }

    pub fn get(&self, agent_type: &str) -> Option<Vec<f64>> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.get(agent_type).cloned()
    }

    pub fn contains(&self, agent_type: &str) -> bool {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.contains_key(agent_type)
    }
}

impl Default for BaselineCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Bucket samples in [0,1] into a normalized histogram.
pub fn histogram(samples: &[f64]) -> Vec<f64> {
    let mut counts = vec![0.0; BUCKETS];
    for sample in samples {
        let clamped = sample.clamp(0.0, 1.0);
        let bucket = ((clamped * BUCKETS as f64) as usize).min(BUCKETS - 1);
        counts[bucket] += 1.0;
    }
    let total: f64 = counts.iter().sum();
    counts.iter().map(|c| c / total).collect()
}

/// Population-stability-index style divergence between two histograms.
/// Zero when identical, growing as mass shifts between buckets.
pub fn population_stability_index(expected: &[f64], observed: &[f64]) -> f64 {
    expected
        .iter()
        .zip(observed.iter())
        .map(|(p, q)| {
            let p = p + SMOOTHING;
            let q = q + SMOOTHING;
            (q - p) * (q / p).ln()
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_histogram_normalized() {
        let hist = histogram(&[0.05, 0.15, 0.95, 1.0]);
        assert_eq!(hist.len(), BUCKETS);
        assert!((hist.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        assert_eq!(hist[0], 0.25);
        assert_eq!(hist[9], 0.5);
    }

    #[test]
    fn test_psi_zero_for_identical() {
        let hist = histogram(&[0.1, 0.5, 0.9]);
        let psi = population_stability_index(&hist, &hist);
        assert!(psi.abs() < 1e-9);
    }

    #[test]
    fn test_psi_grows_with_shift() {
        let low = histogram(&[0.1, 0.15, 0.2]);
        let high = histogram(&[0.8, 0.85, 0.9]);
        assert!(population_stability_index(&low, &high) > 1.0);
    }

    #[test]
    fn test_cache_ignores_unusable_samples() {
        let cache = BaselineCache::new();
        cache.set_baseline("worker", &[f64::NAN]);
        assert!(!cache.contains("worker"));

        cache.set_baseline("worker", &[0.4, 0.6]);
        assert!(cache.contains("worker"));
    }
}
