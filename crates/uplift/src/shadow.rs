//! Shared keep/rollback policy applied after any adaptation.
//!
//! A candidate change is kept only when the measured improvement over the
//! held-out baseline is positive AND the confidence interval's lower bound
//! is above zero. A point estimate alone is insufficient; an unproven
//! change must never become permanent.

use serde::{Deserialize, Serialize};

/// z for a 95% two-sided normal interval.
const Z_95: f64 = 1.96;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShadowVerdict {
    pub baseline: f64,
    pub improvement: f64,
    pub interval_low: f64,
    pub interval_high: f64,
    pub sample_count: usize,
    pub keep: bool,
}

/// Evaluates shadow samples of a candidate's performance against the
/// pre-change baseline.
pub struct ShadowEvaluationGate;

impl ShadowEvaluationGate {
    pub fn new() -> Self {
        Self
    }

    /// `samples` are held-out scenario scores measured with the candidate
    /// change in place. Non-finite samples are dropped; with no usable
    /// samples the verdict is a rollback.
    pub fn evaluate(&self, baseline: f64, samples: &[f64]) -> ShadowVerdict {
        let usable: Vec<f64> = samples.iter().copied().filter(|s| s.is_finite()).collect();
        if usable.is_empty() {
            return ShadowVerdict {
                baseline,
                improvement: 0.0,
                interval_low: 0.0,
                interval_high: 0.0,
                sample_count: 0,
                keep: false,
            };
        }

        let n = usable.len() as f64;
        let mean = usable.iter().sum::<f64>() / n;
        let improvement = mean - baseline;

        let variance = usable.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n;
        let margin = Z_95 * (variance / n).sqrt();
        let interval_low = improvement - margin;
        let interval_high = improvement + margin;

        // Both conditions required; a lower bound of exactly zero fails.
        let keep = improvement > 0.0 && interval_low > 0.0;

        ShadowVerdict {
            baseline,
            improvement,
            interval_low,
            interval_high,
            sample_count: usable.len(),
            keep,
        }
    }
}

impl Default for ShadowEvaluationGate {
    fn default() -> Self {
        Self::new()
    }
}
