//! Stakeholder-feedback pattern stream.

use super::keywords::keyword_overlap;
use super::{suggest_strategy, FeedbackPattern, LearningDimension, TrendDirection};
use crate::episode::StakeholderFeedback;
use std::collections::BTreeMap;
use strum::IntoEnumIterator;
use tracing::debug;
use uuid::Uuid;

/// Portion of the group (by recency) used as the trend slice.
const RECENT_SLICE: f64 = 0.25;

pub(super) fn analyze(
    batch: &[StakeholderFeedback],
    min_confidence: f64,
) -> Vec<FeedbackPattern> {
    let mut groups: BTreeMap<&str, Vec<&StakeholderFeedback>> = BTreeMap::new();
    for entry in batch {
        groups
            .entry(entry.feedback_type.as_str())
            .or_default()
            .push(entry);
    }

    let mut patterns = Vec::new();
    for (feedback_type, mut group) in groups {
        group.sort_by_key(|entry| entry.timestamp);

        for dimension in LearningDimension::iter() {
            let matching: Vec<&&StakeholderFeedback> = group
                .iter()
                .filter(|entry| keyword_overlap(&entry.comment, dimension) > 0)
                .collect();
            if matching.is_empty() {
                continue;
            }

            let frequency = matching.len() as u32;
            let severity = mean(matching.iter().map(|e| e.severity));
            let overall_sentiment = mean(matching.iter().map(|e| e.sentiment));

            let pattern = FeedbackPattern {
                id: Uuid::new_v4(),
                dimension,
                description: format!("{} feedback points at {}", feedback_type, dimension),
                frequency,
                severity: severity.clamp(0.0, 1.0),
                trend: trend(&matching, overall_sentiment),
                affected_roles: Vec::new(),
                suggested_strategy: suggest_strategy(severity, frequency),
                confidence: confidence(frequency, overall_sentiment),
            };

            if pattern.confidence < min_confidence {
                debug!(
                    dimension = %dimension,
                    confidence = pattern.confidence,
                    "discarding low-confidence feedback pattern"
                );
                continue;
            }
            patterns.push(pattern);
        }
    }
    patterns
}

/// Trend of the most recent slice against the overall average sentiment.
fn trend(matching: &[&&StakeholderFeedback], overall_sentiment: f64) -> TrendDirection {
    let slice_len = ((matching.len() as f64 * RECENT_SLICE).ceil() as usize).max(1);
    let recent = &matching[matching.len() - slice_len..];
    let recent_sentiment = mean(recent.iter().map(|e| e.sentiment));

    let signal = 0.5 + (recent_sentiment - overall_sentiment);
    if signal > 0.7 {
        TrendDirection::Improving
    } else if signal < 0.4 {
        TrendDirection::Degrading
    } else {
        TrendDirection::Stable
    }
}

/// Bounded combination of frequency and sentiment extremity.
fn confidence(frequency: u32, overall_sentiment: f64) -> f64 {
    let frequency_part = (frequency as f64 / 10.0).min(1.0);
    let extremity = ((overall_sentiment - 0.5).abs() * 2.0).min(1.0);
    (0.5 * frequency_part + 0.5 * extremity).clamp(0.0, 1.0)
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let collected: Vec<f64> = values.filter(|v| v.is_finite()).collect();
    if collected.is_empty() {
        return 0.0;
    }
    collected.iter().sum::<f64>() / collected.len() as f64
}
