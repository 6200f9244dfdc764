//! Audit/episode-history pattern stream.
//!
//! Fixed heuristics per signal: low decision confidence and high vote
//! variance implicate the parameter weights, low consensus and high
//! interface latency implicate context, low per-role vote confidence
//! implicates prompts, and low interface success rates implicate the
//! integration features.

use super::{suggest_strategy, FeedbackPattern, LearningDimension, TrendDirection};
use crate::episode::AuditRecord;
use std::collections::BTreeMap;
use tracing::debug;
use uuid::Uuid;

const LOW_DECISION_CONFIDENCE: f64 = 0.5;
const LOW_CONSENSUS: f64 = 0.6;
const LOW_VOTE_CONFIDENCE: f64 = 0.5;
const HIGH_VOTE_VARIANCE: f64 = 0.04;
const LOW_INTERFACE_SUCCESS: f64 = 0.9;
const HIGH_INTERFACE_LATENCY_MS: f64 = 2000.0;

pub(super) fn analyze(records: &[AuditRecord], min_confidence: f64) -> Vec<FeedbackPattern> {
    let mut groups: BTreeMap<&str, Vec<&AuditRecord>> = BTreeMap::new();
    for record in records {
        groups
            .entry(record.event_kind.as_str())
            .or_default()
            .push(record);
    }

    let mut patterns = Vec::new();
    for (event_kind, group) in groups {
        patterns.extend(decision_confidence_pattern(event_kind, &group));
        patterns.extend(consensus_pattern(event_kind, &group));
        patterns.extend(vote_confidence_pattern(event_kind, &group));
        patterns.extend(vote_variance_pattern(event_kind, &group));
        patterns.extend(interface_success_pattern(event_kind, &group));
        patterns.extend(interface_latency_pattern(event_kind, &group));
    }

    patterns.retain(|pattern| {
        if pattern.confidence < min_confidence {
            debug!(
                dimension = %pattern.dimension,
                confidence = pattern.confidence,
                "discarding low-confidence audit pattern"
            );
            false
        } else {
            true
        }
    });
    patterns
}

fn decision_confidence_pattern(
    event_kind: &str,
    group: &[&AuditRecord],
) -> Option<FeedbackPattern> {
    let values: Vec<f64> = group.iter().filter_map(|r| r.decision_confidence).collect();
    let avg = mean(&values)?;
    if avg >= LOW_DECISION_CONFIDENCE {
        return None;
    }
    let severity = shortfall(avg, LOW_DECISION_CONFIDENCE);
    Some(pattern(
        LearningDimension::ParameterWeights,
        format!("low decision confidence in {} events", event_kind),
        values.len() as u32,
        severity,
        Vec::new(),
    ))
}

fn consensus_pattern(event_kind: &str, group: &[&AuditRecord]) -> Option<FeedbackPattern> {
    let values: Vec<f64> = group.iter().filter_map(|r| r.consensus).collect();
    let avg = mean(&values)?;
    if avg >= LOW_CONSENSUS {
        return None;
    }
    let severity = shortfall(avg, LOW_CONSENSUS);
    Some(pattern(
        LearningDimension::Context,
        format!("low consensus in {} events", event_kind),
        values.len() as u32,
        severity,
        Vec::new(),
    ))
}

fn vote_confidence_pattern(event_kind: &str, group: &[&AuditRecord]) -> Option<FeedbackPattern> {
    let mut per_role: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
    for record in group {
        for vote in &record.votes {
            if vote.confidence.is_finite() {
                per_role.entry(vote.role.as_str()).or_default().push(vote.confidence);
            }
        }
    }

    let weak_roles: Vec<(String, f64)> = per_role
        .iter()
        .filter_map(|(role, confidences)| {
            let avg = mean(confidences)?;
            (avg < LOW_VOTE_CONFIDENCE).then(|| (role.to_string(), avg))
        })
        .collect();
    if weak_roles.is_empty() {
        return None;
    }

    let worst = weak_roles
        .iter()
        .map(|(_, avg)| shortfall(*avg, LOW_VOTE_CONFIDENCE))
        .fold(0.0, f64::max);
    let roles: Vec<String> = weak_roles.into_iter().map(|(role, _)| role).collect();
    Some(pattern(
        LearningDimension::Prompt,
        format!("low per-role vote confidence in {} events", event_kind),
        group.len() as u32,
        worst,
        roles,
    ))
}

fn vote_variance_pattern(event_kind: &str, group: &[&AuditRecord]) -> Option<FeedbackPattern> {
    let confidences: Vec<f64> = group
        .iter()
        .flat_map(|r| r.votes.iter())
        .map(|v| v.confidence)
        .filter(|c| c.is_finite())
        .collect();
    if confidences.len() < 2 {
        return None;
    }

    let avg = confidences.iter().sum::<f64>() / confidences.len() as f64;
    let variance = confidences.iter().map(|c| (c - avg).powi(2)).sum::<f64>()
        / confidences.len() as f64;
    if variance <= HIGH_VOTE_VARIANCE {
        return None;
    }

    let severity = ((variance - HIGH_VOTE_VARIANCE) / HIGH_VOTE_VARIANCE).clamp(0.0, 1.0);
    Some(pattern(
        LearningDimension::ParameterWeights,
        format!("high vote variance in {} events", event_kind),
        group.len() as u32,
        severity,
        Vec::new(),
    ))
}

fn interface_success_pattern(event_kind: &str, group: &[&AuditRecord]) -> Option<FeedbackPattern> {
    let values: Vec<f64> = group.iter().filter_map(|r| r.interface_success_rate).collect();
    let avg = mean(&values)?;
    if avg >= LOW_INTERFACE_SUCCESS {
        return None;
    }
    let severity = shortfall(avg, LOW_INTERFACE_SUCCESS);
    Some(pattern(
        LearningDimension::IntegrationFeatures,
        format!("low interface success rate in {} events", event_kind),
        values.len() as u32,
        severity,
        Vec::new(),
    ))
}

fn interface_latency_pattern(event_kind: &str, group: &[&AuditRecord]) -> Option<FeedbackPattern> {
    let values: Vec<f64> = group.iter().filter_map(|r| r.interface_latency_ms).collect();
    let avg = mean(&values)?;
    if avg <= HIGH_INTERFACE_LATENCY_MS {
        return None;
    }
    let severity = ((avg - HIGH_INTERFACE_LATENCY_MS) / HIGH_INTERFACE_LATENCY_MS).clamp(0.0, 1.0);
    Some(pattern(
        LearningDimension::Context,
        format!("high interface latency in {} events", event_kind),
        values.len() as u32,
        severity,
        Vec::new(),
    ))
}

fn pattern(
    dimension: LearningDimension,
    description: String,
    frequency: u32,
    severity: f64,
    affected_roles: Vec<String>,
) -> FeedbackPattern {
    let severity = severity.clamp(0.0, 1.0);
    let trend = if severity >= 0.7 {
        TrendDirection::Degrading
    } else {
        TrendDirection::Stable
    };
    let confidence = (0.5 * (frequency as f64 / 10.0).min(1.0) + 0.5 * severity).clamp(0.0, 1.0);

    FeedbackPattern {
        id: Uuid::new_v4(),
        dimension,
        description,
        frequency,
        severity,
        trend,
        affected_roles,
        suggested_strategy: suggest_strategy(severity, frequency),
        confidence,
    }
}

/// Relative distance below the threshold, in [0,1].
fn shortfall(value: f64, threshold: f64) -> f64 {
    ((threshold - value) / threshold).clamp(0.0, 1.0)
}

fn mean(values: &[f64]) -> Option<f64> {
    let usable: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if usable.is_empty() {
        return None;
    }
    Some(usable.iter().sum::<f64>() / usable.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::episode::RoleVote;
    use chrono::Utc;

    fn record(event_kind: &str) -> AuditRecord {
        AuditRecord {
            id: Uuid::new_v4(),
            agent_id: "agent-1".to_string(),
            event_kind: event_kind.to_string(),
            timestamp: Utc::now(),
            decision_confidence: None,
            consensus: None,
            votes: Vec::new(),
            interface_success_rate: None,
            interface_latency_ms: None,
        }
    }

    #[test]
    fn test_low_decision_confidence_implicates_parameter_weights() {
        let records: Vec<AuditRecord> = (0..6)
            .map(|_| {
                let mut r = record("decision");
                r.decision_confidence = Some(0.2);
                r
            })
            .collect();

        let patterns = analyze(&records, 0.0);
        let p = patterns
            .iter()
            .find(|p| p.dimension == LearningDimension::ParameterWeights)
            .unwrap();
        assert_eq!(p.frequency, 6);
        assert!(p.severity > 0.5);
    }

    #[test]
    fn test_weak_roles_implicate_prompt() {
        let mut r = record("vote");
        r.votes = vec![
            RoleVote {
                role: "critic".to_string(),
                confidence: 0.2,
            },
            RoleVote {
                role: "planner".to_string(),
                confidence: 0.9,
            },
        ];

        let patterns = analyze(&[r], 0.0);
        let p = patterns
            .iter()
            .find(|p| p.dimension == LearningDimension::Prompt)
            .unwrap();
        assert_eq!(p.affected_roles, vec!["critic".to_string()]);
    }

    #[test]
    fn test_latency_and_success_heuristics() {
        let mut r = record("interface_call");
        r.interface_success_rate = Some(0.5);
        r.interface_latency_ms = Some(5000.0);

        let patterns = analyze(&[r], 0.0);
        assert!(patterns
            .iter()
            .any(|p| p.dimension == LearningDimension::IntegrationFeatures));
        assert!(patterns
            .iter()
            .any(|p| p.dimension == LearningDimension::Context));
    }

    #[test]
    fn test_all_confidences_in_range() {
        let mut records = Vec::new();
        for i in 0..20 {
            let mut r = record(if i % 2 == 0 { "decision" } else { "vote" });
            r.decision_confidence = Some(0.1);
            r.consensus = Some(0.2);
            r.votes = vec![
                RoleVote {
                    role: "a".to_string(),
                    confidence: 0.1,
                },
                RoleVote {
                    role: "b".to_string(),
                    confidence: 0.9,
                },
            ];
            records.push(r);
        }

        for pattern in analyze(&records, 0.0) {
            assert!((0.0..=1.0).contains(&pattern.confidence));
            assert!(pattern.frequency > 0);
        }
    }

    #[test]
    fn test_min_confidence_filters() {
        let mut r = record("decision");
        r.decision_confidence = Some(0.49);

        // Barely below threshold: tiny severity, frequency 1.
        assert!(analyze(&[r], 0.5).is_empty());
    }
}
