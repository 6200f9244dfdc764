//! End-to-end tests for episode processing and adaptation passes.

use chrono::Utc;
use std::sync::Arc;
use uplift::backend::StaticBackend;
use uplift::episode::{ContextSnippet, DecisionOutcome, EpisodeEvent, StakeholderFeedback};
use uplift::patterns::LearningDimension;
use uplift::routing::FocusArea;
use uplift::store::InMemoryStore;
use uplift::{EngineConfig, ImprovementEngine};
use uuid::Uuid;

fn engine(old_score: f64, new_score: f64) -> ImprovementEngine {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    ImprovementEngine::new(
        EngineConfig::default(),
        Arc::new(StaticBackend::new(old_score, new_score)),
        Arc::new(InMemoryStore::new()),
    )
}

/// Half the snippets unused and F1 at 0.5: the context-utility rule fires
/// before the systematic-error rule.
#[tokio::test]
async fn test_context_rule_precedes_systematic_error() {
    let mut episode = EpisodeEvent::new("agent-1", "worker");
    episode.inputs.retrieved_context = vec![
        ContextSnippet {
            source: "kb".to_string(),
            used: true,
            contradicted: false,
        },
        ContextSnippet {
            source: "kb".to_string(),
            used: false,
            contradicted: false,
        },
    ];
    episode.outcomes.decisions = vec![
        DecisionOutcome {
            predicted_class: "approve".to_string(),
            actual_class: "approve".to_string(),
        },
        DecisionOutcome {
            predicted_class: "approve".to_string(),
            actual_class: "reject".to_string(),
        },
    ];

    let engine = engine(0.5, 0.9);
    let report = engine.process_episode(&episode).await.unwrap();

    assert_eq!(report.metrics.retrieval_hit_rate, Some(0.5));
    assert_eq!(report.focus_area, FocusArea::Context);
}

#[tokio::test]
async fn test_episode_adaptation_is_recorded_per_dimension() {
    let engine = engine(0.5, 0.9);
    let episode = EpisodeEvent::new("agent-1", "worker");

    let report = engine.process_episode(&episode).await.unwrap();
    assert!(report.kept);

    let metrics = engine.dimensional_metrics("agent-1").await.unwrap();
    let routed = &metrics[&LearningDimension::ParameterWeights];
    assert_eq!(routed.adaptation_count, 1);
    assert!(routed.current_score > 0.5);

    let history = engine.adaptation_history("agent-1").await.unwrap();
    assert_eq!(history.len(), 1);
    assert!(history[0].kept);
}

#[tokio::test]
async fn test_rolled_back_episode_leaves_state_untouched() {
    // New scores equal to the baseline: gate declines, snapshot restored.
    let engine = engine(0.5, 0.5);
    let episode = EpisodeEvent::new("agent-1", "worker");

    let report = engine.process_episode(&episode).await.unwrap();
    assert!(!report.kept);

    let metrics = engine.dimensional_metrics("agent-1").await.unwrap();
    let routed = &metrics[&LearningDimension::ParameterWeights];
    assert_eq!(routed.current_score, 0.5);
    assert_eq!(routed.adaptation_count, 0);

    // The attempt is still in the append-only history.
    let history = engine.adaptation_history("agent-1").await.unwrap();
    assert_eq!(history.len(), 1);
    assert!(!history[0].kept);
    assert!(history[0].success);
}

fn complaint(comment: &str, age_minutes: i64) -> StakeholderFeedback {
    StakeholderFeedback {
        id: Uuid::new_v4(),
        stakeholder: "ops".to_string(),
        feedback_type: "complaint".to_string(),
        sentiment: 0.05,
        severity: 0.9,
        comment: comment.to_string(),
        timestamp: Utc::now() - chrono::Duration::minutes(age_minutes),
    }
}

#[tokio::test]
async fn test_adaptation_pass_executes_qualifying_dimensions() {
    let engine = engine(0.5, 0.9);

    let feedback: Vec<StakeholderFeedback> = (0..12)
        .map(|i| complaint("prompt wording keeps drifting off format", i))
        .collect();

    let report = engine
        .run_adaptation_pass("agent-1", &feedback, &[])
        .await
        .unwrap();

    assert!(!report.patterns.is_empty());
    for pattern in &report.patterns {
        assert!((0.0..=1.0).contains(&pattern.confidence));
    }

    let prompt_decision = report
        .decisions
        .iter()
        .find(|d| d.dimension == LearningDimension::Prompt)
        .expect("prompt dimension qualifies");
    assert!((1..=5).contains(&prompt_decision.priority));

    assert_eq!(report.records.len(), report.decisions.len());
    assert!(report.records.iter().all(|r| r.success));

    let history = engine.adaptation_history("agent-1").await.unwrap();
    assert_eq!(history.len(), report.records.len());
}

#[tokio::test]
async fn test_weak_signals_produce_no_decisions() {
    let engine = engine(0.5, 0.9);

    // One mild complaint: pattern confidence clears the analyzer floor but
    // the dimension score stays below its activation threshold.
    let feedback = vec![complaint("prompt tone is slightly off", 0)];

    let report = engine
        .run_adaptation_pass("agent-1", &feedback, &[])
        .await
        .unwrap();
    assert!(report.decisions.is_empty());
    assert!(report.records.is_empty());
}
