//! The improvement engine: the exposed surface of the crate.
//!
//! An explicitly constructed, injected service instance; nothing here is
//! module-level singleton state, so independent test instances are cheap.

use crate::adaptation::{
    default_policies, AdaptationDecision, AdaptationExecutor, AdaptationPrioritizer,
    AdaptationRecord, DimensionalMetrics, DimensionHandler,
};
use crate::backend::ModelBackend;
use crate::config::EngineConfig;
use crate::episode::{AuditRecord, EpisodeEvent, EpisodeSource, StakeholderFeedback};
use crate::error::ImprovementError;
use crate::metrics::{BaselineCache, DerivedMetrics, DerivedMetricsCalculator};
use crate::notify::{NotificationSink, TracingSink};
use crate::patterns::{AdaptationStrategy, FeedbackPattern, FeedbackPatternAnalyzer, LearningDimension};
use crate::routing::{DecisionEngine, FocusArea, PromptSensitivityProbe};
use crate::store::ImprovementStore;
use crate::upgrade::{ModelUpgradeStateMachine, UpgradeJob, UpgradeOptions, UpgradePhase, UpgradeStatus};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;
use uuid::Uuid;

/// Events emitted as the engine processes episodes, executes adaptations
/// and drives upgrade jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ImprovementEvent {
    EpisodeProcessed {
        episode_id: Uuid,
        focus_area: FocusArea,
    },
    AdaptationExecuted {
        agent_id: String,
        dimension: LearningDimension,
        kept: bool,
    },
    UpgradeStarted {
        job_id: Uuid,
        agent_id: String,
    },
    UpgradePhaseChanged {
        job_id: Uuid,
        phase: UpgradePhase,
        status: UpgradeStatus,
        progress: f64,
    },
    UpgradeTerminal {
        job_id: Uuid,
        status: UpgradeStatus,
    },
}

/// Structured result of processing one episode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodeReport {
    pub episode_id: Uuid,
    pub metrics: DerivedMetrics,
    pub focus_area: FocusArea,
    pub changes_applied: Vec<String>,
    /// Whether the applied change survived the shadow gate
    pub kept: bool,
}

/// Structured result of one adaptation pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaptationPassReport {
    pub patterns: Vec<FeedbackPattern>,
    /// Ranked decisions, dependencies first
    pub decisions: Vec<AdaptationDecision>,
    pub records: Vec<AdaptationRecord>,
    /// BaseModel decisions are never auto-executed; they are surfaced here
    /// for an explicit `start_model_upgrade` call
    pub upgrade_recommendations: Vec<AdaptationDecision>,
}

pub struct ImprovementEngine {
    config: EngineConfig,
    baselines: Arc<BaselineCache>,
    calculator: DerivedMetricsCalculator,
    router: DecisionEngine,
    analyzer: FeedbackPatternAnalyzer,
    prioritizer: AdaptationPrioritizer,
    executor: AdaptationExecutor,
    upgrades: ModelUpgradeStateMachine,
    store: Arc<dyn ImprovementStore>,
    events: broadcast::Sender<ImprovementEvent>,
}

impl ImprovementEngine {
    pub fn new(
        config: EngineConfig,
        backend: Arc<dyn ModelBackend>,
        store: Arc<dyn ImprovementStore>,
    ) -> Self {
        Self::with_sink(config, backend, store, Arc::new(TracingSink))
    }

    pub fn with_sink(
        config: EngineConfig,
        backend: Arc<dyn ModelBackend>,
        store: Arc<dyn ImprovementStore>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        let (events, _) = broadcast::channel(1024);
        let baselines = Arc::new(BaselineCache::new());
        let calculator = DerivedMetricsCalculator::new(baselines.clone());
        let router = DecisionEngine::new(config.routing.clone());
        let executor = AdaptationExecutor::new(
            backend.clone(),
            store.clone(),
            config.shadow_scenarios,
            config.score_history_limit,
        );
        let upgrades = ModelUpgradeStateMachine::new(
            config.upgrade.clone(),
            backend,
            store.clone(),
            sink,
            events.clone(),
        );

        Self {
            config,
            baselines,
            calculator,
            router,
            analyzer: FeedbackPatternAnalyzer::new(),
            prioritizer: AdaptationPrioritizer::new(),
            executor,
            upgrades,
            store,
            events,
        }
    }

    /// Install a prompt-sensitivity probe for routing rule 3.
    pub fn with_probe(mut self, probe: Arc<dyn PromptSensitivityProbe>) -> Self {
        self.router = DecisionEngine::new(self.config.routing.clone()).with_probe(probe);
        self
    }

    /// Replace the handler for one dimension.
    pub fn set_dimension_handler(
        &mut self,
        dimension: LearningDimension,
        handler: Arc<dyn DimensionHandler>,
    ) {
        self.executor.set_handler(dimension, handler);
    }

    /// Drift baselines, updated from trailing windows of healthy episodes.
    pub fn baselines(&self) -> Arc<BaselineCache> {
        self.baselines.clone()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ImprovementEvent> {
        self.events.subscribe()
    }

    /// Derive metrics for one episode, route it to a focus area, apply a
    /// targeted micro-adaptation on the routed dimension, and verify it
    /// through the shadow gate.
    pub async fn process_episode(
        &self,
        episode: &EpisodeEvent,
    ) -> Result<EpisodeReport, ImprovementError> {
        let metrics = self.calculator.calculate(episode);
        let focus_area = self.router.decide(&metrics, episode);
        info!(
            episode = %episode.id,
            agent = %episode.agent_id,
            focus = %focus_area,
            "episode routed"
        );

        let decision = self.micro_decision(episode, focus_area);
        let outcome = self.executor.execute(&decision).await?;

        let _ = self.events.send(ImprovementEvent::EpisodeProcessed {
            episode_id: episode.id,
            focus_area,
        });
        let _ = self.events.send(ImprovementEvent::AdaptationExecuted {
            agent_id: episode.agent_id.clone(),
            dimension: decision.dimension,
            kept: outcome.kept,
        });

        Ok(EpisodeReport {
            episode_id: episode.id,
            metrics,
            focus_area,
            changes_applied: outcome.record.changes.clone(),
            kept: outcome.kept,
        })
    }

    /// Mine both streams for patterns, rank qualifying dimensions into
    /// decisions, and execute them in dependency order.
    pub async fn run_adaptation_pass(
        &self,
        agent_id: &str,
        feedback_batch: &[StakeholderFeedback],
        audit_batch: &[AuditRecord],
    ) -> Result<AdaptationPassReport, ImprovementError> {
        let min_confidence = self.config.min_pattern_confidence;
        let mut patterns = self.analyzer.analyze_feedback(feedback_batch, min_confidence);
        patterns.extend(self.analyzer.analyze_history(audit_batch, min_confidence));
        info!(
            agent = agent_id,
            patterns = patterns.len(),
            "adaptation pass patterns mined"
        );

        let decisions = self.prioritizer.prioritize(agent_id, &patterns);

        let mut records = Vec::new();
        let mut upgrade_recommendations = Vec::new();
        for decision in &decisions {
            if decision.dimension == LearningDimension::BaseModel {
                upgrade_recommendations.push(decision.clone());
                continue;
            }
            let outcome = self.executor.execute(decision).await?;
            let _ = self.events.send(ImprovementEvent::AdaptationExecuted {
                agent_id: agent_id.to_string(),
                dimension: decision.dimension,
                kept: outcome.kept,
            });
            records.push(outcome.record);
        }

        Ok(AdaptationPassReport {
            patterns,
            decisions,
            records,
            upgrade_recommendations,
        })
    }

    /// Run an adaptation pass over everything the episode/audit source
    /// recorded for a time range: feedback comes from the episodes'
    /// attached stakeholder entries, audit records are used as-is.
    pub async fn run_adaptation_pass_for_range(
        &self,
        source: &dyn EpisodeSource,
        agent_id: &str,
        from: chrono::DateTime<Utc>,
        to: chrono::DateTime<Utc>,
    ) -> Result<AdaptationPassReport, ImprovementError> {
        let episodes = source.episodes(from, to).await?;
        let feedback: Vec<StakeholderFeedback> = episodes
            .iter()
            .filter(|episode| episode.agent_id == agent_id)
            .flat_map(|episode| episode.feedback.iter().cloned())
            .collect();
        let audit: Vec<AuditRecord> = source
            .audit_records(from, to)
            .await?
            .into_iter()
            .filter(|record| record.agent_id == agent_id)
            .collect();

        self.run_adaptation_pass(agent_id, &feedback, &audit).await
    }

    /// Start a phased base-model upgrade as a background job.
    pub async fn start_model_upgrade(
        &self,
        options: UpgradeOptions,
    ) -> Result<Uuid, ImprovementError> {
        self.upgrades.start(options).await
    }

    /// Lock-free snapshot of a job's current state.
    pub async fn get_upgrade_status(&self, job_id: Uuid) -> Option<UpgradeJob> {
        self.upgrades.status(job_id).await
    }

    /// The explicit, irreversible cutover for a job that passed validation.
    pub async fn migrate_upgrade(&self, job_id: Uuid) -> Result<UpgradeJob, ImprovementError> {
        self.upgrades.migrate(job_id).await
    }

    pub async fn dimensional_metrics(
        &self,
        agent_id: &str,
    ) -> Result<HashMap<LearningDimension, DimensionalMetrics>, ImprovementError> {
        self.store.get_dimensional_metrics(agent_id).await
    }

    pub async fn adaptation_history(
        &self,
        agent_id: &str,
    ) -> Result<Vec<AdaptationRecord>, ImprovementError> {
        self.store.adaptation_history(agent_id).await
    }

    /// A low-impact, incremental decision targeting the routed dimension.
    fn micro_decision(&self, episode: &EpisodeEvent, focus_area: FocusArea) -> AdaptationDecision {
        let dimension = LearningDimension::from(focus_area);
        let policies = default_policies();
        let policy = &policies[&dimension];

        AdaptationDecision {
            id: Uuid::new_v4(),
            agent_id: episode.agent_id.clone(),
            dimension,
            trigger: format!("episode {} routed to {focus_area}", episode.id),
            strategy: AdaptationStrategy::Incremental,
            priority: 2,
            estimated_impact: 0.3,
            estimated_cost: policy.cost,
            risk: policy.risk,
            dependencies: Vec::new(),
            rollback_plan: policy.rollback_plan.to_string(),
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::StaticBackend;
    use crate::store::InMemoryStore;

    fn engine(old_score: f64, new_score: f64) -> ImprovementEngine {
        ImprovementEngine::new(
            EngineConfig::default(),
            Arc::new(StaticBackend::new(old_score, new_score)),
            Arc::new(InMemoryStore::new()),
        )
    }

    #[tokio::test]
    async fn test_process_episode_reports_focus_and_changes() {
        let engine = engine(0.5, 0.9);
        let episode = EpisodeEvent::new("agent-1", "worker");

        let report = engine.process_episode(&episode).await.unwrap();
        assert_eq!(report.episode_id, episode.id);
        assert_eq!(report.focus_area, FocusArea::ParameterAdapter);
        assert!(!report.changes_applied.is_empty());
        assert!(report.kept);
    }

    #[tokio::test]
    async fn test_process_episode_rolls_back_unproven_change() {
        // New scores equal to the baseline: the shadow gate declines.
        let engine = engine(0.5, 0.5);
        let episode = EpisodeEvent::new("agent-1", "worker");

        let report = engine.process_episode(&episode).await.unwrap();
        assert!(!report.kept);
    }

    #[tokio::test]
    async fn test_adaptation_pass_empty_batches() {
        let engine = engine(0.5, 0.9);
        let report = engine.run_adaptation_pass("agent-1", &[], &[]).await.unwrap();
        assert!(report.patterns.is_empty());
        assert!(report.decisions.is_empty());
        assert!(report.records.is_empty());
    }

    struct FixedSource {
        episodes: Vec<EpisodeEvent>,
    }

    #[async_trait::async_trait]
    impl EpisodeSource for FixedSource {
        async fn episodes(
            &self,
            _: chrono::DateTime<Utc>,
            _: chrono::DateTime<Utc>,
        ) -> Result<Vec<EpisodeEvent>, ImprovementError> {
            Ok(self.episodes.clone())
        }

        async fn audit_records(
            &self,
            _: chrono::DateTime<Utc>,
            _: chrono::DateTime<Utc>,
        ) -> Result<Vec<AuditRecord>, ImprovementError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_adaptation_pass_for_range_filters_by_agent() {
        let engine = engine(0.5, 0.9);

        let mut ours = EpisodeEvent::new("agent-1", "worker");
        ours.feedback.push(StakeholderFeedback {
            id: Uuid::new_v4(),
            stakeholder: "ops".to_string(),
            feedback_type: "complaint".to_string(),
            sentiment: 0.1,
            severity: 0.8,
            comment: "prompt tone is off".to_string(),
            timestamp: Utc::now(),
        });
        let theirs = EpisodeEvent::new("agent-2", "worker");

        let source = FixedSource {
            episodes: vec![ours, theirs],
        };
        let report = engine
            .run_adaptation_pass_for_range(
                &source,
                "agent-1",
                Utc::now() - chrono::Duration::hours(1),
                Utc::now(),
            )
            .await
            .unwrap();

        // One mild complaint forms a pattern but clears no activation bar.
        assert!(!report.patterns.is_empty());
        assert!(report.decisions.is_empty());
    }
}
