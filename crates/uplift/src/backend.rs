//! Model-serving/training backend boundary.
//!
//! The engine issues commands and interprets reported outcomes; it never
//! performs the numeric work itself. Returned numbers are authoritative
//! but untrusted and are range-checked or clamped before use.

use crate::error::ImprovementError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One paired scenario result reported by the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioScores {
    pub scenario: String,
    pub old_score: f64,
    pub new_score: f64,
}

#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Load (or switch to) an adapter for the agent.
    async fn load_adapter(&self, agent_id: &str, adapter_ref: &str)
        -> Result<(), ImprovementError>;

    /// Generate a response from the agent's current configuration.
    async fn generate_response(
        &self,
        agent_id: &str,
        prompt: &str,
    ) -> Result<String, ImprovementError>;

    /// Schedule an incremental fine-tune; returns an opaque task reference.
    async fn schedule_fine_tune(
        &self,
        agent_id: &str,
        description: &str,
    ) -> Result<String, ImprovementError>;

    /// Re-derive one role's adapter from a blended dataset against the
    /// target base model; returns the new adapter reference. Opaque and
    /// non-deterministic here.
    async fn retrain_adapter(
        &self,
        role: &str,
        target_model: &str,
        dataset_refs: &[String],
    ) -> Result<String, ImprovementError>;

    /// Run paired old-vs-new scenario evaluations.
    async fn run_parallel_evaluation(
        &self,
        agent_id: &str,
        scenarios: usize,
    ) -> Result<Vec<ScenarioScores>, ImprovementError>;
}

/// Canned backend for tests and embedding without a serving stack.
///
/// Responses and scores are fixed at construction; scheduling calls return
/// synthetic references.
#[derive(Debug, Clone)]
pub struct StaticBackend {
    pub response: String,
    pub old_score: f64,
    pub new_score: f64,
}

impl StaticBackend {
    pub fn new(old_score: f64, new_score: f64) -> Self {
        Self {
            response: "ok".to_string(),
            old_score,
            new_score,
        }
    }
}

#[async_trait]
impl ModelBackend for StaticBackend {
    async fn load_adapter(&self, _: &str, _: &str) -> Result<(), ImprovementError> {
        Ok(())
    }

    async fn generate_response(&self, _: &str, _: &str) -> Result<String, ImprovementError> {
        Ok(self.response.clone())
    }

    async fn schedule_fine_tune(
        &self,
        agent_id: &str,
        _: &str,
    ) -> Result<String, ImprovementError> {
        Ok(format!("fine-tune:{agent_id}"))
    }

    async fn retrain_adapter(
        &self,
        role: &str,
        target_model: &str,
        _: &[String],
    ) -> Result<String, ImprovementError> {
        Ok(format!("adapter:{role}:{target_model}"))
    }

    async fn run_parallel_evaluation(
        &self,
        _: &str,
        scenarios: usize,
    ) -> Result<Vec<ScenarioScores>, ImprovementError> {
        Ok((0..scenarios)
            .map(|i| ScenarioScores {
                scenario: format!("scenario-{i}"),
                old_score: self.old_score,
                new_score: self.new_score,
            })
            .collect())
    }
}
