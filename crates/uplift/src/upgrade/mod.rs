//! Base-model upgrade jobs: the highest-risk adaptation pathway.

mod machine;

pub use machine::ModelUpgradeStateMachine;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use strum::Display;
use uuid::Uuid;

/// Ordered phases of an upgrade job. Each phase is gated on the previous
/// one completing without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
pub enum UpgradePhase {
    Preparation,
    DataPreservation,
    Distillation,
    AdapterRetraining,
    ParallelEvaluation,
    Validation,
    Deployment,
}

impl UpgradePhase {
    /// Progress percentage reached when the phase completes.
    pub fn completed_progress(&self) -> f64 {
        match self {
            UpgradePhase::Preparation => 10.0,
            UpgradePhase::DataPreservation => 25.0,
            UpgradePhase::Distillation => 40.0,
            UpgradePhase::AdapterRetraining => 60.0,
            UpgradePhase::ParallelEvaluation => 75.0,
            UpgradePhase::Validation => 90.0,
            UpgradePhase::Deployment => 100.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
pub enum UpgradeStatus {
    NotStarted,
    InProgress,
    ParallelTesting,
    ReadyForMigration,
    Migrating,
    Completed,
    Failed,
    RolledBack,
}

impl UpgradeStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UpgradeStatus::Completed | UpgradeStatus::Failed | UpgradeStatus::RolledBack
        )
    }
}

/// One scenario's paired old-vs-new result. Immutable once recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceComparison {
    pub scenario: String,
    pub old_score: f64,
    pub new_score: f64,
    /// Preference for the new system in [0,1]; 0.5 is indifference
    pub preference: f64,
}

impl PerformanceComparison {
    /// Preference centered at 0.5 and shifted by the normalized score
    /// delta, clamped to [0,1].
    pub fn new(scenario: impl Into<String>, old_score: f64, new_score: f64) -> Self {
        let scale = old_score.abs().max(new_score.abs()).max(1e-9);
        let preference = (0.5 + (new_score - old_score) / (2.0 * scale)).clamp(0.0, 1.0);
        Self {
            scenario: scenario.into(),
            old_score,
            new_score,
            preference,
        }
    }
}

/// Options for one upgrade job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpgradeOptions {
    pub agent_id: String,
    pub source_model: String,
    pub target_model: String,
    /// Roles whose adapters are re-derived; the shared cross-role adapter
    /// is always rebuilt as well
    pub roles: Vec<String>,
    pub enable_distillation: bool,
    /// Override the configured number of paired evaluation scenarios
    pub evaluation_scenarios: Option<usize>,
}

impl UpgradeOptions {
    pub fn new(
        agent_id: impl Into<String>,
        source_model: impl Into<String>,
        target_model: impl Into<String>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            source_model: source_model.into(),
            target_model: target_model.into(),
            roles: Vec::new(),
            enable_distillation: false,
            evaluation_scenarios: None,
        }
    }

    pub fn roles(mut self, roles: Vec<String>) -> Self {
        self.roles = roles;
        self
    }

    pub fn distillation(mut self, enabled: bool) -> Self {
        self.enable_distillation = enabled;
        self
    }

    pub fn evaluation_scenarios(mut self, scenarios: usize) -> Self {
        self.evaluation_scenarios = Some(scenarios);
        self
    }
}

/// One upgrade job's full state. Snapshots of this are what status reads
/// return; only the state machine mutates it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpgradeJob {
    pub id: Uuid,
    pub agent_id: String,
    pub source_model: String,
    pub target_model: String,
    pub phase: UpgradePhase,
    pub status: UpgradeStatus,
    /// Monotonically non-decreasing until a terminal status
    pub progress_percentage: f64,
    pub backup_namespace: Option<String>,
    pub backup_artifacts: Vec<String>,
    pub retrained_adapters: Vec<String>,
    pub comparisons: Vec<PerformanceComparison>,
    pub final_metrics: HashMap<String, f64>,
    pub migration_recommended: Option<bool>,
    pub rollback_available: bool,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl UpgradeJob {
    pub fn new(options: &UpgradeOptions) -> Self {
        Self {
            id: Uuid::new_v4(),
            agent_id: options.agent_id.clone(),
            source_model: options.source_model.clone(),
            target_model: options.target_model.clone(),
            phase: UpgradePhase::Preparation,
            status: UpgradeStatus::NotStarted,
            progress_percentage: 0.0,
            backup_namespace: None,
            backup_artifacts: Vec::new(),
            retrained_adapters: Vec::new(),
            comparisons: Vec::new(),
            final_metrics: HashMap::new(),
            migration_recommended: None,
            rollback_available: false,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Raise progress; never lowers it.
    pub fn advance_progress(&mut self, progress: f64) {
        if progress > self.progress_percentage {
            self.progress_percentage = progress.min(100.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_never_decreases() {
        let options = UpgradeOptions::new("agent-1", "base-v1", "base-v2");
        let mut job = UpgradeJob::new(&options);

        job.advance_progress(25.0);
        job.advance_progress(10.0);
        assert_eq!(job.progress_percentage, 25.0);

        job.advance_progress(150.0);
        assert_eq!(job.progress_percentage, 100.0);
    }

    #[test]
    fn test_phase_progress_is_monotone() {
        let phases = [
            UpgradePhase::Preparation,
            UpgradePhase::DataPreservation,
            UpgradePhase::Distillation,
            UpgradePhase::AdapterRetraining,
            UpgradePhase::ParallelEvaluation,
            UpgradePhase::Validation,
            UpgradePhase::Deployment,
        ];
        for pair in phases.windows(2) {
            assert!(pair[0].completed_progress() < pair[1].completed_progress());
        }
    }

    #[test]
    fn test_preference_centering_and_clamping() {
        let even = PerformanceComparison::new("s", 0.5, 0.5);
        assert_eq!(even.preference, 0.5);

        let better = PerformanceComparison::new("s", 0.4, 0.8);
        assert!(better.preference > 0.5);
        assert!(better.preference <= 1.0);

        let worse = PerformanceComparison::new("s", 0.8, 0.4);
        assert!(worse.preference < 0.5);
        assert!(worse.preference >= 0.0);

        // Degenerate scores stay in range.
        let degenerate = PerformanceComparison::new("s", 0.0, 0.0);
        assert_eq!(degenerate.preference, 0.5);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(UpgradeStatus::Completed.is_terminal());
        assert!(UpgradeStatus::Failed.is_terminal());
        assert!(UpgradeStatus::RolledBack.is_terminal());
        assert!(!UpgradeStatus::ReadyForMigration.is_terminal());
        assert!(!UpgradeStatus::Migrating.is_terminal());
    }
}
