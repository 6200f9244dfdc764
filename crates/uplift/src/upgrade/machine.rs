//! Phase driver for base-model upgrade jobs.
//!
//! Each job runs as an independent background task. Phases advance as the
//! backend futures resolve; progress is written at phase boundaries and
//! never decreases. Any error before migration triggers an automatic
//! rollback from the per-job backup namespace. Migration itself is a
//! separate, explicit, never-automatic call.

use super::{PerformanceComparison, UpgradeJob, UpgradeOptions, UpgradePhase, UpgradeStatus};
use crate::backend::ModelBackend;
use crate::config::UpgradeConfig;
use crate::engine::ImprovementEvent;
use crate::error::ImprovementError;
use crate::notify::{notify_best_effort, NotificationSink};
use crate::store::ImprovementStore;
use chrono::Utc;
use futures::future::try_join_all;
use rand::seq::SliceRandom;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, RwLock};
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct ModelUpgradeStateMachine {
    config: UpgradeConfig,
    backend: Arc<dyn ModelBackend>,
    store: Arc<dyn ImprovementStore>,
    sink: Arc<dyn NotificationSink>,
    events: broadcast::Sender<ImprovementEvent>,
    jobs: Arc<RwLock<HashMap<Uuid, UpgradeJob>>>,
    /// Agents with a live (non-terminal) job; enforces one upgrade per agent
    active_agents: Arc<Mutex<HashSet<String>>>,
}

impl ModelUpgradeStateMachine {
    pub fn new(
        config: UpgradeConfig,
        backend: Arc<dyn ModelBackend>,
        store: Arc<dyn ImprovementStore>,
        sink: Arc<dyn NotificationSink>,
        events: broadcast::Sender<ImprovementEvent>,
    ) -> Self {
        Self {
            config,
            backend,
            store,
            sink,
            events,
            jobs: Arc::new(RwLock::new(HashMap::new())),
            active_agents: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Start an upgrade job as a background task and return its id.
    pub async fn start(&self, options: UpgradeOptions) -> Result<Uuid, ImprovementError> {
        {
            let mut active = self.active_agents.lock().unwrap_or_else(|e| e.into_inner());
            if !active.insert(options.agent_id.clone()) {
                return Err(ImprovementError::UpgradeAlreadyRunning {
                    agent_id: options.agent_id.clone(),
                });
            }
        }

        let job = UpgradeJob::new(&options);
        let job_id = job.id;
        info!(
            job = %job_id,
            agent = %options.agent_id,
            source = %options.source_model,
            target = %options.target_model,
            "starting model upgrade job"
        );

        self.jobs.write().await.insert(job_id, job.clone());
        if let Err(e) = self.store.put_upgrade_job(job).await {
            self.jobs.write().await.remove(&job_id);
            self.release_agent(&options.agent_id);
            return Err(e);
        }
        let _ = self.events.send(ImprovementEvent::UpgradeStarted {
            job_id,
            agent_id: options.agent_id.clone(),
        });

        let machine = self.clone();
        tokio::spawn(async move {
            machine.run_job(job_id, options).await;
        });

        Ok(job_id)
    }

    /// Snapshot of a job's current state; terminal migrated jobs are found
    /// in the permanent history.
    pub async fn status(&self, job_id: Uuid) -> Option<UpgradeJob> {
        if let Some(job) = self.jobs.read().await.get(&job_id) {
            return Some(job.clone());
        }
        if let Ok(Some(job)) = self.store.get_upgrade_job(job_id).await {
            return Some(job);
        }
        match self.store.upgrade_history().await {
            Ok(history) => history.into_iter().find(|job| job.id == job_id),
            Err(_) => None,
        }
    }

    /// The irreversible cutover. Only valid from ReadyForMigration; moves
    /// the job from active to permanent history on success.
    pub async fn migrate(&self, job_id: Uuid) -> Result<UpgradeJob, ImprovementError> {
        let job = self
            .status(job_id)
            .await
            .ok_or(ImprovementError::JobNotFound { id: job_id })?;
        if job.status != UpgradeStatus::ReadyForMigration {
            return Err(ImprovementError::InvalidTransition {
                status: job.status.to_string(),
            });
        }

        let job = self
            .update_job(job_id, |job| {
                job.status = UpgradeStatus::Migrating;
                job.phase = UpgradePhase::Deployment;
            })
            .await?;

        for adapter_ref in &job.retrained_adapters {
            if let Err(e) = self.backend.load_adapter(&job.agent_id, adapter_ref).await {
                error!(job = %job_id, "migration cutover failed: {e}");
                self.handle_failure(
                    job_id,
                    ImprovementError::BackendFailure {
                        operation: "load_adapter".to_string(),
                        message: e.to_string(),
                    },
                )
                .await;
                return Err(e);
            }
        }

        let job = self
            .update_job(job_id, |job| {
                job.status = UpgradeStatus::Completed;
                job.advance_progress(UpgradePhase::Deployment.completed_progress());
                job.completed_at = Some(Utc::now());
            })
            .await?;

        self.jobs.write().await.remove(&job_id);
        self.store.archive_upgrade_job(job.clone()).await?;
        self.release_agent(&job.agent_id);
        let _ = self.events.send(ImprovementEvent::UpgradeTerminal {
            job_id,
            status: UpgradeStatus::Completed,
        });
        notify_best_effort(
            self.sink.as_ref(),
            "upgrade",
            &format!(
                "job {} migrated agent {} to {}",
                job_id, job.agent_id, job.target_model
            ),
        )
        .await;
        info!(job = %job_id, "migration completed");

        Ok(job)
    }

    async fn run_job(&self, job_id: Uuid, options: UpgradeOptions) {
        if let Err(e) = self.run_phases(job_id, &options).await {
            self.handle_failure(job_id, e).await;
        }
    }

    async fn run_phases(
        &self,
        job_id: Uuid,
        options: &UpgradeOptions,
    ) -> Result<(), ImprovementError> {
        self.update_job(job_id, |job| {
            job.status = UpgradeStatus::InProgress;
            job.started_at = Some(Utc::now());
        })
        .await?;

        self.prepare(job_id, options).await?;
        self.preserve_data(job_id, options).await?;
        if options.enable_distillation {
            self.distill(job_id, options).await?;
        }
        self.retrain_adapters(job_id, options).await?;
        let (win_rate, mean_preference) = self.parallel_evaluation(job_id, options).await?;

        // Decision gate: both conditions required. A narrow majority alone
        // must not trigger an irreversible migration.
        let recommended =
            win_rate >= self.config.min_win_rate && mean_preference >= self.config.min_mean_preference;
        self.update_job(job_id, |job| {
            job.final_metrics.insert("win_rate".to_string(), win_rate);
            job.final_metrics
                .insert("mean_preference".to_string(), mean_preference);
            job.migration_recommended = Some(recommended);
        })
        .await?;
        if !recommended {
            return Err(ImprovementError::PolicyRejection {
                reason: format!(
                    "migration not recommended: win_rate {win_rate:.2}, mean preference {mean_preference:.2}"
                ),
            });
        }

        self.validate(job_id, options, mean_preference).await?;

        let job = self
            .update_job(job_id, |job| {
                job.status = UpgradeStatus::ReadyForMigration;
            })
            .await?;
        notify_best_effort(
            self.sink.as_ref(),
            "upgrade",
            &format!(
                "job {} ready for migration (win rate {:.0}%, mean preference {:.2})",
                job_id,
                win_rate * 100.0,
                mean_preference
            ),
        )
        .await;
        info!(job = %job_id, agent = %job.agent_id, "upgrade ready for migration");

        Ok(())
    }

    /// Preparation: the backup namespace must exist before any mutation.
    async fn prepare(&self, job_id: Uuid, options: &UpgradeOptions) -> Result<(), ImprovementError> {
        let namespace = self
            .store
            .create_backup_namespace(job_id)
            .await
            .map_err(|e| ImprovementError::DataSafetyFailure {
                message: format!("backup namespace creation failed: {e}"),
            })?;

        let current_adapters: HashMap<String, String> = roles_with_shared(options)
            .map(|role| (role.clone(), format!("{}:{}", options.source_model, role)))
            .collect();
        self.store
            .put_backup(job_id, "adapters", json!(current_adapters))
            .await
            .map_err(data_safety)?;
        self.store
            .put_backup(job_id, "config", json!(options))
            .await
            .map_err(data_safety)?;

        self.complete_phase(job_id, UpgradePhase::Preparation, |job| {
            job.backup_namespace = Some(namespace);
            job.backup_artifacts = vec!["adapters".to_string(), "config".to_string()];
            job.rollback_available = true;
        })
        .await
    }

    /// DataPreservation: failure here aborts the job immediately.
    async fn preserve_data(
        &self,
        job_id: Uuid,
        options: &UpgradeOptions,
    ) -> Result<(), ImprovementError> {
        for dataset in ["dataset:original", "dataset:self_learning"] {
            let payload = json!({
                "agent_id": options.agent_id,
                "roles": options.roles,
                "snapshot_of": dataset,
            });
            self.store
                .put_backup(job_id, dataset, payload)
                .await
                .map_err(data_safety)?;
        }

        self.complete_phase(job_id, UpgradePhase::DataPreservation, |job| {
            job.backup_artifacts.push("dataset:original".to_string());
            job.backup_artifacts.push("dataset:self_learning".to_string());
        })
        .await
    }

    /// Distillation: a small fixed sample of teacher-style examples per
    /// role from the outgoing system, for stylistic continuity.
    async fn distill(&self, job_id: Uuid, options: &UpgradeOptions) -> Result<(), ImprovementError> {
        for role in &options.roles {
            // Pick the seeds up front; the rng must not be held across the
            // backend calls.
            let seeds: Vec<String> = {
                let mut rng = rand::thread_rng();
                STYLE_SEEDS
                    .choose_multiple(
                        &mut rng,
                        self.config.distillation_samples_per_role.min(STYLE_SEEDS.len()),
                    )
                    .map(|seed| seed.to_string())
                    .collect()
            };

            let mut samples = Vec::new();
            for seed in &seeds {
                let prompt = format!("As the {role} role, {seed}");
                let sample = self
                    .backend
                    .generate_response(&options.agent_id, &prompt)
                    .await?;
                samples.push(sample);
            }
            self.store
                .put_backup(job_id, &format!("distilled:{role}"), json!(samples))
                .await?;
        }

        self.complete_phase(job_id, UpgradePhase::Distillation, |_| {}).await
    }

    /// AdapterRetraining: opaque, non-deterministic backend work.
    async fn retrain_adapters(
        &self,
        job_id: Uuid,
        options: &UpgradeOptions,
    ) -> Result<(), ImprovementError> {
        let dataset_refs = self.store.list_backups(job_id).await?;
        let mut retrained = Vec::new();
        for role in roles_with_shared(options) {
            let adapter_ref = self
                .backend
                .retrain_adapter(&role, &options.target_model, &dataset_refs)
                .await?;
            retrained.push(adapter_ref);
        }

        self.complete_phase(job_id, UpgradePhase::AdapterRetraining, |job| {
            job.retrained_adapters = retrained;
        })
        .await
    }

    /// ParallelEvaluation: paired scenario runs, one comparison each.
    async fn parallel_evaluation(
        &self,
        job_id: Uuid,
        options: &UpgradeOptions,
    ) -> Result<(f64, f64), ImprovementError> {
        self.update_job(job_id, |job| {
            job.status = UpgradeStatus::ParallelTesting;
        })
        .await?;

        let scenarios = options
            .evaluation_scenarios
            .unwrap_or(self.config.evaluation_scenarios);
        let scores = self
            .backend
            .run_parallel_evaluation(&options.agent_id, scenarios)
            .await?;

        // Backend numbers are untrusted: drop non-finite pairs.
        let comparisons: Vec<PerformanceComparison> = scores
            .into_iter()
            .filter(|s| s.old_score.is_finite() && s.new_score.is_finite())
            .map(|s| PerformanceComparison::new(s.scenario, s.old_score, s.new_score))
            .collect();
        if comparisons.is_empty() {
            return Err(ImprovementError::BackendFailure {
                operation: "run_parallel_evaluation".to_string(),
                message: "no usable scenario scores returned".to_string(),
            });
        }

        let wins = comparisons
            .iter()
            .filter(|c| c.new_score > c.old_score)
            .count() as f64;
        let win_rate = wins / comparisons.len() as f64;
        let mean_preference =
            comparisons.iter().map(|c| c.preference).sum::<f64>() / comparisons.len() as f64;

        self.complete_phase(job_id, UpgradePhase::ParallelEvaluation, |job| {
            job.comparisons = comparisons;
        })
        .await?;

        Ok((win_rate, mean_preference))
    }

    /// Validation checklist: adapter loading, response generation, role
    /// consistency, no regression.
    async fn validate(
        &self,
        job_id: Uuid,
        options: &UpgradeOptions,
        mean_preference: f64,
    ) -> Result<(), ImprovementError> {
        let job = self
            .status(job_id)
            .await
            .ok_or(ImprovementError::JobNotFound { id: job_id })?;

        try_join_all(
            job.retrained_adapters
                .iter()
                .map(|adapter_ref| self.backend.load_adapter(&options.agent_id, adapter_ref)),
        )
        .await?;

        let response = self
            .backend
            .generate_response(&options.agent_id, "validation: describe your task in one sentence")
            .await?;
        if response.is_empty() {
            return Err(ImprovementError::BackendFailure {
                operation: "generate_response".to_string(),
                message: "empty validation response".to_string(),
            });
        }

        for role in &options.roles {
            let role_response = self
                .backend
                .generate_response(
                    &options.agent_id,
                    &format!("validation: answer as the {role} role"),
                )
                .await?;
            if role_response.is_empty() {
                return Err(ImprovementError::BackendFailure {
                    operation: "generate_response".to_string(),
                    message: format!("role {role} produced no validation response"),
                });
            }
        }

        if mean_preference < 0.5 {
            return Err(ImprovementError::PolicyRejection {
                reason: "regression detected during validation".to_string(),
            });
        }

        self.complete_phase(job_id, UpgradePhase::Validation, |_| {}).await
    }

    /// Automatic rollback path for any error raised before migration.
    async fn handle_failure(&self, job_id: Uuid, error: ImprovementError) {
        warn!(job = %job_id, "upgrade job failed: {error}");

        match &error {
            ImprovementError::DataSafetyFailure { .. } => {
                // Nothing has been mutated yet; fail immediately without a
                // restore pass.
                self.terminate_job(job_id, UpgradeStatus::Failed, &error.to_string())
                    .await;
            }
            ImprovementError::PolicyRejection { reason } => {
                // Designed outcome: restore and leave the job Failed with
                // the gate's rationale.
                let reason = reason.clone();
                let _restored = self.restore_from_backup(job_id).await;
                self.terminate_job(job_id, UpgradeStatus::Failed, &reason).await;
            }
            _ => {
                let restored = self.restore_from_backup(job_id).await;
                if restored {
                    self.terminate_job(job_id, UpgradeStatus::RolledBack, &error.to_string())
                        .await;
                } else {
                    self.terminate_job(job_id, UpgradeStatus::Failed, &error.to_string())
                        .await;
                }
            }
        }
    }

    /// Restore the source adapters recorded during Preparation. Returns
    /// whether restoration was confirmed; failures are logged, never
    /// re-raised.
    async fn restore_from_backup(&self, job_id: Uuid) -> bool {
        let adapters = match self.store.get_backup(job_id, "adapters").await {
            Ok(Some(payload)) => payload,
            Ok(None) => {
                warn!(job = %job_id, "no adapter backup recorded, nothing to restore");
                return false;
            }
            Err(e) => {
                error!(job = %job_id, "reading adapter backup failed: {e}");
                return false;
            }
        };

        let Ok(adapters) = serde_json::from_value::<HashMap<String, String>>(adapters) else {
            error!(job = %job_id, "adapter backup is not a role map");
            return false;
        };

        let agent_id = match self.jobs.read().await.get(&job_id) {
            Some(job) => job.agent_id.clone(),
            None => return false,
        };

        for (role, adapter_ref) in adapters {
            if let Err(e) = self.backend.load_adapter(&agent_id, &adapter_ref).await {
                error!(job = %job_id, role, "restoring adapter failed: {e}");
                return false;
            }
        }
        info!(job = %job_id, "restored adapters from backup namespace");
        true
    }

    async fn terminate_job(&self, job_id: Uuid, status: UpgradeStatus, error: &str) {
        let agent_id = match self
            .update_job(job_id, |job| {
                job.status = status;
                job.error = Some(error.to_string());
                job.completed_at = Some(Utc::now());
            })
            .await
        {
            Ok(job) => job.agent_id,
            Err(e) => {
                error!(job = %job_id, "recording terminal status failed: {e}");
                return;
            }
        };

        self.release_agent(&agent_id);
        let _ = self
            .events
            .send(ImprovementEvent::UpgradeTerminal { job_id, status });
        notify_best_effort(
            self.sink.as_ref(),
            "upgrade",
            &format!("job {job_id} ended {status}: {error}"),
        )
        .await;
    }

    /// Mark a phase complete: apply the mutation, raise progress to the
    /// phase boundary, persist, and emit the transition.
    async fn complete_phase(
        &self,
        job_id: Uuid,
        phase: UpgradePhase,
        apply: impl FnOnce(&mut UpgradeJob),
    ) -> Result<(), ImprovementError> {
        let job = self
            .update_job(job_id, |job| {
                apply(job);
                job.phase = phase;
                job.advance_progress(phase.completed_progress());
            })
            .await?;

        let _ = self.events.send(ImprovementEvent::UpgradePhaseChanged {
            job_id,
            phase,
            status: job.status,
            progress: job.progress_percentage,
        });
        notify_best_effort(
            self.sink.as_ref(),
            "upgrade",
            &format!("job {job_id} completed phase {phase} ({:.0}%)", job.progress_percentage),
        )
        .await;
        Ok(())
    }

    /// Mutate the job under the write lock, persist the new snapshot, and
    /// return it. The lock is released before the store write; per-job
    /// read-after-write consistency comes from the store contract.
    async fn update_job(
        &self,
        job_id: Uuid,
        apply: impl FnOnce(&mut UpgradeJob),
    ) -> Result<UpgradeJob, ImprovementError> {
        let snapshot = {
            let mut jobs = self.jobs.write().await;
            let job = jobs
                .get_mut(&job_id)
                .ok_or(ImprovementError::JobNotFound { id: job_id })?;
            apply(job);
            job.clone()
        };
        self.store.put_upgrade_job(snapshot.clone()).await?;
        Ok(snapshot)
    }

    fn release_agent(&self, agent_id: &str) {
        let mut active = self.active_agents.lock().unwrap_or_else(|e| e.into_inner());
        active.remove(agent_id);
    }
}

/// Prompt seeds for distillation samples.
const STYLE_SEEDS: &[&str] = &[
    "summarize a recent decision you made and why",
    "explain how you handle a conflicting requirement",
    "draft a short status update in your usual voice",
    "answer a stakeholder question in your usual format",
    "walk through how you weigh risk against speed",
    "describe how you escalate when confidence is low",
];

fn roles_with_shared(options: &UpgradeOptions) -> impl Iterator<Item = String> + '_ {
    options
        .roles
        .iter()
        .cloned()
        .chain(std::iter::once("cross_role".to_string()))
}

fn data_safety(e: ImprovementError) -> ImprovementError {
    ImprovementError::DataSafetyFailure {
        message: e.to_string(),
    }
}
