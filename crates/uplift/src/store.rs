//! Durable-store boundary and the in-memory implementation.
//!
//! The store persists dimensional metrics, adaptation history, upgrade job
//! records and backups. Strong read-after-write consistency is required
//! per job id only; nothing here assumes cross-agent consistency.

use crate::adaptation::{AdaptationRecord, DimensionalMetrics};
use crate::error::ImprovementError;
use crate::patterns::LearningDimension;
use crate::upgrade::UpgradeJob;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[async_trait]
pub trait ImprovementStore: Send + Sync {
    async fn put_dimensional_metrics(
        &self,
        agent_id: &str,
        dimension: LearningDimension,
        metrics: DimensionalMetrics,
    ) -> Result<(), ImprovementError>;

    async fn get_dimensional_metrics(
        &self,
        agent_id: &str,
    ) -> Result<HashMap<LearningDimension, DimensionalMetrics>, ImprovementError>;

    async fn append_adaptation_record(
        &self,
        record: AdaptationRecord,
    ) -> Result<(), ImprovementError>;

    async fn adaptation_history(
        &self,
        agent_id: &str,
    ) -> Result<Vec<AdaptationRecord>, ImprovementError>;

    async fn put_upgrade_job(&self, job: UpgradeJob) -> Result<(), ImprovementError>;

    async fn get_upgrade_job(&self, job_id: Uuid) -> Result<Option<UpgradeJob>, ImprovementError>;

    /// Move a terminal job into permanent history.
    async fn archive_upgrade_job(&self, job: UpgradeJob) -> Result<(), ImprovementError>;

    async fn upgrade_history(&self) -> Result<Vec<UpgradeJob>, ImprovementError>;

    /// Create the per-job backup namespace; returns its path. Must be
    /// called before any artifact is written for the job.
    async fn create_backup_namespace(&self, job_id: Uuid) -> Result<String, ImprovementError>;

    async fn put_backup(
        &self,
        job_id: Uuid,
        name: &str,
        payload: serde_json::Value,
    ) -> Result<(), ImprovementError>;

    async fn get_backup(
        &self,
        job_id: Uuid,
        name: &str,
    ) -> Result<Option<serde_json::Value>, ImprovementError>;

    async fn list_backups(&self, job_id: Uuid) -> Result<Vec<String>, ImprovementError>;
}

/// In-memory store for tests and single-process embedding.
pub struct InMemoryStore {
    dimensional: Arc<RwLock<HashMap<String, HashMap<LearningDimension, DimensionalMetrics>>>>,
    history: Arc<RwLock<Vec<AdaptationRecord>>>,
    jobs: Arc<RwLock<HashMap<Uuid, UpgradeJob>>>,
    archived: Arc<RwLock<Vec<UpgradeJob>>>,
    backups: Arc<RwLock<HashMap<Uuid, Vec<(String, serde_json::Value)>>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            dimensional: Arc::new(RwLock::new(HashMap::new())),
            history: Arc::new(RwLock::new(Vec::new())),
            jobs: Arc::new(RwLock::new(HashMap::new())),
            archived: Arc::new(RwLock::new(Vec::new())),
            backups: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ImprovementStore for InMemoryStore {
    async fn put_dimensional_metrics(
        &self,
        agent_id: &str,
        dimension: LearningDimension,
        metrics: DimensionalMetrics,
    ) -> Result<(), ImprovementError> {
        let mut dimensional = self.dimensional.write().await;
        dimensional
            .entry(agent_id.to_string())
            .or_default()
            .insert(dimension, metrics);
        Ok(())
    }

    async fn get_dimensional_metrics(
        &self,
        agent_id: &str,
    ) -> Result<HashMap<LearningDimension, DimensionalMetrics>, ImprovementError> {
        let dimensional = self.dimensional.read().await;
        Ok(dimensional.get(agent_id).cloned().unwrap_or_default())
    }

    async fn append_adaptation_record(
        &self,
        record: AdaptationRecord,
    ) -> Result<(), ImprovementError> {
        self.history.write().await.push(record);
        Ok(())
    }

    async fn adaptation_history(
        &self,
        agent_id: &str,
    ) -> Result<Vec<AdaptationRecord>, ImprovementError> {
        let history = self.history.read().await;
        Ok(history
            .iter()
            .filter(|r| r.decision.agent_id == agent_id)
            .cloned()
            .collect())
    }

    async fn put_upgrade_job(&self, job: UpgradeJob) -> Result<(), ImprovementError> {
        self.jobs.write().await.insert(job.id, job);
        Ok(())
    }

    async fn get_upgrade_job(&self, job_id: Uuid) -> Result<Option<UpgradeJob>, ImprovementError> {
        Ok(self.jobs.read().await.get(&job_id).cloned())
    }

    async fn archive_upgrade_job(&self, job: UpgradeJob) -> Result<(), ImprovementError> {
        let mut jobs = self.jobs.write().await;
        jobs.remove(&job.id);
        self.archived.write().await.push(job);
        Ok(())
    }

    async fn upgrade_history(&self) -> Result<Vec<UpgradeJob>, ImprovementError> {
        Ok(self.archived.read().await.clone())
    }

    async fn create_backup_namespace(&self, job_id: Uuid) -> Result<String, ImprovementError> {
        let mut backups = self.backups.write().await;
        backups.entry(job_id).or_default();
        Ok(format!("backups/{job_id}"))
    }

    async fn put_backup(
        &self,
        job_id: Uuid,
        name: &str,
        payload: serde_json::Value,
    ) -> Result<(), ImprovementError> {
        let mut backups = self.backups.write().await;
        let namespace = backups
            .get_mut(&job_id)
            .ok_or_else(|| ImprovementError::StoreFailure {
                message: format!("no backup namespace for job {job_id}"),
            })?;
        namespace.push((name.to_string(), payload));
        Ok(())
    }

    async fn get_backup(
        &self,
        job_id: Uuid,
        name: &str,
    ) -> Result<Option<serde_json::Value>, ImprovementError> {
        let backups = self.backups.read().await;
        Ok(backups.get(&job_id).and_then(|namespace| {
            namespace
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, payload)| payload.clone())
        }))
    }

    async fn list_backups(&self, job_id: Uuid) -> Result<Vec<String>, ImprovementError> {
        let backups = self.backups.read().await;
        Ok(backups
            .get(&job_id)
            .map(|namespace| namespace.iter().map(|(n, _)| n.clone()).collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dimensional_metrics_roundtrip() {
        let store = InMemoryStore::new();
        let mut metrics = DimensionalMetrics::default();
        metrics.current_score = 0.8;

        store
            .put_dimensional_metrics("agent-1", LearningDimension::Prompt, metrics)
            .await
            .unwrap();

        let loaded = store.get_dimensional_metrics("agent-1").await.unwrap();
        assert_eq!(loaded[&LearningDimension::Prompt].current_score, 0.8);
        assert!(store
            .get_dimensional_metrics("agent-2")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_backup_requires_namespace() {
        let store = InMemoryStore::new();
        let job_id = Uuid::new_v4();

        let err = store
            .put_backup(job_id, "adapters", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ImprovementError::StoreFailure { .. }));

        store.create_backup_namespace(job_id).await.unwrap();
        store
            .put_backup(job_id, "adapters", serde_json::json!({"role": "critic"}))
            .await
            .unwrap();

        assert_eq!(store.list_backups(job_id).await.unwrap(), vec!["adapters"]);
        assert!(store
            .get_backup(job_id, "adapters")
            .await
            .unwrap()
            .is_some());
    }
}
