//! Improvement engine error types

use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur while the engine analyzes, adapts or upgrades.
#[derive(Error, Debug)]
pub enum ImprovementError {
    /// A sub-metric's input was absent; only that field degrades to null
    #[error("Missing signal for {field}")]
    MissingSignal { field: String },

    /// Input could not be interpreted; treated as a missing signal locally
    #[error("Malformed input: {message}")]
    MalformedInput { message: String },

    /// The serving/training backend failed an operation
    #[error("Backend failure during {operation}: {message}")]
    BackendFailure { operation: String, message: String },

    /// A backup or preservation step failed; fatal for the affected job
    #[error("Data safety failure: {message}")]
    DataSafetyFailure { message: String },

    /// The shadow gate or migration gate declined the change
    #[error("Policy rejection: {reason}")]
    PolicyRejection { reason: String },

    /// The durable store failed a read or write
    #[error("Store failure: {message}")]
    StoreFailure { message: String },

    /// No upgrade job with the given id
    #[error("Upgrade job not found: {id}")]
    JobNotFound { id: Uuid },

    /// The requested operation is not valid in the job's current status
    #[error("Invalid transition from status {status}")]
    InvalidTransition { status: String },

    /// An upgrade job is already in flight for the agent
    #[error("An upgrade job is already running for agent {agent_id}")]
    UpgradeAlreadyRunning { agent_id: String },
}

impl ImprovementError {
    pub fn backend(operation: impl Into<String>, err: impl std::fmt::Display) -> Self {
        ImprovementError::BackendFailure {
            operation: operation.into(),
            message: err.to_string(),
        }
    }
}

impl From<anyhow::Error> for ImprovementError {
    fn from(err: anyhow::Error) -> Self {
        ImprovementError::MalformedInput {
            message: err.to_string(),
        }
    }
}
