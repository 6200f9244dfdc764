//! Continuous self-improvement engine for a fleet of role-specialized
//! decision agents.
//!
//! The engine ingests outcome episodes and stakeholder feedback, derives
//! quantitative signals, routes each episode to a focus area, mines
//! cross-episode patterns, and turns qualifying patterns into cost/risk
//! ranked adaptation decisions. Every applied change is verified through a
//! shadow evaluation against the held-out baseline and rolled back when it
//! does not demonstrably help. The highest-risk pathway, a full base-model
//! upgrade, runs as a phased background job with backups, optional
//! distillation, parallel evaluation and an explicit migration gate.

pub mod adaptation;
pub mod backend;
pub mod config;
pub mod engine;
pub mod episode;
pub mod error;
pub mod metrics;
pub mod notify;
pub mod patterns;
pub mod routing;
pub mod shadow;
pub mod store;
pub mod upgrade;

pub use adaptation::{
    AdaptationDecision, AdaptationExecutor, AdaptationPrioritizer, AdaptationRecord,
    DimensionalMetrics,
};
pub use backend::ModelBackend;
pub use config::EngineConfig;
pub use engine::{ImprovementEngine, ImprovementEvent};
pub use episode::{AuditRecord, EpisodeEvent, EpisodeSource, StakeholderFeedback};
pub use error::ImprovementError;
pub use metrics::{DerivedMetrics, DerivedMetricsCalculator};
pub use patterns::{
    AdaptationStrategy, FeedbackPattern, FeedbackPatternAnalyzer, LearningDimension,
};
pub use routing::{DecisionEngine, FocusArea, PromptSensitivityProbe};
pub use shadow::{ShadowEvaluationGate, ShadowVerdict};
pub use store::{ImprovementStore, InMemoryStore};
pub use upgrade::{
    ModelUpgradeStateMachine, PerformanceComparison, UpgradeJob, UpgradeOptions, UpgradePhase,
    UpgradeStatus,
};
