//! Cross-episode pattern analysis.
//!
//! Two independent streams feed the same `FeedbackPattern` shape:
//! stakeholder feedback (keyword-scored per dimension) and audit/episode
//! history (fixed heuristics per event kind). Patterns are derived
//! observations, not ground truth; anything below the caller-set minimum
//! confidence is discarded.

mod audit;
mod feedback;
mod keywords;

pub use keywords::dimension_keywords;

use crate::episode::{AuditRecord, StakeholderFeedback};
use crate::routing::FocusArea;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter};
use uuid::Uuid;

/// One of the five fleet-level adaptable aspects of agent behavior.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display,
    EnumIter,
)]
#[serde(rename_all = "snake_case")]
pub enum LearningDimension {
    BaseModel,
    ParameterWeights,
    Context,
    Prompt,
    IntegrationFeatures,
}

impl From<FocusArea> for LearningDimension {
    fn from(area: FocusArea) -> Self {
        match area {
            FocusArea::Context => LearningDimension::Context,
            FocusArea::Prompt => LearningDimension::Prompt,
            FocusArea::ParameterAdapter => LearningDimension::ParameterWeights,
            FocusArea::Integration => LearningDimension::IntegrationFeatures,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Improving,
    Stable,
    Degrading,
}

/// How far-reaching an adaptation should be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
pub enum AdaptationStrategy {
    Incremental,
    Targeted,
    Comprehensive,
    Experimental,
}

/// Aggregated per-dimension observation mined from one of the two streams.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackPattern {
    pub id: Uuid,
    pub dimension: LearningDimension,
    pub description: String,
    /// Number of contributing observations
    pub frequency: u32,
    /// Severity in [0,1]
    pub severity: f64,
    pub trend: TrendDirection,
    pub affected_roles: Vec<String>,
    pub suggested_strategy: AdaptationStrategy,
    /// Confidence in [0,1]
    pub confidence: f64,
}

/// Mines stakeholder feedback and audit history for recurring
/// per-dimension issues.
pub struct FeedbackPatternAnalyzer;

impl FeedbackPatternAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// Stream (a): stakeholder feedback grouped by type, keyword-scored
    /// per dimension.
    pub fn analyze_feedback(
        &self,
        batch: &[StakeholderFeedback],
        min_confidence: f64,
    ) -> Vec<FeedbackPattern> {
        feedback::analyze(batch, min_confidence)
    }

    /// Stream (b): audit/episode history grouped by event kind, with fixed
    /// per-signal heuristics.
    pub fn analyze_history(
        &self,
        records: &[AuditRecord],
        min_confidence: f64,
    ) -> Vec<FeedbackPattern> {
        audit::analyze(records, min_confidence)
    }
}

impl Default for FeedbackPatternAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared strategy rule: severity and frequency both high ⇒ Comprehensive;
/// either high ⇒ Targeted; any signal ⇒ Incremental; none ⇒ Experimental.
pub(crate) fn suggest_strategy(severity: f64, frequency: u32) -> AdaptationStrategy {
    const HIGH_SEVERITY: f64 = 0.7;
    const HIGH_FREQUENCY: u32 = 5;

    let severe = severity >= HIGH_SEVERITY;
    let frequent = frequency >= HIGH_FREQUENCY;
    match (severe, frequent) {
        (true, true) => AdaptationStrategy::Comprehensive,
        (true, false) | (false, true) => AdaptationStrategy::Targeted,
        (false, false) if frequency > 0 => AdaptationStrategy::Incremental,
        _ => AdaptationStrategy::Experimental,
    }
}
