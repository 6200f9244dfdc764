//! Fixed per-dimension keyword sets for scoring stakeholder feedback.

use super::LearningDimension;
use once_cell::sync::Lazy;

static KEYWORDS: Lazy<Vec<(LearningDimension, Vec<&'static str>)>> = Lazy::new(|| {
    vec![
        (
            LearningDimension::BaseModel,
            vec![
                "model",
                "capability",
                "reasoning",
                "knowledge",
                "outdated",
                "hallucinat",
            ],
        ),
        (
            LearningDimension::ParameterWeights,
            vec!["accuracy", "wrong", "incorrect", "mistake", "quality", "inconsistent"],
        ),
        (
            LearningDimension::Context,
            vec!["context", "retrieval", "memory", "history", "irrelevant", "stale"],
        ),
        (
            LearningDimension::Prompt,
            vec!["prompt", "instruction", "tone", "format", "wording", "verbose"],
        ),
        (
            LearningDimension::IntegrationFeatures,
            vec!["integration", "tool", "api", "timeout", "connection", "interface"],
        ),
    ]
});

/// Keyword set for one dimension.
pub fn dimension_keywords(dimension: LearningDimension) -> &'static [&'static str] {
    KEYWORDS
        .iter()
        .find(|(dim, _)| *dim == dimension)
        .map(|(_, words)| words.as_slice())
        .unwrap_or(&[])
}

/// Number of dimension keywords appearing in the comment (case-insensitive
/// substring match).
pub fn keyword_overlap(comment: &str, dimension: LearningDimension) -> usize {
    let lowered = comment.to_lowercase();
    dimension_keywords(dimension)
        .iter()
        .filter(|word| lowered.contains(*word))
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_every_dimension_has_keywords() {
        for dimension in LearningDimension::iter() {
            assert!(!dimension_keywords(dimension).is_empty());
        }
    }

    #[test]
    fn test_overlap_is_case_insensitive() {
        assert_eq!(
            keyword_overlap("The TONE and Format are off", LearningDimension::Prompt),
            2
        );
        assert_eq!(keyword_overlap("all good", LearningDimension::Prompt), 0);
    }
}
