//! Scoring classified operations as caching candidates.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::core::determinism::AnalysisConfig;
use crate::core::hashing::OperationKey;
use crate::core::types::{
    Classification, ClassifiedOperation, PromotionCandidate, ToolExecutionPair,
};

const DETERMINISM_WEIGHT: f64 = 0.7;
const FREQUENCY_WEIGHT: f64 = 0.2;
const SESSION_WEIGHT: f64 = 0.1;
/// Observations at which the frequency factor saturates.
const FREQUENCY_SATURATION: f64 = 10.0;
/// Distinct sessions at which the session factor saturates.
const SESSION_SATURATION: f64 = 3.0;
const CHARS_PER_TOKEN: usize = 4;

/// Weighted blend of determinism, frequency, and session spread in [0,1].
pub fn composite_score(determinism: f64, frequency: usize, sessions: usize) -> f64 {
    let frequency_factor = (frequency as f64 / FREQUENCY_SATURATION).min(1.0);
    let session_factor = (sessions as f64 / SESSION_SATURATION).min(1.0);
    (DETERMINISM_WEIGHT * determinism
        + FREQUENCY_WEIGHT * frequency_factor
        + SESSION_WEIGHT * session_factor)
        .clamp(0.0, 1.0)
}

/// Tokens saved if every repeat after the first were served from cache.
pub fn estimated_token_savings(frequency: usize, outputs: &[&ToolExecutionPair]) -> u64 {
    if frequency <= 1 || outputs.is_empty() {
        return 0;
    }
    let total_chars: usize = outputs.iter().map(|pair| pair.output.chars().count()).sum();
    let average_chars = total_chars.div_ceil(outputs.len());
    let tokens_per_call = average_chars.div_ceil(CHARS_PER_TOKEN);
    ((frequency - 1) * tokens_per_call) as u64
}

/// Build candidates from classified operations, best first.
///
/// `groups` supplies the observed outputs used for token estimates; an
/// operation missing from it is scored with zero savings.
pub fn rank_candidates(
    classified: &[ClassifiedOperation],
    groups: &BTreeMap<OperationKey, Vec<&ToolExecutionPair>>,
    config: &AnalysisConfig,
) -> Vec<PromotionCandidate> {
    let mut candidates: Vec<PromotionCandidate> = classified
        .iter()
        .map(|operation| {
            let score = &operation.score;
            let frequency = score.observation_count;
            let outputs = groups
                .get(&score.operation_key)
                .map(Vec::as_slice)
                .unwrap_or_default();
            let composite = composite_score(operation.determinism, frequency, score.session_ids.len());
            PromotionCandidate {
                operation: operation.clone(),
                frequency,
                estimated_token_savings: estimated_token_savings(frequency, outputs),
                composite_score: composite,
                meets_confidence: operation.classification == Classification::Deterministic
                    && composite >= config.min_confidence,
            }
        })
        .collect();
    candidates.sort_by(|left, right| {
        right
            .composite_score
            .partial_cmp(&left.composite_score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| left.key().cmp(right.key()))
    });
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::determinism::{DeterminismAnalyzer, group_operations};
    use crate::test_support::{bash_pair, batch, read_pair};

    const EPSILON: f64 = 1e-9;

    #[test]
    fn composite_saturates() {
        assert!((composite_score(1.0, 10, 3) - 1.0).abs() < EPSILON);
        assert!((composite_score(1.0, 50, 9) - 1.0).abs() < EPSILON);
        assert!((composite_score(0.0, 0, 0)).abs() < EPSILON);
        assert!((composite_score(1.0, 3, 3) - 0.86).abs() < EPSILON);
    }

    #[test]
    fn token_savings_count_repeats_only() {
        let pairs = [
            read_pair("/a", "12345678", 1, "s1"),
            read_pair("/a", "12345678", 2, "s1"),
            read_pair("/a", "12345678", 3, "s1"),
        ];
        let refs: Vec<&ToolExecutionPair> = pairs.iter().collect();
        assert_eq!(estimated_token_savings(3, &refs), 4);
        assert_eq!(estimated_token_savings(1, &refs[..1]), 0);
    }

    #[test]
    fn deterministic_high_frequency_meets_confidence() {
        let batches = vec![
            batch("s1", vec![read_pair("/src/index.ts", "body", 1, "s1")]),
            batch("s2", vec![read_pair("/src/index.ts", "body", 2, "s2")]),
            batch("s3", vec![read_pair("/src/index.ts", "body", 3, "s3")]),
            batch(
                "s4",
                vec![
                    bash_pair("date", "1", 4, "s4"),
                    bash_pair("date", "2", 5, "s4"),
                    bash_pair("date", "3", 6, "s4"),
                ],
            ),
        ];
        let config = AnalysisConfig::default();
        let analyzer = DeterminismAnalyzer::new(config);
        let classified = analyzer.classify(&analyzer.analyze(&batches));
        let groups = group_operations(&batches);

        let candidates = rank_candidates(&classified, &groups, &config);
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].key().tool_name, "Read");
        assert!(candidates[0].meets_confidence);
        assert_eq!(candidates[0].frequency, 3);
        assert_eq!(candidates[0].estimated_token_savings, 2);
        assert_eq!(candidates[1].key().tool_name, "Bash");
        assert!(!candidates[1].meets_confidence);
    }
}
