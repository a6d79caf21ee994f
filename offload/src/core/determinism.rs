//! Statistical determinism classification over the persisted execution corpus.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::{Deserialize, Serialize};

use crate::core::hashing::OperationKey;
use crate::core::types::{
    Classification, ClassifiedOperation, DeterminismScore, StoredExecutionBatch, ToolExecutionPair,
};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Groups with fewer complete observations are dropped entirely.
    pub min_sample_size: usize,
    pub deterministic_threshold: f64,
    pub semi_deterministic_threshold: f64,
    /// Composite score a deterministic candidate needs before scripting.
    pub min_confidence: f64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            min_sample_size: 3,
            deterministic_threshold: 0.95,
            semi_deterministic_threshold: 0.8,
            min_confidence: 0.7,
        }
    }
}

/// Complete pairs grouped by operation, in corpus order within each group.
pub fn group_operations(
    batches: &[StoredExecutionBatch],
) -> BTreeMap<OperationKey, Vec<&ToolExecutionPair>> {
    let mut groups: BTreeMap<OperationKey, Vec<&ToolExecutionPair>> = BTreeMap::new();
    for pair in batches
        .iter()
        .flat_map(|batch| batch.pairs.iter())
        .filter(|pair| pair.is_complete())
    {
        groups.entry(pair.key()).or_default().push(pair);
    }
    groups
}

/// `(unique − 1) / (n − 1)`, or 0 for `n <= 1`.
pub fn variance_score(observation_count: usize, unique_outputs: usize) -> f64 {
    if observation_count <= 1 {
        return 0.0;
    }
    unique_outputs.saturating_sub(1) as f64 / (observation_count - 1) as f64
}

#[derive(Debug, Clone, Default)]
pub struct DeterminismAnalyzer {
    config: AnalysisConfig,
}

impl DeterminismAnalyzer {
    pub fn new(config: AnalysisConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Score every operation with enough samples, most deterministic first.
    pub fn analyze(&self, batches: &[StoredExecutionBatch]) -> Vec<DeterminismScore> {
        let mut scores: Vec<DeterminismScore> = group_operations(batches)
            .into_iter()
            .filter(|(_, pairs)| pairs.len() >= self.config.min_sample_size)
            .map(|(operation_key, pairs)| score_group(operation_key, &pairs))
            .collect();
        scores.sort_by(|left, right| {
            left.variance_score
                .partial_cmp(&right.variance_score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| left.operation_key.cmp(&right.operation_key))
        });
        scores
    }

    /// Bucket scores by `1 − variance`, highest determinism first.
    pub fn classify(&self, scores: &[DeterminismScore]) -> Vec<ClassifiedOperation> {
        let mut classified: Vec<ClassifiedOperation> = scores
            .iter()
            .map(|score| {
                let determinism = 1.0 - score.variance_score;
                ClassifiedOperation {
                    score: score.clone(),
                    determinism,
                    classification: self.bucket(determinism),
                }
            })
            .collect();
        classified.sort_by(|left, right| {
            right
                .determinism
                .partial_cmp(&left.determinism)
                .unwrap_or(Ordering::Equal)
                .then_with(|| left.score.operation_key.cmp(&right.score.operation_key))
        });
        classified
    }

    pub fn bucket(&self, determinism: f64) -> Classification {
        if determinism >= self.config.deterministic_threshold {
            Classification::Deterministic
        } else if determinism >= self.config.semi_deterministic_threshold {
            Classification::SemiDeterministic
        } else {
            Classification::NonDeterministic
        }
    }
}

fn score_group(operation_key: OperationKey, pairs: &[&ToolExecutionPair]) -> DeterminismScore {
    let unique_outputs = pairs
        .iter()
        .filter_map(|pair| pair.output_hash.as_deref())
        .collect::<HashSet<_>>()
        .len();
    let session_ids: BTreeSet<&str> = pairs
        .iter()
        .map(|pair| pair.context.session_id.as_str())
        .collect();
    DeterminismScore {
        operation_key,
        variance_score: variance_score(pairs.len(), unique_outputs),
        observation_count: pairs.len(),
        unique_outputs,
        session_ids: session_ids.into_iter().map(str::to_string).collect(),
    }
}
