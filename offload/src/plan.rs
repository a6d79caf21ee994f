//! Offline offload planning over a point-in-time corpus snapshot.
//!
//! corpus → determinism scores → classification → candidates → scripts, then
//! optionally dry runs. Only candidates whose script passed a dry run are
//! exported as [`OffloadOperation`]s.

use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::core::candidates::rank_candidates;
use crate::core::determinism::{AnalysisConfig, DeterminismAnalyzer, group_operations};
use crate::core::script::ScriptGenerator;
use crate::core::types::{
    ClassifiedOperation, DryRunResult, GeneratedScript, OffloadOperation, PromotionCandidate,
    StoredExecutionBatch, ToolExecutionPair,
};
use crate::io::dry_run::DryRunValidator;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanEntry {
    pub candidate: PromotionCandidate,
    pub script: GeneratedScript,
    /// Output hash of the representative recording the script must reproduce.
    pub expected_output_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dry_run: Option<DryRunResult>,
}

impl PlanEntry {
    pub fn verified(&self) -> bool {
        self.dry_run.as_ref().is_some_and(|result| result.passed)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OffloadPlan {
    pub classified: Vec<ClassifiedOperation>,
    pub candidates: Vec<PromotionCandidate>,
    pub entries: Vec<PlanEntry>,
}

impl OffloadPlan {
    /// Operations that are valid and passed verification.
    pub fn verified_operations(&self) -> Vec<OffloadOperation> {
        self.entries
            .iter()
            .filter(|entry| entry.verified())
            .filter_map(|entry| entry.script.to_operation())
            .collect()
    }
}

/// Most recent complete recording; later corpus position wins ties.
fn representative<'a>(pairs: &[&'a ToolExecutionPair]) -> Option<&'a ToolExecutionPair> {
    pairs
        .iter()
        .copied()
        .filter(|pair| pair.is_complete())
        .max_by_key(|pair| pair.timestamp)
}

/// Analyze the corpus and generate scripts for every confident candidate.
#[instrument(skip_all, fields(batches = batches.len()))]
pub fn build_plan(
    batches: &[StoredExecutionBatch],
    analysis: &AnalysisConfig,
    generator: &ScriptGenerator,
) -> OffloadPlan {
    let analyzer = DeterminismAnalyzer::new(*analysis);
    let groups = group_operations(batches);
    let classified = analyzer.classify(&analyzer.analyze(batches));
    let candidates = rank_candidates(&classified, &groups, analysis);

    let mut entries = Vec::new();
    for candidate in candidates.iter().filter(|candidate| candidate.meets_confidence) {
        let Some(pair) = groups
            .get(candidate.key())
            .and_then(|pairs| representative(pairs))
        else {
            continue;
        };
        let Some(expected_output_hash) = pair.output_hash.clone() else {
            continue;
        };
        let script = generator.generate(candidate, pair);
        debug!(id = %script.id, valid = script.is_valid, "script generated");
        entries.push(PlanEntry {
            candidate: candidate.clone(),
            script,
            expected_output_hash,
            dry_run: None,
        });
    }

    info!(
        operations = classified.len(),
        candidates = candidates.len(),
        scripted = entries.len(),
        "offload plan built"
    );
    OffloadPlan {
        classified,
        candidates,
        entries,
    }
}

/// Dry-run every entry, recording each verdict on the plan.
pub fn verify_plan(plan: &mut OffloadPlan, validator: &DryRunValidator) {
    for entry in &mut plan.entries {
        entry.dry_run = Some(validator.validate(&entry.script, &entry.expected_output_hash));
    }
    let passed = plan.entries.iter().filter(|entry| entry.verified()).count();
    info!(passed, total = plan.entries.len(), "offload plan verified");
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::test_support::{bash_pair, batch, read_pair};

    #[test]
    fn representative_is_latest_recording() {
        let older = read_pair("/a", "old", 1, "s1");
        let newer = read_pair("/a", "new", 5, "s2");
        let pairs = vec![&newer, &older];
        assert_eq!(representative(&pairs).map(|pair| pair.output.as_str()), Some("new"));
    }

    #[test]
    fn only_confident_candidates_get_scripts() {
        let batches = vec![
            batch("s1", vec![read_pair("/a", "a", 1, "s1"), bash_pair("date", "1", 2, "s1")]),
            batch("s2", vec![read_pair("/a", "a", 3, "s2"), bash_pair("date", "2", 4, "s2")]),
            batch("s3", vec![read_pair("/a", "a", 5, "s3"), bash_pair("date", "3", 6, "s3")]),
        ];
        let generator = ScriptGenerator::new("/tmp", Duration::from_secs(5));
        let plan = build_plan(&batches, &AnalysisConfig::default(), &generator);

        assert_eq!(plan.classified.len(), 2);
        assert_eq!(plan.candidates.len(), 2);
        assert_eq!(plan.entries.len(), 1);
        let entry = &plan.entries[0];
        assert_eq!(entry.script.id.tool_name, "Read");
        assert_eq!(entry.expected_output_hash, crate::core::hashing::output_hash(b"a"));
        assert!(plan.verified_operations().is_empty());
    }
}
