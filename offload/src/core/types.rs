//! Shared data model for capture, analysis, and offload planning.
//!
//! These types are the stable contracts between the pure core and the I/O
//! layer. Persisted shapes use camelCase field names so logs stay readable by
//! the producers and consumers outside this crate.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::hashing::{OperationKey, output_hash};

/// Envelope category used for persisted execution batches.
pub const EXECUTION_CATEGORY: &str = "tool-executions";

/// Whether a captured tool call has a matching result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PairStatus {
    Complete,
    Partial,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairContext {
    pub session_id: String,
}

/// One captured tool call.
///
/// `output_hash` is `None` iff `status == Partial`. Partial pairs never reach
/// analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolExecutionPair {
    pub tool_name: String,
    pub input: Map<String, Value>,
    pub output: String,
    pub output_hash: Option<String>,
    pub status: PairStatus,
    /// Unix epoch milliseconds.
    pub timestamp: i64,
    pub context: PairContext,
}

impl ToolExecutionPair {
    /// A finished call; the output hash is derived from `output`.
    pub fn complete(
        tool_name: impl Into<String>,
        input: Map<String, Value>,
        output: impl Into<String>,
        timestamp: i64,
        session_id: impl Into<String>,
    ) -> Self {
        let output = output.into();
        Self {
            tool_name: tool_name.into(),
            input,
            output_hash: Some(output_hash(output.as_bytes())),
            output,
            status: PairStatus::Complete,
            timestamp,
            context: PairContext {
                session_id: session_id.into(),
            },
        }
    }

    /// A call whose result was never observed.
    pub fn partial(
        tool_name: impl Into<String>,
        input: Map<String, Value>,
        timestamp: i64,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            tool_name: tool_name.into(),
            input,
            output: String::new(),
            output_hash: None,
            status: PairStatus::Partial,
            timestamp,
            context: PairContext {
                session_id: session_id.into(),
            },
        }
    }

    pub fn is_complete(&self) -> bool {
        self.status == PairStatus::Complete && self.output_hash.is_some()
    }

    pub fn key(&self) -> OperationKey {
        OperationKey::for_input(&self.tool_name, &self.input)
    }

    /// Restore the hash/status invariant on pairs from untrusted producers.
    pub fn normalized(mut self) -> Self {
        match self.status {
            PairStatus::Complete if self.output_hash.is_none() => {
                self.output_hash = Some(output_hash(self.output.as_bytes()));
            }
            PairStatus::Partial => self.output_hash = None,
            PairStatus::Complete => {}
        }
        self
    }
}

/// One session's captured pairs, as persisted in an envelope's `data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredExecutionBatch {
    pub session_id: String,
    pub context: PairContext,
    pub pairs: Vec<ToolExecutionPair>,
    pub complete_count: usize,
    pub partial_count: usize,
    /// Unix epoch milliseconds.
    pub captured_at: i64,
}

impl StoredExecutionBatch {
    pub fn from_pairs(
        session_id: impl Into<String>,
        pairs: Vec<ToolExecutionPair>,
        captured_at: i64,
    ) -> Self {
        let session_id = session_id.into();
        let pairs: Vec<ToolExecutionPair> = pairs
            .into_iter()
            .map(ToolExecutionPair::normalized)
            .collect();
        let complete_count = pairs.iter().filter(|pair| pair.is_complete()).count();
        Self {
            context: PairContext {
                session_id: session_id.clone(),
            },
            session_id,
            partial_count: pairs.len() - complete_count,
            complete_count,
            pairs,
            captured_at,
        }
    }
}

/// One persisted JSONL line.
///
/// `checksum` covers `data` only; unknown top-level fields are preserved in
/// `extra` and are not integrity protected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub timestamp: i64,
    pub category: String,
    pub data: Map<String, Value>,
    #[serde(rename = "_checksum", default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Envelope {
    pub fn new(timestamp: i64, category: impl Into<String>, data: Map<String, Value>) -> Self {
        Self {
            timestamp,
            category: category.into(),
            data,
            checksum: None,
            extra: Map::new(),
        }
    }
}

/// Retention tier for a session observation. Only moves ephemeral → persistent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Ephemeral,
    Persistent,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ObservationMetrics {
    pub user_messages: u64,
    pub assistant_messages: u64,
    pub tool_calls: u64,
    pub unique_files_read: u64,
    pub unique_files_written: u64,
    pub unique_commands_run: u64,
}

impl ObservationMetrics {
    pub fn add(&mut self, other: &ObservationMetrics) {
        self.user_messages += other.user_messages;
        self.assistant_messages += other.assistant_messages;
        self.tool_calls += other.tool_calls;
        self.unique_files_read += other.unique_files_read;
        self.unique_files_written += other.unique_files_written;
        self.unique_commands_run += other.unique_commands_run;
    }
}

/// Session-level rollup of one (possibly partial) work period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionObservation {
    pub session_id: String,
    /// Unix epoch milliseconds.
    pub start_time: i64,
    /// Unix epoch milliseconds.
    pub end_time: i64,
    pub duration_minutes: i64,
    /// How observation began (e.g. `startup`, `resume`).
    pub source: String,
    /// How the session ended (e.g. `clear`, `logout`).
    pub reason: String,
    pub metrics: ObservationMetrics,
    #[serde(default)]
    pub top_commands: Vec<String>,
    #[serde(default)]
    pub top_files: Vec<String>,
    #[serde(default)]
    pub top_tools: Vec<String>,
    #[serde(default)]
    pub active_skills: Vec<String>,
    pub tier: Tier,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub squashed_from: Option<u32>,
}

impl SessionObservation {
    pub fn has_rich_metadata(&self) -> bool {
        !self.top_commands.is_empty() || !self.top_files.is_empty() || !self.top_tools.is_empty()
    }
}

/// Output variance statistics for one operation across the corpus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeterminismScore {
    pub operation_key: OperationKey,
    /// 0 = every observation produced the same output.
    pub variance_score: f64,
    pub observation_count: usize,
    pub unique_outputs: usize,
    /// Deduplicated and sorted.
    pub session_ids: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Classification {
    Deterministic,
    SemiDeterministic,
    NonDeterministic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifiedOperation {
    #[serde(flatten)]
    pub score: DeterminismScore,
    pub determinism: f64,
    pub classification: Classification,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromotionCandidate {
    #[serde(flatten)]
    pub operation: ClassifiedOperation,
    pub frequency: usize,
    pub estimated_token_savings: u64,
    pub composite_score: f64,
    pub meets_confidence: bool,
}

impl PromotionCandidate {
    pub fn key(&self) -> &OperationKey {
        &self.operation.score.operation_key
    }

    pub fn session_count(&self) -> usize {
        self.operation.score.session_ids.len()
    }
}

/// What a generated script does, keyed by the strategy that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScriptType {
    ContentDump,
    Command,
    FileWrite,
    DirectoryScan,
    PatternSearch,
}

/// Result of script synthesis for one operation.
///
/// `is_valid == false` means no strategy (or no safe strategy) exists; the
/// script body is then empty and must never be executed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedScript {
    pub id: OperationKey,
    pub script: String,
    pub script_type: Option<ScriptType>,
    pub working_dir: PathBuf,
    /// Milliseconds.
    #[serde(rename = "timeout")]
    pub timeout_ms: u64,
    pub env: BTreeMap<String, String>,
    pub is_valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invalid_reason: Option<String>,
}

impl GeneratedScript {
    /// Export shape for the external execution layer; `None` for invalid scripts.
    pub fn to_operation(&self) -> Option<OffloadOperation> {
        if !self.is_valid {
            return None;
        }
        Some(OffloadOperation {
            id: self.id.to_string(),
            script: self.script.clone(),
            script_type: self.script_type?,
            working_dir: self.working_dir.clone(),
            timeout_ms: self.timeout_ms,
            env: self.env.clone(),
        })
    }
}

/// A verified replacement handed to the external execution layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OffloadOperation {
    pub id: String,
    pub script: String,
    pub script_type: ScriptType,
    pub working_dir: PathBuf,
    /// Milliseconds.
    #[serde(rename = "timeout")]
    pub timeout_ms: u64,
    pub env: BTreeMap<String, String>,
}

/// Fixed taxonomy of dry-run failure categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    /// Unsupported tool or unsafe input; nothing was spawned.
    Invalid,
    /// Non-zero exit, timeout kill, or spawn failure.
    ExitCode,
    /// Script ran cleanly but its output drifted from the recording.
    HashMismatch,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DryRunFailure {
    #[error("operation {id} is invalid or unsupported: {reason}")]
    Invalid { id: String, reason: String },
    #[error("script exited with non-zero exit code {code}")]
    NonZeroExit { code: i32 },
    #[error("script killed after exceeding {timeout_ms}ms timeout (non-zero exit)")]
    TimedOut { timeout_ms: u64 },
    #[error("script could not be started (non-zero exit): {0}")]
    SpawnFailed(String),
    #[error("output hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },
}

impl DryRunFailure {
    pub fn kind(&self) -> FailureKind {
        match self {
            DryRunFailure::Invalid { .. } => FailureKind::Invalid,
            DryRunFailure::NonZeroExit { .. }
            | DryRunFailure::TimedOut { .. }
            | DryRunFailure::SpawnFailed(_) => FailureKind::ExitCode,
            DryRunFailure::HashMismatch { .. } => FailureKind::HashMismatch,
        }
    }
}

/// Verdict of replaying a generated script against recorded ground truth.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DryRunResult {
    pub passed: bool,
    pub actual_output_hash: Option<String>,
    pub expected_output_hash: String,
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
    pub failure_kind: Option<FailureKind>,
    pub failure_reason: Option<String>,
}
