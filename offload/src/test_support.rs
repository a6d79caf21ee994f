//! Test-only builders for pairs, batches, observations, and a manual clock.

use std::sync::atomic::{AtomicI64, Ordering};

use serde_json::{Map, Value};

use crate::core::rate_limit::Clock;
use crate::core::types::{
    ObservationMetrics, SessionObservation, StoredExecutionBatch, Tier, ToolExecutionPair,
};

const MINUTE_MS: i64 = 60 * 1000;

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start_ms: i64) -> Self {
        Self {
            now: AtomicI64::new(start_ms),
        }
    }

    pub fn advance_ms(&self, delta: i64) {
        self.now.fetch_add(delta, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Convert a `json!({...})` literal into a tool input mapping.
pub fn input(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("tool input must be an object, got {other}"),
    }
}

/// A `Read` pair for `path` returning `output`.
pub fn read_pair(path: &str, output: &str, timestamp: i64, session_id: &str) -> ToolExecutionPair {
    ToolExecutionPair::complete(
        "Read",
        input(serde_json::json!({ "file_path": path })),
        output,
        timestamp,
        session_id,
    )
}

/// A `Bash` pair for `command` returning `output`.
pub fn bash_pair(command: &str, output: &str, timestamp: i64, session_id: &str) -> ToolExecutionPair {
    ToolExecutionPair::complete(
        "Bash",
        input(serde_json::json!({ "command": command })),
        output,
        timestamp,
        session_id,
    )
}

/// Wrap pairs in a batch attributed to `session_id`.
pub fn batch(session_id: &str, pairs: Vec<ToolExecutionPair>) -> StoredExecutionBatch {
    let captured_at = pairs.iter().map(|pair| pair.timestamp).max().unwrap_or(0);
    StoredExecutionBatch::from_pairs(session_id, pairs, captured_at)
}

/// Zero-signal ephemeral observation spanning `minutes` from `start_ms`.
pub fn observation(session_id: &str, start_ms: i64, minutes: i64) -> SessionObservation {
    SessionObservation {
        session_id: session_id.to_string(),
        start_time: start_ms,
        end_time: start_ms + minutes * MINUTE_MS,
        duration_minutes: minutes,
        source: "startup".to_string(),
        reason: "clear".to_string(),
        metrics: ObservationMetrics::default(),
        top_commands: Vec::new(),
        top_files: Vec::new(),
        top_tools: Vec::new(),
        active_skills: Vec::new(),
        tier: Tier::Ephemeral,
        squashed_from: None,
    }
}
