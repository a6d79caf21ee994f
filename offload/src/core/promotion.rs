//! Retention scoring for squashed session observations.
//!
//! Pure function of the observation and optional cross-session context.

use serde::{Deserialize, Serialize};

use crate::core::types::SessionObservation;

const TOOL_CALLS_WEIGHT: f64 = 0.30;
const DURATION_WEIGHT: f64 = 0.20;
const SHORT_DURATION_WEIGHT: f64 = 0.10;
const FILE_ACTIVITY_WEIGHT: f64 = 0.20;
const ENGAGEMENT_WEIGHT: f64 = 0.15;
const LIGHT_ENGAGEMENT_WEIGHT: f64 = 0.05;
const RICH_METADATA_WEIGHT: f64 = 0.15;
const CROSS_SESSION_WEIGHT: f64 = 0.30;
const SQUASHED_FALLBACK_WEIGHT: f64 = 0.20;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromotionConfig {
    pub min_score: f64,
}

impl Default for PromotionConfig {
    fn default() -> Self {
        // Tool-call presence alone clears the gate.
        Self { min_score: 0.3 }
    }
}

/// Signals gathered outside the observation itself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CrossSessionContext {
    /// Number of distinct sessions in which this activity recurred.
    pub cross_session_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromotionDecision {
    pub promote: bool,
    pub score: f64,
    pub reasons: Vec<String>,
}

/// Score an observation for long-term retention.
///
/// Each factor contributes its full or partial weight only when its condition
/// holds; the sum is capped at 1.0. Cross-session context takes precedence;
/// `squashed_from >= 2` is consulted only when no context is supplied.
pub fn evaluate_promotion(
    observation: &SessionObservation,
    context: Option<&CrossSessionContext>,
    config: &PromotionConfig,
) -> PromotionDecision {
    let mut score = 0.0;
    let mut reasons = Vec::new();
    let metrics = &observation.metrics;

    if metrics.tool_calls >= 1 {
        score += TOOL_CALLS_WEIGHT;
        reasons.push(format!("{} tool calls", metrics.tool_calls));
    }

    let minutes = observation.duration_minutes;
    if minutes >= 5 {
        score += DURATION_WEIGHT;
        reasons.push(format!("{minutes} min session"));
    } else if minutes >= 2 {
        score += SHORT_DURATION_WEIGHT;
        reasons.push(format!("short {minutes} min session"));
    }

    if metrics.unique_files_read > 0 || metrics.unique_files_written > 0 {
        score += FILE_ACTIVITY_WEIGHT;
        reasons.push(format!(
            "file activity ({} read, {} written)",
            metrics.unique_files_read, metrics.unique_files_written
        ));
    }

    if metrics.user_messages >= 5 {
        score += ENGAGEMENT_WEIGHT;
        reasons.push(format!("{} user messages", metrics.user_messages));
    } else if metrics.user_messages >= 3 {
        score += LIGHT_ENGAGEMENT_WEIGHT;
        reasons.push(format!("light engagement ({} user messages)", metrics.user_messages));
    }

    if observation.has_rich_metadata() {
        score += RICH_METADATA_WEIGHT;
        reasons.push("rich metadata".to_string());
    }

    // TODO: fold the squashed_from fallback into cross_session_count once all
    // producers supply cross-session context.
    match context {
        Some(context) => {
            if context.cross_session_count >= 2 {
                score += CROSS_SESSION_WEIGHT;
                reasons.push(format!(
                    "recurs across {} sessions",
                    context.cross_session_count
                ));
            }
        }
        None => {
            if let Some(count) = observation.squashed_from.filter(|&count| count >= 2) {
                score += SQUASHED_FALLBACK_WEIGHT;
                reasons.push(format!("squashed from {count} observations"));
            }
        }
    }

    let score = score.min(1.0);
    PromotionDecision {
        promote: score >= config.min_score,
        score,
        reasons,
    }
}
