//! Capture path: captured pairs → rate limit → checksummed append.
//!
//! Also hosts the observation path: anomaly screening, then squashing, then
//! promotion scoring.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::core::promotion::{
    CrossSessionContext, PromotionConfig, PromotionDecision, evaluate_promotion,
};
use crate::core::rate_limit::{
    Anomaly, Clock, LimitDecision, RateLimiter, SystemClock, detect_anomalies,
};
use crate::core::squash::squash_observations;
use crate::core::types::{SessionObservation, StoredExecutionBatch, ToolExecutionPair};
use crate::io::config::OffloadConfig;
use crate::io::execution_log::LogWriter;

/// What happened to one submitted batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    Recorded { complete: usize, partial: usize },
    /// Expected back-pressure, not an error.
    RateLimited { reason: String },
}

/// Shared front door for every capture call site.
pub struct Recorder<C: Clock = SystemClock> {
    limiter: RateLimiter<C>,
    writer: Arc<LogWriter>,
    log_path: PathBuf,
}

impl Recorder<SystemClock> {
    /// Wall-clock recorder with ceilings from the `[rate_limit]` section.
    pub fn from_config(
        cfg: &OffloadConfig,
        writer: Arc<LogWriter>,
        log_path: impl Into<PathBuf>,
    ) -> Self {
        Self::new(RateLimiter::new(cfg.rate_limit), writer, log_path)
    }
}

impl<C: Clock> Recorder<C> {
    pub fn new(limiter: RateLimiter<C>, writer: Arc<LogWriter>, log_path: impl Into<PathBuf>) -> Self {
        Self {
            limiter,
            writer,
            log_path: log_path.into(),
        }
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    pub fn limiter(&self) -> &RateLimiter<C> {
        &self.limiter
    }

    /// Build a batch from raw pairs and record it, stamped with `captured_at`.
    pub fn record_pairs(
        &self,
        session_id: &str,
        pairs: Vec<ToolExecutionPair>,
        captured_at: i64,
    ) -> Result<CaptureOutcome> {
        self.record(&StoredExecutionBatch::from_pairs(session_id, pairs, captured_at))
    }

    /// Rate-limit and append one batch.
    pub fn record(&self, batch: &StoredExecutionBatch) -> Result<CaptureOutcome> {
        let decision = self.limiter.check_limit(&batch.session_id);
        if let LimitDecision::Denied { .. } = decision {
            let reason = decision.reason().unwrap_or_default();
            info!(session_id = %batch.session_id, reason = %reason, "capture rate limited");
            return Ok(CaptureOutcome::RateLimited { reason });
        }

        self.writer
            .append_batch(&self.log_path, batch, batch.captured_at)?;
        debug!(
            session_id = %batch.session_id,
            complete = batch.complete_count,
            partial = batch.partial_count,
            "batch recorded"
        );
        Ok(CaptureOutcome::Recorded {
            complete: batch.complete_count,
            partial: batch.partial_count,
        })
    }
}

/// Observations split by whether they are structurally sound.
#[derive(Debug, Clone, Default)]
pub struct Screened {
    pub clean: Vec<SessionObservation>,
    pub rejected: Vec<SessionObservation>,
    pub anomalies: Vec<Anomaly>,
}

/// Drop observations with any anomaly before they are squashed or scored.
pub fn screen_observations(observations: Vec<SessionObservation>) -> Screened {
    let anomalies = detect_anomalies(&observations);
    for anomaly in &anomalies {
        warn!(index = anomaly.index, kind = ?anomaly.kind, detail = %anomaly.detail, "observation anomaly");
    }

    let mut screened = Screened {
        anomalies,
        ..Screened::default()
    };
    for (index, observation) in observations.into_iter().enumerate() {
        if screened.anomalies.iter().any(|anomaly| anomaly.index == index) {
            screened.rejected.push(observation);
        } else {
            screened.clean.push(observation);
        }
    }
    screened
}

/// Outcome of consolidating one span of observations.
#[derive(Debug, Clone)]
pub struct Consolidated {
    pub observation: SessionObservation,
    pub decision: PromotionDecision,
    pub rejected: Vec<SessionObservation>,
    pub anomalies: Vec<Anomaly>,
}

/// Screen, squash, and score observations of one span.
///
/// `None` when no observation survives screening.
pub fn consolidate_observations(
    observations: Vec<SessionObservation>,
    context: Option<&CrossSessionContext>,
    config: &PromotionConfig,
) -> Option<Consolidated> {
    let screened = screen_observations(observations);
    let observation = squash_observations(&screened.clean)?;
    let decision = evaluate_promotion(&observation, context, config);
    debug!(
        session_id = %observation.session_id,
        score = decision.score,
        promote = decision.promote,
        "observations consolidated"
    );
    Some(Consolidated {
        observation,
        decision,
        rejected: screened.rejected,
        anomalies: screened.anomalies,
    })
}
