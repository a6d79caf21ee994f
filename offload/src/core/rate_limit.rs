//! Process-local capture rate limiting and structural anomaly screening.
//!
//! Counters live behind a mutex so concurrent captures across sessions see a
//! consistent view. State is best-effort: it is lost on restart and never
//! shared between processes.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::core::types::SessionObservation;

const HOUR_MS: i64 = 60 * 60 * 1000;
const MINUTE_MS: i64 = 60 * 1000;
/// Tolerated drift between reported and computed duration.
const DURATION_TOLERANCE_MINUTES: i64 = 2;

/// Source of "now" in Unix epoch milliseconds.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub max_per_session: u32,
    pub max_per_hour: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_per_session: 50,
            max_per_hour: 200,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ceiling {
    PerSession,
    PerHour,
}

impl fmt::Display for Ceiling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ceiling::PerSession => f.write_str("per-session"),
            Ceiling::PerHour => f.write_str("per-hour"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LimitDecision {
    Allowed,
    Denied { ceiling: Ceiling, limit: u32 },
}

impl LimitDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, LimitDecision::Allowed)
    }

    /// Human-readable reason naming the exceeded ceiling and its limit.
    pub fn reason(&self) -> Option<String> {
        match self {
            LimitDecision::Allowed => None,
            LimitDecision::Denied { ceiling, limit } => {
                Some(format!("{ceiling} limit exceeded (max {limit})"))
            }
        }
    }
}

#[derive(Debug, Default)]
struct LimiterState {
    per_session: HashMap<String, u32>,
    /// Timestamps of accepted entries within the trailing hour.
    window: VecDeque<i64>,
}

#[derive(Debug)]
pub struct RateLimiter<C: Clock = SystemClock> {
    config: RateLimitConfig,
    clock: C,
    state: Mutex<LimiterState>,
}

impl RateLimiter<SystemClock> {
    pub fn new(config: RateLimitConfig) -> Self {
        Self::with_clock(config, SystemClock)
    }
}

impl<C: Clock> RateLimiter<C> {
    pub fn with_clock(config: RateLimitConfig, clock: C) -> Self {
        Self {
            config,
            clock,
            state: Mutex::new(LimiterState::default()),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Count one entry for `session_id` if both ceilings allow it.
    ///
    /// The session ceiling is checked before the shared hourly one. Denied
    /// entries do not consume quota.
    pub fn check_limit(&self, session_id: &str) -> LimitDecision {
        let now = self.clock.now_ms();
        let mut state = self.lock();

        let session_count = state.per_session.get(session_id).copied().unwrap_or(0);
        if session_count >= self.config.max_per_session {
            return LimitDecision::Denied {
                ceiling: Ceiling::PerSession,
                limit: self.config.max_per_session,
            };
        }

        while state
            .window
            .front()
            .is_some_and(|&accepted| now - accepted >= HOUR_MS)
        {
            state.window.pop_front();
        }
        if state.window.len() >= self.config.max_per_hour as usize {
            return LimitDecision::Denied {
                ceiling: Ceiling::PerHour,
                limit: self.config.max_per_hour,
            };
        }

        *state.per_session.entry(session_id.to_string()).or_insert(0) += 1;
        state.window.push_back(now);
        LimitDecision::Allowed
    }

    /// Clear the counter for one session. The hourly window is untouched.
    pub fn reset(&self, session_id: &str) {
        self.lock().per_session.remove(session_id);
    }

    pub fn session_count(&self, session_id: &str) -> u32 {
        self.lock().per_session.get(session_id).copied().unwrap_or(0)
    }

    fn lock(&self) -> MutexGuard<'_, LimiterState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AnomalyKind {
    DuplicateTimestamp,
    ImpossibleDuration,
    DurationMismatch,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Anomaly {
    pub index: usize,
    pub kind: AnomalyKind,
    pub detail: String,
}

/// Flag structurally impossible observations.
///
/// Classes are not exclusive; one entry may yield several anomalies. For a
/// duplicated `start_time` the first occurrence is kept clean and every later
/// one is flagged.
pub fn detect_anomalies(entries: &[SessionObservation]) -> Vec<Anomaly> {
    let mut anomalies = Vec::new();
    let mut seen_starts = HashSet::new();

    for (index, entry) in entries.iter().enumerate() {
        if !seen_starts.insert(entry.start_time) {
            anomalies.push(Anomaly {
                index,
                kind: AnomalyKind::DuplicateTimestamp,
                detail: format!("startTime {} already seen", entry.start_time),
            });
        }

        let span_ms = entry.end_time - entry.start_time;
        if span_ms < 0 {
            anomalies.push(Anomaly {
                index,
                kind: AnomalyKind::ImpossibleDuration,
                detail: format!(
                    "endTime {} precedes startTime {}",
                    entry.end_time, entry.start_time
                ),
            });
        }

        let reported_ms = entry.duration_minutes * MINUTE_MS;
        if (reported_ms - span_ms).abs() > DURATION_TOLERANCE_MINUTES * MINUTE_MS {
            anomalies.push(Anomaly {
                index,
                kind: AnomalyKind::DurationMismatch,
                detail: format!(
                    "durationMinutes {} differs from span of {:.1} minutes",
                    entry.duration_minutes,
                    span_ms as f64 / MINUTE_MS as f64
                ),
            });
        }
    }

    anomalies
}
