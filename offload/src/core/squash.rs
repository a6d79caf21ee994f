//! Consolidation of partial session observations into one persistent record.

use std::collections::HashSet;

use crate::core::types::{ObservationMetrics, SessionObservation, Tier};

const MINUTE_MS: f64 = 60.0 * 1000.0;

/// Merge observations of one logically continuous span.
///
/// - Empty input yields `None`.
/// - A single input is returned as-is, promoted to `Persistent`. Its
///   `squashed_from` becomes 1 when absent; an existing count from an earlier
///   squash is kept so re-squashing a result never undercounts.
/// - Otherwise identity fields come from the first observation, the time span
///   is the union of all spans, counters are summed, and list fields are
///   unioned without duplicates (first-seen order).
///
/// Inputs that were themselves squashed contribute their own `squashed_from`
/// count, so squashing is associative in the resulting count.
pub fn squash_observations(observations: &[SessionObservation]) -> Option<SessionObservation> {
    let (first, rest) = observations.split_first()?;
    if rest.is_empty() {
        let mut single = first.clone();
        single.tier = Tier::Persistent;
        single.squashed_from = Some(single.squashed_from.unwrap_or(1));
        return Some(single);
    }

    let start_time = observations
        .iter()
        .map(|observation| observation.start_time)
        .min()
        .unwrap_or(first.start_time);
    let end_time = observations
        .iter()
        .map(|observation| observation.end_time)
        .max()
        .unwrap_or(first.end_time);

    let mut metrics = ObservationMetrics::default();
    for observation in observations {
        metrics.add(&observation.metrics);
    }

    let squashed_from = observations
        .iter()
        .map(|observation| observation.squashed_from.unwrap_or(1))
        .sum();

    Some(SessionObservation {
        session_id: first.session_id.clone(),
        start_time,
        end_time,
        duration_minutes: ((end_time - start_time) as f64 / MINUTE_MS).round() as i64,
        source: first.source.clone(),
        reason: first.reason.clone(),
        metrics,
        top_commands: union(observations, |observation| &observation.top_commands),
        top_files: union(observations, |observation| &observation.top_files),
        top_tools: union(observations, |observation| &observation.top_tools),
        active_skills: union(observations, |observation| &observation.active_skills),
        tier: Tier::Persistent,
        squashed_from: Some(squashed_from),
    })
}

fn union<F>(observations: &[SessionObservation], field: F) -> Vec<String>
where
    F: Fn(&SessionObservation) -> &Vec<String>,
{
    let mut seen = HashSet::new();
    observations
        .iter()
        .flat_map(|observation| field(observation).iter())
        .filter(|item| seen.insert(item.as_str()))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::observation;

    const MINUTE: i64 = 60 * 1000;

    #[test]
    fn empty_input_yields_none() {
        assert_eq!(squash_observations(&[]), None);
    }

    #[test]
    fn singleton_is_promoted_unchanged() {
        let single = observation("s1", 0, 4);
        let squashed = squash_observations(std::slice::from_ref(&single)).expect("squashed");
        assert_eq!(squashed.tier, Tier::Persistent);
        assert_eq!(squashed.squashed_from, Some(1));
        assert_eq!(squashed.start_time, single.start_time);
        assert_eq!(squashed.duration_minutes, 4);
    }

    #[test]
    fn singleton_keeps_prior_squash_count() {
        let mut single = observation("s1", 0, 4);
        single.squashed_from = Some(3);
        let squashed = squash_observations(&[single]).expect("squashed");
        assert_eq!(squashed.squashed_from, Some(3));
        assert_eq!(squashed.tier, Tier::Persistent);
    }

    #[test]
    fn merges_span_metrics_and_lists() {
        let mut first = observation("s1", 10 * MINUTE, 5);
        first.source = "resume".to_string();
        first.metrics.tool_calls = 3;
        first.metrics.user_messages = 2;
        first.top_files = vec!["a.rs".to_string(), "b.rs".to_string()];
        let mut second = observation("s2", 0, 3);
        second.reason = "logout".to_string();
        second.metrics.tool_calls = 4;
        second.top_files = vec!["b.rs".to_string(), "c.rs".to_string()];
        second.active_skills = vec!["review".to_string()];

        let squashed = squash_observations(&[first, second]).expect("squashed");
        assert_eq!(squashed.session_id, "s1");
        assert_eq!(squashed.source, "resume");
        assert_eq!(squashed.reason, "clear");
        assert_eq!(squashed.start_time, 0);
        assert_eq!(squashed.end_time, 15 * MINUTE);
        assert_eq!(squashed.duration_minutes, 15);
        assert_eq!(squashed.metrics.tool_calls, 7);
        assert_eq!(squashed.metrics.user_messages, 2);
        assert_eq!(squashed.top_files, vec!["a.rs", "b.rs", "c.rs"]);
        assert_eq!(squashed.active_skills, vec!["review"]);
        assert_eq!(squashed.tier, Tier::Persistent);
        assert_eq!(squashed.squashed_from, Some(2));
    }

    #[test]
    fn duration_is_recomputed_and_rounded() {
        let mut first = observation("s1", 0, 1);
        first.duration_minutes = 99;
        let mut second = observation("s1", MINUTE, 1);
        second.end_time = 2 * MINUTE + 40 * 1000;
        let squashed = squash_observations(&[first, second]).expect("squashed");
        assert_eq!(squashed.duration_minutes, 3);
    }

    #[test]
    fn squash_count_is_associative() {
        let a = observation("s1", 0, 1);
        let b = observation("s1", MINUTE, 1);
        let c = observation("s1", 2 * MINUTE, 1);

        let direct = squash_observations(&[a.clone(), b.clone(), c.clone()]).expect("direct");
        let pair = squash_observations(&[a, b]).expect("pair");
        let staged = squash_observations(&[pair, c]).expect("staged");

        assert_eq!(direct.squashed_from, Some(3));
        assert_eq!(staged.squashed_from, Some(3));
        assert_eq!(direct.start_time, staged.start_time);
        assert_eq!(direct.end_time, staged.end_time);
    }
}
