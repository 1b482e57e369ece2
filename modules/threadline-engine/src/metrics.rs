//! Pure activity and overlap metrics. Everything here is derived from
//! member timestamps and entity sets; no store access, no clock reads.

use std::collections::HashSet;
use std::hash::Hash;

use chrono::{DateTime, Duration, Utc};

use threadline_common::NarrativeStatus;

/// Articles per day over the trailing window ending at `as_of`.
///
/// Counts publications inside `(as_of - window, as_of]` and normalizes to
/// a daily rate, so six articles in a 48h window read as 3.0/day. A
/// non-positive window yields 0.0.
pub fn mention_velocity(
    published_times: &[DateTime<Utc>],
    as_of: DateTime<Utc>,
    window_hours: i64,
) -> f64 {
    if window_hours <= 0 {
        return 0.0;
    }
    let window_start = as_of - Duration::hours(window_hours);
    let in_window = published_times
        .iter()
        .filter(|t| **t > window_start && **t <= as_of)
        .count();
    in_window as f64 / (window_hours as f64 / 24.0)
}

/// Corroboration tier from sourcing breadth.
///
/// Volume without actor breadth reads as one voice amplified (`Echo`),
/// breadth across both actors and tensions as `Corroborated`, anything
/// thinner as `Developing`.
pub fn narrative_status(
    distinct_actors: usize,
    distinct_tensions: usize,
    article_count: u32,
) -> NarrativeStatus {
    if distinct_actors < 2 && article_count >= 5 {
        return NarrativeStatus::Echo;
    }
    if distinct_actors >= 2 && distinct_tensions >= 2 {
        return NarrativeStatus::Corroborated;
    }
    NarrativeStatus::Developing
}

/// Jaccard overlap of two sets. Two empty sets read as zero overlap, not
/// identity: an article with nothing extracted matches nothing.
pub fn jaccard<T: Eq + Hash>(a: &HashSet<T>, b: &HashSet<T>) -> f64 {
    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    if union == 0 {
        return 0.0;
    }
    intersection as f64 / union as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, hour, 0, 0).unwrap()
    }

    #[test]
    fn velocity_normalizes_to_daily_rate() {
        let times = vec![at(1), at(5), at(9), at(13), at(17), at(21)];
        let v = mention_velocity(&times, at(22), 48);
        assert!((v - 3.0).abs() < 1e-9);
    }

    #[test]
    fn velocity_ignores_publications_outside_window() {
        let old = Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap();
        let times = vec![old, at(10)];
        let v = mention_velocity(&times, at(12), 24);
        assert!((v - 1.0).abs() < 1e-9);
    }

    #[test]
    fn velocity_of_empty_member_set_is_zero() {
        assert_eq!(mention_velocity(&[], at(12), 48), 0.0);
    }

    #[test]
    fn velocity_excludes_future_publications() {
        let times = vec![at(10), at(20)];
        let v = mention_velocity(&times, at(12), 24);
        assert!((v - 1.0).abs() < 1e-9);
    }

    #[test]
    fn status_echo_needs_volume_without_breadth() {
        assert_eq!(narrative_status(1, 3, 5), NarrativeStatus::Echo);
        assert_eq!(narrative_status(1, 3, 4), NarrativeStatus::Developing);
        assert_eq!(narrative_status(0, 0, 12), NarrativeStatus::Echo);
    }

    #[test]
    fn status_corroborated_needs_actor_and_tension_breadth() {
        assert_eq!(narrative_status(2, 2, 2), NarrativeStatus::Corroborated);
        assert_eq!(narrative_status(2, 1, 10), NarrativeStatus::Developing);
        assert_eq!(narrative_status(5, 0, 3), NarrativeStatus::Developing);
    }

    #[test]
    fn jaccard_partial_overlap() {
        let a: HashSet<&str> = ["SEC", "Binance", "Gary Gensler"].into_iter().collect();
        let b: HashSet<&str> = ["SEC", "Binance", "CFTC"].into_iter().collect();
        assert!((jaccard(&a, &b) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn jaccard_of_two_empty_sets_is_zero() {
        let a: HashSet<&str> = HashSet::new();
        let b: HashSet<&str> = HashSet::new();
        assert_eq!(jaccard(&a, &b), 0.0);
    }

    #[test]
    fn jaccard_identical_sets() {
        let a: HashSet<&str> = ["SEC"].into_iter().collect();
        assert_eq!(jaccard(&a, &a.clone()), 1.0);
    }
}
