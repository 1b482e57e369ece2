//! Continuation matching: decide whether a freshly formed cluster extends
//! a narrative already on the books, or warrants a new one.

use std::collections::HashSet;

use threadline_common::{NarrativeFingerprint, Tuning};
use threadline_store::VersionedNarrative;

use crate::metrics::jaccard;

/// Outcome of matching one fingerprint against the candidate set.
#[derive(Debug, Clone, Copy)]
pub struct MatchOutcome {
    /// Index into the candidate slice of the winner, with its similarity.
    /// `None` when nothing reached the match threshold.
    pub matched: Option<(usize, f64)>,
    /// Best similarity seen regardless of the threshold. Logged every
    /// cluster so near-misses stay visible.
    pub best_similarity: f64,
}

/// Weighted fingerprint similarity. An empty nucleus on either side zeroes
/// the nucleus term, which caps the reachable score at 0.5 under default
/// weights. That cap is the known duplicate-narrative failure mode for
/// nucleus-less input; upstream extraction owns the fix, not the matcher.
pub fn similarity(a: &NarrativeFingerprint, b: &NarrativeFingerprint, tuning: &Tuning) -> f64 {
    let nucleus_matches = a.has_nucleus() && b.has_nucleus() && a.nucleus_entity == b.nucleus_entity;
    let nucleus_term = if nucleus_matches {
        tuning.match_nucleus_weight
    } else {
        0.0
    };

    let a_actors: HashSet<&str> = a.top_actors.iter().map(String::as_str).collect();
    let b_actors: HashSet<&str> = b.top_actors.iter().map(String::as_str).collect();
    let a_tensions: HashSet<&str> = a.key_tensions.iter().map(String::as_str).collect();
    let b_tensions: HashSet<&str> = b.key_tensions.iter().map(String::as_str).collect();

    nucleus_term
        + tuning.match_actor_weight * jaccard(&a_actors, &b_actors)
        + tuning.match_tension_weight * jaccard(&a_tensions, &b_tensions)
}

/// Pick the most similar candidate at or above the match threshold
/// (inclusive). Ties go to the most recently updated narrative.
pub fn find_matching_narrative(
    fingerprint: &NarrativeFingerprint,
    candidates: &[VersionedNarrative],
    tuning: &Tuning,
) -> MatchOutcome {
    let mut best: Option<(usize, f64)> = None;
    for (index, candidate) in candidates.iter().enumerate() {
        let score = similarity(fingerprint, &candidate.narrative.fingerprint, tuning);
        let better = match best {
            None => true,
            Some((best_index, best_score)) => {
                score > best_score
                    || (score == best_score
                        && candidate.narrative.last_updated
                            > candidates[best_index].narrative.last_updated)
            }
        };
        if better {
            best = Some((index, score));
        }
    }

    let best_similarity = best.map(|(_, s)| s).unwrap_or(0.0);
    MatchOutcome {
        matched: best.filter(|(_, s)| *s >= tuning.match_threshold),
        best_similarity,
    }
}
