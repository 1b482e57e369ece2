//! Fingerprint derivation: reduce an ordered member set to its compact
//! signature. Deterministic by construction, so identical members in
//! identical order always hash down to the identical fingerprint.

use std::collections::HashMap;

use threadline_common::{Article, NarrativeFingerprint, Tuning};

/// Compute the signature of a member-article sequence in one linear pass.
///
/// Nucleus is the most frequent member nucleus (empty nuclei are never
/// counted), actors and tensions are frequency-ranked and truncated to the
/// configured caps. Ties everywhere go to the earliest occurrence.
pub fn compute_fingerprint(members: &[Article], tuning: &Tuning) -> NarrativeFingerprint {
    let mut nuclei = FrequencyRank::new();
    let mut actors = FrequencyRank::new();
    let mut tensions = FrequencyRank::new();

    for (position, article) in members.iter().enumerate() {
        if article.has_nucleus() {
            nuclei.record(&article.nucleus_entity, position);
        }
        for actor in &article.all_actors {
            actors.record(actor, position);
        }
        for tension in &article.tensions {
            tensions.record(tension, position);
        }
    }

    NarrativeFingerprint {
        nucleus_entity: nuclei.leader().unwrap_or_default().to_string(),
        top_actors: actors.ranked(tuning.top_actor_limit),
        key_tensions: tensions.ranked(tuning.key_tension_limit),
    }
}

#[derive(Debug, Clone, Copy)]
struct Tally {
    count: u32,
    first: usize,
}

/// Incremental frequency counter with a cached running leader.
///
/// Ranking is count desc, then earliest recorded position, then name.
/// Values recorded from the same article arrive in arbitrary set order,
/// so the name tiebreak is what keeps output stable.
#[derive(Debug, Clone, Default)]
pub(crate) struct FrequencyRank {
    counts: HashMap<String, Tally>,
    leader: Option<String>,
}

impl FrequencyRank {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record(&mut self, value: &str, position: usize) {
        let tally = self
            .counts
            .entry(value.to_string())
            .or_insert(Tally { count: 0, first: position });
        tally.count += 1;
        let tally = *tally;

        let takes_lead = match self.leader.as_deref() {
            None => true,
            Some(leader) if leader == value => false,
            Some(leader) => ranks_higher(value, tally, leader, self.counts[leader]),
        };
        if takes_lead {
            self.leader = Some(value.to_string());
        }
    }

    /// Current running mode, if anything has been recorded.
    pub(crate) fn leader(&self) -> Option<&str> {
        self.leader.as_deref()
    }

    /// Top values by rank, truncated to `limit`.
    pub(crate) fn ranked(&self, limit: usize) -> Vec<String> {
        let mut entries: Vec<(&String, &Tally)> = self.counts.iter().collect();
        entries.sort_by(|(a_value, a_tally), (b_value, b_tally)| {
            b_tally
                .count
                .cmp(&a_tally.count)
                .then(a_tally.first.cmp(&b_tally.first))
                .then(a_value.cmp(b_value))
        });
        entries
            .into_iter()
            .take(limit)
            .map(|(value, _)| value.clone())
            .collect()
    }
}

fn ranks_higher(a: &str, a_tally: Tally, b: &str, b_tally: Tally) -> bool {
    if a_tally.count != b_tally.count {
        return a_tally.count > b_tally.count;
    }
    if a_tally.first != b_tally.first {
        return a_tally.first < b_tally.first;
    }
    a < b
}
