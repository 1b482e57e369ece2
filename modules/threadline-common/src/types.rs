use std::collections::HashSet;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ThreadlineError;

// --- Identifiers ---

pub type ArticleId = Uuid;
pub type NarrativeId = Uuid;

// --- Annotated input ---

/// A news article as delivered by the upstream annotation pipeline.
/// Consumed read-only; the engine never edits annotations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    pub id: ArticleId,
    pub published_at: DateTime<Utc>,
    /// Primary entity the article is about. Empty when upstream extraction
    /// failed; an empty nucleus never counts as a nucleus match anywhere.
    pub nucleus_entity: String,
    /// Actors central to the story.
    pub core_actors: HashSet<String>,
    /// Every actor mentioned, including peripheral ones.
    pub all_actors: HashSet<String>,
    /// Points of conflict or tension the article touches.
    pub tensions: HashSet<String>,
}

impl Article {
    pub fn has_nucleus(&self) -> bool {
        !self.nucleus_entity.is_empty()
    }
}

// --- Fingerprint ---

/// Compact signature of a narrative's subject matter. Recomputed from the
/// full member set whenever membership changes, so it drifts with coverage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct NarrativeFingerprint {
    /// Canonical nucleus entity. Empty only when every member article has
    /// an empty nucleus.
    pub nucleus_entity: String,
    /// Actors ranked by mention frequency, ties by first occurrence.
    pub top_actors: Vec<String>,
    /// Tensions ranked by mention frequency, same tie rule.
    pub key_tensions: Vec<String>,
}

impl NarrativeFingerprint {
    pub fn has_nucleus(&self) -> bool {
        !self.nucleus_entity.is_empty()
    }
}

// --- Lifecycle ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Emerging,
    Rising,
    Hot,
    Cooling,
    Dormant,
    Reactivated,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleState::Emerging => write!(f, "emerging"),
            LifecycleState::Rising => write!(f, "rising"),
            LifecycleState::Hot => write!(f, "hot"),
            LifecycleState::Cooling => write!(f, "cooling"),
            LifecycleState::Dormant => write!(f, "dormant"),
            LifecycleState::Reactivated => write!(f, "reactivated"),
        }
    }
}

impl std::str::FromStr for LifecycleState {
    type Err = ThreadlineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "emerging" => Ok(LifecycleState::Emerging),
            "rising" => Ok(LifecycleState::Rising),
            "hot" => Ok(LifecycleState::Hot),
            "cooling" => Ok(LifecycleState::Cooling),
            "dormant" => Ok(LifecycleState::Dormant),
            "reactivated" => Ok(LifecycleState::Reactivated),
            other => Err(ThreadlineError::Validation(format!(
                "unknown lifecycle state: {other}"
            ))),
        }
    }
}

/// One recorded lifecycle transition. History is append-only and ordered
/// by strictly increasing timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct LifecycleEntry {
    pub state: LifecycleState,
    pub timestamp: DateTime<Utc>,
    /// Member count at the moment of transition.
    pub article_count: u32,
    /// Mention velocity (articles/day) at the moment of transition.
    pub velocity: f64,
}

// --- Corroboration status ---

/// How broadly a narrative is sourced, independent of how active it is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum NarrativeStatus {
    /// Too little material to judge.
    Developing,
    /// Multiple distinct actors and tensions in play.
    Corroborated,
    /// Volume without breadth: one voice amplified.
    Echo,
}

impl std::fmt::Display for NarrativeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NarrativeStatus::Developing => write!(f, "developing"),
            NarrativeStatus::Corroborated => write!(f, "corroborated"),
            NarrativeStatus::Echo => write!(f, "echo"),
        }
    }
}

impl std::str::FromStr for NarrativeStatus {
    type Err = ThreadlineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "developing" => Ok(NarrativeStatus::Developing),
            "corroborated" => Ok(NarrativeStatus::Corroborated),
            "echo" => Ok(NarrativeStatus::Echo),
            other => Err(ThreadlineError::Validation(format!(
                "unknown narrative status: {other}"
            ))),
        }
    }
}

// --- Narrative ---

/// A tracked news narrative: the durable record a cluster either joins or
/// founds. Never hard-deleted by lifecycle machinery; dormant narratives
/// persist so later coverage can reactivate them. The shallow-narrative
/// merger is the single discard path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Narrative {
    pub id: NarrativeId,
    pub title: String,
    pub summary: String,
    pub theme: String,
    /// Mirror of `fingerprint.nucleus_entity`. Kept in lockstep by
    /// `set_fingerprint`; a divergence is an invariant violation, not a
    /// matching hint.
    pub nucleus_entity: String,
    /// Mirror of `fingerprint.top_actors`.
    pub entities: Vec<String>,
    pub article_ids: HashSet<ArticleId>,
    pub article_count: u32,
    pub fingerprint: NarrativeFingerprint,
    pub lifecycle_state: LifecycleState,
    pub lifecycle_history: Vec<LifecycleEntry>,
    pub status: NarrativeStatus,
    /// Running maximum mention velocity ever observed. Input to the
    /// cooling rule.
    pub peak_velocity: f64,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    /// Times this narrative has come back from dormancy.
    pub reawakening_count: u32,
    /// Timestamp of the dormant period most recently exited.
    pub reawakened_from: Option<DateTime<Utc>>,
    /// Articles/day accumulated across the most recent comeback.
    pub resurrection_velocity: Option<f64>,
}

impl Narrative {
    /// A freshly founded narrative with no lifecycle history yet. The
    /// lifecycle machine records the opening `emerging` entry.
    pub fn founded(
        id: NarrativeId,
        fingerprint: NarrativeFingerprint,
        article_ids: HashSet<ArticleId>,
        created_at: DateTime<Utc>,
    ) -> Self {
        let article_count = article_ids.len() as u32;
        let mut narrative = Self {
            id,
            title: String::new(),
            summary: String::new(),
            theme: String::new(),
            nucleus_entity: String::new(),
            entities: Vec::new(),
            article_ids,
            article_count,
            fingerprint: NarrativeFingerprint {
                nucleus_entity: String::new(),
                top_actors: Vec::new(),
                key_tensions: Vec::new(),
            },
            lifecycle_state: LifecycleState::Emerging,
            lifecycle_history: Vec::new(),
            status: NarrativeStatus::Developing,
            peak_velocity: 0.0,
            created_at,
            last_updated: created_at,
            reawakening_count: 0,
            reawakened_from: None,
            resurrection_velocity: None,
        };
        narrative.set_fingerprint(fingerprint);
        narrative
    }

    /// Single mutation point for the fingerprint. Keeps the top-level
    /// nucleus and entity mirrors in lockstep.
    pub fn set_fingerprint(&mut self, fingerprint: NarrativeFingerprint) {
        self.nucleus_entity = fingerprint.nucleus_entity.clone();
        self.entities = fingerprint.top_actors.clone();
        self.fingerprint = fingerprint;
    }

    /// Entity set view for overlap comparisons.
    pub fn entity_set(&self) -> HashSet<&str> {
        self.entities.iter().map(String::as_str).collect()
    }

    pub fn days_idle(&self, now: DateTime<Utc>) -> f64 {
        (now - self.last_updated).num_seconds().max(0) as f64 / 86_400.0
    }

    pub fn last_transition(&self) -> Option<&LifecycleEntry> {
        self.lifecycle_history.last()
    }

    /// Most recent history entry in the given state, if any.
    pub fn last_entry_in(&self, state: LifecycleState) -> Option<&LifecycleEntry> {
        self.lifecycle_history.iter().rev().find(|e| e.state == state)
    }

    pub fn check_invariants(&self) -> Result<(), ThreadlineError> {
        if self.article_count as usize != self.article_ids.len() {
            return Err(ThreadlineError::InvariantViolation(format!(
                "narrative {}: article_count {} != article_ids len {}",
                self.id,
                self.article_count,
                self.article_ids.len()
            )));
        }
        if self.nucleus_entity != self.fingerprint.nucleus_entity {
            return Err(ThreadlineError::InvariantViolation(format!(
                "narrative {}: nucleus mirror {:?} diverged from fingerprint {:?}",
                self.id, self.nucleus_entity, self.fingerprint.nucleus_entity
            )));
        }
        if self.entities != self.fingerprint.top_actors {
            return Err(ThreadlineError::InvariantViolation(format!(
                "narrative {}: entities mirror diverged from fingerprint top actors",
                self.id
            )));
        }
        let mut prev: Option<&LifecycleEntry> = None;
        for entry in &self.lifecycle_history {
            if let Some(p) = prev {
                if entry.timestamp <= p.timestamp {
                    return Err(ThreadlineError::InvariantViolation(format!(
                        "narrative {}: history timestamps not strictly increasing at {}",
                        self.id, entry.timestamp
                    )));
                }
                if entry.state == p.state {
                    return Err(ThreadlineError::InvariantViolation(format!(
                        "narrative {}: consecutive history entries share state {}",
                        self.id, entry.state
                    )));
                }
            }
            prev = Some(entry);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fp(nucleus: &str, actors: &[&str]) -> NarrativeFingerprint {
        NarrativeFingerprint {
            nucleus_entity: nucleus.to_string(),
            top_actors: actors.iter().map(|s| s.to_string()).collect(),
            key_tensions: Vec::new(),
        }
    }

    fn founded_at(ts: DateTime<Utc>) -> Narrative {
        Narrative::founded(Uuid::new_v4(), fp("SEC", &["SEC", "Binance"]), HashSet::new(), ts)
    }

    #[test]
    fn set_fingerprint_keeps_mirrors_in_lockstep() {
        let ts = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let mut n = founded_at(ts);
        assert_eq!(n.nucleus_entity, "SEC");
        assert_eq!(n.entities, vec!["SEC", "Binance"]);

        n.set_fingerprint(fp("CFTC", &["CFTC"]));
        assert_eq!(n.nucleus_entity, "CFTC");
        assert_eq!(n.entities, vec!["CFTC"]);
        assert!(n.check_invariants().is_ok());
    }

    #[test]
    fn invariant_check_catches_diverged_nucleus_mirror() {
        let ts = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let mut n = founded_at(ts);
        n.nucleus_entity = "Binance".to_string();
        assert!(n.check_invariants().is_err());
    }

    #[test]
    fn invariant_check_catches_count_drift() {
        let ts = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let mut n = founded_at(ts);
        n.article_count = 7;
        assert!(n.check_invariants().is_err());
    }

    #[test]
    fn invariant_check_rejects_non_increasing_history() {
        let ts = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let mut n = founded_at(ts);
        n.lifecycle_history.push(LifecycleEntry {
            state: LifecycleState::Emerging,
            timestamp: ts,
            article_count: 0,
            velocity: 0.0,
        });
        n.lifecycle_history.push(LifecycleEntry {
            state: LifecycleState::Rising,
            timestamp: ts,
            article_count: 3,
            velocity: 2.0,
        });
        assert!(n.check_invariants().is_err());
    }

    #[test]
    fn days_idle_counts_from_last_update() {
        let ts = Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap();
        let n = founded_at(ts);
        let later = ts + chrono::Duration::hours(36);
        assert!((n.days_idle(later) - 1.5).abs() < 1e-9);
    }
}
