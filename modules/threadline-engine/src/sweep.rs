//! Dormancy sweep: the idle half of the lifecycle. Scheduled independently
//! of detection cycles, it walks every narrative that is not already
//! dormant and applies at most one idle demotion per narrative per run.
//!
//! Sweep transitions never touch `last_updated`; the idle clock counts
//! from real coverage, so a narrative that cooled last run and is still
//! idle goes dormant on the next one.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use threadline_common::{LifecycleState, Tuning};
use threadline_store::{is_write_conflict, NarrativeStore, VersionedNarrative};

use crate::lifecycle::LifecycleMachine;
use crate::metrics::mention_velocity;

#[derive(Debug, Default)]
pub struct SweepStats {
    pub narratives_scanned: u32,
    pub cooled: u32,
    pub went_dormant: u32,
    pub conflicts: u32,
}

impl std::fmt::Display for SweepStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "DormancySweep: {} scanned, {} cooled, {} dormant, {} conflicts",
            self.narratives_scanned, self.cooled, self.went_dormant, self.conflicts,
        )
    }
}

pub struct DormancySweep {
    store: Arc<dyn NarrativeStore>,
    machine: LifecycleMachine,
    tuning: Tuning,
}

impl DormancySweep {
    pub fn new(store: Arc<dyn NarrativeStore>, tuning: Tuning) -> Self {
        Self {
            machine: LifecycleMachine::new(tuning.clone()),
            store,
            tuning,
        }
    }

    /// Demote idle narratives, one lifecycle step each at most.
    pub async fn run(&self, now: DateTime<Utc>) -> Result<SweepStats> {
        let mut stats = SweepStats::default();

        // Dormant is terminal for the sweep; reactivation is the cycle's job.
        let mut candidates = Vec::new();
        for state in [
            LifecycleState::Emerging,
            LifecycleState::Rising,
            LifecycleState::Hot,
            LifecycleState::Cooling,
            LifecycleState::Reactivated,
        ] {
            candidates.extend(self.store.by_state(state).await?);
        }
        stats.narratives_scanned = candidates.len() as u32;

        if candidates.is_empty() {
            info!("DormancySweep: nothing active to sweep");
            return Ok(stats);
        }

        for row in candidates {
            let VersionedNarrative {
                mut narrative,
                version,
            } = row;

            let ids: Vec<_> = narrative.article_ids.iter().copied().collect();
            let members = self.store.articles_by_ids(&ids).await?;
            let times: Vec<_> = members.iter().map(|a| a.published_at).collect();
            let velocity_now = mention_velocity(&times, now, self.tuning.velocity_window_hours);

            let Some(to) = self.machine.apply_idle(&mut narrative, velocity_now, now) else {
                continue;
            };

            match self.store.update(&narrative, version).await {
                Ok(()) => match to {
                    LifecycleState::Cooling => stats.cooled += 1,
                    LifecycleState::Dormant => stats.went_dormant += 1,
                    _ => {}
                },
                Err(e) if is_write_conflict(&e) => {
                    warn!(
                        narrative_id = %narrative.id,
                        "DormancySweep: narrative changed underneath us, skipping"
                    );
                    stats.conflicts += 1;
                }
                Err(e) => return Err(e),
            }
        }

        info!(%stats, "DormancySweep complete");
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::LifecycleSignals;
    use crate::testing::{article, base_time, burst, fingerprint};
    use chrono::Duration;
    use threadline_common::{Article, Narrative};
    use threadline_store::MemoryNarrativeStore;
    use uuid::Uuid;

    fn machine() -> LifecycleMachine {
        LifecycleMachine::new(Tuning::default())
    }

    fn founded(articles: &[Article], at: DateTime<Utc>) -> Narrative {
        let ids = articles.iter().map(|a| a.id).collect();
        let mut n = Narrative::founded(Uuid::new_v4(), fingerprint("SEC", &["SEC"], &[]), ids, at);
        machine().record_founding(&mut n, 1.0, at);
        n
    }

    fn rising(articles: &[Article], at: DateTime<Utc>) -> Narrative {
        let mut n = founded(articles, at);
        let article_count = n.article_count;
        machine().apply_cycle(
            &mut n,
            &LifecycleSignals {
                article_count,
                velocity_now: 2.0,
                velocity_previous: 1.0,
            },
            at + Duration::hours(6),
        );
        assert_eq!(n.lifecycle_state, LifecycleState::Rising);
        n
    }

    fn hot(articles: &[Article], at: DateTime<Utc>) -> Narrative {
        let mut n = rising(articles, at);
        let article_count = n.article_count;
        machine().apply_cycle(
            &mut n,
            &LifecycleSignals {
                article_count,
                velocity_now: 6.0,
                velocity_previous: 5.0,
            },
            at + Duration::hours(12),
        );
        assert_eq!(n.lifecycle_state, LifecycleState::Hot);
        n
    }

    async fn seed(store: &MemoryNarrativeStore, articles: &[Article], narrative: &Narrative) {
        store.insert_articles(articles).await.unwrap();
        store.insert_narrative(narrative).await.unwrap();
    }

    fn sweep(store: Arc<MemoryNarrativeStore>) -> DormancySweep {
        DormancySweep::new(store, Tuning::default())
    }

    #[tokio::test]
    async fn idle_rising_narrative_cools() {
        let store = Arc::new(MemoryNarrativeStore::new());
        let t0 = base_time();
        let articles = burst("SEC", &["SEC"], &[], 3, t0, Duration::hours(2));
        let n = rising(&articles, t0);
        seed(&store, &articles, &n).await;

        let stats = sweep(store.clone()).run(t0 + Duration::days(15)).await.unwrap();

        assert_eq!(stats.cooled, 1);
        assert_eq!(stats.went_dormant, 0);
        let stored = store.get(n.id).await.unwrap().unwrap();
        assert_eq!(stored.narrative.lifecycle_state, LifecycleState::Cooling);
        assert_eq!(stored.version, 2);
    }

    #[tokio::test]
    async fn fresh_narrative_is_left_alone() {
        let store = Arc::new(MemoryNarrativeStore::new());
        let t0 = base_time();
        let articles = vec![article("SEC", &["SEC"], &[], t0)];
        let n = founded(&articles, t0);
        seed(&store, &articles, &n).await;

        let stats = sweep(store.clone()).run(t0 + Duration::days(2)).await.unwrap();

        assert_eq!(stats.narratives_scanned, 1);
        assert_eq!(stats.cooled, 0);
        let stored = store.get(n.id).await.unwrap().unwrap();
        assert_eq!(stored.narrative.lifecycle_state, LifecycleState::Emerging);
        assert_eq!(stored.version, 1);
    }

    #[tokio::test]
    async fn abandoned_hot_narrative_takes_two_sweeps_to_go_dormant() {
        let store = Arc::new(MemoryNarrativeStore::new());
        let t0 = base_time();
        let articles = burst("SEC", &["SEC"], &[], 3, t0, Duration::hours(2));
        let n = hot(&articles, t0);
        seed(&store, &articles, &n).await;

        let first = sweep(store.clone()).run(t0 + Duration::days(15)).await.unwrap();
        assert_eq!(first.cooled, 1);
        let after_first = store.get(n.id).await.unwrap().unwrap();
        assert_eq!(after_first.narrative.lifecycle_state, LifecycleState::Cooling);

        let second = sweep(store.clone()).run(t0 + Duration::days(16)).await.unwrap();
        assert_eq!(second.went_dormant, 1);
        let after_second = store.get(n.id).await.unwrap().unwrap();
        assert_eq!(after_second.narrative.lifecycle_state, LifecycleState::Dormant);
        assert_eq!(after_second.narrative.reawakening_count, 0);
    }

    #[tokio::test]
    async fn hot_narrative_with_live_velocity_survives() {
        let store = Arc::new(MemoryNarrativeStore::new());
        let t0 = base_time();
        let now = t0 + Duration::days(20);
        // Eight members inside the 48h trailing window keep velocity at
        // 4.0, above half of the 6.0 peak.
        let articles = burst("SEC", &["SEC"], &[], 8, now - Duration::hours(20), Duration::hours(2));
        let n = hot(&articles, t0);
        seed(&store, &articles, &n).await;

        let stats = sweep(store.clone()).run(now).await.unwrap();

        assert_eq!(stats.cooled, 0);
        let stored = store.get(n.id).await.unwrap().unwrap();
        assert_eq!(stored.narrative.lifecycle_state, LifecycleState::Hot);
    }

    #[tokio::test]
    async fn dormant_narratives_are_never_scanned() {
        let store = Arc::new(MemoryNarrativeStore::new());
        let t0 = base_time();
        let articles = burst("SEC", &["SEC"], &[], 3, t0, Duration::hours(2));
        let mut n = hot(&articles, t0);
        let m = machine();
        m.apply_idle(&mut n, 0.0, t0 + Duration::days(15));
        m.apply_idle(&mut n, 0.0, t0 + Duration::days(30));
        assert_eq!(n.lifecycle_state, LifecycleState::Dormant);
        seed(&store, &articles, &n).await;

        let stats = sweep(store.clone()).run(t0 + Duration::days(60)).await.unwrap();

        assert_eq!(stats.narratives_scanned, 0);
        let stored = store.get(n.id).await.unwrap().unwrap();
        assert_eq!(stored.version, 1);
    }

    #[tokio::test]
    async fn idle_reactivated_narrative_cools_instead_of_sticking() {
        let store = Arc::new(MemoryNarrativeStore::new());
        let t0 = base_time();
        let articles = burst("SEC", &["SEC"], &[], 3, t0, Duration::hours(2));
        let mut n = hot(&articles, t0);
        let m = machine();
        m.apply_idle(&mut n, 0.0, t0 + Duration::days(15));
        m.apply_idle(&mut n, 0.0, t0 + Duration::days(30));
        let article_count = n.article_count;
        m.apply_cycle(
            &mut n,
            &LifecycleSignals {
                article_count,
                velocity_now: 1.0,
                velocity_previous: 0.0,
            },
            t0 + Duration::days(40),
        );
        assert_eq!(n.lifecycle_state, LifecycleState::Reactivated);
        n.last_updated = t0 + Duration::days(40);
        seed(&store, &articles, &n).await;

        let stats = sweep(store.clone()).run(t0 + Duration::days(55)).await.unwrap();

        assert_eq!(stats.cooled, 1);
        let stored = store.get(n.id).await.unwrap().unwrap();
        assert_eq!(stored.narrative.lifecycle_state, LifecycleState::Cooling);
    }
}
