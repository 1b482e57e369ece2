//! Shallow-narrative merger: the periodic consolidation pass. Narratives
//! with too few articles or too narrow an actor set get folded into the
//! substantial narrative they overlap most, and deleted. This is the one
//! place in the system a narrative is ever discarded.

use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info, warn};

use threadline_common::{Narrative, Tuning};
use threadline_store::{is_write_conflict, NarrativeStore, VersionedNarrative};

use crate::fingerprint::compute_fingerprint;
use crate::metrics::{jaccard, narrative_status};

#[derive(Debug, Default)]
pub struct MergeStats {
    pub narratives_scanned: u32,
    pub shallow_found: u32,
    pub merged: u32,
    pub kept_standalone: u32,
    pub conflicts: u32,
}

impl std::fmt::Display for MergeStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ShallowMerger: {} scanned, {} shallow, {} merged, {} kept standalone, {} conflicts",
            self.narratives_scanned,
            self.shallow_found,
            self.merged,
            self.kept_standalone,
            self.conflicts,
        )
    }
}

pub struct ShallowMerger {
    store: Arc<dyn NarrativeStore>,
    tuning: Tuning,
}

impl ShallowMerger {
    pub fn new(store: Arc<dyn NarrativeStore>, tuning: Tuning) -> Self {
        Self { store, tuning }
    }

    /// Fold each shallow narrative into its best-overlapping substantial
    /// narrative, where one clears the merge threshold.
    pub async fn run(&self) -> Result<MergeStats> {
        let mut stats = MergeStats::default();

        let all = self.store.all().await?;
        stats.narratives_scanned = all.len() as u32;

        // Substantial set is fixed at pass start: a narrative that counts
        // as substantial now is never itself merged away this pass.
        let (shallow, substantial): (Vec<_>, Vec<_>) = all
            .into_iter()
            .partition(|row| self.is_shallow(&row.narrative));
        stats.shallow_found = shallow.len() as u32;

        if shallow.is_empty() {
            info!("ShallowMerger: no shallow narratives");
            return Ok(stats);
        }

        // Targets are refreshed locally after each absorb so consecutive
        // absorbs into one target stack instead of conflicting.
        let mut targets = substantial;

        for row in shallow {
            let source = row.narrative;
            let Some((idx, overlap)) = best_overlap(&source, &targets, self.tuning.merge_threshold)
            else {
                debug!(
                    narrative_id = %source.id,
                    "ShallowMerger: no overlapping substantial narrative, keeping"
                );
                stats.kept_standalone += 1;
                continue;
            };

            match self.absorb(&targets[idx], &source).await {
                Ok(merged) => {
                    info!(
                        shallow = %source.id,
                        into = %merged.id,
                        overlap,
                        "ShallowMerger: absorbed shallow narrative"
                    );
                    targets[idx].narrative = merged;
                    targets[idx].version += 1;
                    // Union is idempotent; if this delete fails the next
                    // pass re-absorbs the same ids and retries it.
                    self.store.delete(source.id).await?;
                    stats.merged += 1;
                }
                Err(e) if is_write_conflict(&e) => {
                    warn!(
                        shallow = %source.id,
                        target = %targets[idx].narrative.id,
                        "ShallowMerger: target changed underneath us, keeping shallow"
                    );
                    stats.conflicts += 1;
                }
                Err(e) => return Err(e),
            }
        }

        info!(%stats, "ShallowMerger complete");
        Ok(stats)
    }

    fn is_shallow(&self, narrative: &Narrative) -> bool {
        narrative.article_count < self.tuning.shallow_article_floor
            || narrative.entities.len() < self.tuning.shallow_actor_floor
    }

    /// Build and persist the target with the source's articles folded in.
    /// The target row is only touched on a clean compare-and-swap.
    async fn absorb(&self, target: &VersionedNarrative, source: &Narrative) -> Result<Narrative> {
        let mut merged = target.narrative.clone();
        merged.article_ids.extend(source.article_ids.iter().copied());
        merged.article_count = merged.article_ids.len() as u32;

        let ids: Vec<_> = merged.article_ids.iter().copied().collect();
        let members = self.store.articles_by_ids(&ids).await?;
        merged.set_fingerprint(compute_fingerprint(&members, &self.tuning));
        merged.status = narrative_status(
            merged.fingerprint.top_actors.len(),
            merged.fingerprint.key_tensions.len(),
            merged.article_count,
        );
        if source.last_updated > merged.last_updated {
            merged.last_updated = source.last_updated;
        }

        self.store.update(&merged, target.version).await?;
        Ok(merged)
    }
}

/// Index and score of the substantial narrative sharing the most entities
/// with `source`, if any clears `threshold`. Ties go to the most recently
/// updated target.
fn best_overlap(
    source: &Narrative,
    targets: &[VersionedNarrative],
    threshold: f64,
) -> Option<(usize, f64)> {
    let source_entities = source.entity_set();
    let mut best: Option<(usize, f64)> = None;
    for (idx, target) in targets.iter().enumerate() {
        let target_entities = target.narrative.entity_set();
        let score = jaccard(&source_entities, &target_entities);
        let better = match best {
            Some((best_idx, best_score)) => {
                score > best_score
                    || (score == best_score
                        && target.narrative.last_updated > targets[best_idx].narrative.last_updated)
            }
            None => true,
        };
        if better {
            best = Some((idx, score));
        }
    }
    best.filter(|(_, score)| *score >= threshold)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::LifecycleMachine;
    use crate::testing::{article, base_time, burst};
    use chrono::{DateTime, Duration, Utc};
    use std::collections::HashSet;
    use threadline_common::{Article, ArticleId};
    use threadline_store::MemoryNarrativeStore;
    use uuid::Uuid;

    async fn seeded(
        store: &MemoryNarrativeStore,
        articles: Vec<Article>,
        at: DateTime<Utc>,
    ) -> Narrative {
        let tuning = Tuning::default();
        let ids: HashSet<ArticleId> = articles.iter().map(|a| a.id).collect();
        let mut n = Narrative::founded(
            Uuid::new_v4(),
            compute_fingerprint(&articles, &tuning),
            ids,
            at,
        );
        LifecycleMachine::new(tuning).record_founding(&mut n, 1.0, at);
        store.insert_articles(&articles).await.unwrap();
        store.insert_narrative(&n).await.unwrap();
        n
    }

    fn merger(store: Arc<MemoryNarrativeStore>) -> ShallowMerger {
        ShallowMerger::new(store, Tuning::default())
    }

    async fn all_article_ids(store: &MemoryNarrativeStore) -> Vec<ArticleId> {
        let mut ids = Vec::new();
        for row in store.all().await.unwrap() {
            ids.extend(row.narrative.article_ids.iter().copied());
        }
        ids
    }

    #[tokio::test]
    async fn shallow_narrative_folds_into_overlapping_substantial() {
        let store = Arc::new(MemoryNarrativeStore::new());
        let t0 = base_time();
        let big = seeded(
            &store,
            burst("SEC", &["SEC", "Binance"], &["enforcement"], 3, t0, Duration::hours(1)),
            t0,
        )
        .await;
        let small = seeded(
            &store,
            vec![article("SEC", &["SEC", "Binance"], &[], t0 + Duration::days(1))],
            t0 + Duration::days(1),
        )
        .await;

        let stats = merger(store.clone()).run().await.unwrap();

        assert_eq!(stats.merged, 1);
        assert!(store.get(small.id).await.unwrap().is_none());
        let survivor = store.get(big.id).await.unwrap().unwrap().narrative;
        assert_eq!(survivor.article_count, 4);
        assert_eq!(survivor.article_ids.len(), 4);
        assert_eq!(survivor.last_updated, t0 + Duration::days(1));
        assert!(survivor.check_invariants().is_ok());
    }

    #[tokio::test]
    async fn distant_shallow_narrative_stays_standalone() {
        let store = Arc::new(MemoryNarrativeStore::new());
        let t0 = base_time();
        seeded(
            &store,
            burst("SEC", &["SEC", "Binance"], &[], 3, t0, Duration::hours(1)),
            t0,
        )
        .await;
        let loner = seeded(&store, vec![article("OpenAI", &["OpenAI"], &[], t0)], t0).await;

        let stats = merger(store.clone()).run().await.unwrap();

        assert_eq!(stats.merged, 0);
        assert_eq!(stats.kept_standalone, 1);
        assert!(store.get(loner.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn shallow_picks_the_strongest_overlap() {
        let store = Arc::new(MemoryNarrativeStore::new());
        let t0 = base_time();
        let looser = seeded(
            &store,
            burst("SEC", &["SEC", "Binance", "CFTC"], &[], 3, t0, Duration::hours(1)),
            t0,
        )
        .await;
        let tighter = seeded(
            &store,
            burst("SEC", &["SEC", "Binance"], &[], 3, t0 + Duration::hours(6), Duration::hours(1)),
            t0 + Duration::hours(6),
        )
        .await;
        let small = seeded(
            &store,
            vec![article("SEC", &["SEC", "Binance"], &[], t0 + Duration::days(1))],
            t0 + Duration::days(1),
        )
        .await;

        let stats = merger(store.clone()).run().await.unwrap();

        assert_eq!(stats.merged, 1);
        let winner = store.get(tighter.id).await.unwrap().unwrap().narrative;
        assert_eq!(winner.article_count, 4);
        let loser = store.get(looser.id).await.unwrap().unwrap().narrative;
        assert_eq!(loser.article_count, 3);
        assert!(store.get(small.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn merge_pass_conserves_article_ids() {
        let store = Arc::new(MemoryNarrativeStore::new());
        let t0 = base_time();
        seeded(
            &store,
            burst("SEC", &["SEC", "Binance"], &[], 4, t0, Duration::hours(1)),
            t0,
        )
        .await;
        seeded(
            &store,
            vec![article("SEC", &["SEC", "Binance"], &[], t0 + Duration::hours(8))],
            t0 + Duration::hours(8),
        )
        .await;
        seeded(&store, vec![article("OpenAI", &["OpenAI"], &[], t0)], t0).await;

        let before: HashSet<ArticleId> = all_article_ids(&store).await.into_iter().collect();
        assert_eq!(before.len(), 6);

        merger(store.clone()).run().await.unwrap();

        let after = all_article_ids(&store).await;
        assert_eq!(after.len(), 6, "an article id was lost or duplicated");
        let after_set: HashSet<ArticleId> = after.into_iter().collect();
        assert_eq!(after_set, before);
    }

    #[tokio::test]
    async fn second_pass_over_merged_output_is_a_no_op() {
        let store = Arc::new(MemoryNarrativeStore::new());
        let t0 = base_time();
        seeded(
            &store,
            burst("SEC", &["SEC", "Binance"], &[], 3, t0, Duration::hours(1)),
            t0,
        )
        .await;
        seeded(
            &store,
            vec![article("SEC", &["SEC", "Binance"], &[], t0 + Duration::hours(8))],
            t0 + Duration::hours(8),
        )
        .await;
        seeded(&store, vec![article("OpenAI", &["OpenAI"], &[], t0)], t0).await;

        let first = merger(store.clone()).run().await.unwrap();
        assert_eq!(first.merged, 1);

        let second = merger(store.clone()).run().await.unwrap();
        assert_eq!(second.merged, 0);
        assert_eq!(second.shallow_found, 1);
        assert_eq!(second.kept_standalone, 1);
    }

    #[tokio::test]
    async fn substantial_narratives_never_merge_into_each_other() {
        let store = Arc::new(MemoryNarrativeStore::new());
        let t0 = base_time();
        let a = seeded(
            &store,
            burst("SEC", &["SEC", "Binance"], &[], 3, t0, Duration::hours(1)),
            t0,
        )
        .await;
        let b = seeded(
            &store,
            burst("SEC", &["SEC", "Binance"], &[], 3, t0 + Duration::hours(6), Duration::hours(1)),
            t0 + Duration::hours(6),
        )
        .await;

        let stats = merger(store.clone()).run().await.unwrap();

        assert_eq!(stats.shallow_found, 0);
        assert_eq!(stats.merged, 0);
        assert!(store.get(a.id).await.unwrap().is_some());
        assert!(store.get(b.id).await.unwrap().is_some());
    }
}
