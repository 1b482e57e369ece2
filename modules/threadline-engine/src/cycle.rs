//! Detection cycle: the scheduler-invoked batch orchestrator. One run
//! takes a batch of annotated articles from chronological sort through
//! clustering, matching and lifecycle to persisted narratives, then
//! composes titles for whatever the batch founded.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use futures::future::join_all;
use tracing::{debug, info, warn};
use uuid::Uuid;

use threadline_common::{
    assess_batch, Article, ArticleId, LifecycleState, Narrative, NarrativeId, Tuning,
};
use threadline_store::{is_write_conflict, NarrativeStore, VersionedNarrative};

use crate::cluster::{Cluster, Clusterer};
use crate::compose::{placeholder_copy, NarrativeComposer, NarrativeCopy};
use crate::fingerprint::compute_fingerprint;
use crate::lifecycle::{LifecycleMachine, LifecycleSignals};
use crate::matcher::find_matching_narrative;
use crate::metrics::{mention_velocity, narrative_status};

#[derive(Debug, Default)]
pub struct CycleStats {
    pub articles_seen: usize,
    pub clusters_formed: usize,
    pub clusters_dropped: usize,
    pub narratives_updated: u32,
    pub narratives_created: u32,
    pub reactivated: u32,
    pub write_conflicts: u32,
    pub compose_fallbacks: u32,
}

impl fmt::Display for CycleStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "\n=== Detection Cycle Complete ===")?;
        writeln!(f, "Articles seen:      {}", self.articles_seen)?;
        writeln!(
            f,
            "Clusters formed:    {} ({} below size floor)",
            self.clusters_formed, self.clusters_dropped
        )?;
        writeln!(f, "Narratives updated: {}", self.narratives_updated)?;
        writeln!(f, "Narratives created: {}", self.narratives_created)?;
        writeln!(f, "Reactivated:        {}", self.reactivated)?;
        writeln!(f, "Write conflicts:    {}", self.write_conflicts)?;
        writeln!(f, "Compose fallbacks:  {}", self.compose_fallbacks)?;
        Ok(())
    }
}

pub struct DetectionCycle {
    store: Arc<dyn NarrativeStore>,
    composer: Option<Arc<dyn NarrativeComposer>>,
    machine: LifecycleMachine,
    tuning: Tuning,
}

impl DetectionCycle {
    pub fn new(
        store: Arc<dyn NarrativeStore>,
        composer: Option<Arc<dyn NarrativeComposer>>,
        tuning: Tuning,
    ) -> Self {
        Self {
            machine: LifecycleMachine::new(tuning.clone()),
            store,
            composer,
            tuning,
        }
    }

    /// One full detection pass over a batch of annotated articles.
    pub async fn run(&self, mut batch: Vec<Article>, now: DateTime<Utc>) -> Result<CycleStats> {
        let mut stats = CycleStats {
            articles_seen: batch.len(),
            ..Default::default()
        };

        if batch.is_empty() {
            info!("DetectionCycle: empty batch, skipping");
            return Ok(stats);
        }

        batch.sort_by(|a, b| (a.published_at, a.id).cmp(&(b.published_at, b.id)));
        flag_quality(&batch);

        let mut clusterer = Clusterer::new(self.tuning.clone());
        for article in &batch {
            clusterer.assign(article);
        }
        let cluster_stats = clusterer.stats();
        info!(
            clusters = cluster_stats.clusters_formed,
            joined = cluster_stats.joined_existing,
            seeded = cluster_stats.singletons_seeded,
            "DetectionCycle: batch clustered"
        );
        stats.clusters_formed = cluster_stats.clusters_formed;

        let mut clusters = Vec::with_capacity(cluster_stats.clusters_formed);
        for cluster in clusterer.into_clusters() {
            if cluster.len() < self.tuning.min_cluster_size {
                debug!(
                    ordinal = cluster.ordinal,
                    size = cluster.len(),
                    "DetectionCycle: cluster below size floor, dropped"
                );
                stats.clusters_dropped += 1;
            } else {
                clusters.push(cluster);
            }
        }

        // Articles persist regardless of cluster fate; only membership in a
        // narrative is decided below.
        self.store.insert_articles(&batch).await?;

        let mut candidates = self.match_candidates(now).await?;
        let by_id: HashMap<ArticleId, &Article> = batch.iter().map(|a| (a.id, a)).collect();
        let mut pending: Vec<Narrative> = Vec::new();

        for cluster in &clusters {
            let members: Vec<Article> = cluster
                .article_ids
                .iter()
                .filter_map(|id| by_id.get(id).map(|a| (*a).clone()))
                .collect();
            let fingerprint = compute_fingerprint(&members, &self.tuning);

            let outcome = find_matching_narrative(&fingerprint, &candidates, &self.tuning);
            match outcome.matched {
                Some((index, score)) => {
                    debug!(
                        nucleus = fingerprint.nucleus_entity,
                        similarity = score,
                        narrative = %candidates[index].narrative.id,
                        "DetectionCycle: cluster continues an existing narrative"
                    );
                    self.attach(&mut candidates[index], cluster, now, &mut stats)
                        .await?;
                }
                None => {
                    debug!(
                        nucleus = fingerprint.nucleus_entity,
                        best_similarity = outcome.best_similarity,
                        "DetectionCycle: nothing cleared the match threshold, founding"
                    );
                    let times: Vec<_> = members.iter().map(|a| a.published_at).collect();
                    let velocity =
                        mention_velocity(&times, now, self.tuning.velocity_window_hours);
                    let mut narrative = Narrative::founded(
                        Uuid::new_v4(),
                        fingerprint,
                        cluster.article_ids.iter().copied().collect(),
                        now,
                    );
                    self.machine.record_founding(&mut narrative, velocity, now);
                    narrative.status = narrative_status(
                        narrative.fingerprint.top_actors.len(),
                        narrative.fingerprint.key_tensions.len(),
                        narrative.article_count,
                    );
                    pending.push(narrative);
                }
            }
        }

        // Copy generation runs after all matching and lifecycle work, so a
        // slow composer never blocks it.
        self.compose_pending(&mut pending, &mut stats).await;
        for narrative in &pending {
            self.store.insert_narrative(narrative).await?;
            stats.narratives_created += 1;
        }

        info!(
            created = stats.narratives_created,
            updated = stats.narratives_updated,
            reactivated = stats.reactivated,
            conflicts = stats.write_conflicts,
            "DetectionCycle complete"
        );
        Ok(stats)
    }

    /// Narratives eligible for continuation: anything updated inside the
    /// lookback window, plus every dormant narrative regardless of age.
    async fn match_candidates(&self, now: DateTime<Utc>) -> Result<Vec<VersionedNarrative>> {
        let cutoff = now - Duration::hours(self.tuning.match_window_hours);
        let mut candidates = self.store.updated_since(cutoff).await?;
        let mut seen: HashSet<NarrativeId> =
            candidates.iter().map(|c| c.narrative.id).collect();
        for row in self.store.by_state(LifecycleState::Dormant).await? {
            if seen.insert(row.narrative.id) {
                candidates.push(row);
            }
        }
        Ok(candidates)
    }

    /// Fold a cluster into the narrative it matched: membership union,
    /// fingerprint and status recompute, lifecycle re-evaluation, one
    /// compare-and-swap write. A conflicted write abandons only this
    /// narrative's update; the local candidate copy is refreshed on
    /// success so later clusters in the same batch stack cleanly.
    async fn attach(
        &self,
        candidate: &mut VersionedNarrative,
        cluster: &Cluster,
        now: DateTime<Utc>,
        stats: &mut CycleStats,
    ) -> Result<()> {
        let mut narrative = candidate.narrative.clone();
        let version = candidate.version;

        let previous_ids = narrative.article_ids.clone();
        let previous_as_of = narrative.last_updated;

        narrative.article_ids.extend(cluster.article_ids.iter().copied());
        narrative.article_count = narrative.article_ids.len() as u32;

        let ids: Vec<ArticleId> = narrative.article_ids.iter().copied().collect();
        let members = self.store.articles_by_ids(&ids).await?;
        narrative.set_fingerprint(compute_fingerprint(&members, &self.tuning));
        narrative.status = narrative_status(
            narrative.fingerprint.top_actors.len(),
            narrative.fingerprint.key_tensions.len(),
            narrative.article_count,
        );

        let all_times: Vec<_> = members.iter().map(|a| a.published_at).collect();
        let previous_times: Vec<_> = members
            .iter()
            .filter(|a| previous_ids.contains(&a.id))
            .map(|a| a.published_at)
            .collect();
        let signals = LifecycleSignals {
            article_count: narrative.article_count,
            velocity_now: mention_velocity(&all_times, now, self.tuning.velocity_window_hours),
            velocity_previous: mention_velocity(
                &previous_times,
                previous_as_of,
                self.tuning.velocity_window_hours,
            ),
        };

        let transition = self.machine.apply_cycle(&mut narrative, &signals, now);
        narrative.last_updated = now;

        match self.store.update(&narrative, version).await {
            Ok(()) => {
                if transition == Some(LifecycleState::Reactivated) {
                    stats.reactivated += 1;
                }
                stats.narratives_updated += 1;
                candidate.narrative = narrative;
                candidate.version = version + 1;
                Ok(())
            }
            Err(e) if is_write_conflict(&e) => {
                warn!(
                    narrative_id = %narrative.id,
                    "DetectionCycle: narrative changed underneath us, abandoning this update"
                );
                stats.write_conflicts += 1;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Title/summary/theme for each founded narrative, concurrently. A
    /// compose failure degrades that one narrative to the placeholder.
    async fn compose_pending(&self, pending: &mut [Narrative], stats: &mut CycleStats) {
        if pending.is_empty() {
            return;
        }
        let Some(composer) = self.composer.as_ref() else {
            debug!(
                count = pending.len(),
                "DetectionCycle: no composer wired, using placeholder titles"
            );
            stats.compose_fallbacks += pending.len() as u32;
            for narrative in pending.iter_mut() {
                apply_copy(narrative, placeholder_copy(&narrative.fingerprint));
            }
            return;
        };

        let calls = pending
            .iter()
            .map(|n| composer.compose(&n.fingerprint, n.article_count));
        let results = join_all(calls).await;

        for (narrative, result) in pending.iter_mut().zip(results) {
            let copy = match result {
                Ok(copy) => copy,
                Err(e) => {
                    warn!(
                        narrative_id = %narrative.id,
                        error = %e,
                        "DetectionCycle: compose failed, using placeholder title"
                    );
                    stats.compose_fallbacks += 1;
                    placeholder_copy(&narrative.fingerprint)
                }
            };
            apply_copy(narrative, copy);
        }
    }
}

fn apply_copy(narrative: &mut Narrative, copy: NarrativeCopy) {
    narrative.title = copy.title;
    narrative.summary = copy.summary;
    narrative.theme = copy.theme;
}

fn flag_quality(batch: &[Article]) {
    let quality = assess_batch(batch);
    if quality.is_clean() {
        return;
    }
    if !quality.empty_nucleus.is_empty() {
        warn!(
            count = quality.empty_nucleus.len(),
            article_ids = ?quality.empty_nucleus,
            "DetectionCycle: articles with no nucleus entity"
        );
    }
    if !quality.no_core_actors.is_empty() {
        warn!(
            count = quality.no_core_actors.len(),
            article_ids = ?quality.no_core_actors,
            "DetectionCycle: articles with no core actors"
        );
    }
    if !quality.no_actors.is_empty() {
        warn!(
            count = quality.no_actors.len(),
            article_ids = ?quality.no_actors,
            "DetectionCycle: articles with no actors at all"
        );
    }
}
