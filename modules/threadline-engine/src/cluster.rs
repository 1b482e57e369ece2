//! Incremental topical clustering over one chronological batch.
//!
//! Articles are consumed in order and linked to the strongest existing
//! cluster at or above the threshold, otherwise they seed a new singleton.
//! Clusters are never re-partitioned; the arena only grows within a batch.

use std::collections::{HashMap, HashSet};
use std::fmt;

use tracing::debug;

use threadline_common::{Article, ArticleId, Tuning};

use crate::fingerprint::FrequencyRank;
use crate::metrics::jaccard;

pub type ClusterId = usize;

/// One topical cluster under construction. Membership is append-only and
/// ordered by arrival, which inside a chronological batch is publication
/// order.
#[derive(Debug, Clone)]
pub struct Cluster {
    /// Creation-order position within the batch.
    pub ordinal: usize,
    pub article_ids: Vec<ArticleId>,
    pub core_actors: HashSet<String>,
    pub all_actors: HashSet<String>,
    pub tensions: HashSet<String>,
    nuclei: FrequencyRank,
}

impl Cluster {
    fn new(ordinal: usize) -> Self {
        Self {
            ordinal,
            article_ids: Vec::new(),
            core_actors: HashSet::new(),
            all_actors: HashSet::new(),
            tensions: HashSet::new(),
            nuclei: FrequencyRank::new(),
        }
    }

    /// Running-mode nucleus over member articles. Empty when every member
    /// had an empty nucleus.
    pub fn nucleus_entity(&self) -> &str {
        self.nuclei.leader().unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.article_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.article_ids.is_empty()
    }

    fn attach(&mut self, article: &Article) {
        let position = self.article_ids.len();
        if article.has_nucleus() {
            self.nuclei.record(&article.nucleus_entity, position);
        }
        self.core_actors.extend(article.core_actors.iter().cloned());
        self.all_actors.extend(article.all_actors.iter().cloned());
        self.tensions.extend(article.tensions.iter().cloned());
        self.article_ids.push(article.id);
    }
}

/// Arena of clusters built incrementally from one batch.
pub struct Clusterer {
    tuning: Tuning,
    arena: HashMap<ClusterId, Cluster>,
    creation_order: Vec<ClusterId>,
    next_id: ClusterId,
    joined: usize,
    seeded: usize,
}

impl Clusterer {
    pub fn new(tuning: Tuning) -> Self {
        Self {
            tuning,
            arena: HashMap::new(),
            creation_order: Vec::new(),
            next_id: 0,
            joined: 0,
            seeded: 0,
        }
    }

    /// Place one article: join the strongest-linked cluster at or above
    /// the clustering threshold, else seed a new singleton. Ties between
    /// clusters go to the earliest-created one.
    pub fn assign(&mut self, article: &Article) {
        let mut best: Option<(ClusterId, f64)> = None;
        for id in &self.creation_order {
            let strength = self.link_strength(article, &self.arena[id]);
            if best.map(|(_, s)| strength > s).unwrap_or(true) {
                best = Some((*id, strength));
            }
        }

        match best {
            Some((id, strength)) if strength >= self.tuning.clustering_threshold => {
                // creation_order only ever holds live arena ids
                let cluster = self.arena.get_mut(&id).expect("live cluster id");
                cluster.attach(article);
                self.joined += 1;
                debug!(
                    article = %article.id,
                    cluster = cluster.ordinal,
                    strength,
                    "article joined cluster"
                );
            }
            _ => {
                let id = self.seed(article);
                self.seeded += 1;
                debug!(article = %article.id, cluster = id, "article seeded new cluster");
            }
        }
    }

    /// Link strength of an article against a cluster. An empty nucleus on
    /// the article never counts as a nucleus match, which under default
    /// weights caps its reachable strength below the threshold.
    fn link_strength(&self, article: &Article, cluster: &Cluster) -> f64 {
        let nucleus_matches =
            article.has_nucleus() && article.nucleus_entity == cluster.nucleus_entity();
        let nucleus_term = if nucleus_matches {
            self.tuning.nucleus_weight
        } else {
            0.0
        };
        nucleus_term
            + self.tuning.core_actor_weight * jaccard(&article.core_actors, &cluster.core_actors)
            + self.tuning.tension_weight * jaccard(&article.tensions, &cluster.tensions)
    }

    fn seed(&mut self, article: &Article) -> ClusterId {
        let id = self.next_id;
        self.next_id += 1;
        let mut cluster = Cluster::new(self.creation_order.len());
        cluster.attach(article);
        self.arena.insert(id, cluster);
        self.creation_order.push(id);
        id
    }

    pub fn stats(&self) -> ClusterStats {
        ClusterStats {
            articles_scanned: self.joined + self.seeded,
            clusters_formed: self.creation_order.len(),
            joined_existing: self.joined,
            singletons_seeded: self.seeded,
        }
    }

    /// Clusters in creation order, consuming the arena.
    pub fn into_clusters(mut self) -> Vec<Cluster> {
        self.creation_order
            .iter()
            .filter_map(|id| self.arena.remove(id))
            .collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ClusterStats {
    pub articles_scanned: usize,
    pub clusters_formed: usize,
    pub joined_existing: usize,
    pub singletons_seeded: usize,
}

impl fmt::Display for ClusterStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "\n=== Clustering Complete ===")?;
        writeln!(f, "Articles scanned:  {}", self.articles_scanned)?;
        writeln!(f, "Clusters formed:   {}", self.clusters_formed)?;
        writeln!(f, "Joined existing:   {}", self.joined_existing)?;
        writeln!(f, "Singletons seeded: {}", self.singletons_seeded)?;
        Ok(())
    }
}
