//! In-memory NarrativeStore. Backs tests and single-process runs; the
//! version counters follow the same compare-and-swap contract as Postgres.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use threadline_common::{
    Article, ArticleId, LifecycleState, Narrative, NarrativeId, ThreadlineError,
};

use crate::{NarrativeStore, VersionedNarrative};

#[derive(Default)]
struct Inner {
    narratives: HashMap<NarrativeId, (Narrative, i64)>,
    articles: HashMap<ArticleId, Article>,
}

#[derive(Default)]
pub struct MemoryNarrativeStore {
    inner: Mutex<Inner>,
}

impl MemoryNarrativeStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| anyhow!("narrative store mutex poisoned"))
    }
}

#[async_trait]
impl NarrativeStore for MemoryNarrativeStore {
    async fn insert_articles(&self, articles: &[Article]) -> Result<()> {
        let mut inner = self.lock()?;
        for article in articles {
            inner
                .articles
                .entry(article.id)
                .or_insert_with(|| article.clone());
        }
        Ok(())
    }

    async fn articles_by_ids(&self, ids: &[ArticleId]) -> Result<Vec<Article>> {
        let inner = self.lock()?;
        let mut found: Vec<Article> = ids
            .iter()
            .filter_map(|id| inner.articles.get(id).cloned())
            .collect();
        found.sort_by(|a, b| (a.published_at, a.id).cmp(&(b.published_at, b.id)));
        Ok(found)
    }

    async fn insert_narrative(&self, narrative: &Narrative) -> Result<()> {
        let mut inner = self.lock()?;
        if inner.narratives.contains_key(&narrative.id) {
            return Err(
                ThreadlineError::Validation(format!("narrative {} already exists", narrative.id))
                    .into(),
            );
        }
        inner.narratives.insert(narrative.id, (narrative.clone(), 1));
        Ok(())
    }

    async fn get(&self, id: NarrativeId) -> Result<Option<VersionedNarrative>> {
        let inner = self.lock()?;
        Ok(inner.narratives.get(&id).map(|(n, v)| VersionedNarrative {
            narrative: n.clone(),
            version: *v,
        }))
    }

    async fn update(&self, narrative: &Narrative, expected_version: i64) -> Result<()> {
        let mut inner = self.lock()?;
        let Some((stored, version)) = inner.narratives.get_mut(&narrative.id) else {
            return Err(ThreadlineError::NotFound(narrative.id).into());
        };
        if *version != expected_version {
            return Err(ThreadlineError::WriteConflict(narrative.id).into());
        }
        *stored = narrative.clone();
        *version += 1;
        Ok(())
    }

    async fn delete(&self, id: NarrativeId) -> Result<()> {
        let mut inner = self.lock()?;
        if inner.narratives.remove(&id).is_none() {
            return Err(ThreadlineError::NotFound(id).into());
        }
        Ok(())
    }

    async fn by_state(&self, state: LifecycleState) -> Result<Vec<VersionedNarrative>> {
        let inner = self.lock()?;
        let mut rows: Vec<VersionedNarrative> = inner
            .narratives
            .values()
            .filter(|(n, _)| n.lifecycle_state == state)
            .map(|(n, v)| VersionedNarrative {
                narrative: n.clone(),
                version: *v,
            })
            .collect();
        rows.sort_by_key(|r| (r.narrative.last_updated, r.narrative.id));
        Ok(rows)
    }

    async fn updated_since(&self, cutoff: DateTime<Utc>) -> Result<Vec<VersionedNarrative>> {
        let inner = self.lock()?;
        let mut rows: Vec<VersionedNarrative> = inner
            .narratives
            .values()
            .filter(|(n, _)| n.last_updated >= cutoff)
            .map(|(n, v)| VersionedNarrative {
                narrative: n.clone(),
                version: *v,
            })
            .collect();
        rows.sort_by_key(|r| (r.narrative.last_updated, r.narrative.id));
        Ok(rows)
    }

    async fn all(&self) -> Result<Vec<VersionedNarrative>> {
        let inner = self.lock()?;
        let mut rows: Vec<VersionedNarrative> = inner
            .narratives
            .values()
            .map(|(n, v)| VersionedNarrative {
                narrative: n.clone(),
                version: *v,
            })
            .collect();
        rows.sort_by_key(|r| (r.narrative.created_at, r.narrative.id));
        Ok(rows)
    }

    async fn resurrections(&self) -> Result<Vec<VersionedNarrative>> {
        let inner = self.lock()?;
        let mut rows: Vec<VersionedNarrative> = inner
            .narratives
            .values()
            .filter(|(n, _)| n.reawakening_count > 0)
            .map(|(n, v)| VersionedNarrative {
                narrative: n.clone(),
                version: *v,
            })
            .collect();
        rows.sort_by(|a, b| {
            (b.narrative.reawakening_count, b.narrative.last_updated)
                .cmp(&(a.narrative.reawakening_count, a.narrative.last_updated))
        });
        Ok(rows)
    }
}
