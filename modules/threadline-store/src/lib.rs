//! NarrativeStore — persistence boundary for narratives and their member
//! articles.
//!
//! Writes are versioned: every read hands back the row version, every
//! update names the version it read. A version miss means another pass
//! touched the narrative first; the caller abandons that one update, never
//! the cycle. Two backends: in-memory (tests, single-process runs) and
//! Postgres.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use threadline_common::{Article, ArticleId, LifecycleState, Narrative, NarrativeId, ThreadlineError};

pub mod memory;
pub mod postgres;

pub use memory::MemoryNarrativeStore;
pub use postgres::PgNarrativeStore;

/// A narrative together with the store version it was read at.
#[derive(Debug, Clone)]
pub struct VersionedNarrative {
    pub narrative: Narrative,
    pub version: i64,
}

#[async_trait]
pub trait NarrativeStore: Send + Sync {
    // --- Articles ---

    /// Persist a batch of annotated articles. Idempotent: re-delivered
    /// articles are ignored (annotations are immutable upstream).
    async fn insert_articles(&self, articles: &[Article]) -> Result<()>;

    /// Fetch articles by id, ordered by published_at then id so derived
    /// computations are deterministic. Unknown ids are skipped.
    async fn articles_by_ids(&self, ids: &[ArticleId]) -> Result<Vec<Article>>;

    // --- Narratives ---

    /// Insert a freshly founded narrative at version 1.
    async fn insert_narrative(&self, narrative: &Narrative) -> Result<()>;

    async fn get(&self, id: NarrativeId) -> Result<Option<VersionedNarrative>>;

    /// Compare-and-swap write: applies only if the stored version still
    /// equals `expected_version`, then bumps it. Fails with
    /// `ThreadlineError::WriteConflict` otherwise.
    async fn update(&self, narrative: &Narrative, expected_version: i64) -> Result<()>;

    /// Remove a narrative outright. Reserved for the shallow-narrative
    /// merger; lifecycle machinery never deletes.
    async fn delete(&self, id: NarrativeId) -> Result<()>;

    // --- Queries ---

    async fn by_state(&self, state: LifecycleState) -> Result<Vec<VersionedNarrative>>;

    /// Narratives with `last_updated >= cutoff`.
    async fn updated_since(&self, cutoff: DateTime<Utc>) -> Result<Vec<VersionedNarrative>>;

    /// Every stored narrative.
    async fn all(&self) -> Result<Vec<VersionedNarrative>>;

    /// Narratives that have come back from dormancy at least once, most
    /// reawakened first.
    async fn resurrections(&self) -> Result<Vec<VersionedNarrative>>;
}

/// True when an update failed the version check rather than anything else.
pub fn is_write_conflict(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<ThreadlineError>(),
        Some(ThreadlineError::WriteConflict(_))
    )
}
