//! PgNarrativeStore — Postgres-backed NarrativeStore.
//!
//! Narrative rows carry a BIGINT version column; updates are conditional on
//! it, so a lost race surfaces as a WriteConflict instead of a silent
//! overwrite. Fingerprint and lifecycle history live in JSONB columns, the
//! nucleus/entity mirrors in plain columns so they stay queryable.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;
use tracing::info;

use threadline_common::{
    Article, ArticleId, LifecycleEntry, LifecycleState, Narrative, NarrativeFingerprint,
    NarrativeId, NarrativeStatus, ThreadlineError,
};

use crate::{NarrativeStore, VersionedNarrative};

const NARRATIVE_COLUMNS: &str = "id, title, summary, theme, nucleus_entity, entities, \
     article_ids, article_count, fingerprint, lifecycle_state, lifecycle_history, status, \
     peak_velocity, created_at, last_updated, reawakening_count, reawakened_from, \
     resurrection_velocity, version";

#[derive(Clone)]
pub struct PgNarrativeStore {
    pool: PgPool,
}

impl PgNarrativeStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create tables and indexes if they do not exist yet.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS narratives (
                id UUID PRIMARY KEY,
                title TEXT NOT NULL,
                summary TEXT NOT NULL,
                theme TEXT NOT NULL,
                nucleus_entity TEXT NOT NULL,
                entities JSONB NOT NULL,
                article_ids JSONB NOT NULL,
                article_count INTEGER NOT NULL,
                fingerprint JSONB NOT NULL,
                lifecycle_state TEXT NOT NULL,
                lifecycle_history JSONB NOT NULL,
                status TEXT NOT NULL,
                peak_velocity DOUBLE PRECISION NOT NULL DEFAULT 0,
                created_at TIMESTAMPTZ NOT NULL,
                last_updated TIMESTAMPTZ NOT NULL,
                reawakening_count INTEGER NOT NULL DEFAULT 0,
                reawakened_from TIMESTAMPTZ,
                resurrection_velocity DOUBLE PRECISION,
                version BIGINT NOT NULL DEFAULT 1
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_narratives_state ON narratives (lifecycle_state)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_narratives_last_updated ON narratives (last_updated)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS articles (
                id UUID PRIMARY KEY,
                published_at TIMESTAMPTZ NOT NULL,
                nucleus_entity TEXT NOT NULL,
                core_actors JSONB NOT NULL,
                all_actors JSONB NOT NULL,
                tensions JSONB NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_articles_published_at ON articles (published_at)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Repair legacy rows whose top-level nucleus/entity mirrors drifted
    /// from the fingerprint. Returns the number of rows rewritten. Safe to
    /// run repeatedly; rows written through `set_fingerprint` never match
    /// the predicate.
    pub async fn backfill_nucleus_mirror(&self) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE narratives
            SET nucleus_entity = fingerprint->>'nucleus_entity',
                entities = fingerprint->'top_actors'
            WHERE nucleus_entity IS DISTINCT FROM fingerprint->>'nucleus_entity'
               OR entities::text IS DISTINCT FROM (fingerprint->'top_actors')::text
            "#,
        )
        .execute(&self.pool)
        .await?;

        let repaired = result.rows_affected();
        if repaired > 0 {
            info!(repaired, "backfilled nucleus mirrors from fingerprints");
        }
        Ok(repaired)
    }
}

#[async_trait]
impl NarrativeStore for PgNarrativeStore {
    async fn insert_articles(&self, articles: &[Article]) -> Result<()> {
        for article in articles {
            sqlx::query(
                r#"
                INSERT INTO articles (id, published_at, nucleus_entity, core_actors, all_actors, tensions)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (id) DO NOTHING
                "#,
            )
            .bind(article.id)
            .bind(article.published_at)
            .bind(&article.nucleus_entity)
            .bind(Json(&article.core_actors))
            .bind(Json(&article.all_actors))
            .bind(Json(&article.tensions))
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    async fn articles_by_ids(&self, ids: &[ArticleId]) -> Result<Vec<Article>> {
        let rows = sqlx::query_as::<_, ArticleRow>(
            r#"
            SELECT id, published_at, nucleus_entity, core_actors, all_actors, tensions
            FROM articles
            WHERE id = ANY($1)
            ORDER BY published_at ASC, id ASC
            "#,
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.0).collect())
    }

    async fn insert_narrative(&self, narrative: &Narrative) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO narratives (id, title, summary, theme, nucleus_entity, entities,
                article_ids, article_count, fingerprint, lifecycle_state, lifecycle_history,
                status, peak_velocity, created_at, last_updated, reawakening_count,
                reawakened_from, resurrection_velocity, version)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, 1)
            "#,
        )
        .bind(narrative.id)
        .bind(&narrative.title)
        .bind(&narrative.summary)
        .bind(&narrative.theme)
        .bind(&narrative.nucleus_entity)
        .bind(Json(&narrative.entities))
        .bind(Json(&narrative.article_ids))
        .bind(narrative.article_count as i32)
        .bind(Json(&narrative.fingerprint))
        .bind(narrative.lifecycle_state.to_string())
        .bind(Json(&narrative.lifecycle_history))
        .bind(narrative.status.to_string())
        .bind(narrative.peak_velocity)
        .bind(narrative.created_at)
        .bind(narrative.last_updated)
        .bind(narrative.reawakening_count as i32)
        .bind(narrative.reawakened_from)
        .bind(narrative.resurrection_velocity)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, id: NarrativeId) -> Result<Option<VersionedNarrative>> {
        let sql = format!("SELECT {NARRATIVE_COLUMNS} FROM narratives WHERE id = $1");
        let row = sqlx::query_as::<_, VersionedNarrative>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row)
    }

    async fn update(&self, narrative: &Narrative, expected_version: i64) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE narratives
            SET title = $1, summary = $2, theme = $3, nucleus_entity = $4, entities = $5,
                article_ids = $6, article_count = $7, fingerprint = $8, lifecycle_state = $9,
                lifecycle_history = $10, status = $11, peak_velocity = $12, last_updated = $13,
                reawakening_count = $14, reawakened_from = $15, resurrection_velocity = $16,
                version = version + 1
            WHERE id = $17 AND version = $18
            "#,
        )
        .bind(&narrative.title)
        .bind(&narrative.summary)
        .bind(&narrative.theme)
        .bind(&narrative.nucleus_entity)
        .bind(Json(&narrative.entities))
        .bind(Json(&narrative.article_ids))
        .bind(narrative.article_count as i32)
        .bind(Json(&narrative.fingerprint))
        .bind(narrative.lifecycle_state.to_string())
        .bind(Json(&narrative.lifecycle_history))
        .bind(narrative.status.to_string())
        .bind(narrative.peak_velocity)
        .bind(narrative.last_updated)
        .bind(narrative.reawakening_count as i32)
        .bind(narrative.reawakened_from)
        .bind(narrative.resurrection_velocity)
        .bind(narrative.id)
        .bind(expected_version)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let exists = sqlx::query_as::<_, (i64,)>("SELECT COUNT(*) FROM narratives WHERE id = $1")
                .bind(narrative.id)
                .fetch_one(&self.pool)
                .await?;
            if exists.0 == 0 {
                return Err(ThreadlineError::NotFound(narrative.id).into());
            }
            return Err(ThreadlineError::WriteConflict(narrative.id).into());
        }

        Ok(())
    }

    async fn delete(&self, id: NarrativeId) -> Result<()> {
        let result = sqlx::query("DELETE FROM narratives WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(ThreadlineError::NotFound(id).into());
        }
        Ok(())
    }

    async fn by_state(&self, state: LifecycleState) -> Result<Vec<VersionedNarrative>> {
        let sql = format!(
            "SELECT {NARRATIVE_COLUMNS} FROM narratives WHERE lifecycle_state = $1 \
             ORDER BY last_updated ASC, id ASC"
        );
        let rows = sqlx::query_as::<_, VersionedNarrative>(&sql)
            .bind(state.to_string())
            .fetch_all(&self.pool)
            .await?;

        Ok(rows)
    }

    async fn updated_since(&self, cutoff: DateTime<Utc>) -> Result<Vec<VersionedNarrative>> {
        let sql = format!(
            "SELECT {NARRATIVE_COLUMNS} FROM narratives WHERE last_updated >= $1 \
             ORDER BY last_updated ASC, id ASC"
        );
        let rows = sqlx::query_as::<_, VersionedNarrative>(&sql)
            .bind(cutoff)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows)
    }

    async fn all(&self) -> Result<Vec<VersionedNarrative>> {
        let sql = format!("SELECT {NARRATIVE_COLUMNS} FROM narratives ORDER BY created_at ASC, id ASC");
        let rows = sqlx::query_as::<_, VersionedNarrative>(&sql)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows)
    }

    async fn resurrections(&self) -> Result<Vec<VersionedNarrative>> {
        let sql = format!(
            "SELECT {NARRATIVE_COLUMNS} FROM narratives WHERE reawakening_count > 0 \
             ORDER BY reawakening_count DESC, last_updated DESC"
        );
        let rows = sqlx::query_as::<_, VersionedNarrative>(&sql)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows)
    }
}

// ---------------------------------------------------------------------------
// Row decoding
// ---------------------------------------------------------------------------

fn decode_err(
    column: &str,
    source: impl std::error::Error + Send + Sync + 'static,
) -> sqlx::Error {
    sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(source),
    }
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for VersionedNarrative {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> std::result::Result<Self, sqlx::Error> {
        use sqlx::Row;

        let state: String = row.try_get("lifecycle_state")?;
        let lifecycle_state = state
            .parse::<LifecycleState>()
            .map_err(|e| decode_err("lifecycle_state", e))?;

        let status: String = row.try_get("status")?;
        let status = status
            .parse::<NarrativeStatus>()
            .map_err(|e| decode_err("status", e))?;

        let narrative = Narrative {
            id: row.try_get("id")?,
            title: row.try_get("title")?,
            summary: row.try_get("summary")?,
            theme: row.try_get("theme")?,
            nucleus_entity: row.try_get("nucleus_entity")?,
            entities: row.try_get::<Json<Vec<String>>, _>("entities")?.0,
            article_ids: row
                .try_get::<Json<std::collections::HashSet<ArticleId>>, _>("article_ids")?
                .0,
            article_count: row.try_get::<i32, _>("article_count")? as u32,
            fingerprint: row.try_get::<Json<NarrativeFingerprint>, _>("fingerprint")?.0,
            lifecycle_state,
            lifecycle_history: row
                .try_get::<Json<Vec<LifecycleEntry>>, _>("lifecycle_history")?
                .0,
            status,
            peak_velocity: row.try_get("peak_velocity")?,
            created_at: row.try_get("created_at")?,
            last_updated: row.try_get("last_updated")?,
            reawakening_count: row.try_get::<i32, _>("reawakening_count")? as u32,
            reawakened_from: row.try_get("reawakened_from")?,
            resurrection_velocity: row.try_get("resurrection_velocity")?,
        };

        Ok(VersionedNarrative {
            narrative,
            version: row.try_get("version")?,
        })
    }
}

/// Article lives in threadline-common, which stays sqlx-free. The wrapper
/// carries the FromRow impl.
struct ArticleRow(Article);

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for ArticleRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> std::result::Result<Self, sqlx::Error> {
        use sqlx::Row;
        use std::collections::HashSet;

        Ok(ArticleRow(Article {
            id: row.try_get("id")?,
            published_at: row.try_get("published_at")?,
            nucleus_entity: row.try_get("nucleus_entity")?,
            core_actors: row.try_get::<Json<HashSet<String>>, _>("core_actors")?.0,
            all_actors: row.try_get::<Json<HashSet<String>>, _>("all_actors")?.0,
            tensions: row.try_get::<Json<HashSet<String>>, _>("tensions")?.0,
        }))
    }
}
