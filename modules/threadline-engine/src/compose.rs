//! Narrative copy generation. The engine owns only the calling contract:
//! an async trait, a bounded-retry decorator, and a deterministic
//! placeholder once retries are spent. A compose failure degrades one
//! narrative's copy, never the cycle.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use rand::Rng;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::warn;

use threadline_ai::Claude;
use threadline_common::NarrativeFingerprint;

/// Model used for copy generation.
const COMPOSER_MODEL: &str = "claude-haiku-4-5-20251001";
/// Max attempts before the caller falls back to placeholder copy.
const COMPOSE_MAX_ATTEMPTS: u32 = 3;
/// Base backoff between attempts. Actual delay is base * 3^attempt + jitter.
const COMPOSE_RETRY_BASE: Duration = Duration::from_secs(2);

/// Reader-facing copy for one narrative.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct NarrativeCopy {
    /// Short headline naming the narrative.
    pub title: String,
    /// One-paragraph account of what the coverage is about.
    pub summary: String,
    /// Coarse topical bucket, e.g. "regulation" or "markets".
    pub theme: String,
}

#[async_trait]
pub trait NarrativeComposer: Send + Sync {
    async fn compose(
        &self,
        fingerprint: &NarrativeFingerprint,
        article_count: u32,
    ) -> Result<NarrativeCopy>;
}

/// Deterministic fallback copy when generation is unavailable or spent.
pub fn placeholder_copy(fingerprint: &NarrativeFingerprint) -> NarrativeCopy {
    let title = if fingerprint.has_nucleus() {
        format!("{} narrative", fingerprint.nucleus_entity)
    } else {
        "Emerging narrative".to_string()
    };
    NarrativeCopy {
        title,
        summary: String::new(),
        theme: String::new(),
    }
}

// --- Claude-backed composer ---

pub struct ClaudeComposer {
    claude: Claude,
}

impl ClaudeComposer {
    pub fn new(api_key: &str) -> Self {
        Self {
            claude: Claude::new(api_key, COMPOSER_MODEL),
        }
    }

    pub fn with_client(claude: Claude) -> Self {
        Self { claude }
    }
}

#[async_trait]
impl NarrativeComposer for ClaudeComposer {
    async fn compose(
        &self,
        fingerprint: &NarrativeFingerprint,
        article_count: u32,
    ) -> Result<NarrativeCopy> {
        let system = "You name and summarize tracked news narratives. \
                      Write a short, specific headline-style title (no ending period), \
                      a one-paragraph summary of what the coverage is about, and a \
                      one-or-two-word topical theme.";
        let nucleus = if fingerprint.has_nucleus() {
            fingerprint.nucleus_entity.as_str()
        } else {
            "(none extracted)"
        };
        let user = format!(
            "Coverage group to name:\n\
             Nucleus entity: {nucleus}\n\
             Top actors: {}\n\
             Key tensions: {}\n\
             Articles so far: {article_count}",
            fingerprint.top_actors.join(", "),
            fingerprint.key_tensions.join(", "),
        );
        self.claude.extract(system, user).await
    }
}

// --- Retry decorator ---

/// Bounded-retry wrapper around any composer, with exponential backoff
/// plus random jitter between attempts.
pub struct RetryComposer {
    inner: Arc<dyn NarrativeComposer>,
    max_attempts: u32,
    retry_base: Duration,
}

impl RetryComposer {
    pub fn new(inner: Arc<dyn NarrativeComposer>) -> Self {
        Self {
            inner,
            max_attempts: COMPOSE_MAX_ATTEMPTS,
            retry_base: COMPOSE_RETRY_BASE,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_retry_base(mut self, retry_base: Duration) -> Self {
        self.retry_base = retry_base;
        self
    }
}

#[async_trait]
impl NarrativeComposer for RetryComposer {
    async fn compose(
        &self,
        fingerprint: &NarrativeFingerprint,
        article_count: u32,
    ) -> Result<NarrativeCopy> {
        let mut last_err = None;
        for attempt in 0..self.max_attempts {
            match self.inner.compose(fingerprint, article_count).await {
                Ok(copy) => return Ok(copy),
                Err(e) => {
                    if attempt + 1 < self.max_attempts {
                        let backoff = self.retry_base * 3u32.pow(attempt);
                        let jitter = Duration::from_millis(rand::rng().random_range(0..1000));
                        warn!(
                            error = %e,
                            attempt = attempt + 1,
                            backoff_secs = backoff.as_secs(),
                            "composer call failed, retrying after backoff"
                        );
                        tokio::time::sleep(backoff + jitter).await;
                    }
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("composer retries exhausted")))
    }
}
