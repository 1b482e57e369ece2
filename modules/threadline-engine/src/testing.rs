// Test mocks and fixture builders for the engine.
//
// One mock matching the one async trait boundary:
// - MockComposer (NarrativeComposer) — canned copy, scripted failures
//
// The store boundary is covered by threadline_store::MemoryNarrativeStore.
// Plus free-function builders for annotated articles and fingerprints.

use std::sync::atomic::{AtomicU32, Ordering};

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use uuid::Uuid;

use threadline_common::{Article, NarrativeFingerprint};

use crate::compose::{NarrativeComposer, NarrativeCopy};

// ---------------------------------------------------------------------------
// Test constants
// ---------------------------------------------------------------------------

/// Fixed reference instant used as the start of test timelines.
pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap()
}

// ---------------------------------------------------------------------------
// MockComposer
// ---------------------------------------------------------------------------

/// Canned-copy composer with a call counter and scripted failures.
/// `reliable()` always answers, `failing()` never does, `flaky(n)` fails
/// the first n calls and then recovers.
pub struct MockComposer {
    calls: AtomicU32,
    fail_first: u32,
    always_fail: bool,
}

impl MockComposer {
    pub fn reliable() -> Self {
        Self {
            calls: AtomicU32::new(0),
            fail_first: 0,
            always_fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            calls: AtomicU32::new(0),
            fail_first: 0,
            always_fail: true,
        }
    }

    pub fn flaky(fail_first: u32) -> Self {
        Self {
            calls: AtomicU32::new(0),
            fail_first,
            always_fail: false,
        }
    }

    /// Total compose calls observed so far.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NarrativeComposer for MockComposer {
    async fn compose(
        &self,
        fingerprint: &NarrativeFingerprint,
        article_count: u32,
    ) -> Result<NarrativeCopy> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.always_fail || call < self.fail_first {
            bail!("MockComposer: composer offline");
        }
        let subject = if fingerprint.has_nucleus() {
            fingerprint.nucleus_entity.clone()
        } else {
            "an unnamed story".to_string()
        };
        Ok(NarrativeCopy {
            title: format!("{subject} coverage"),
            summary: format!("{article_count} articles about {subject}"),
            theme: "test".to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// Fixture builders
// ---------------------------------------------------------------------------

/// Annotated article with a nucleus, core actors and tensions.
/// `all_actors` mirrors `core_actors`; use `peripheral` to widen it.
pub fn article(
    nucleus: &str,
    core_actors: &[&str],
    tensions: &[&str],
    published_at: DateTime<Utc>,
) -> Article {
    Article {
        id: Uuid::new_v4(),
        published_at,
        nucleus_entity: nucleus.to_string(),
        core_actors: core_actors.iter().map(|s| s.to_string()).collect(),
        all_actors: core_actors.iter().map(|s| s.to_string()).collect(),
        tensions: tensions.iter().map(|s| s.to_string()).collect(),
    }
}

/// Widen an article's full actor set beyond its core.
pub fn peripheral(mut article: Article, extras: &[&str]) -> Article {
    article
        .all_actors
        .extend(extras.iter().map(|s| s.to_string()));
    article
}

/// A run of same-shaped articles spaced evenly from `start`.
pub fn burst(
    nucleus: &str,
    core_actors: &[&str],
    tensions: &[&str],
    count: usize,
    start: DateTime<Utc>,
    spacing: Duration,
) -> Vec<Article> {
    (0..count)
        .map(|i| article(nucleus, core_actors, tensions, start + spacing * i as i32))
        .collect()
}

/// Fingerprint literal for matcher and compose tests.
pub fn fingerprint(nucleus: &str, top_actors: &[&str], key_tensions: &[&str]) -> NarrativeFingerprint {
    NarrativeFingerprint {
        nucleus_entity: nucleus.to_string(),
        top_actors: top_actors.iter().map(|s| s.to_string()).collect(),
        key_tensions: key_tensions.iter().map(|s| s.to_string()).collect(),
    }
}

// ---------------------------------------------------------------------------
// MockComposer self-tests
// ---------------------------------------------------------------------------
