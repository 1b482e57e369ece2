//! End-to-end flows through the public engine surface: detection cycles,
//! dormancy sweeps and the shallow merger, all against the in-memory store.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Duration;

use threadline_common::{LifecycleState, NarrativeStatus, Tuning};
use threadline_engine::testing::{base_time, burst, MockComposer};
use threadline_engine::{
    DetectionCycle, DormancySweep, NarrativeComposer, RetryComposer, ShallowMerger,
};
use threadline_store::{MemoryNarrativeStore, NarrativeStore, VersionedNarrative};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn store() -> Arc<dyn NarrativeStore> {
    Arc::new(MemoryNarrativeStore::new())
}

fn cycle(store: &Arc<dyn NarrativeStore>) -> DetectionCycle {
    DetectionCycle::new(store.clone(), None, Tuning::default())
}

async fn only_narrative(store: &Arc<dyn NarrativeStore>) -> VersionedNarrative {
    let mut rows = store.all().await.unwrap();
    assert_eq!(rows.len(), 1, "expected exactly one narrative");
    rows.remove(0)
}

fn states(row: &VersionedNarrative) -> Vec<LifecycleState> {
    row.narrative
        .lifecycle_history
        .iter()
        .map(|e| e.state)
        .collect()
}

// =========================================================================
// Tests
// =========================================================================

#[tokio::test]
async fn sustained_coverage_carries_a_narrative_from_emerging_to_hot() {
    let store = store();
    let composer = Arc::new(MockComposer::flaky(2));
    let retrying: Arc<dyn NarrativeComposer> = Arc::new(
        RetryComposer::new(composer.clone()).with_retry_base(std::time::Duration::ZERO),
    );
    let engine = DetectionCycle::new(store.clone(), Some(retrying), Tuning::default());
    let t0 = base_time();

    // Day one: four articles found the narrative.
    let stats = engine
        .run(
            burst(
                "Meridian Bank",
                &["Meridian Bank", "FDIC"],
                &["solvency fears"],
                4,
                t0,
                Duration::hours(1),
            ),
            t0 + Duration::hours(4),
        )
        .await
        .unwrap();
    assert_eq!(stats.narratives_created, 1);

    let row = only_narrative(&store).await;
    assert_eq!(row.narrative.lifecycle_state, LifecycleState::Emerging);
    // The title came from the composer, after two failed attempts.
    assert_eq!(row.narrative.title, "Meridian Bank coverage");
    assert_eq!(composer.calls(), 3);

    // Next morning: six more, coverage accelerating.
    let stats = engine
        .run(
            burst(
                "Meridian Bank",
                &["Meridian Bank", "FDIC"],
                &["solvency fears"],
                6,
                t0 + Duration::hours(24),
                Duration::hours(1),
            ),
            t0 + Duration::hours(30),
        )
        .await
        .unwrap();
    assert_eq!(stats.narratives_updated, 1);
    assert_eq!(stats.narratives_created, 0);
    assert_eq!(
        only_narrative(&store).await.narrative.lifecycle_state,
        LifecycleState::Rising
    );

    // Day three: seven more while the pace holds above the hot line.
    engine
        .run(
            burst(
                "Meridian Bank",
                &["Meridian Bank", "FDIC"],
                &["solvency fears"],
                7,
                t0 + Duration::hours(48),
                Duration::hours(1),
            ),
            t0 + Duration::hours(54),
        )
        .await
        .unwrap();

    let row = only_narrative(&store).await;
    let n = &row.narrative;
    assert_eq!(n.lifecycle_state, LifecycleState::Hot);
    assert_eq!(n.article_count, 17);
    assert_eq!(
        states(&row),
        vec![
            LifecycleState::Emerging,
            LifecycleState::Rising,
            LifecycleState::Hot,
        ]
    );
    assert!((n.peak_velocity - 6.5).abs() < 1e-9);
    // Continuations never re-compose the copy.
    assert_eq!(composer.calls(), 3);
    assert!(n.check_invariants().is_ok());
}

#[tokio::test]
async fn a_quiet_narrative_goes_dormant_and_fresh_coverage_resurrects_it() {
    let store = store();
    let engine = cycle(&store);
    let sweeper = DormancySweep::new(store.clone(), Tuning::default());
    let t0 = base_time();

    engine
        .run(
            burst(
                "Glass Harbor Ferry",
                &["Glass Harbor Ferry", "Transit Authority"],
                &["service cuts"],
                3,
                t0 - Duration::hours(2),
                Duration::hours(1),
            ),
            t0,
        )
        .await
        .unwrap();

    // Two weeks of silence: the first sweep cools it...
    let stats = sweeper.run(t0 + Duration::days(15)).await.unwrap();
    assert_eq!(stats.cooled, 1);

    // ...and the next puts it to sleep, because sweeps never count as
    // activity themselves.
    let stats = sweeper.run(t0 + Duration::days(16)).await.unwrap();
    assert_eq!(stats.went_dormant, 1);
    assert_eq!(
        only_narrative(&store).await.narrative.lifecycle_state,
        LifecycleState::Dormant
    );

    // A month after founding, the story comes back.
    let comeback = t0 + Duration::days(30);
    let stats = engine
        .run(
            burst(
                "Glass Harbor Ferry",
                &["Glass Harbor Ferry", "Transit Authority"],
                &["service cuts"],
                3,
                comeback - Duration::hours(2),
                Duration::hours(1),
            ),
            comeback,
        )
        .await
        .unwrap();
    assert_eq!(stats.reactivated, 1);
    assert_eq!(stats.narratives_created, 0);

    let row = only_narrative(&store).await;
    let n = &row.narrative;
    assert_eq!(n.lifecycle_state, LifecycleState::Reactivated);
    assert_eq!(n.article_count, 6);
    assert_eq!(n.reawakening_count, 1);
    assert_eq!(n.reawakened_from, Some(t0 + Duration::days(16)));
    // Three fresh articles on day one of the comeback.
    assert_eq!(n.resurrection_velocity, Some(3.0));
    assert_eq!(
        states(&row),
        vec![
            LifecycleState::Emerging,
            LifecycleState::Cooling,
            LifecycleState::Dormant,
            LifecycleState::Reactivated,
        ]
    );
    assert!(n.check_invariants().is_ok());

    let revived = store.resurrections().await.unwrap();
    assert_eq!(revived.len(), 1);
    assert_eq!(revived[0].narrative.id, n.id);
}

#[tokio::test]
async fn shifted_coverage_continues_the_narrative_instead_of_founding_a_twin() {
    let store = store();
    let engine = cycle(&store);
    let t0 = base_time();

    engine
        .run(
            burst(
                "Harbor Point",
                &["City Council", "Port Authority"],
                &["rezoning fight", "eviction worries"],
                3,
                t0,
                Duration::hours(1),
            ),
            t0 + Duration::hours(3),
        )
        .await
        .unwrap();

    // Same nucleus, but the cast and the framing have moved on.
    let stats = engine
        .run(
            burst(
                "Harbor Point",
                &["Developers Guild", "City Council"],
                &["rezoning fight", "funding gap"],
                3,
                t0 + Duration::hours(24),
                Duration::hours(1),
            ),
            t0 + Duration::hours(27),
        )
        .await
        .unwrap();
    assert_eq!(stats.narratives_updated, 1);
    assert_eq!(stats.narratives_created, 0);

    let row = only_narrative(&store).await;
    let n = &row.narrative;
    assert_eq!(n.article_count, 6);
    // The fingerprint follows the union of coverage.
    assert!(n.fingerprint.top_actors.iter().any(|a| a == "Developers Guild"));
    assert!(n.fingerprint.key_tensions.iter().any(|t| t == "funding gap"));
    assert_eq!(n.status, NarrativeStatus::Corroborated);
}

#[tokio::test]
async fn unrelated_coverage_founds_its_own_narrative() {
    let store = store();
    let engine = cycle(&store);
    let t0 = base_time();

    engine
        .run(
            burst(
                "Harbor Point",
                &["City Council"],
                &["rezoning fight"],
                3,
                t0,
                Duration::hours(1),
            ),
            t0 + Duration::hours(3),
        )
        .await
        .unwrap();
    let stats = engine
        .run(
            burst(
                "Kestrel Mining",
                &["Workers Union", "Kestrel Mining"],
                &["mine safety"],
                3,
                t0 + Duration::hours(6),
                Duration::hours(1),
            ),
            t0 + Duration::hours(9),
        )
        .await
        .unwrap();
    assert_eq!(stats.narratives_created, 1);
    assert_eq!(stats.narratives_updated, 0);

    let rows = store.all().await.unwrap();
    assert_eq!(rows.len(), 2);
    let mut titles: Vec<String> = rows.iter().map(|r| r.narrative.title.clone()).collect();
    titles.sort();
    assert_eq!(titles, vec!["Harbor Point narrative", "Kestrel Mining narrative"]);
}

#[tokio::test]
async fn a_match_exactly_at_the_bar_attaches() {
    let store = store();
    let engine = cycle(&store);
    let t0 = base_time();

    engine
        .run(
            burst(
                "Quarry Road",
                &["Miners Union", "County Board"],
                &["dust complaints", "road damage"],
                3,
                t0,
                Duration::hours(1),
            ),
            t0 + Duration::hours(3),
        )
        .await
        .unwrap();

    // Shared nucleus, half the tensions, none of the actors:
    // 0.5 + 0.3 * 0 + 0.2 * 0.5 lands exactly on the bar, which is
    // inclusive.
    let stats = engine
        .run(
            burst(
                "Quarry Road",
                &["Night Shift Crew"],
                &["dust complaints"],
                3,
                t0 + Duration::hours(24),
                Duration::hours(1),
            ),
            t0 + Duration::hours(27),
        )
        .await
        .unwrap();
    assert_eq!(stats.narratives_updated, 1);
    assert_eq!(only_narrative(&store).await.narrative.article_count, 6);
}

#[tokio::test]
async fn a_match_just_under_the_bar_founds_anew() {
    let store = store();
    let engine = cycle(&store);
    let t0 = base_time();

    engine
        .run(
            burst(
                "Quarry Road",
                &["Miners Union", "County Board"],
                &["dust complaints", "road damage"],
                3,
                t0,
                Duration::hours(1),
            ),
            t0 + Duration::hours(3),
        )
        .await
        .unwrap();

    // Nucleus alone is 0.5: under the bar, so this founds a sibling.
    let stats = engine
        .run(
            burst(
                "Quarry Road",
                &["Night Shift Crew"],
                &["night noise"],
                3,
                t0 + Duration::hours(24),
                Duration::hours(1),
            ),
            t0 + Duration::hours(27),
        )
        .await
        .unwrap();
    assert_eq!(stats.narratives_created, 1);
    assert_eq!(store.all().await.unwrap().len(), 2);
}

#[tokio::test]
async fn merge_folds_a_thin_offshoot_back_in_and_settles() {
    let store = store();
    let engine = cycle(&store);
    let merger = ShallowMerger::new(store.clone(), Tuning::default());
    let t0 = base_time();

    engine
        .run(
            burst(
                "Rivergate Dam",
                &["Rivergate Dam", "State EPA"],
                &["water rights"],
                4,
                t0,
                Duration::hours(1),
            ),
            t0 + Duration::hours(4),
        )
        .await
        .unwrap();

    // Five days on, the story resurfaces. The narrative has aged out of
    // the match window without going dormant, so a thin twin is founded.
    let resurface = t0 + Duration::days(5);
    engine
        .run(
            burst(
                "Rivergate Dam",
                &["Rivergate Dam"],
                &["water rights"],
                3,
                resurface - Duration::hours(3),
                Duration::hours(1),
            ),
            resurface,
        )
        .await
        .unwrap();
    assert_eq!(store.all().await.unwrap().len(), 2);

    let mut expected_ids = HashSet::new();
    for row in store.all().await.unwrap() {
        expected_ids.extend(row.narrative.article_ids.iter().copied());
    }
    assert_eq!(expected_ids.len(), 7);

    let stats = merger.run().await.unwrap();
    assert_eq!(stats.shallow_found, 1);
    assert_eq!(stats.merged, 1);

    let row = only_narrative(&store).await;
    assert_eq!(row.narrative.article_count, 7);
    // No article is lost in the fold.
    assert_eq!(row.narrative.article_ids, expected_ids);
    assert!(row.narrative.check_invariants().is_ok());

    // A second pass has nothing left to do.
    let stats = merger.run().await.unwrap();
    assert_eq!(stats.shallow_found, 0);
    assert_eq!(stats.merged, 0);
}
