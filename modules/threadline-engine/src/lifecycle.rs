//! Lifecycle state machine. Sole writer of `lifecycle_history`,
//! `reawakening_count`, `reawakened_from` and `resurrection_velocity`;
//! everything else only reads them.

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use threadline_common::{LifecycleEntry, LifecycleState, Narrative, Tuning};

/// Per-cycle activity readings for one narrative, computed by the caller
/// from persisted member timestamps plus the incoming batch.
#[derive(Debug, Clone, Copy)]
pub struct LifecycleSignals {
    /// Member count after the batch attached.
    pub article_count: u32,
    /// Trailing-window velocity ending now.
    pub velocity_now: f64,
    /// The same reading at the previous evaluation, over the pre-batch
    /// member set. Derivable from persisted state, so cycles stay
    /// idempotent.
    pub velocity_previous: f64,
}

pub struct LifecycleMachine {
    tuning: Tuning,
}

impl LifecycleMachine {
    pub fn new(tuning: Tuning) -> Self {
        Self { tuning }
    }

    /// Record the opening `emerging` entry of a freshly founded narrative.
    pub fn record_founding(&self, narrative: &mut Narrative, velocity: f64, now: DateTime<Utc>) {
        if velocity > narrative.peak_velocity {
            narrative.peak_velocity = velocity;
        }
        let article_count = narrative.article_count;
        self.record(narrative, LifecycleState::Emerging, article_count, velocity, now);
    }

    /// Re-evaluate after a detection cycle attached new articles. Returns
    /// the state entered when a transition was recorded.
    pub fn apply_cycle(
        &self,
        narrative: &mut Narrative,
        signals: &LifecycleSignals,
        now: DateTime<Utc>,
    ) -> Option<LifecycleState> {
        if signals.velocity_now > narrative.peak_velocity {
            narrative.peak_velocity = signals.velocity_now;
        }

        let from = narrative.lifecycle_state;
        let to = self.next_state(from, narrative.peak_velocity, signals);

        let transitioned = if to != from {
            self.record(narrative, to, signals.article_count, signals.velocity_now, now);
            narrative.lifecycle_state == to
        } else {
            false
        };

        if transitioned && from == LifecycleState::Dormant {
            self.mark_reawakened(narrative);
        }
        if (transitioned && to == LifecycleState::Reactivated)
            || from == LifecycleState::Reactivated
        {
            self.refresh_resurrection_velocity(narrative, signals.article_count, now);
        }

        transitioned.then_some(to)
    }

    /// Idle-time demotion for the dormancy sweep: at most one step per
    /// call. Hot falls by the normal velocity rule once its trailing
    /// velocity decays under the peak fraction; idle emerging, rising and
    /// reactivated narratives fall to cooling; idle cooling goes dormant.
    pub fn apply_idle(
        &self,
        narrative: &mut Narrative,
        velocity_now: f64,
        now: DateTime<Utc>,
    ) -> Option<LifecycleState> {
        let idle = narrative.days_idle(now) >= self.tuning.inactivity_days as f64;
        let to = match narrative.lifecycle_state {
            LifecycleState::Hot
                if velocity_now < self.tuning.cooling_peak_fraction * narrative.peak_velocity =>
            {
                LifecycleState::Cooling
            }
            LifecycleState::Emerging | LifecycleState::Rising | LifecycleState::Reactivated
                if idle =>
            {
                LifecycleState::Cooling
            }
            LifecycleState::Cooling if idle => LifecycleState::Dormant,
            _ => return None,
        };
        let article_count = narrative.article_count;
        self.record(narrative, to, article_count, velocity_now, now);
        (narrative.lifecycle_state == to).then_some(to)
    }

    fn next_state(
        &self,
        from: LifecycleState,
        peak_velocity: f64,
        signals: &LifecycleSignals,
    ) -> LifecycleState {
        match from {
            LifecycleState::Emerging => {
                if signals.velocity_now > signals.velocity_previous
                    && signals.article_count >= self.tuning.rising_article_floor
                {
                    LifecycleState::Rising
                } else {
                    LifecycleState::Emerging
                }
            }
            // Heat must be sustained across two evaluations before a
            // narrative reads as hot.
            LifecycleState::Rising => {
                if signals.velocity_now >= self.tuning.hot_velocity
                    && signals.velocity_previous >= self.tuning.hot_velocity
                {
                    LifecycleState::Hot
                } else {
                    LifecycleState::Rising
                }
            }
            LifecycleState::Hot => {
                if signals.velocity_now
                    < self.tuning.cooling_peak_fraction * peak_velocity
                {
                    LifecycleState::Cooling
                } else {
                    LifecycleState::Hot
                }
            }
            // New coverage keeps a cooling narrative findable but does not
            // re-promote it; only the dormant/reactivated path does.
            LifecycleState::Cooling => LifecycleState::Cooling,
            LifecycleState::Dormant => LifecycleState::Reactivated,
            LifecycleState::Reactivated => {
                if signals.velocity_now >= self.tuning.hot_velocity {
                    LifecycleState::Hot
                } else if signals.velocity_now > signals.velocity_previous {
                    LifecycleState::Rising
                } else {
                    LifecycleState::Cooling
                }
            }
        }
    }

    /// Count the comeback and remember which dormant period it exits.
    fn mark_reawakened(&self, narrative: &mut Narrative) {
        let dormant_since = narrative
            .last_entry_in(LifecycleState::Dormant)
            .map(|e| e.timestamp)
            .unwrap_or(narrative.last_updated);
        narrative.reawakening_count += 1;
        narrative.reawakened_from = Some(dormant_since);
        info!(
            narrative = %narrative.id,
            reawakening_count = narrative.reawakening_count,
            "narrative reawakened from dormancy"
        );
    }

    /// Articles accumulated across the current comeback, per elapsed day.
    /// Elapsed days are floored at one so the reactivating burst itself
    /// reads as articles-per-day. Recomputed only while the narrative is
    /// reactivated; frozen once it moves on.
    fn refresh_resurrection_velocity(
        &self,
        narrative: &mut Narrative,
        article_count: u32,
        now: DateTime<Utc>,
    ) {
        let baseline = narrative
            .last_entry_in(LifecycleState::Dormant)
            .map(|e| e.article_count)
            .unwrap_or(0);
        let comeback_started = narrative
            .last_entry_in(LifecycleState::Reactivated)
            .map(|e| e.timestamp)
            .unwrap_or(now);
        let days = ((now - comeback_started).num_seconds().max(0) as f64 / 86_400.0).max(1.0);
        let added = article_count.saturating_sub(baseline);
        narrative.resurrection_velocity = Some(added as f64 / days);
    }

    /// Append a history entry and flip the live state. No entry when the
    /// last recorded state already matches. An append that would not
    /// strictly advance the history timestamp is refused outright.
    fn record(
        &self,
        narrative: &mut Narrative,
        to: LifecycleState,
        article_count: u32,
        velocity: f64,
        now: DateTime<Utc>,
    ) {
        if let Some(last) = narrative.lifecycle_history.last() {
            if last.state == to {
                narrative.lifecycle_state = to;
                return;
            }
            if now <= last.timestamp {
                warn!(
                    narrative = %narrative.id,
                    attempted = %to,
                    last_recorded = %last.timestamp,
                    "refused lifecycle append that would not advance history"
                );
                return;
            }
            info!(narrative = %narrative.id, from = %last.state, to = %to, "lifecycle transition");
        } else {
            debug!(narrative = %narrative.id, state = %to, "lifecycle opened");
        }
        narrative.lifecycle_history.push(LifecycleEntry {
            state: to,
            timestamp: now,
            article_count,
            velocity,
        });
        narrative.lifecycle_state = to;
    }
}
