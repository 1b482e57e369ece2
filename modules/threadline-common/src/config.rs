use std::env;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Postgres connection string. Absent means the in-memory store.
    pub database_url: Option<String>,
    /// Anthropic API key for narrative composition. Absent means every
    /// new narrative gets the deterministic placeholder title.
    pub anthropic_api_key: Option<String>,
    pub tuning: Tuning,
}

impl Config {
    /// Load configuration from environment variables.
    /// Panics with a clear message if a numeric override is malformed.
    pub fn from_env() -> Self {
        Self {
            database_url: env::var("DATABASE_URL").ok(),
            anthropic_api_key: env::var("ANTHROPIC_API_KEY").ok(),
            tuning: Tuning::from_env(),
        }
    }
}

/// Every heuristic weight and threshold in the engine, named and
/// env-overridable (`THREADLINE_*`). Defaults are the shipped calibration.
#[derive(Debug, Clone)]
pub struct Tuning {
    /// Clustering link-strength weight for an exact nucleus match.
    /// Deliberately exceeds `clustering_threshold` on its own: a shared
    /// nucleus always co-clusters. Full actor+tension overlap without a
    /// nucleus (0.4 + 0.3 = 0.7) does not.
    pub nucleus_weight: f64,
    /// Clustering weight on core-actor Jaccard overlap.
    pub core_actor_weight: f64,
    /// Clustering weight on tension Jaccard overlap.
    pub tension_weight: f64,
    /// Minimum link strength to join an existing cluster.
    pub clustering_threshold: f64,
    /// Clusters smaller than this never become narratives.
    pub min_cluster_size: usize,
    /// Fingerprint cap on frequency-ranked actors.
    pub top_actor_limit: usize,
    /// Fingerprint cap on frequency-ranked tensions.
    pub key_tension_limit: usize,
    /// Matcher similarity weight for an exact nucleus match.
    pub match_nucleus_weight: f64,
    /// Matcher weight on top-actor Jaccard overlap.
    pub match_actor_weight: f64,
    /// Matcher weight on key-tension Jaccard overlap.
    pub match_tension_weight: f64,
    /// Minimum similarity for a cluster to continue a narrative
    /// (inclusive).
    pub match_threshold: f64,
    /// Narratives updated within this many hours are match candidates.
    /// Dormant narratives are candidates regardless of age.
    pub match_window_hours: i64,
    /// Trailing window for mention-velocity computation.
    pub velocity_window_hours: i64,
    /// Minimum member count before an emerging narrative can rise.
    pub rising_article_floor: u32,
    /// Articles/day a narrative must sustain to be hot.
    pub hot_velocity: f64,
    /// Hot cools once velocity falls below this fraction of its peak.
    pub cooling_peak_fraction: f64,
    /// Days without new articles before cooling turns dormant (and idle
    /// emerging/rising narratives are demoted).
    pub inactivity_days: i64,
    /// Narratives with fewer articles than this are merge candidates.
    pub shallow_article_floor: u32,
    /// Narratives with fewer distinct entities than this are merge
    /// candidates.
    pub shallow_actor_floor: usize,
    /// Minimum entity Jaccard for a shallow narrative to be absorbed.
    pub merge_threshold: f64,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            nucleus_weight: 1.0,
            core_actor_weight: 0.4,
            tension_weight: 0.3,
            clustering_threshold: 0.8,
            min_cluster_size: 3,
            top_actor_limit: 10,
            key_tension_limit: 5,
            match_nucleus_weight: 0.5,
            match_actor_weight: 0.3,
            match_tension_weight: 0.2,
            match_threshold: 0.6,
            match_window_hours: 72,
            velocity_window_hours: 48,
            rising_article_floor: 3,
            hot_velocity: 5.0,
            cooling_peak_fraction: 0.5,
            inactivity_days: 14,
            shallow_article_floor: 3,
            shallow_actor_floor: 2,
            merge_threshold: 0.5,
        }
    }
}

impl Tuning {
    /// Defaults with any `THREADLINE_*` environment overrides applied.
    /// Panics with a clear message if an override is malformed.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            nucleus_weight: env_f64("THREADLINE_NUCLEUS_WEIGHT", d.nucleus_weight),
            core_actor_weight: env_f64("THREADLINE_CORE_ACTOR_WEIGHT", d.core_actor_weight),
            tension_weight: env_f64("THREADLINE_TENSION_WEIGHT", d.tension_weight),
            clustering_threshold: env_f64("THREADLINE_CLUSTERING_THRESHOLD", d.clustering_threshold),
            min_cluster_size: env_usize("THREADLINE_MIN_CLUSTER_SIZE", d.min_cluster_size),
            top_actor_limit: env_usize("THREADLINE_TOP_ACTOR_LIMIT", d.top_actor_limit),
            key_tension_limit: env_usize("THREADLINE_KEY_TENSION_LIMIT", d.key_tension_limit),
            match_nucleus_weight: env_f64("THREADLINE_MATCH_NUCLEUS_WEIGHT", d.match_nucleus_weight),
            match_actor_weight: env_f64("THREADLINE_MATCH_ACTOR_WEIGHT", d.match_actor_weight),
            match_tension_weight: env_f64("THREADLINE_MATCH_TENSION_WEIGHT", d.match_tension_weight),
            match_threshold: env_f64("THREADLINE_MATCH_THRESHOLD", d.match_threshold),
            match_window_hours: env_i64("THREADLINE_MATCH_WINDOW_HOURS", d.match_window_hours),
            velocity_window_hours: env_i64("THREADLINE_VELOCITY_WINDOW_HOURS", d.velocity_window_hours),
            rising_article_floor: env_u32("THREADLINE_RISING_ARTICLE_FLOOR", d.rising_article_floor),
            hot_velocity: env_f64("THREADLINE_HOT_VELOCITY", d.hot_velocity),
            cooling_peak_fraction: env_f64("THREADLINE_COOLING_PEAK_FRACTION", d.cooling_peak_fraction),
            inactivity_days: env_i64("THREADLINE_INACTIVITY_DAYS", d.inactivity_days),
            shallow_article_floor: env_u32("THREADLINE_SHALLOW_ARTICLE_FLOOR", d.shallow_article_floor),
            shallow_actor_floor: env_usize("THREADLINE_SHALLOW_ACTOR_FLOOR", d.shallow_actor_floor),
            merge_threshold: env_f64("THREADLINE_MERGE_THRESHOLD", d.merge_threshold),
        }
    }
}

fn env_f64(key: &str, default: f64) -> f64 {
    match env::var(key) {
        Ok(v) => v.parse().unwrap_or_else(|_| panic!("{key} must be a number")),
        Err(_) => default,
    }
}

fn env_i64(key: &str, default: i64) -> i64 {
    match env::var(key) {
        Ok(v) => v.parse().unwrap_or_else(|_| panic!("{key} must be an integer")),
        Err(_) => default,
    }
}

fn env_u32(key: &str, default: u32) -> u32 {
    match env::var(key) {
        Ok(v) => v.parse().unwrap_or_else(|_| panic!("{key} must be a non-negative integer")),
        Err(_) => default,
    }
}

fn env_usize(key: &str, default: usize) -> usize {
    match env::var(key) {
        Ok(v) => v.parse().unwrap_or_else(|_| panic!("{key} must be a non-negative integer")),
        Err(_) => default,
    }
}
