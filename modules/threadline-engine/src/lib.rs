pub mod cluster;
pub mod compose;
pub mod cycle;
pub mod fingerprint;
pub mod lifecycle;
pub mod matcher;
pub mod merger;
pub mod metrics;
pub mod sweep;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use cluster::{Cluster, ClusterStats, Clusterer};
pub use compose::{placeholder_copy, ClaudeComposer, NarrativeComposer, NarrativeCopy, RetryComposer};
pub use cycle::{CycleStats, DetectionCycle};
pub use fingerprint::compute_fingerprint;
pub use lifecycle::{LifecycleMachine, LifecycleSignals};
pub use matcher::{find_matching_narrative, MatchOutcome};
pub use merger::{MergeStats, ShallowMerger};
pub use metrics::{jaccard, mention_velocity, narrative_status};
pub use sweep::{DormancySweep, SweepStats};
