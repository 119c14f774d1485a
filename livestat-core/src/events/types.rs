use crate::entities::AggregateSnapshot;
use serde::{Deserialize, Serialize};

/// Notification published after every successful aggregate update.
///
/// Carries the post-update snapshot, so a consumer that misses a message
/// is merely stale until the next update on the key (or an explicit stats
/// pull), never corrupted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsUpdate {
    /// Group key the update applies to.
    pub key: String,
    /// The aggregate as of this update.
    pub aggregate: AggregateSnapshot,
}
