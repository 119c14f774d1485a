//! In-process fan-out channel for stats updates.

use super::types::StatsUpdate;
use tokio::sync::broadcast;

/// Buffer size for the in-process broadcast channel.
///
/// A subscriber that falls further behind than this sees a `Lagged` error
/// and skips ahead; the store remains the authoritative state to pull.
pub const DEFAULT_CHANNEL_BUFFER: usize = 256;

/// Sender handle for stats updates.
pub type StatsUpdateSender = broadcast::Sender<StatsUpdate>;
/// Receiver handle for stats updates.
pub type StatsUpdateReceiver = broadcast::Receiver<StatsUpdate>;

/// Create the stats update broadcast channel.
///
/// Every WebSocket connection subscribes via [`StatsUpdateSender::subscribe`].
pub fn stats_update_channel() -> (StatsUpdateSender, StatsUpdateReceiver) {
    broadcast::channel(DEFAULT_CHANNEL_BUFFER)
}
