//! Application state shared across all request handlers.

use livestat_core::events::StatsUpdateSender;
use livestat_core::queue::WorkQueue;
use livestat_core::store::{AggregateStore, RecordLog};
use std::sync::Arc;

/// Application state that is shared across all request handlers.
///
/// This is cloneable and cheap to pass around (everything is behind Arc).
/// Handlers see the queue/store/log seams only, so the same router runs
/// against Postgres in production and the in-memory backends in tests.
#[derive(Clone)]
pub struct AppState {
    /// Durable work queue the ingest gateway enqueues to.
    pub queue: Arc<dyn WorkQueue>,
    /// Per-key aggregate store.
    pub store: Arc<dyn AggregateStore>,
    /// Processed-record history log.
    pub records: Arc<dyn RecordLog>,
    /// In-process broadcast sender the WebSocket fan-out subscribes to.
    pub stats_tx: StatsUpdateSender,
    /// Ceiling on items per ingest request.
    pub max_batch: usize,
}

impl AppState {
    pub fn new(
        queue: Arc<dyn WorkQueue>,
        store: Arc<dyn AggregateStore>,
        records: Arc<dyn RecordLog>,
        stats_tx: StatsUpdateSender,
        max_batch: usize,
    ) -> Self {
        Self {
            queue,
            store,
            records,
            stats_tx,
            max_batch,
        }
    }
}
