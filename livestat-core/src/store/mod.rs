//! Aggregate store and append-only record logs.
//!
//! [`AggregateStore::atomic_update`] is the single mutual-exclusion point
//! of the whole pipeline: the read-modify-write of `count` and `sum` is one
//! atomic unit per key, and the average is derived at read time, so a lost
//! update is structurally impossible rather than merely unlikely.

pub mod memory;
pub mod postgres;

pub use memory::{MemoryAggregateStore, MemoryRecordLog};
pub use postgres::{PgAggregateStore, PgRecordLog};

use crate::entities::{Aggregate, NewProcessedRecord, NewRawDataPoint, ProcessedRecord};
use async_trait::async_trait;
use thiserror::Error;
use time::OffsetDateTime;

/// Errors that can occur in a storage backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Durable per-key counters.
#[async_trait]
pub trait AggregateStore: Send + Sync {
    /// Fold one value into the aggregate for `key` as a single atomic unit
    /// with respect to concurrent calls on the same key. Creates the row
    /// with `count = 1, sum = value` when the key is new (race-safe upsert).
    async fn atomic_update(&self, key: &str, value: f64) -> Result<Aggregate, StoreError>;

    /// Current aggregate for `key`, if one exists. Never creates a row.
    async fn get(&self, key: &str) -> Result<Option<Aggregate>, StoreError>;
}

/// Filter for the processed-record history listing.
#[derive(Debug, Clone, Default)]
pub struct HistoryFilter {
    pub from: Option<OffsetDateTime>,
    pub to: Option<OffsetDateTime>,
    pub limit: i64,
    pub offset: i64,
}

/// One page of history, newest first, plus the unpaged total.
#[derive(Debug, Clone)]
pub struct HistoryPage {
    pub records: Vec<ProcessedRecord>,
    pub total: i64,
}

/// Append-only audit logs. Best-effort relative to the authoritative
/// aggregate store: writers log failures and move on.
#[async_trait]
pub trait RecordLog: Send + Sync {
    async fn append_processed(&self, record: NewProcessedRecord) -> Result<(), StoreError>;

    async fn append_raw(&self, point: NewRawDataPoint) -> Result<(), StoreError>;

    /// Paginated processed-record listing filtered by `processed_at` range.
    async fn list_processed(&self, filter: HistoryFilter) -> Result<HistoryPage, StoreError>;
}
