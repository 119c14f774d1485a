//! In-memory storage backends with the same contracts as the Postgres
//! implementations, used by the test suites.

use super::{AggregateStore, HistoryFilter, HistoryPage, RecordLog, StoreError};
use crate::entities::{Aggregate, NewProcessedRecord, NewRawDataPoint, ProcessedRecord};
use async_trait::async_trait;
use std::collections::HashMap;
use time::OffsetDateTime;
use tokio::sync::Mutex;

/// In-memory [`AggregateStore`]. One mutex guards the map, which gives the
/// same per-key atomicity the single-statement Postgres upsert does.
#[derive(Default)]
pub struct MemoryAggregateStore {
    inner: Mutex<HashMap<String, Aggregate>>,
}

impl MemoryAggregateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys with at least one processed job.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }
}

#[async_trait]
impl AggregateStore for MemoryAggregateStore {
    async fn atomic_update(&self, key: &str, value: f64) -> Result<Aggregate, StoreError> {
        let mut inner = self.inner.lock().await;
        let aggregate = inner
            .entry(key.to_owned())
            .and_modify(|agg| {
                agg.count += 1;
                agg.sum += value;
                agg.updated_at = OffsetDateTime::now_utc();
            })
            .or_insert_with(|| Aggregate {
                key: key.to_owned(),
                count: 1,
                sum: value,
                updated_at: OffsetDateTime::now_utc(),
            });
        Ok(aggregate.clone())
    }

    async fn get(&self, key: &str) -> Result<Option<Aggregate>, StoreError> {
        Ok(self.inner.lock().await.get(key).cloned())
    }
}

/// In-memory [`RecordLog`].
#[derive(Default)]
pub struct MemoryRecordLog {
    processed: Mutex<Vec<ProcessedRecord>>,
    raw: Mutex<Vec<NewRawDataPoint>>,
}

impl MemoryRecordLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn processed_len(&self) -> usize {
        self.processed.lock().await.len()
    }

    pub async fn raw_len(&self) -> usize {
        self.raw.lock().await.len()
    }
}

#[async_trait]
impl RecordLog for MemoryRecordLog {
    async fn append_processed(&self, record: NewProcessedRecord) -> Result<(), StoreError> {
        let mut processed = self.processed.lock().await;
        let id = processed.len() as i64 + 1;
        processed.push(ProcessedRecord {
            id,
            value: record.value,
            original: record.original,
            processed_at: OffsetDateTime::now_utc(),
        });
        Ok(())
    }

    async fn append_raw(&self, point: NewRawDataPoint) -> Result<(), StoreError> {
        self.raw.lock().await.push(point);
        Ok(())
    }

    async fn list_processed(&self, filter: HistoryFilter) -> Result<HistoryPage, StoreError> {
        let processed = self.processed.lock().await;
        let mut matching: Vec<ProcessedRecord> = processed
            .iter()
            .filter(|r| filter.from.is_none_or(|from| r.processed_at >= from))
            .filter(|r| filter.to.is_none_or(|to| r.processed_at <= to))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.processed_at.cmp(&a.processed_at).then(b.id.cmp(&a.id)));

        let total = matching.len() as i64;
        let records = matching
            .into_iter()
            .skip(filter.offset.max(0) as usize)
            .take(filter.limit.max(0) as usize)
            .collect();

        Ok(HistoryPage { records, total })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn first_update_creates_the_row() {
        let store = MemoryAggregateStore::new();
        let agg = store.atomic_update("g1", 10.0).await.unwrap();
        assert_eq!(agg.count, 1);
        assert_eq!(agg.sum, 10.0);
        assert_eq!(agg.avg(), 10.0);
    }

    #[tokio::test]
    async fn reads_never_create_rows() {
        let store = MemoryAggregateStore::new();
        assert!(store.get("unknown").await.unwrap().is_none());
        assert!(store.is_empty().await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn concurrent_updates_to_one_key_lose_nothing() {
        let store = Arc::new(MemoryAggregateStore::new());
        let values: Vec<f64> = (1..=200).map(|v| v as f64).collect();
        let expected_sum: f64 = values.iter().sum();

        let mut handles = Vec::new();
        for value in values {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.atomic_update("hot", value).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let agg = store.get("hot").await.unwrap().unwrap();
        assert_eq!(agg.count, 200);
        assert!((agg.sum - expected_sum).abs() < 1e-9);
        assert!((agg.avg() - expected_sum / 200.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn history_filters_and_paginates() {
        let log = MemoryRecordLog::new();
        for v in 1..=5 {
            log.append_processed(NewProcessedRecord {
                value: v as f64,
                original: serde_json::json!({ "value": v }),
            })
            .await
            .unwrap();
        }

        let page = log
            .list_processed(HistoryFilter {
                limit: 2,
                offset: 0,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.total, 5);
        assert_eq!(page.records.len(), 2);
        // Newest first.
        assert_eq!(page.records[0].value, 5.0);

        let future = OffsetDateTime::now_utc() + time::Duration::hours(1);
        let page = log
            .list_processed(HistoryFilter {
                from: Some(future),
                limit: 10,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.total, 0);
        assert!(page.records.is_empty());
    }
}
