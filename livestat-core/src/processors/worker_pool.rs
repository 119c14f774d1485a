//! WorkerPool processor.
//!
//! A fixed-size pool of concurrent consumers. Each worker loops over
//! dequeue -> process -> complete/fail; the pool is the sole authority on
//! job success/failure classification, and it observes terminal outcomes
//! synchronously inside the loop (structured log events, no ambient
//! listener hooks).
//!
//! Per-job sequence:
//!
//! 1. Validate the payload value is a finite number; a bad value is a
//!    retryable failure so transient deserialization glitches get another
//!    chance, while persistently malformed payloads exhaust their attempts
//!    and land in the failed set for inspection.
//! 2. Optionally append a raw data point (best-effort).
//! 3. Atomically fold the value into the key's aggregate.
//! 4. Append the processed record (best-effort).
//! 5. Publish the post-update snapshot (best-effort - the aggregate is
//!    already durable; a lost broadcast is corrected by the next update on
//!    the key or an explicit stats pull).

use crate::entities::{Aggregate, Job, NewProcessedRecord, NewRawDataPoint};
use crate::events::{StatsUpdate, UpdatePublisher};
use crate::queue::{FailOutcome, WorkQueue};
use crate::store::{AggregateStore, RecordLog, StoreError};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Tuning knobs for the worker pool.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of concurrent workers.
    pub concurrency: usize,
    /// Persist raw data points alongside processing.
    pub save_raw: bool,
    /// Sleep between dequeue attempts while the queue is empty.
    pub idle_poll: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            save_raw: false,
            idle_poll: Duration::from_millis(100),
        }
    }
}

/// A retryable processing failure. Fails the whole job; the queue decides
/// whether to redeliver or retain it terminally.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("payload value is not a finite number")]
    InvalidValue,

    #[error("aggregate update failed: {0}")]
    Store(#[from] StoreError),
}

struct WorkerContext {
    queue: Arc<dyn WorkQueue>,
    store: Arc<dyn AggregateStore>,
    records: Arc<dyn RecordLog>,
    publisher: Arc<dyn UpdatePublisher>,
    save_raw: bool,
    idle_poll: Duration,
}

/// Fixed-size pool of concurrent job consumers.
pub struct WorkerPool {
    context: Arc<WorkerContext>,
    concurrency: usize,
}

impl WorkerPool {
    pub fn new(
        queue: Arc<dyn WorkQueue>,
        store: Arc<dyn AggregateStore>,
        records: Arc<dyn RecordLog>,
        publisher: Arc<dyn UpdatePublisher>,
        config: WorkerPoolConfig,
    ) -> Self {
        Self {
            context: Arc::new(WorkerContext {
                queue,
                store,
                records,
                publisher,
                save_raw: config.save_raw,
                idle_poll: config.idle_poll,
            }),
            concurrency: config.concurrency,
        }
    }

    /// Run the pool until shutdown is signaled. Shutdown stops pulling new
    /// jobs; in-flight jobs finish before this returns.
    pub async fn run(self, shutdown_rx: watch::Receiver<bool>) {
        info!(concurrency = self.concurrency, "worker pool started");

        let mut handles = Vec::with_capacity(self.concurrency);
        for worker_id in 0..self.concurrency {
            let context = self.context.clone();
            let shutdown_rx = shutdown_rx.clone();
            handles.push(tokio::spawn(context.worker_loop(worker_id, shutdown_rx)));
        }

        for handle in handles {
            let _ = handle.await;
        }

        info!("worker pool shutdown complete");
    }
}

impl WorkerContext {
    async fn worker_loop(self: Arc<Self>, worker_id: usize, mut shutdown_rx: watch::Receiver<bool>) {
        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            let job = match self.queue.dequeue().await {
                Ok(Some(job)) => job,
                Ok(None) => {
                    tokio::select! {
                        biased;
                        _ = shutdown_rx.changed() => {}
                        _ = tokio::time::sleep(self.idle_poll) => {}
                    }
                    continue;
                }
                Err(e) => {
                    error!(worker_id, error = %e, "failed to pull from queue");
                    tokio::select! {
                        biased;
                        _ = shutdown_rx.changed() => {}
                        _ = tokio::time::sleep(self.idle_poll) => {}
                    }
                    continue;
                }
            };

            let job_id = job.id;
            let key = job.group_key.clone();
            let attempt = job.attempt_count + 1;

            match self.process_job(&job).await {
                Ok(aggregate) => {
                    if let Err(e) = self.queue.complete(job_id).await {
                        error!(worker_id, %job_id, error = %e, "failed to ack completed job");
                    }
                    debug!(
                        worker_id,
                        %job_id,
                        key = %key,
                        count = aggregate.count,
                        "job completed"
                    );
                }
                Err(e) => match self.queue.fail(job_id, &e.to_string()).await {
                    Ok(FailOutcome::Retry(delay)) => {
                        warn!(
                            worker_id,
                            %job_id,
                            key = %key,
                            attempt,
                            error = %e,
                            retry_in_ms = delay.as_millis() as u64,
                            "job failed, scheduled for retry"
                        );
                    }
                    Ok(FailOutcome::Exhausted) => {
                        error!(
                            worker_id,
                            %job_id,
                            key = %key,
                            attempt,
                            error = %e,
                            "job failed terminally, retained for inspection"
                        );
                    }
                    Err(qe) => {
                        error!(worker_id, %job_id, error = %qe, "failed to record job failure");
                    }
                },
            }
        }

        debug!(worker_id, "worker stopped");
    }

    async fn process_job(&self, job: &Job) -> Result<Aggregate, JobError> {
        // 1) Validation: the only place the raw payload becomes a number.
        let value = job.payload.numeric_value().ok_or(JobError::InvalidValue)?;

        // 2) Optional raw persistence, never on the critical path.
        if self.save_raw {
            let point = NewRawDataPoint {
                value,
                kind: job.payload.kind.clone(),
                meta: job.payload.meta.clone(),
            };
            if let Err(e) = self.records.append_raw(point).await {
                warn!(job_id = %job.id, error = %e, "failed to save raw data point");
            }
        }

        // 3) The authoritative, atomic mutation.
        let aggregate = self.store.atomic_update(&job.group_key, value).await?;

        // 4) History is best-effort relative to the aggregate store.
        let original = serde_json::to_value(&job.payload).unwrap_or(Value::Null);
        let record = NewProcessedRecord { value, original };
        if let Err(e) = self.records.append_processed(record).await {
            warn!(job_id = %job.id, error = %e, "failed to append processed record");
        }

        // 5) Fire-and-forget broadcast of the post-update snapshot.
        let update = StatsUpdate {
            key: job.group_key.clone(),
            aggregate: aggregate.snapshot(),
        };
        if let Err(e) = self.publisher.publish(&update).await {
            warn!(job_id = %job.id, key = %job.group_key, error = %e, "failed to publish stats update");
        }

        Ok(aggregate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{IngestItem, NewJob};
    use crate::events::{BroadcastPublisher, PublishError, stats_update_channel};
    use crate::queue::MemoryWorkQueue;
    use crate::store::{MemoryAggregateStore, MemoryRecordLog};
    use async_trait::async_trait;
    use serde_json::{Value, json};

    fn new_job(key: &str, value: Value) -> NewJob {
        NewJob {
            group_key: key.to_owned(),
            payload: IngestItem {
                value,
                kind: None,
                meta: None,
                key: None,
            },
        }
    }

    struct Rig {
        queue: Arc<MemoryWorkQueue>,
        store: Arc<MemoryAggregateStore>,
        records: Arc<MemoryRecordLog>,
        stats_tx: crate::events::StatsUpdateSender,
    }

    impl Rig {
        fn new() -> Self {
            let (stats_tx, _) = stats_update_channel();
            Self {
                queue: Arc::new(MemoryWorkQueue::new()),
                store: Arc::new(MemoryAggregateStore::new()),
                records: Arc::new(MemoryRecordLog::new()),
                stats_tx,
            }
        }

        fn pool(&self, config: WorkerPoolConfig) -> WorkerPool {
            WorkerPool::new(
                self.queue.clone(),
                self.store.clone(),
                self.records.clone(),
                Arc::new(BroadcastPublisher::new(self.stats_tx.clone())),
                config,
            )
        }

        async fn drain(&self) {
            tokio::time::timeout(Duration::from_secs(30), async {
                while !self.queue.is_idle().await {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            })
            .await
            .expect("queue did not drain in time");
        }
    }

    async fn shut_down(
        shutdown_tx: watch::Sender<bool>,
        handle: tokio::task::JoinHandle<()>,
    ) {
        let _ = shutdown_tx.send(true);
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn processes_a_batch_into_one_aggregate() {
        let rig = Rig::new();
        let mut updates = rig.stats_tx.subscribe();
        rig.queue
            .enqueue_batch(vec![new_job("g1", json!(10)), new_job("g1", json!(20))])
            .await
            .unwrap();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(rig.pool(WorkerPoolConfig::default()).run(shutdown_rx));
        rig.drain().await;

        let agg = rig.store.get("g1").await.unwrap().unwrap();
        assert_eq!(agg.count, 2);
        assert_eq!(agg.sum, 30.0);
        assert_eq!(agg.avg(), 15.0);
        assert_eq!(rig.records.processed_len().await, 2);

        // Both updates were broadcast; the last one carries the final snapshot.
        let first = updates.recv().await.unwrap();
        let second = updates.recv().await.unwrap();
        assert_eq!(first.key, "g1");
        assert_eq!(second.aggregate.count, 2);

        shut_down(shutdown_tx, handle).await;
    }

    #[tokio::test(start_paused = true)]
    async fn keys_aggregate_independently() {
        let rig = Rig::new();
        rig.queue
            .enqueue_batch(vec![
                new_job("a", json!(1)),
                new_job("b", json!(2)),
                new_job("a", json!(3)),
            ])
            .await
            .unwrap();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(rig.pool(WorkerPoolConfig::default()).run(shutdown_rx));
        rig.drain().await;

        let a = rig.store.get("a").await.unwrap().unwrap();
        let b = rig.store.get("b").await.unwrap().unwrap();
        assert_eq!((a.count, a.sum), (2, 4.0));
        assert_eq!((b.count, b.sum), (1, 2.0));

        shut_down(shutdown_tx, handle).await;
    }

    #[tokio::test(start_paused = true)]
    async fn non_numeric_value_exhausts_retries_and_is_retained() {
        let rig = Rig::new();
        rig.queue
            .enqueue_batch(vec![new_job("g1", json!("not-a-number"))])
            .await
            .unwrap();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(rig.pool(WorkerPoolConfig::default()).run(shutdown_rx));

        // Paused clock: idle polls and backoff sleeps auto-advance, so the
        // three attempts play out immediately.
        tokio::time::timeout(Duration::from_secs(60), async {
            while rig.queue.failed_jobs(1).await.unwrap().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("job never reached the failed set");

        let failed = rig.queue.failed_jobs(10).await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].attempt_count, 3);
        assert!(
            failed[0]
                .last_error
                .as_deref()
                .unwrap()
                .contains("not a finite number")
        );

        // The bad value was never applied.
        assert!(rig.store.get("g1").await.unwrap().is_none());
        assert_eq!(rig.records.processed_len().await, 0);

        shut_down(shutdown_tx, handle).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn two_concurrent_batches_produce_an_exact_total() {
        let rig = Rig::new();

        let mut expected_sum = 0.0f64;
        let mut batches = Vec::new();
        for batch_no in 0..2 {
            let mut batch = Vec::with_capacity(500);
            for i in 0..500u32 {
                let value = (batch_no * 500 + i) as f64 * 0.25 + 1.0;
                expected_sum += value;
                batch.push(new_job("hot", json!(value)));
            }
            batches.push(batch);
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(
            rig.pool(WorkerPoolConfig {
                concurrency: 8,
                ..Default::default()
            })
            .run(shutdown_rx),
        );

        let mut enqueues = Vec::new();
        for batch in batches {
            let queue = rig.queue.clone();
            enqueues.push(tokio::spawn(async move {
                queue.enqueue_batch(batch).await.unwrap()
            }));
        }
        for enqueue in enqueues {
            assert_eq!(enqueue.await.unwrap(), 500);
        }

        rig.drain().await;

        // No loss, no duplication, regardless of interleaving.
        let agg = rig.store.get("hot").await.unwrap().unwrap();
        assert_eq!(agg.count, 1000);
        assert!((agg.sum - expected_sum).abs() < 1e-6);
        assert!((agg.avg() - expected_sum / 1000.0).abs() < 1e-9);
        assert_eq!(rig.records.processed_len().await, 1000);
        assert!(rig.queue.failed_jobs(10).await.unwrap().is_empty());

        shut_down(shutdown_tx, handle).await;
    }

    #[tokio::test(start_paused = true)]
    async fn raw_persistence_is_feature_gated() {
        let rig = Rig::new();
        rig.queue
            .enqueue_batch(vec![new_job("g1", json!(5))])
            .await
            .unwrap();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(
            rig.pool(WorkerPoolConfig {
                save_raw: true,
                ..Default::default()
            })
            .run(shutdown_rx),
        );
        rig.drain().await;

        assert_eq!(rig.records.raw_len().await, 1);
        shut_down(shutdown_tx, handle).await;
    }

    /// RecordLog that always fails, for exercising the best-effort paths.
    struct BrokenRecordLog;

    #[async_trait]
    impl RecordLog for BrokenRecordLog {
        async fn append_processed(&self, _: NewProcessedRecord) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("history log down".into()))
        }

        async fn append_raw(&self, _: NewRawDataPoint) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("raw log down".into()))
        }

        async fn list_processed(
            &self,
            _: crate::store::HistoryFilter,
        ) -> Result<crate::store::HistoryPage, StoreError> {
            Err(StoreError::Unavailable("history log down".into()))
        }
    }

    /// Publisher that always fails.
    struct BrokenPublisher;

    #[async_trait]
    impl UpdatePublisher for BrokenPublisher {
        async fn publish(&self, _: &StatsUpdate) -> Result<(), PublishError> {
            Err(PublishError::Unavailable("channel down".into()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn best_effort_failures_do_not_fail_the_job() {
        let queue = Arc::new(MemoryWorkQueue::new());
        let store = Arc::new(MemoryAggregateStore::new());
        queue
            .enqueue_batch(vec![new_job("g1", json!(10))])
            .await
            .unwrap();

        let pool = WorkerPool::new(
            queue.clone(),
            store.clone(),
            Arc::new(BrokenRecordLog),
            Arc::new(BrokenPublisher),
            WorkerPoolConfig {
                save_raw: true,
                ..Default::default()
            },
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(pool.run(shutdown_rx));

        tokio::time::timeout(Duration::from_secs(30), async {
            while !queue.is_idle().await {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("queue did not drain");

        // The aggregate update landed even though every side channel broke.
        let agg = store.get("g1").await.unwrap().unwrap();
        assert_eq!((agg.count, agg.sum), (1, 10.0));
        assert!(queue.failed_jobs(10).await.unwrap().is_empty());

        shut_down(shutdown_tx, handle).await;
    }
}
