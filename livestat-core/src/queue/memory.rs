//! In-memory queue with the same delivery semantics as the Postgres
//! backend, used by the test suites (and usable as a single-process dev
//! backend). Retry scheduling runs on `tokio::time::Instant`, so tests
//! with a paused clock can drive the backoff timeline deterministically.

use super::{DEFAULT_MAX_ATTEMPTS, FailOutcome, QueueError, WorkQueue, retry_delay};
use crate::entities::{FailedJob, Job, NewJob};
use async_trait::async_trait;
use std::collections::HashMap;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct QueuedJob {
    job: Job,
    available_at: Instant,
}

#[derive(Debug, Clone)]
struct FailedEntry {
    job: Job,
    last_error: String,
    failed_at: OffsetDateTime,
}

#[derive(Default)]
struct Inner {
    pending: Vec<QueuedJob>,
    running: HashMap<Uuid, Job>,
    failed: Vec<FailedEntry>,
}

/// In-memory [`WorkQueue`].
#[derive(Default)]
pub struct MemoryWorkQueue {
    inner: Mutex<Inner>,
}

impl MemoryWorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of jobs waiting for delivery (including scheduled retries).
    pub async fn pending_len(&self) -> usize {
        self.inner.lock().await.pending.len()
    }

    /// True when nothing is pending or in flight.
    pub async fn is_idle(&self) -> bool {
        let inner = self.inner.lock().await;
        inner.pending.is_empty() && inner.running.is_empty()
    }

    /// Snapshot of the jobs currently waiting for delivery.
    pub async fn pending_jobs(&self) -> Vec<Job> {
        self.inner
            .lock()
            .await
            .pending
            .iter()
            .map(|q| q.job.clone())
            .collect()
    }
}

#[async_trait]
impl WorkQueue for MemoryWorkQueue {
    async fn enqueue_batch(&self, jobs: Vec<NewJob>) -> Result<u64, QueueError> {
        let accepted = jobs.len() as u64;
        let now = Instant::now();

        let mut inner = self.inner.lock().await;
        for job in jobs {
            inner.pending.push(QueuedJob {
                job: Job {
                    id: Uuid::new_v4(),
                    group_key: job.group_key,
                    payload: job.payload,
                    attempt_count: 0,
                    max_attempts: DEFAULT_MAX_ATTEMPTS,
                },
                available_at: now,
            });
        }
        Ok(accepted)
    }

    async fn dequeue(&self) -> Result<Option<Job>, QueueError> {
        let now = Instant::now();
        let mut inner = self.inner.lock().await;

        // Oldest due job; insertion order breaks ties.
        let mut due: Option<usize> = None;
        for (i, queued) in inner.pending.iter().enumerate() {
            if queued.available_at <= now
                && due.is_none_or(|d| queued.available_at < inner.pending[d].available_at)
            {
                due = Some(i);
            }
        }

        Ok(due.map(|i| {
            let queued = inner.pending.remove(i);
            inner.running.insert(queued.job.id, queued.job.clone());
            queued.job
        }))
    }

    async fn complete(&self, job_id: Uuid) -> Result<(), QueueError> {
        self.inner.lock().await.running.remove(&job_id);
        Ok(())
    }

    async fn fail(&self, job_id: Uuid, error: &str) -> Result<FailOutcome, QueueError> {
        let mut inner = self.inner.lock().await;
        let Some(mut job) = inner.running.remove(&job_id) else {
            return Err(QueueError::JobNotFound(job_id));
        };
        job.attempt_count += 1;

        if job.attempt_count >= job.max_attempts {
            inner.failed.push(FailedEntry {
                job,
                last_error: error.to_owned(),
                failed_at: OffsetDateTime::now_utc(),
            });
            Ok(FailOutcome::Exhausted)
        } else {
            let delay = retry_delay(job.attempt_count);
            inner.pending.push(QueuedJob {
                job,
                available_at: Instant::now() + delay,
            });
            Ok(FailOutcome::Retry(delay))
        }
    }

    async fn failed_jobs(&self, limit: i64) -> Result<Vec<FailedJob>, QueueError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .failed
            .iter()
            .rev()
            .take(limit.max(0) as usize)
            .map(|entry| FailedJob {
                id: entry.job.id,
                group_key: entry.job.group_key.clone(),
                payload: entry.job.payload.clone(),
                attempt_count: entry.job.attempt_count,
                last_error: Some(entry.last_error.clone()),
                failed_at: entry.failed_at.unix_timestamp(),
            })
            .collect())
    }
}
