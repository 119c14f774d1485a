//! Durable work queue with at-least-once delivery.
//!
//! The gateway submits whole batches through [`WorkQueue::enqueue_batch`]
//! (all-or-nothing), workers claim one job at a time via
//! [`WorkQueue::dequeue`] and report the outcome with
//! [`WorkQueue::complete`] or [`WorkQueue::fail`]. A failed job is
//! rescheduled with exponential backoff until its attempts are exhausted,
//! after which it is retained in a terminal failed state for operator
//! inspection - never silently dropped, never retried again automatically.

pub mod memory;
pub mod postgres;

pub use memory::MemoryWorkQueue;
pub use postgres::PgWorkQueue;

use crate::entities::{FailedJob, Job, NewJob};
use async_trait::async_trait;
use rand::Rng;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Attempts a job gets before it is retained as terminally failed.
pub const DEFAULT_MAX_ATTEMPTS: i32 = 3;

/// First retry delay; doubles on every subsequent attempt.
pub const BASE_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Ceiling on the exponential backoff.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);

/// Errors that can occur in a queue backend.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("job not found: {0}")]
    JobNotFound(Uuid),
}

/// What became of a job after a failed attempt was recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    /// Rescheduled; the job will be redelivered after the given delay.
    Retry(Duration),
    /// All attempts exhausted; retained in the failed set.
    Exhausted,
}

/// Handle to a durable job queue.
///
/// Injected into the gateway and the worker pool at construction.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Durably accept a whole batch. Either every job is accepted or none
    /// is; returns the number of jobs enqueued. Latency is bounded
    /// independently of downstream processing speed.
    async fn enqueue_batch(&self, jobs: Vec<NewJob>) -> Result<u64, QueueError>;

    /// Claim the oldest due job, if any. Does not block when empty.
    async fn dequeue(&self) -> Result<Option<Job>, QueueError>;

    /// Discard a successfully processed job.
    async fn complete(&self, job_id: Uuid) -> Result<(), QueueError>;

    /// Record a failed attempt: reschedule with backoff, or retain the job
    /// terminally once `max_attempts` is reached.
    async fn fail(&self, job_id: Uuid, error: &str) -> Result<FailOutcome, QueueError>;

    /// Terminally failed jobs, most recent first.
    async fn failed_jobs(&self, limit: i64) -> Result<Vec<FailedJob>, QueueError>;
}

/// Exponential backoff without jitter: `BASE * 2^(attempts - 1)`, capped.
fn backoff(attempts: i32) -> Duration {
    let exp = (attempts - 1).clamp(0, 30) as u32;
    BASE_RETRY_DELAY
        .saturating_mul(2u32.saturating_pow(exp))
        .min(MAX_RETRY_DELAY)
}

/// Delay before redelivering a job that has failed `attempts` times.
///
/// Adds up to a quarter of the base delay as jitter. The jitter never
/// exceeds the next doubling, so delays stay monotonically non-decreasing
/// across consecutive attempts.
pub fn retry_delay(attempts: i32) -> Duration {
    let base = backoff(attempts);
    if base >= MAX_RETRY_DELAY {
        return base;
    }
    let jitter_ms = rand::rng().random_range(0..=base.as_millis() as u64 / 4);
    base + Duration::from_millis(jitter_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_from_base() {
        assert_eq!(backoff(1), Duration::from_millis(500));
        assert_eq!(backoff(2), Duration::from_millis(1000));
        assert_eq!(backoff(3), Duration::from_millis(2000));
        assert_eq!(backoff(4), Duration::from_millis(4000));
    }

    #[test]
    fn backoff_is_capped() {
        assert_eq!(backoff(8), MAX_RETRY_DELAY);
        assert_eq!(backoff(100), MAX_RETRY_DELAY);
    }

    #[test]
    fn retry_delay_stays_within_jitter_window() {
        for attempts in 1..6 {
            let base = backoff(attempts);
            for _ in 0..50 {
                let delay = retry_delay(attempts);
                assert!(delay >= base);
                assert!(delay <= base + base / 4);
            }
        }
    }

    #[test]
    fn retry_delay_is_monotonically_non_decreasing() {
        for attempts in 1..10 {
            for _ in 0..50 {
                assert!(retry_delay(attempts + 1) >= retry_delay(attempts));
            }
        }
    }
}
