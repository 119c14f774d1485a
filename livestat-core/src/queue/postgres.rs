//! Postgres-backed queue.
//!
//! Jobs live in the `jobs` table; dequeue claims the oldest due row with
//! `FOR UPDATE SKIP LOCKED` so concurrent workers never receive the same
//! job. The queue shares the store's connection pool - one logical queue
//! name scopes multiple queues to the table.

use super::{DEFAULT_MAX_ATTEMPTS, FailOutcome, QueueError, WorkQueue, retry_delay};
use crate::entities::{FailedJob, IngestItem, Job, JobState, NewJob};
use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::types::Json;
use uuid::Uuid;

/// Seconds after which a `running` job with no outcome is considered
/// abandoned (worker crash) and becomes claimable again.
const STALE_LEASE_SECS: i64 = 60;

#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    group_key: String,
    payload: Json<IngestItem>,
    attempt_count: i32,
    max_attempts: i32,
}

impl From<JobRow> for Job {
    fn from(row: JobRow) -> Self {
        Job {
            id: row.id,
            group_key: row.group_key,
            payload: row.payload.0,
            attempt_count: row.attempt_count,
            max_attempts: row.max_attempts,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct FailedJobRow {
    id: Uuid,
    group_key: String,
    payload: Json<IngestItem>,
    attempt_count: i32,
    last_error: Option<String>,
    failed_at: Option<time::OffsetDateTime>,
}

impl From<FailedJobRow> for FailedJob {
    fn from(row: FailedJobRow) -> Self {
        FailedJob {
            id: row.id,
            group_key: row.group_key,
            payload: row.payload.0,
            attempt_count: row.attempt_count,
            last_error: row.last_error,
            failed_at: row.failed_at.map(|t| t.unix_timestamp()).unwrap_or_default(),
        }
    }
}

/// Durable work queue on Postgres.
pub struct PgWorkQueue {
    pool: PgPool,
    queue_name: String,
}

impl PgWorkQueue {
    pub fn new(pool: PgPool, queue_name: impl Into<String>) -> Self {
        Self {
            pool,
            queue_name: queue_name.into(),
        }
    }
}

#[async_trait]
impl WorkQueue for PgWorkQueue {
    async fn enqueue_batch(&self, jobs: Vec<NewJob>) -> Result<u64, QueueError> {
        let accepted = jobs.len() as u64;

        // One transaction for the whole batch: all-or-nothing from the
        // caller's perspective.
        let mut tx = self.pool.begin().await?;
        for job in jobs {
            sqlx::query(
                r#"
                INSERT INTO jobs (id, queue, group_key, payload, max_attempts)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(&self.queue_name)
            .bind(&job.group_key)
            .bind(Json(&job.payload))
            .bind(DEFAULT_MAX_ATTEMPTS)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Ok(accepted)
    }

    async fn dequeue(&self) -> Result<Option<Job>, QueueError> {
        let row: Option<JobRow> = sqlx::query_as(
            r#"
            UPDATE jobs
            SET state = $3, locked_at = now()
            WHERE id = (
                SELECT id FROM jobs
                WHERE queue = $1
                  AND ((state = $4 AND available_at <= now())
                    OR (state = $3
                        AND locked_at < now() - make_interval(secs => $2)))
                ORDER BY available_at
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, group_key, payload, attempt_count, max_attempts
            "#,
        )
        .bind(&self.queue_name)
        .bind(STALE_LEASE_SECS as f64)
        .bind(JobState::Running)
        .bind(JobState::Pending)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Job::from))
    }

    async fn complete(&self, job_id: Uuid) -> Result<(), QueueError> {
        // Idempotent: a job already reclaimed and completed elsewhere is
        // simply gone.
        sqlx::query("DELETE FROM jobs WHERE id = $1")
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn fail(&self, job_id: Uuid, error: &str) -> Result<FailOutcome, QueueError> {
        let mut tx = self.pool.begin().await?;

        let row: Option<(i32, i32)> =
            sqlx::query_as("SELECT attempt_count, max_attempts FROM jobs WHERE id = $1 FOR UPDATE")
                .bind(job_id)
                .fetch_optional(&mut *tx)
                .await?;
        let Some((attempt_count, max_attempts)) = row else {
            return Err(QueueError::JobNotFound(job_id));
        };
        let attempts = attempt_count + 1;

        let outcome = if attempts >= max_attempts {
            sqlx::query(
                r#"
                UPDATE jobs
                SET state = $4, attempt_count = $2, last_error = $3,
                    failed_at = now(), locked_at = NULL
                WHERE id = $1
                "#,
            )
            .bind(job_id)
            .bind(attempts)
            .bind(error)
            .bind(JobState::Failed)
            .execute(&mut *tx)
            .await?;
            FailOutcome::Exhausted
        } else {
            let delay = retry_delay(attempts);
            sqlx::query(
                r#"
                UPDATE jobs
                SET state = $5, attempt_count = $2, last_error = $3,
                    available_at = now() + make_interval(secs => $4),
                    locked_at = NULL
                WHERE id = $1
                "#,
            )
            .bind(job_id)
            .bind(attempts)
            .bind(error)
            .bind(delay.as_secs_f64())
            .bind(JobState::Pending)
            .execute(&mut *tx)
            .await?;
            FailOutcome::Retry(delay)
        };

        tx.commit().await?;
        Ok(outcome)
    }

    async fn failed_jobs(&self, limit: i64) -> Result<Vec<FailedJob>, QueueError> {
        let rows: Vec<FailedJobRow> = sqlx::query_as(
            r#"
            SELECT id, group_key, payload, attempt_count, last_error, failed_at
            FROM jobs
            WHERE queue = $1 AND state = $3
            ORDER BY failed_at DESC
            LIMIT $2
            "#,
        )
        .bind(&self.queue_name)
        .bind(limit)
        .bind(JobState::Failed)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(FailedJob::from).collect())
    }
}
