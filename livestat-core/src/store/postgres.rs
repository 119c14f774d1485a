use super::{AggregateStore, HistoryFilter, HistoryPage, RecordLog, StoreError};
use crate::entities::{Aggregate, NewProcessedRecord, NewRawDataPoint, ProcessedRecord};
use async_trait::async_trait;
use sqlx::PgPool;

/// Aggregate store on Postgres.
///
/// The upsert below is the whole concurrency story: one statement both
/// creates the row for a first writer and increments `count`/`sum` for
/// everyone else, and `RETURNING` hands back the post-update row the
/// broadcast snapshot is built from.
pub struct PgAggregateStore {
    pool: PgPool,
}

impl PgAggregateStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AggregateStore for PgAggregateStore {
    async fn atomic_update(&self, key: &str, value: f64) -> Result<Aggregate, StoreError> {
        let aggregate = sqlx::query_as::<_, Aggregate>(
            r#"
            INSERT INTO aggregates (key, count, sum, updated_at)
            VALUES ($1, 1, $2, now())
            ON CONFLICT (key) DO UPDATE
            SET count = aggregates.count + 1,
                sum = aggregates.sum + EXCLUDED.sum,
                updated_at = now()
            RETURNING key, count, sum, updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .fetch_one(&self.pool)
        .await?;

        Ok(aggregate)
    }

    async fn get(&self, key: &str) -> Result<Option<Aggregate>, StoreError> {
        let aggregate = sqlx::query_as::<_, Aggregate>(
            "SELECT key, count, sum, updated_at FROM aggregates WHERE key = $1",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(aggregate)
    }
}

/// Append-only logs on Postgres.
pub struct PgRecordLog {
    pool: PgPool,
}

impl PgRecordLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecordLog for PgRecordLog {
    async fn append_processed(&self, record: NewProcessedRecord) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO processed_records (value, original) VALUES ($1, $2)")
            .bind(record.value)
            .bind(&record.original)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn append_raw(&self, point: NewRawDataPoint) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO raw_data_points (value, kind, meta) VALUES ($1, $2, $3)")
            .bind(point.value)
            .bind(&point.kind)
            .bind(&point.meta)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_processed(&self, filter: HistoryFilter) -> Result<HistoryPage, StoreError> {
        let records = sqlx::query_as::<_, ProcessedRecord>(
            r#"
            SELECT id, value, original, processed_at
            FROM processed_records
            WHERE ($1::timestamptz IS NULL OR processed_at >= $1)
              AND ($2::timestamptz IS NULL OR processed_at <= $2)
            ORDER BY processed_at DESC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(filter.from)
        .bind(filter.to)
        .bind(filter.limit)
        .bind(filter.offset)
        .fetch_all(&self.pool)
        .await?;

        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM processed_records
            WHERE ($1::timestamptz IS NULL OR processed_at >= $1)
              AND ($2::timestamptz IS NULL OR processed_at <= $2)
            "#,
        )
        .bind(filter.from)
        .bind(filter.to)
        .fetch_one(&self.pool)
        .await?;

        Ok(HistoryPage { records, total })
    }
}
