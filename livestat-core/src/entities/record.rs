use serde_json::Value;
use time::OffsetDateTime;

/// Append-only audit record of one successfully processed job.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct ProcessedRecord {
    pub id: i64,
    /// The validated numeric value that was applied to the aggregate.
    pub value: f64,
    /// The entire job payload as it was ingested.
    pub original: Value,
    pub processed_at: OffsetDateTime,
}

/// Insert form of [`ProcessedRecord`].
#[derive(Debug, Clone, PartialEq)]
pub struct NewProcessedRecord {
    pub value: f64,
    pub original: Value,
}

/// Insert form of a raw data point (feature-gated, best-effort audit trail).
#[derive(Debug, Clone, PartialEq)]
pub struct NewRawDataPoint {
    pub value: f64,
    pub kind: Option<String>,
    pub meta: Option<Value>,
}
