use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// One item of an ingest request, carried verbatim as the job payload.
///
/// `value` stays raw JSON through the queue: the gateway only checks the
/// request shape, while numeric validation happens in the worker so that a
/// malformed value goes through the retry path instead of being silently
/// dropped at the door.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestItem {
    #[serde(default)]
    pub value: Value,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

impl IngestItem {
    /// The payload's numeric value, if it actually is a finite number.
    pub fn numeric_value(&self) -> Option<f64> {
        self.value.as_f64().filter(|v| v.is_finite())
    }
}

/// Lifecycle state of a queued job.
///
/// `running` rows whose lease went stale are reclaimed by the queue, which
/// is what makes delivery at-least-once across worker crashes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type)]
#[sqlx(rename_all = "lowercase", type_name = "job_state")]
pub enum JobState {
    Pending,
    Running,
    Failed,
}

/// A unit of queued work wrapping a single ingested item.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub id: Uuid,
    pub group_key: String,
    pub payload: IngestItem,
    /// Attempts already spent on this job before the current delivery.
    pub attempt_count: i32,
    pub max_attempts: i32,
}

/// A job as submitted by the gateway, before the queue assigns an id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewJob {
    pub group_key: String,
    pub payload: IngestItem,
}

/// A job that exhausted all retry attempts, retained for inspection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedJob {
    pub id: Uuid,
    pub group_key: String,
    pub payload: IngestItem,
    pub attempt_count: i32,
    pub last_error: Option<String>,
    /// Unix timestamp (seconds) of the terminal failure.
    pub failed_at: i64,
}
