pub mod aggregate;
pub mod job;
pub mod record;

pub use aggregate::{Aggregate, AggregateSnapshot};
pub use job::{FailedJob, IngestItem, Job, JobState, NewJob};
pub use record::{NewProcessedRecord, NewRawDataPoint, ProcessedRecord};

/// Group key assigned to items whose caller did not specify one.
///
/// Resolved exactly once at the ingest boundary; lower layers never
/// re-derive it.
pub const DEFAULT_GROUP_KEY: &str = "global";
