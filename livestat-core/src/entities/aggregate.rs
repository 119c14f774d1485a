use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Running per-key summary, one row per group key.
///
/// `avg` is deliberately **not** a field: it is derived at read time from
/// `sum` and `count`, so there is no instant at which a stored average can
/// lag behind the counters.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Aggregate {
    pub key: String,
    pub count: i64,
    pub sum: f64,
    pub updated_at: OffsetDateTime,
}

impl Aggregate {
    /// An empty aggregate for a key with no processed jobs yet.
    ///
    /// Used for read paths only; reading never creates a row.
    pub fn zeroed(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            count: 0,
            sum: 0.0,
            updated_at: OffsetDateTime::now_utc(),
        }
    }

    /// `sum / count`, or `0` for an empty aggregate.
    pub fn avg(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }

    /// Convert into the wire form carried by API responses and broadcasts.
    pub fn snapshot(&self) -> AggregateSnapshot {
        AggregateSnapshot {
            key: self.key.clone(),
            count: self.count,
            sum: self.sum,
            avg: self.avg(),
            updated_at: self.updated_at.unix_timestamp(),
        }
    }
}

/// Wire form of an [`Aggregate`] (API model).
///
/// Consumers must treat this as the authoritative latest snapshot at publish
/// time, never as an increment to apply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateSnapshot {
    pub key: String,
    pub count: i64,
    pub sum: f64,
    pub avg: f64,
    /// Unix timestamp (seconds) of the last successful update.
    pub updated_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn avg_is_derived_from_counters() {
        let mut agg = Aggregate::zeroed("g1");
        assert_eq!(agg.avg(), 0.0);

        agg.count = 2;
        agg.sum = 30.0;
        assert_eq!(agg.avg(), 15.0);

        let snapshot = agg.snapshot();
        assert_eq!(snapshot.count, 2);
        assert_eq!(snapshot.sum, 30.0);
        assert_eq!(snapshot.avg, 15.0);
    }
}
