//! Publisher side of the broadcast channel.

use super::channels::StatsUpdateSender;
use super::types::StatsUpdate;
use async_trait::async_trait;
use sqlx::PgPool;
use thiserror::Error;

/// Errors that can occur while publishing a stats update.
///
/// Publishing is best-effort: the worker logs these and keeps going.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("channel unavailable: {0}")]
    Unavailable(String),
}

/// Fire-and-forget publish handle, injected into the worker pool.
#[async_trait]
pub trait UpdatePublisher: Send + Sync {
    async fn publish(&self, update: &StatsUpdate) -> Result<(), PublishError>;
}

/// Publishes updates onto a named Postgres `NOTIFY` channel, where the
/// gateway's update relay picks them up.
pub struct PgPublisher {
    pool: PgPool,
    channel: String,
}

impl PgPublisher {
    pub fn new(pool: PgPool, channel: impl Into<String>) -> Self {
        Self {
            pool,
            channel: channel.into(),
        }
    }
}

#[async_trait]
impl UpdatePublisher for PgPublisher {
    async fn publish(&self, update: &StatsUpdate) -> Result<(), PublishError> {
        let payload = serde_json::to_string(update)?;
        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(&self.channel)
            .bind(&payload)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// Publishes straight into the in-process broadcast channel.
///
/// Used when workers and gateway share a process, and by the test suites.
pub struct BroadcastPublisher {
    tx: StatsUpdateSender,
}

impl BroadcastPublisher {
    pub fn new(tx: StatsUpdateSender) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl UpdatePublisher for BroadcastPublisher {
    async fn publish(&self, update: &StatsUpdate) -> Result<(), PublishError> {
        // No subscribers is not a failure; the update is simply unobserved.
        let _ = self.tx.send(update.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::Aggregate;
    use crate::events::channels::stats_update_channel;

    fn update(key: &str) -> StatsUpdate {
        let mut agg = Aggregate::zeroed(key);
        agg.count = 1;
        agg.sum = 4.0;
        StatsUpdate {
            key: key.to_owned(),
            aggregate: agg.snapshot(),
        }
    }

    #[tokio::test]
    async fn broadcast_publisher_reaches_subscribers() {
        let (tx, mut rx) = stats_update_channel();
        let publisher = BroadcastPublisher::new(tx);

        publisher.publish(&update("g1")).await.unwrap();
        let received = rx.recv().await.unwrap();
        assert_eq!(received.key, "g1");
        assert_eq!(received.aggregate.sum, 4.0);
    }

    #[tokio::test]
    async fn publishing_without_subscribers_is_not_an_error() {
        let (tx, rx) = stats_update_channel();
        drop(rx);
        let publisher = BroadcastPublisher::new(tx);
        assert!(publisher.publish(&update("g1")).await.is_ok());
    }
}
