//! UpdateRelay processor.
//!
//! Bridges the cross-process leg of the broadcast channel into the
//! gateway: listens on the named Postgres notification channel, decodes
//! each payload as a [`StatsUpdate`] and forwards it into the in-process
//! broadcast sender the WebSocket fan-out subscribes to.

use crate::events::{StatsUpdate, StatsUpdateSender};
use sqlx::PgPool;
use sqlx::postgres::PgListener;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Relays stats updates from Postgres pub/sub to the in-process channel.
pub struct UpdateRelay {
    listener: PgListener,
    channel: String,
    stats_tx: StatsUpdateSender,
}

impl UpdateRelay {
    /// Connect a listener on `channel` and build the relay.
    pub async fn connect(
        pool: &PgPool,
        channel: impl Into<String>,
        stats_tx: StatsUpdateSender,
    ) -> Result<Self, sqlx::Error> {
        let channel = channel.into();
        let mut listener = PgListener::connect_with(pool).await?;
        listener.listen(&channel).await?;
        Ok(Self {
            listener,
            channel,
            stats_tx,
        })
    }

    /// Run the relay until shutdown is signaled.
    pub async fn run(mut self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(channel = %self.channel, "update relay started");

        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("update relay received shutdown signal");
                        break;
                    }
                }

                notification = self.listener.recv() => {
                    match notification {
                        Ok(n) => match serde_json::from_str::<StatsUpdate>(n.payload()) {
                            Ok(update) => {
                                // No subscribers is fine; delivery is best-effort.
                                let _ = self.stats_tx.send(update);
                            }
                            Err(e) => {
                                warn!(error = %e, "ignoring malformed stats update payload");
                            }
                        },
                        Err(e) => {
                            // PgListener reconnects on the next recv; back off
                            // so a dead database does not spin this loop.
                            error!(error = %e, "pub/sub listener error");
                            tokio::time::sleep(Duration::from_secs(1)).await;
                        }
                    }
                }
            }
        }

        info!("update relay shutdown complete");
    }
}
