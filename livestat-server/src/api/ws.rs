//! WebSocket stats update stream.
//!
//! Each connection subscribes to one group key. For every committed
//! aggregate update the client receives a `stats:update:all` frame; when
//! the update's key matches the subscription it additionally receives a
//! scoped `stats:update` frame. Updates are delivered after commit, so a
//! client that re-fetches `/stats` on receipt never observes state older
//! than the frame.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use livestat_core::entities::{AggregateSnapshot, DEFAULT_GROUP_KEY};
use livestat_core::events::StatsUpdate;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub(super) struct WsQuery {
    key: Option<String>,
}

/// Server-to-client frames, discriminated by the `event` field.
#[derive(Debug, Serialize)]
#[serde(tag = "event")]
enum WsServerMessage {
    /// An update for the key this connection subscribed to.
    #[serde(rename = "stats:update")]
    StatsUpdate { aggregate: AggregateSnapshot },
    /// An update for any key, carrying the key explicitly.
    #[serde(rename = "stats:update:all")]
    StatsUpdateAll {
        key: String,
        aggregate: AggregateSnapshot,
    },
}

/// `GET /api/data/ws?key=<k>` - upgrade to the stats update stream.
pub(super) async fn stats_ws(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let key = query
        .key
        .unwrap_or_else(|| DEFAULT_GROUP_KEY.to_owned());
    ws.on_upgrade(move |socket| handle_stats_ws(socket, state, key))
}

async fn handle_stats_ws(mut socket: WebSocket, state: AppState, subscribed_key: String) {
    let mut updates = state.stats_tx.subscribe();
    tracing::debug!(key = %subscribed_key, "WebSocket subscriber connected");

    loop {
        tokio::select! {
            update = updates.recv() => {
                let update = match update {
                    Ok(update) => update,
                    Err(RecvError::Lagged(skipped)) => {
                        // A slow client misses intermediate frames; the next
                        // one it gets still carries the full current state.
                        tracing::warn!(key = %subscribed_key, skipped, "WebSocket subscriber lagged");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };
                for frame in frames_for(&subscribed_key, &update) {
                    if send_json(&mut socket, &frame).await.is_err() {
                        return;
                    }
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => return,
                    Some(Ok(_)) => {} // clients send nothing we act on
                    Some(Err(e)) => {
                        tracing::debug!(error = %e, "WebSocket receive error");
                        return;
                    }
                }
            }
        }
    }
    let _ = socket.send(Message::Close(None)).await;
}

/// Frames a subscriber of `subscribed_key` receives for one update.
fn frames_for(subscribed_key: &str, update: &StatsUpdate) -> Vec<WsServerMessage> {
    let mut frames = Vec::with_capacity(2);
    if update.key == subscribed_key {
        frames.push(WsServerMessage::StatsUpdate {
            aggregate: update.aggregate.clone(),
        });
    }
    frames.push(WsServerMessage::StatsUpdateAll {
        key: update.key.clone(),
        aggregate: update.aggregate.clone(),
    });
    frames
}

async fn send_json(socket: &mut WebSocket, frame: &WsServerMessage) -> Result<(), axum::Error> {
    match serde_json::to_string(frame) {
        Ok(text) => socket.send(Message::Text(text.into())).await,
        Err(e) => {
            tracing::error!(error = %e, "failed to serialize WebSocket frame");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use livestat_core::entities::Aggregate;

    fn update_for(key: &str, count: i64, sum: f64) -> StatsUpdate {
        let mut aggregate = Aggregate::zeroed(key);
        aggregate.count = count;
        aggregate.sum = sum;
        StatsUpdate {
            key: key.to_owned(),
            aggregate: aggregate.snapshot(),
        }
    }

    #[test]
    fn matching_key_gets_scoped_and_broadcast_frames() {
        let frames = frames_for("alpha", &update_for("alpha", 2, 30.0));
        assert_eq!(frames.len(), 2);
        assert!(matches!(frames[0], WsServerMessage::StatsUpdate { .. }));
        assert!(matches!(frames[1], WsServerMessage::StatsUpdateAll { .. }));
    }

    #[test]
    fn other_keys_only_get_the_broadcast_frame() {
        let frames = frames_for("alpha", &update_for("beta", 1, 5.0));
        assert_eq!(frames.len(), 1);
        match &frames[0] {
            WsServerMessage::StatsUpdateAll { key, .. } => assert_eq!(key, "beta"),
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn frames_carry_the_event_discriminator() {
        let frames = frames_for("alpha", &update_for("alpha", 2, 30.0));
        let scoped = serde_json::to_value(&frames[0]).unwrap();
        assert_eq!(scoped["event"], "stats:update");
        assert_eq!(scoped["aggregate"]["avg"], 15.0);
        let all = serde_json::to_value(&frames[1]).unwrap();
        assert_eq!(all["event"], "stats:update:all");
        assert_eq!(all["key"], "alpha");
    }
}
