//! Broadcast event layer.
//!
//! Workers publish a [`StatsUpdate`] after every successful job. The
//! transport is fire-and-forget in both legs:
//!
//! 1. Cross-process: JSON on a named Postgres `NOTIFY` channel (see
//!    [`publish::PgPublisher`]), picked up by the gateway's update relay.
//! 2. In-process: a `tokio::sync::broadcast` channel fanning out to the
//!    WebSocket subscriber tasks.
//!
//! No delivery guarantee beyond best-effort, no ordering guarantee across
//! keys, and no ordering guarantee between two updates to the same key:
//! every message carries a full post-update snapshot, never an increment.

pub mod channels;
pub mod publish;
pub mod types;

pub use channels::{
    DEFAULT_CHANNEL_BUFFER, StatsUpdateReceiver, StatsUpdateSender, stats_update_channel,
};
pub use publish::{BroadcastPublisher, PgPublisher, PublishError, UpdatePublisher};
pub use types::StatsUpdate;
