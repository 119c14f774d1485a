//! Configuration surface.
//!
//! Every knob is a CLI flag backed by an environment variable, so the
//! process configures the same way under an orchestrator and on a laptop.

use clap::Parser;
use std::net::SocketAddr;

/// livestat - asynchronous numeric-event aggregation pipeline
#[derive(Parser, Debug, Clone)]
#[command(name = "livestat-server")]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Address and port to listen on
    #[arg(short, long, env = "LISTEN_ADDR", default_value = "0.0.0.0:3001")]
    pub listen: SocketAddr,

    /// Postgres connection string (store, queue and pub/sub transport)
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: String,

    /// Logical queue the gateway enqueues to and workers consume from
    #[arg(long, env = "QUEUE_NAME", default_value = "process-data")]
    pub queue_name: String,

    /// Pub/sub channel carrying stats updates between workers and gateways
    #[arg(long, env = "PUBSUB_CHANNEL", default_value = "stats_updates")]
    pub channel: String,

    /// Number of concurrent workers; 0 runs a gateway-only instance
    #[arg(long, env = "CONCURRENCY", default_value_t = 4)]
    pub concurrency: usize,

    /// Also persist each raw data point (best-effort audit trail)
    #[arg(long, env = "SAVE_RAW", default_value_t = false)]
    pub save_raw: bool,

    /// Maximum number of items accepted in a single ingest request
    #[arg(long, env = "MAX_BATCH", default_value_t = 10_000)]
    pub max_batch: usize,

    /// Run database migrations on startup
    #[arg(long, default_value = "false")]
    pub migrate: bool,
}
