//! livestat server
//!
//! Gateway and processing pipeline for high-volume numeric events: batches
//! are enqueued durably, workers fold them into per-key aggregates, and
//! live updates are pushed to WebSocket subscribers.

mod api;
mod config;
mod server;
mod shutdown;
mod state;

use clap::Parser;
use config::Args;
use livestat_core::events::{PgPublisher, UpdatePublisher, stats_update_channel};
use livestat_core::processors::{UpdateRelay, WorkerPool, WorkerPoolConfig};
use livestat_core::queue::{PgWorkQueue, WorkQueue};
use livestat_core::store::{AggregateStore, PgAggregateStore, PgRecordLog, RecordLog};
use server::{build_router, run_server};
use sqlx::postgres::PgPoolOptions;
use state::AppState;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    init_tracing();

    // Parse command line arguments / environment
    let args = Args::parse();

    tracing::info!("Starting livestat-server v{}", env!("CARGO_PKG_VERSION"));

    // Create database connection pool; the store, the queue and the pub/sub
    // transport all ride this Postgres. Unreachable at boot is fatal.
    tracing::info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(10 + args.concurrency as u32)
        .connect(&args.database_url)
        .await
        .map_err(|e| {
            tracing::error!("Failed to connect to database: {}", e);
            e
        })?;
    tracing::info!("Database connection established");

    // Run migrations if requested
    if args.migrate {
        tracing::info!("Running database migrations...");
        sqlx::migrate!("../migrations")
            .run(&db_pool)
            .await
            .map_err(|e| {
                tracing::error!("Failed to run migrations: {}", e);
                e
            })?;
        tracing::info!("Migrations completed successfully");
    }

    // Explicit handles for every collaborator; components receive them at
    // construction rather than reaching for globals.
    let queue: Arc<dyn WorkQueue> = Arc::new(PgWorkQueue::new(db_pool.clone(), &args.queue_name));
    let store: Arc<dyn AggregateStore> = Arc::new(PgAggregateStore::new(db_pool.clone()));
    let records: Arc<dyn RecordLog> = Arc::new(PgRecordLog::new(db_pool.clone()));
    let (stats_tx, _) = stats_update_channel();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut processor_tasks = Vec::new();

    // Relay worker-published updates into this process for WS fan-out.
    let relay = UpdateRelay::connect(&db_pool, &args.channel, stats_tx.clone())
        .await
        .map_err(|e| {
            tracing::error!("Failed to subscribe to pub/sub channel: {}", e);
            e
        })?;
    processor_tasks.push(tokio::spawn(relay.run(shutdown_rx.clone())));

    // Spawn the worker pool unless this is a gateway-only instance.
    if args.concurrency > 0 {
        let publisher: Arc<dyn UpdatePublisher> =
            Arc::new(PgPublisher::new(db_pool.clone(), &args.channel));
        let pool = WorkerPool::new(
            queue.clone(),
            store.clone(),
            records.clone(),
            publisher,
            WorkerPoolConfig {
                concurrency: args.concurrency,
                save_raw: args.save_raw,
                ..WorkerPoolConfig::default()
            },
        );
        processor_tasks.push(tokio::spawn(pool.run(shutdown_rx.clone())));
    } else {
        tracing::info!("Concurrency is 0, running as a gateway-only instance");
    }

    // Create application state and the router
    let state = AppState::new(queue, store, records, stats_tx, args.max_batch);
    let router = build_router(state);

    // Run the server
    tracing::info!("Starting HTTP server on {}", args.listen);
    let result = run_server(router, args.listen).await;

    // Stop pulling new jobs; in-flight work finishes before we exit.
    let _ = shutdown_tx.send(true);
    for task in processor_tasks {
        let _ = task.await;
    }

    // Close database connections gracefully
    tracing::info!("Closing database connections...");
    db_pool.close().await;
    tracing::info!("Server shutdown complete");

    result.map_err(Into::into)
}

/// Initialize the tracing subscriber with environment-based filtering.
fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
