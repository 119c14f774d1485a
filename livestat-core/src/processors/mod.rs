//! Background processors.
//!
//! - [`WorkerPool`]: pulls jobs from the work queue, applies the atomic
//!   aggregate update, logs the processed record and publishes the update.
//! - [`UpdateRelay`]: listens on the Postgres notification channel and
//!   forwards stats updates into the gateway's in-process broadcast.
//!
//! Each processor is constructed with explicit handles to its
//! collaborators and driven by `run(self, shutdown_rx)`; a `watch` channel
//! signals shutdown, which stops pulling new work without aborting
//! in-flight jobs.

pub mod update_relay;
pub mod worker_pool;

pub use update_relay::UpdateRelay;
pub use worker_pool::{JobError, WorkerPool, WorkerPoolConfig};
