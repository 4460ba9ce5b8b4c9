//! OTS worker - pulls test tasks for one device group from the broker and
//! executes them one at a time, reporting state changes, results and errors
//! to the reply queue of the requesting test run.

pub mod broker;
pub mod config;
pub mod results;
pub mod stats;

pub use broker::{BrokerState, TaskBroker};
pub use config::WorkerConfig;
pub use stats::WorkerStats;

/// Version this worker advertises against `min_worker_version`.
pub const WORKER_VERSION: &str = env!("CARGO_PKG_VERSION");
