//! Worker-side logic
//!
//! The options blob handed to a worker process, and the harness that
//! claims the shard lease, keeps it renewed, and drives the embedder's
//! record-processing code.

pub mod options;
pub mod runner;

pub use options::{ConnectionConfig, ControlMessage, IteratorType, LaunchProfile, WorkerOptions};
pub use runner::{LeaseHandle, ShardConsumer, ShardContext, ShardOutcome, WorkerRunner};
