//! Shardwarden - Distributed shard-consumer coordinator
//!
//! This crate coordinates a fleet of independent instances consuming a
//! partitioned record stream:
//! - Lease claim/takeover/renewal via CAS on a shared key/value table
//! - Cluster membership and load reporting
//! - Per-shard worker processes with supervised lifecycles
//! - Load-band balancing across instances

pub mod cluster;
pub mod coordinator;
pub mod error;
pub mod health;
pub mod lease;
pub mod metrics;
pub mod shutdown;
pub mod storage;
pub mod stream;
pub mod supervisor;
pub mod worker;

pub use coordinator::{Coordinator, CoordinatorConfig};
pub use error::WardenError;

/// Default interval between load reports to the member table, in seconds
pub const DEFAULT_REPORT_INTERVAL_SECS: u64 = 1;

/// Default interval between peer-table fetches, in seconds
pub const DEFAULT_FETCH_INTERVAL_SECS: u64 = 5;

/// Default lease duration in milliseconds
pub const DEFAULT_LEASE_DURATION_MS: u64 = 10_000;

/// Default cluster-member row TTL in milliseconds
pub const DEFAULT_MEMBER_TTL_MS: u64 = 30_000;

/// Default grace period before a stopping worker is force-killed, in seconds
pub const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 40;

/// Minimum spacing between member-table garbage collection sweeps, in seconds
pub const MEMBER_GC_INTERVAL_SECS: u64 = 60;

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
