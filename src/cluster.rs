//! Cluster-member liveness rows
//!
//! Each coordinator instance upserts one row carrying its current worker
//! count. Rows whose expiry has passed are dead peers: ignored for
//! balancing and eventually deleted by any instance's sweep.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;

/// One instance's liveness row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterMember {
    /// Instance identifier, generated once per process
    pub id: String,
    /// Last reported worker count
    pub active_consumers: u64,
    /// Absolute expiry, ms since epoch
    pub expires_at_ms: u64,
}

impl ClusterMember {
    /// True when the member has missed enough reports to be treated as dead.
    pub fn is_expired(&self, now_ms: u64) -> bool {
        self.expires_at_ms < now_ms
    }
}

/// Storage backend for the cluster-member table
#[async_trait]
pub trait MemberStore: Send + Sync {
    /// Probe the backing table, creating it when absent.
    async fn ensure_table(&self) -> Result<()>;

    /// Unconditional upsert of this instance's row with a fresh TTL.
    async fn report(&self, id: &str, active_consumers: u64, ttl: Duration) -> Result<()>;

    /// Scan returning all members including self; the caller filters.
    async fn fetch_all(&self) -> Result<Vec<ClusterMember>>;

    /// Delete rows whose expiry precedes `now_ms`, batched.
    /// Returns the number of rows removed.
    async fn garbage_collect(&self, now_ms: u64) -> Result<usize>;
}
