//! Shard lease records and the CAS ownership protocol
//!
//! A lease row asserts exclusive, time-bounded ownership of one shard.
//! Every mutation is a conditional write on `lease_counter`; a rejected
//! condition is a normal outcome, not an error, and there is no retry
//! loop at this layer.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;

/// One shard's lease row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    /// Shard identifier, primary key
    pub shard_id: String,
    /// Monotonic ownership counter, incremented on every successful write
    pub lease_counter: u64,
    /// Absolute expiry, ms since epoch
    pub expires_at_ms: u64,
    /// Current holder, None when unclaimed
    pub owner: Option<String>,
    /// Opaque cursor persisted by the worker
    pub checkpoint: Option<String>,
    /// Set once the shard's records are fully drained
    pub is_finished: bool,
}

impl Lease {
    /// True when the lease is abandoned and eligible for takeover.
    pub fn is_expired(&self, now_ms: u64) -> bool {
        self.expires_at_ms < now_ms
    }
}

/// Outcome of a conditional lease write
///
/// The counter disambiguates two instances that both saw the lease as
/// expired and both attempt takeover: exactly one CAS applies, the loser
/// observes the now-higher counter and abandons.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CasOutcome {
    /// The write was applied; the returned lease reflects the new row
    Applied(Lease),
    /// The precondition no longer held; re-read and re-decide
    Conflict,
}

impl CasOutcome {
    /// True when the write was rejected.
    pub fn is_conflict(&self) -> bool {
        matches!(self, CasOutcome::Conflict)
    }

    /// The applied lease, if any.
    pub fn applied(self) -> Option<Lease> {
        match self {
            CasOutcome::Applied(lease) => Some(lease),
            CasOutcome::Conflict => None,
        }
    }
}

/// Storage backend for the lease table
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Probe the backing table, creating it when absent.
    async fn ensure_table(&self) -> Result<()>;

    /// Full table scan, pagination hidden.
    async fn fetch_all(&self) -> Result<Vec<Lease>>;

    /// Conditional insert requiring row absence. Counter starts at 0.
    async fn claim_unheld(
        &self,
        shard_id: &str,
        owner: &str,
        lease_duration: Duration,
    ) -> Result<CasOutcome>;

    /// Conditional update requiring `lease_counter == expected_counter`;
    /// writes `expected_counter + 1`, the new owner, and a fresh expiry.
    async fn take_over(
        &self,
        shard_id: &str,
        expected_counter: u64,
        owner: &str,
        lease_duration: Duration,
    ) -> Result<CasOutcome>;

    /// Identical to take_over, but the caller must already be the owner.
    async fn renew(
        &self,
        shard_id: &str,
        expected_counter: u64,
        owner: &str,
        lease_duration: Duration,
    ) -> Result<CasOutcome>;

    /// Same precondition as renew; additionally sets `is_finished`.
    /// A finished row is never reclaimed.
    async fn mark_finished(
        &self,
        shard_id: &str,
        expected_counter: u64,
        owner: &str,
    ) -> Result<CasOutcome>;

    /// Persist the worker's checkpoint cursor under the owner precondition.
    /// The coordinator never calls this; it only reads `is_finished`.
    async fn update_checkpoint(
        &self,
        shard_id: &str,
        expected_counter: u64,
        owner: &str,
        checkpoint: &str,
    ) -> Result<CasOutcome>;
}
