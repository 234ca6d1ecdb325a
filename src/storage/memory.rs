//! In-memory table backends
//!
//! Same CAS semantics as the remote tables, applied atomically under one
//! lock. Backs unit tests and the convergence simulation.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use crate::cluster::{ClusterMember, MemberStore};
use crate::error::Result;
use crate::lease::{CasOutcome, Lease, LeaseStore};
use crate::now_ms;

/// In-memory lease table
///
/// BTreeMap keeps scan order deterministic, matching the "stored order"
/// the expired-lease fallback iterates in.
#[derive(Default)]
pub struct MemoryLeaseStore {
    rows: Mutex<BTreeMap<String, Lease>>,
}

impl MemoryLeaseStore {
    /// Create an empty lease table
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a row directly, bypassing the CAS protocol. Test seam.
    pub fn seed(&self, lease: Lease) {
        self.rows.lock().insert(lease.shard_id.clone(), lease);
    }

    /// Read one row directly. Test seam.
    pub fn get(&self, shard_id: &str) -> Option<Lease> {
        self.rows.lock().get(shard_id).cloned()
    }
}

#[async_trait]
impl LeaseStore for MemoryLeaseStore {
    async fn ensure_table(&self) -> Result<()> {
        Ok(())
    }

    async fn fetch_all(&self) -> Result<Vec<Lease>> {
        Ok(self.rows.lock().values().cloned().collect())
    }

    async fn claim_unheld(
        &self,
        shard_id: &str,
        owner: &str,
        lease_duration: Duration,
    ) -> Result<CasOutcome> {
        let mut rows = self.rows.lock();
        if rows.contains_key(shard_id) {
            return Ok(CasOutcome::Conflict);
        }
        let lease = Lease {
            shard_id: shard_id.to_string(),
            lease_counter: 0,
            expires_at_ms: now_ms() + lease_duration.as_millis() as u64,
            owner: Some(owner.to_string()),
            checkpoint: None,
            is_finished: false,
        };
        rows.insert(shard_id.to_string(), lease.clone());
        Ok(CasOutcome::Applied(lease))
    }

    async fn take_over(
        &self,
        shard_id: &str,
        expected_counter: u64,
        owner: &str,
        lease_duration: Duration,
    ) -> Result<CasOutcome> {
        let mut rows = self.rows.lock();
        match rows.get_mut(shard_id) {
            Some(lease) if lease.lease_counter == expected_counter => {
                lease.lease_counter = expected_counter + 1;
                lease.owner = Some(owner.to_string());
                lease.expires_at_ms = now_ms() + lease_duration.as_millis() as u64;
                Ok(CasOutcome::Applied(lease.clone()))
            }
            _ => Ok(CasOutcome::Conflict),
        }
    }

    async fn renew(
        &self,
        shard_id: &str,
        expected_counter: u64,
        owner: &str,
        lease_duration: Duration,
    ) -> Result<CasOutcome> {
        let mut rows = self.rows.lock();
        match rows.get_mut(shard_id) {
            Some(lease)
                if lease.lease_counter == expected_counter
                    && lease.owner.as_deref() == Some(owner) =>
            {
                lease.lease_counter = expected_counter + 1;
                lease.expires_at_ms = now_ms() + lease_duration.as_millis() as u64;
                Ok(CasOutcome::Applied(lease.clone()))
            }
            _ => Ok(CasOutcome::Conflict),
        }
    }

    async fn mark_finished(
        &self,
        shard_id: &str,
        expected_counter: u64,
        owner: &str,
    ) -> Result<CasOutcome> {
        let mut rows = self.rows.lock();
        match rows.get_mut(shard_id) {
            Some(lease)
                if lease.lease_counter == expected_counter
                    && lease.owner.as_deref() == Some(owner) =>
            {
                lease.lease_counter = expected_counter + 1;
                lease.is_finished = true;
                Ok(CasOutcome::Applied(lease.clone()))
            }
            _ => Ok(CasOutcome::Conflict),
        }
    }

    async fn update_checkpoint(
        &self,
        shard_id: &str,
        expected_counter: u64,
        owner: &str,
        checkpoint: &str,
    ) -> Result<CasOutcome> {
        let mut rows = self.rows.lock();
        match rows.get_mut(shard_id) {
            Some(lease)
                if lease.lease_counter == expected_counter
                    && lease.owner.as_deref() == Some(owner) =>
            {
                lease.checkpoint = Some(checkpoint.to_string());
                Ok(CasOutcome::Applied(lease.clone()))
            }
            _ => Ok(CasOutcome::Conflict),
        }
    }
}

/// In-memory cluster-member table
#[derive(Default)]
pub struct MemoryMemberStore {
    rows: Mutex<HashMap<String, ClusterMember>>,
}

impl MemoryMemberStore {
    /// Create an empty member table
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a row directly. Test seam.
    pub fn seed(&self, member: ClusterMember) {
        self.rows.lock().insert(member.id.clone(), member);
    }
}

#[async_trait]
impl MemberStore for MemoryMemberStore {
    async fn ensure_table(&self) -> Result<()> {
        Ok(())
    }

    async fn report(&self, id: &str, active_consumers: u64, ttl: Duration) -> Result<()> {
        let member = ClusterMember {
            id: id.to_string(),
            active_consumers,
            expires_at_ms: now_ms() + ttl.as_millis() as u64,
        };
        self.rows.lock().insert(id.to_string(), member);
        Ok(())
    }

    async fn fetch_all(&self) -> Result<Vec<ClusterMember>> {
        Ok(self.rows.lock().values().cloned().collect())
    }

    async fn garbage_collect(&self, now_ms: u64) -> Result<usize> {
        let mut rows = self.rows.lock();
        let before = rows.len();
        rows.retain(|_, member| !member.is_expired(now_ms));
        Ok(before - rows.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEASE: Duration = Duration::from_secs(10);

    #[tokio::test]
    async fn test_claim_then_reclaim_conflicts() {
        let store = MemoryLeaseStore::new();

        let first = store.claim_unheld("shard-0000", "a", LEASE).await.unwrap();
        let lease = first.applied().expect("first claim applies");
        assert_eq!(lease.lease_counter, 0);
        assert_eq!(lease.owner.as_deref(), Some("a"));

        let second = store.claim_unheld("shard-0000", "b", LEASE).await.unwrap();
        assert!(second.is_conflict());
    }

    #[tokio::test]
    async fn test_take_over_bumps_counter_once() {
        let store = MemoryLeaseStore::new();
        store.claim_unheld("shard-0000", "a", LEASE).await.unwrap();

        let won = store.take_over("shard-0000", 0, "b", LEASE).await.unwrap();
        assert_eq!(won.applied().unwrap().lease_counter, 1);

        // the loser saw counter 0 too; its CAS must reject
        let lost = store.take_over("shard-0000", 0, "c", LEASE).await.unwrap();
        assert!(lost.is_conflict());
    }

    #[tokio::test]
    async fn test_renew_requires_ownership() {
        let store = MemoryLeaseStore::new();
        store.claim_unheld("shard-0000", "a", LEASE).await.unwrap();

        assert!(store
            .renew("shard-0000", 0, "b", LEASE)
            .await
            .unwrap()
            .is_conflict());
        assert!(!store
            .renew("shard-0000", 0, "a", LEASE)
            .await
            .unwrap()
            .is_conflict());
    }

    #[tokio::test]
    async fn test_checkpoint_does_not_bump_counter() {
        let store = MemoryLeaseStore::new();
        store.claim_unheld("shard-0000", "a", LEASE).await.unwrap();

        let after = store
            .update_checkpoint("shard-0000", 0, "a", "seq-41")
            .await
            .unwrap()
            .applied()
            .unwrap();
        assert_eq!(after.lease_counter, 0);
        assert_eq!(after.checkpoint.as_deref(), Some("seq-41"));

        // renewal under the same counter still goes through
        assert!(!store
            .renew("shard-0000", 0, "a", LEASE)
            .await
            .unwrap()
            .is_conflict());
    }

    #[tokio::test]
    async fn test_member_gc_removes_only_expired() {
        let store = MemoryMemberStore::new();
        store.seed(ClusterMember {
            id: "dead".into(),
            active_consumers: 1,
            expires_at_ms: 1_000,
        });
        store.report("alive", 2, Duration::from_secs(30)).await.unwrap();

        let removed = store.garbage_collect(now_ms()).await.unwrap();
        assert_eq!(removed, 1);

        let rest = store.fetch_all().await.unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].id, "alive");
    }
}
