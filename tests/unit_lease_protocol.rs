//! Lease protocol tests against the in-memory table
//!
//! Exercises the CAS ownership rules: single observable owner, counter
//! monotonicity, expired-lease takeover, and the two-claimant race.

use std::time::Duration;

use shardwarden::coordinator::next_candidate;
use shardwarden::lease::{Lease, LeaseStore};
use shardwarden::now_ms;
use shardwarden::storage::MemoryLeaseStore;

const LEASE: Duration = Duration::from_secs(10);

#[tokio::test]
async fn unit_single_owner_across_claim_history() {
    let store = MemoryLeaseStore::new();
    let instances = ["a", "b", "c"];

    // every instance tries to claim, then repeatedly to take over at
    // whatever counter it last observed
    let mut winners = Vec::new();
    for id in instances {
        if let Some(lease) = store
            .claim_unheld("shard-0000", id, LEASE)
            .await
            .unwrap()
            .applied()
        {
            winners.push((id, lease.lease_counter));
        }
    }
    assert_eq!(winners.len(), 1, "exactly one claim may apply");

    for round in 0..5 {
        let observed = store.get("shard-0000").unwrap();
        let mut applied = 0;
        for id in instances {
            if store
                .take_over("shard-0000", observed.lease_counter, id, LEASE)
                .await
                .unwrap()
                .applied()
                .is_some()
            {
                applied += 1;
            }
        }
        assert_eq!(applied, 1, "round {}: exactly one takeover may apply", round);
    }
}

#[tokio::test]
async fn unit_counter_never_decreases() {
    let store = MemoryLeaseStore::new();
    store.claim_unheld("shard-0000", "a", LEASE).await.unwrap();

    let mut history = vec![store.get("shard-0000").unwrap().lease_counter];
    for id in ["b", "a", "c", "b"] {
        let counter = store.get("shard-0000").unwrap().lease_counter;
        // interleave losing writes at stale counters
        let _ = store.take_over("shard-0000", counter + 5, "x", LEASE).await;
        store
            .take_over("shard-0000", counter, id, LEASE)
            .await
            .unwrap();
        history.push(store.get("shard-0000").unwrap().lease_counter);
    }

    assert!(
        history.windows(2).all(|w| w[0] < w[1]),
        "counter history must be strictly increasing: {:?}",
        history
    );
}

#[tokio::test]
async fn unit_expired_lease_takeover() {
    // instance A crashed holding shard-0001 at counter 7
    let store = MemoryLeaseStore::new();
    store.seed(Lease {
        shard_id: "shard-0001".into(),
        lease_counter: 7,
        expires_at_ms: now_ms() - 1_000,
        owner: Some("instance-a".into()),
        checkpoint: None,
        is_finished: false,
    });

    // B finds no unleased shards and picks the expired lease
    let shard_ids = vec!["shard-0001".to_string()];
    let leases = store.fetch_all().await.unwrap();
    let candidate = next_candidate(&shard_ids, &leases, now_ms()).unwrap();
    assert_eq!(candidate.shard_id, "shard-0001");
    assert_eq!(candidate.take_over_counter, Some(7));

    let lease = store
        .take_over("shard-0001", 7, "instance-b", LEASE)
        .await
        .unwrap()
        .applied()
        .expect("takeover of an expired lease applies");
    assert_eq!(lease.lease_counter, 8);
    assert_eq!(lease.owner.as_deref(), Some("instance-b"));
}

#[tokio::test]
async fn unit_takeover_race_has_one_winner() {
    let store = MemoryLeaseStore::new();
    store.seed(Lease {
        shard_id: "shard-0001".into(),
        lease_counter: 7,
        expires_at_ms: now_ms() - 1_000,
        owner: Some("instance-a".into()),
        checkpoint: None,
        is_finished: false,
    });

    // both observed counter 7; the winner bumps to 8, the loser conflicts
    // and abandons with no retry
    let first = store
        .take_over("shard-0001", 7, "instance-b", LEASE)
        .await
        .unwrap();
    let second = store
        .take_over("shard-0001", 7, "instance-c", LEASE)
        .await
        .unwrap();

    assert!(first.applied().is_some());
    assert!(second.is_conflict());

    let row = store.get("shard-0001").unwrap();
    assert_eq!(row.lease_counter, 8);
    assert_eq!(row.owner.as_deref(), Some("instance-b"));
}
