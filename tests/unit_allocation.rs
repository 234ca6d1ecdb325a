//! Allocation controller tests
//!
//! Drives `Coordinator::handle_network_update` directly against in-memory
//! stores, with real (inert) child processes behind the supervisor.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use shardwarden::cluster::{ClusterMember, MemberStore};
use shardwarden::coordinator::NetworkView;
use shardwarden::now_ms;
use shardwarden::storage::{MemoryLeaseStore, MemoryMemberStore};
use shardwarden::stream::StaticShardSource;
use shardwarden::supervisor::{SupervisorConfig, WorkerSupervisor};
use shardwarden::worker::{ConnectionConfig, IteratorType, LaunchProfile};
use shardwarden::{Coordinator, CoordinatorConfig};

fn build_coordinator(shard_ids: &[&str]) -> (Arc<Coordinator>, Arc<MemoryLeaseStore>) {
    let leases = Arc::new(MemoryLeaseStore::new());
    let members = Arc::new(MemoryMemberStore::new());
    let shards = Arc::new(StaticShardSource::new(shard_ids.iter().copied()));

    let supervisor = Arc::new(WorkerSupervisor::new(
        SupervisorConfig {
            // inert child: holds its handle until stdin closes or kill
            worker_command: vec!["sh".into(), "-c".into(), "read _ || true".into()],
            shutdown_grace: Duration::from_millis(500),
        },
        LaunchProfile {
            table_name: "test-leases".into(),
            connection: ConnectionConfig::default(),
            stream_name: "test-stream".into(),
            starting_iterator_type: IteratorType::TrimHorizon,
            owner: "instance-a".into(),
            lease_duration: Duration::from_secs(10),
        },
    ));

    let coordinator = Arc::new(Coordinator::new(
        CoordinatorConfig {
            stream_name: "test-stream".into(),
            ..Default::default()
        },
        "instance-a",
        leases.clone(),
        members,
        shards,
        supervisor,
    ));
    (coordinator, leases)
}

fn view(peers: &[(&str, u64)]) -> NetworkView {
    NetworkView {
        peers: peers
            .iter()
            .map(|(id, n)| (id.to_string(), *n))
            .collect::<HashMap<_, _>>(),
    }
}

#[tokio::test]
async fn unit_solo_bootstrap_acquires_one_shard() {
    // S1: no peers, one shard, no leases -> one tick spawns one worker
    let (coordinator, _leases) = build_coordinator(&["shard-0001"]);

    coordinator.handle_network_update(view(&[])).await;

    let supervisor = coordinator.supervisor();
    assert_eq!(supervisor.count(), 1);
    let snapshot = supervisor.snapshot();
    assert_eq!(snapshot[0].shard_id, "shard-0001");
    assert_eq!(snapshot[0].lease_counter, None);

    supervisor.begin_reset();
    supervisor.stop_all().await;
}

#[tokio::test]
async fn unit_tick_is_idempotent_inside_the_band() {
    let (coordinator, _leases) = build_coordinator(&["shard-0001", "shard-0002"]);
    let supervisor = coordinator.supervisor();
    supervisor.spawn("shard-0001", None).unwrap();
    supervisor.spawn("shard-0002", None).unwrap();

    // count 2 against min peer load 1: inside the band, nothing changes
    coordinator.handle_network_update(view(&[("b", 1)])).await;
    assert_eq!(supervisor.count(), 2);
    coordinator.handle_network_update(view(&[("b", 1)])).await;
    assert_eq!(supervisor.count(), 2);

    supervisor.begin_reset();
    supervisor.stop_all().await;
}

#[tokio::test]
async fn unit_overloaded_instance_sheds_one() {
    let (coordinator, _leases) = build_coordinator(&[]);
    let supervisor = coordinator.supervisor();
    for shard in ["shard-0001", "shard-0002", "shard-0003"] {
        supervisor.spawn(shard, None).unwrap();
    }

    // count 3 against min peer load 1: one shed per tick, never more
    coordinator.handle_network_update(view(&[("b", 1)])).await;
    assert_eq!(supervisor.count(), 2);

    supervisor.begin_reset();
    supervisor.stop_all().await;
}

#[tokio::test]
async fn unit_reset_latch_ignores_ticks() {
    let (coordinator, _leases) = build_coordinator(&["shard-0001"]);
    let supervisor = coordinator.supervisor();
    supervisor.begin_reset();

    coordinator.handle_network_update(view(&[])).await;
    assert_eq!(supervisor.count(), 0);
}

#[tokio::test]
async fn unit_member_gc_deletes_only_expired_rows() {
    // S5: the sweep removes the long-dead peer and keeps the live one
    let members = MemoryMemberStore::new();
    members.seed(ClusterMember {
        id: "instance-x".into(),
        active_consumers: 3,
        expires_at_ms: now_ms() - 600_000,
    });
    members
        .report("instance-y", 2, Duration::from_secs(30))
        .await
        .unwrap();

    let removed = members.garbage_collect(now_ms()).await.unwrap();
    assert_eq!(removed, 1);

    let remaining = members.fetch_all().await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, "instance-y");
}
