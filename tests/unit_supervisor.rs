//! Supervisor lifecycle tests with real child processes

use std::sync::Arc;
use std::time::{Duration, Instant};

use shardwarden::storage::{MemoryLeaseStore, MemoryMemberStore};
use shardwarden::stream::StaticShardSource;
use shardwarden::supervisor::{SupervisorConfig, WorkerSupervisor};
use shardwarden::worker::{ConnectionConfig, IteratorType, LaunchProfile};
use shardwarden::{Coordinator, CoordinatorConfig, WardenError};

fn launch_profile() -> LaunchProfile {
    LaunchProfile {
        table_name: "test-leases".into(),
        connection: ConnectionConfig::default(),
        stream_name: "test-stream".into(),
        starting_iterator_type: IteratorType::TrimHorizon,
        owner: "instance-a".into(),
        lease_duration: Duration::from_secs(10),
    }
}

#[tokio::test]
async fn unit_stop_all_empties_the_live_set() {
    let grace = Duration::from_secs(2);
    let supervisor = WorkerSupervisor::new(
        SupervisorConfig {
            // exits as soon as the shutdown message (or EOF) arrives
            worker_command: vec!["sh".into(), "-c".into(), "read _ || true".into()],
            shutdown_grace: grace,
        },
        launch_profile(),
    );

    for shard in ["shard-0001", "shard-0002", "shard-0003"] {
        supervisor.spawn(shard, None).unwrap();
    }
    assert_eq!(supervisor.count(), 3);

    let started = Instant::now();
    supervisor.stop_all().await;

    assert_eq!(supervisor.count(), 0);
    assert!(
        started.elapsed() < grace + Duration::from_secs(1),
        "stop_all took {:?}",
        started.elapsed()
    );
}

#[tokio::test]
async fn unit_hung_worker_is_killed_after_grace() {
    let grace = Duration::from_millis(400);
    let supervisor = WorkerSupervisor::new(
        SupervisorConfig {
            // ignores the shutdown message entirely
            worker_command: vec!["sh".into(), "-c".into(), "exec sleep 60".into()],
            shutdown_grace: grace,
        },
        launch_profile(),
    );

    let id = supervisor.spawn("shard-0001", None).unwrap();
    let started = Instant::now();
    supervisor.stop(id).await;

    assert_eq!(supervisor.count(), 0);
    assert!(started.elapsed() >= grace);
    assert!(started.elapsed() < grace + Duration::from_secs(2));
}

#[tokio::test]
async fn unit_reset_cascade_surfaces_one_terminal_error() {
    // S6: three live workers, one of them hangs past its grace window;
    // the terminal error reaches exactly one caller
    let leases = Arc::new(MemoryLeaseStore::new());
    let members = Arc::new(MemoryMemberStore::new());
    let shards = Arc::new(StaticShardSource::new(Vec::<String>::new()));

    let supervisor = Arc::new(WorkerSupervisor::new(
        SupervisorConfig {
            worker_command: vec![
                "sh".into(),
                "-c".into(),
                // the hang shard ignores shutdown; the others obey it
                r#"case "$WARDEN_WORKER_OPTIONS" in *shard-hang*) exec sleep 60;; esac; read _ || true"#.into(),
            ],
            shutdown_grace: Duration::from_millis(400),
        },
        launch_profile(),
    ));

    let coordinator = Coordinator::new(
        CoordinatorConfig::default(),
        "instance-a",
        leases,
        members,
        shards,
        supervisor.clone(),
    );

    supervisor.spawn("shard-0001", None).unwrap();
    supervisor.spawn("shard-0002", None).unwrap();
    supervisor.spawn("shard-hang", None).unwrap();
    assert_eq!(supervisor.count(), 3);

    let first = coordinator
        .kill_all_consumers(WardenError::BootstrapFailed {
            reason: "table create failed".into(),
        })
        .await;
    assert!(matches!(
        first,
        Err(WardenError::BootstrapFailed { .. })
    ));
    assert_eq!(supervisor.count(), 0);

    // the latch makes the second escalation silent
    let second = coordinator
        .kill_all_consumers(WardenError::BootstrapFailed {
            reason: "table create failed".into(),
        })
        .await;
    assert!(second.is_ok());

    // and no new workers may spawn afterwards
    assert!(matches!(
        supervisor.spawn("shard-0004", None),
        Err(WardenError::ShutdownInProgress)
    ));
}
