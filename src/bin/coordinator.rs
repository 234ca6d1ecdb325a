//! Coordinator service binary

use shardwarden::cluster::MemberStore;
use shardwarden::lease::LeaseStore;
use shardwarden::storage::{DynamoClient, DynamoConfig, DynamoLeaseStore, DynamoMemberStore};
use shardwarden::stream::{KinesisConfig, KinesisShardSource, ShardSource};
use shardwarden::supervisor::{SupervisorConfig, WorkerSupervisor};
use shardwarden::worker::{ConnectionConfig, IteratorType, LaunchProfile};
use shardwarden::{Coordinator, CoordinatorConfig};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.into())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    info!("Starting shardwarden coordinator");

    let instance_id = std::env::var("WARDEN_INSTANCE_ID")
        .unwrap_or_else(|_| uuid::Uuid::new_v4().to_string());

    let stream_name = env_or("WARDEN_STREAM_NAME", "default-stream");
    let lease_table = env_or("WARDEN_LEASE_TABLE", "warden-leases");
    let member_table = env_or("WARDEN_MEMBER_TABLE", "warden-members");

    let table_endpoint = env_or("WARDEN_TABLE_ENDPOINT", "http://localhost:8000");
    let stream_endpoint = env_or("WARDEN_STREAM_ENDPOINT", "http://localhost:4566");
    let region = env_or("AWS_REGION", "us-east-1");
    let access_key_id = std::env::var("AWS_ACCESS_KEY_ID").ok();
    let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY").ok();

    let dynamo = Arc::new(DynamoClient::new(DynamoConfig {
        endpoint: table_endpoint.clone(),
        region: region.clone(),
        access_key_id: access_key_id.clone(),
        secret_access_key: secret_access_key.clone(),
        read_capacity: env_or("WARDEN_READ_CAPACITY", "10").parse()?,
        write_capacity: env_or("WARDEN_WRITE_CAPACITY", "10").parse()?,
        ..Default::default()
    })?);
    let leases: Arc<dyn LeaseStore> =
        Arc::new(DynamoLeaseStore::new(dynamo.clone(), lease_table.clone()));
    let members: Arc<dyn MemberStore> =
        Arc::new(DynamoMemberStore::new(dynamo, member_table));

    let shards: Arc<dyn ShardSource> = Arc::new(KinesisShardSource::new(KinesisConfig {
        endpoint: stream_endpoint.clone(),
        region: region.clone(),
        access_key_id: access_key_id.clone(),
        secret_access_key: secret_access_key.clone(),
        ..Default::default()
    })?);

    let worker_command: Vec<String> = env_or("WARDEN_WORKER_CMD", "worker")
        .split_whitespace()
        .map(String::from)
        .collect();
    let lease_duration =
        Duration::from_millis(env_or("WARDEN_LEASE_DURATION_MS", "10000").parse()?);

    let supervisor = Arc::new(WorkerSupervisor::new(
        SupervisorConfig {
            worker_command,
            ..Default::default()
        },
        LaunchProfile {
            table_name: lease_table,
            connection: ConnectionConfig {
                table_endpoint,
                stream_endpoint,
                region,
                access_key_id,
                secret_access_key,
            },
            stream_name: stream_name.clone(),
            starting_iterator_type: IteratorType::TrimHorizon,
            owner: instance_id.clone(),
            lease_duration,
        },
    ));

    let config = CoordinatorConfig {
        stream_name,
        lease_duration,
        health_addr: std::env::var("WARDEN_HEALTH_ADDR").ok().map(|a| a.parse()).transpose()?,
        ..Default::default()
    };

    let coordinator = Arc::new(Coordinator::new(
        config,
        instance_id,
        leases,
        members,
        shards,
        supervisor,
    ));

    let for_signal = coordinator.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, shutting down");
            for_signal.shutdown().await;
        }
    });

    if let Err(e) = coordinator.run().await {
        error!("Coordinator terminated: {}", e);
        std::process::exit(1);
    }

    Ok(())
}
