//! Worker service binary
//!
//! Claims the shard named in its environment options and holds the lease
//! until told to stop. Real deployments swap `IdleConsumer` for an
//! implementation that fetches and processes records.

use shardwarden::lease::LeaseStore;
use shardwarden::storage::{DynamoClient, DynamoConfig, DynamoLeaseStore};
use shardwarden::worker::{
    ShardConsumer, ShardContext, ShardOutcome, WorkerOptions, WorkerRunner,
};
use std::sync::Arc;
use tracing::{error, info};

struct IdleConsumer;

#[async_trait::async_trait]
impl ShardConsumer for IdleConsumer {
    async fn run(&mut self, ctx: ShardContext) -> shardwarden::error::Result<ShardOutcome> {
        info!("Holding shard {} until shutdown", ctx.shard_id);
        ctx.shutdown.wait().await;
        Ok(ShardOutcome::Interrupted)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let options = WorkerOptions::from_env()?;
    info!(
        "Starting worker for shard {} (takeover counter {:?})",
        options.shard_id, options.initial_lease_counter
    );

    let connection = &options.stream_config;
    let dynamo = Arc::new(DynamoClient::new(DynamoConfig {
        endpoint: connection.table_endpoint.clone(),
        region: connection.region.clone(),
        access_key_id: connection.access_key_id.clone(),
        secret_access_key: connection.secret_access_key.clone(),
        ..Default::default()
    })?);
    let store: Arc<dyn LeaseStore> =
        Arc::new(DynamoLeaseStore::new(dynamo, options.table_name.clone()));

    let runner = WorkerRunner::new(options, store);
    match runner.run(&mut IdleConsumer).await {
        Ok(outcome) => {
            info!("Worker done: {:?}", outcome);
            Ok(())
        }
        Err(e) => {
            error!("Worker failed: {}", e);
            std::process::exit(1);
        }
    }
}
