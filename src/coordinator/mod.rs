//! Coordinator wiring
//!
//! One instance's coordination engine: bootstrap the backing tables,
//! run the membership loops, and turn each network view into at most one
//! acquire or shed. All allocation state changes happen on the event
//! loop task, so ticks never race each other.

pub mod allocation;
pub mod membership;

pub use allocation::{decide, next_candidate, Decision, ShardCandidate};
pub use membership::NetworkView;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::cluster::MemberStore;
use crate::error::{Result, WardenError};
use crate::health;
use crate::lease::LeaseStore;
use crate::metrics::standard::WORKERS_SHED;
use crate::now_ms;
use crate::shutdown::ShutdownSignal;
use crate::stream::ShardSource;
use crate::supervisor::WorkerSupervisor;
use crate::{
    DEFAULT_FETCH_INTERVAL_SECS, DEFAULT_LEASE_DURATION_MS, DEFAULT_MEMBER_TTL_MS,
    DEFAULT_REPORT_INTERVAL_SECS, MEMBER_GC_INTERVAL_SECS,
};

/// Configuration for one coordinator instance
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Stream whose shards are being divided
    pub stream_name: String,
    /// Cadence of load reports to the member table
    pub report_interval: Duration,
    /// Cadence of peer-table fetches; drives allocation ticks
    pub fetch_interval: Duration,
    /// Minimum spacing between member-table sweeps
    pub gc_interval: Duration,
    /// TTL stamped on this instance's member row
    pub member_ttl: Duration,
    /// Lease duration granted on claim and renewal
    pub lease_duration: Duration,
    /// Bind address for the health server; None disables it
    pub health_addr: Option<SocketAddr>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            stream_name: "default-stream".into(),
            report_interval: Duration::from_secs(DEFAULT_REPORT_INTERVAL_SECS),
            fetch_interval: Duration::from_secs(DEFAULT_FETCH_INTERVAL_SECS),
            gc_interval: Duration::from_secs(MEMBER_GC_INTERVAL_SECS),
            member_ttl: Duration::from_millis(DEFAULT_MEMBER_TTL_MS),
            lease_duration: Duration::from_millis(DEFAULT_LEASE_DURATION_MS),
            health_addr: None,
        }
    }
}

/// One instance's coordination engine
pub struct Coordinator {
    config: CoordinatorConfig,
    self_id: String,
    leases: Arc<dyn LeaseStore>,
    members: Arc<dyn MemberStore>,
    shards: Arc<dyn ShardSource>,
    supervisor: Arc<WorkerSupervisor>,
    shutdown: ShutdownSignal,
}

impl Coordinator {
    /// Create a coordinator with the given identity and collaborators
    pub fn new(
        config: CoordinatorConfig,
        self_id: impl Into<String>,
        leases: Arc<dyn LeaseStore>,
        members: Arc<dyn MemberStore>,
        shards: Arc<dyn ShardSource>,
        supervisor: Arc<WorkerSupervisor>,
    ) -> Self {
        Self {
            config,
            self_id: self_id.into(),
            leases,
            members,
            shards,
            supervisor,
            shutdown: ShutdownSignal::new(),
        }
    }

    /// This instance's member id
    pub fn self_id(&self) -> &str {
        &self.self_id
    }

    /// The worker supervisor
    pub fn supervisor(&self) -> Arc<WorkerSupervisor> {
        self.supervisor.clone()
    }

    /// Signal observed by every loop this coordinator starts
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// Bootstrap and run until shutdown.
    ///
    /// Returns the terminal error when bootstrap fails; every other error
    /// is logged and survived.
    pub async fn run(&self) -> Result<()> {
        info!(
            "Coordinator {} starting for stream {}",
            self.self_id, self.config.stream_name
        );

        if let Err(e) = self.bootstrap().await {
            let reason = e.to_string();
            return self
                .kill_all_consumers(WardenError::BootstrapFailed { reason })
                .await;
        }

        let (tx, mut rx) = mpsc::channel::<NetworkView>(8);

        tokio::spawn(membership::report_loop(
            self.members.clone(),
            self.supervisor.clone(),
            self.self_id.clone(),
            self.config.member_ttl,
            self.config.report_interval,
            self.shutdown.clone(),
        ));
        tokio::spawn(membership::fetch_loop(
            self.members.clone(),
            self.self_id.clone(),
            self.config.fetch_interval,
            self.config.gc_interval,
            tx,
            self.shutdown.clone(),
        ));

        if let Some(addr) = self.config.health_addr {
            tokio::spawn(health::serve(
                addr,
                self.supervisor.clone(),
                self.shutdown.clone(),
            ));
        }

        let mut shutdown_rx = self.shutdown.subscribe();
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                view = rx.recv() => match view {
                    Some(view) => self.handle_network_update(view).await,
                    None => break,
                }
            }
        }

        info!("Coordinator {} stopped", self.self_id);
        Ok(())
    }

    async fn bootstrap(&self) -> Result<()> {
        self.leases.ensure_table().await?;
        self.members.ensure_table().await?;
        Ok(())
    }

    /// One allocation tick: at most one acquire or one shed, never both.
    pub async fn handle_network_update(&self, view: NetworkView) {
        if self.supervisor.reset_started() {
            return;
        }

        let count = self.supervisor.count();
        match decide(count, &view.peers) {
            Decision::Acquire => self.try_acquire().await,
            Decision::Shed => self.shed_one().await,
            Decision::Hold => {}
        }
    }

    /// Concurrently fetch the shard and lease views and pick a candidate.
    pub async fn fetch_available_shard(&self) -> Result<Option<ShardCandidate>> {
        let (shard_ids, leases) = tokio::join!(
            self.shards.list_shards(&self.config.stream_name),
            self.leases.fetch_all(),
        );
        Ok(next_candidate(&shard_ids?, &leases?, now_ms()))
    }

    async fn try_acquire(&self) {
        // any error skips this tick; the next view recomputes from scratch
        let candidate = match self.fetch_available_shard().await {
            Ok(Some(candidate)) => candidate,
            Ok(None) => return,
            Err(e) => {
                error!("Skipping acquire tick: {}", e);
                return;
            }
        };

        match self
            .supervisor
            .spawn(&candidate.shard_id, candidate.take_over_counter)
        {
            Ok(_) => {}
            Err(WardenError::ShutdownInProgress) => {}
            Err(e) => error!("Failed to spawn worker for {}: {}", candidate.shard_id, e),
        }
    }

    async fn shed_one(&self) {
        let Some(victim) = self.supervisor.oldest() else {
            return;
        };
        debug!("Shedding worker {}", victim);
        WORKERS_SHED.inc();
        self.supervisor.stop(victim).await;
    }

    /// Clean stop: latch the reset flag, stop the loops, then stop every
    /// worker and wait out their grace windows.
    pub async fn shutdown(&self) {
        self.supervisor.begin_reset();
        self.shutdown.shutdown();
        self.supervisor.stop_all().await;
    }

    /// One-shot reset escalation.
    ///
    /// Latches first so no new workers spawn, stops everything, and
    /// surfaces the terminal error to exactly one caller.
    pub async fn kill_all_consumers(&self, err: WardenError) -> Result<()> {
        let first = self.supervisor.begin_reset();
        self.shutdown.shutdown();
        self.supervisor.stop_all().await;

        if first {
            error!("Coordinator {} reset: {}", self.self_id, err);
            Err(err)
        } else {
            Ok(())
        }
    }
}
