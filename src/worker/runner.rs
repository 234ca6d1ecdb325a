//! Worker harness
//!
//! Claims the shard lease exactly once, keeps it renewed, listens for the
//! supervisor's shutdown message, and drives the embedder's consumer.
//! A lost CAS at any point ends the process; the coordinator fleet
//! re-decides on its next tick.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::interval;
use tracing::{debug, error, info};

use crate::error::{Result, WardenError};
use crate::lease::{CasOutcome, LeaseStore};
use crate::shutdown::ShutdownSignal;
use crate::worker::options::{ControlMessage, IteratorType, WorkerOptions};

/// How the consumer's run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShardOutcome {
    /// The shard's records are fully drained; the lease is marked finished
    Drained,
    /// Stopped by shutdown; the shard remains open
    Interrupted,
}

/// The embedder's record-processing seam.
///
/// Implementations fetch and process records however they like; the
/// harness owns the lease. Select on `ctx.shutdown` and return promptly
/// once it fires.
#[async_trait::async_trait]
pub trait ShardConsumer: Send {
    async fn run(&mut self, ctx: ShardContext) -> Result<ShardOutcome>;
}

/// Everything a consumer gets from the harness
pub struct ShardContext {
    /// Shard being consumed
    pub shard_id: String,
    /// Where to start reading on a fresh claim
    pub starting_iterator_type: IteratorType,
    /// Fires when the worker must stop
    pub shutdown: ShutdownSignal,
    /// Live lease; use it to persist checkpoints
    pub lease: Arc<LeaseHandle>,
}

/// The worker's live grip on its lease row
pub struct LeaseHandle {
    store: Arc<dyn LeaseStore>,
    shard_id: String,
    owner: String,
    lease_duration: Duration,
    counter: AtomicU64,
    lost: AtomicBool,
}

impl LeaseHandle {
    /// Counter of the last successful write.
    pub fn counter(&self) -> u64 {
        self.counter.load(Ordering::SeqCst)
    }

    /// True once a renewal observed another owner.
    pub fn lost(&self) -> bool {
        self.lost.load(Ordering::SeqCst)
    }

    /// Renew the lease. Returns false when ownership moved on.
    pub async fn renew(&self) -> Result<bool> {
        let outcome = self
            .store
            .renew(&self.shard_id, self.counter(), &self.owner, self.lease_duration)
            .await?;
        Ok(self.absorb(outcome))
    }

    /// Persist the consumer's checkpoint cursor.
    /// Returns false when ownership moved on.
    pub async fn checkpoint(&self, cursor: &str) -> Result<bool> {
        let outcome = self
            .store
            .update_checkpoint(&self.shard_id, self.counter(), &self.owner, cursor)
            .await?;
        Ok(self.absorb(outcome))
    }

    /// Mark the shard fully drained. Returns false when ownership moved on.
    pub async fn mark_finished(&self) -> Result<bool> {
        let outcome = self
            .store
            .mark_finished(&self.shard_id, self.counter(), &self.owner)
            .await?;
        Ok(self.absorb(outcome))
    }

    fn absorb(&self, outcome: CasOutcome) -> bool {
        match outcome {
            CasOutcome::Applied(lease) => {
                self.counter.store(lease.lease_counter, Ordering::SeqCst);
                true
            }
            CasOutcome::Conflict => {
                self.lost.store(true, Ordering::SeqCst);
                false
            }
        }
    }
}

/// Runs one worker process's lease lifecycle
pub struct WorkerRunner {
    options: WorkerOptions,
    store: Arc<dyn LeaseStore>,
    shutdown: ShutdownSignal,
}

impl WorkerRunner {
    /// Create a runner over the given lease store
    pub fn new(options: WorkerOptions, store: Arc<dyn LeaseStore>) -> Self {
        Self {
            options,
            store,
            shutdown: ShutdownSignal::new(),
        }
    }

    /// Signal fired on shutdown message, lost lease, or consumer return
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// Claim the lease and drive the consumer until it returns.
    ///
    /// Returns `WardenError::LeaseLost` when the initial CAS loses or a
    /// renewal observes another owner; the binary maps that to a non-zero
    /// exit so the supervisor prunes the handle.
    pub async fn run<C: ShardConsumer>(&self, consumer: &mut C) -> Result<ShardOutcome> {
        let shard_id = self.options.shard_id.clone();

        let claimed = match self.claim().await? {
            CasOutcome::Applied(lease) => lease,
            CasOutcome::Conflict => {
                debug!("Lost the claim race for shard {}", shard_id);
                return Err(WardenError::LeaseLost {
                    shard_id,
                    counter: self.options.initial_lease_counter.unwrap_or(0),
                });
            }
        };
        info!(
            "Holding shard {} at lease counter {}",
            shard_id, claimed.lease_counter
        );

        let lease = Arc::new(LeaseHandle {
            store: self.store.clone(),
            shard_id: shard_id.clone(),
            owner: self.options.owner.clone(),
            lease_duration: self.options.lease_duration(),
            counter: AtomicU64::new(claimed.lease_counter),
            lost: AtomicBool::new(false),
        });

        let renew_task = tokio::spawn(renew_loop(lease.clone(), self.shutdown.clone()));
        let listener_task = tokio::spawn(shutdown_listener(self.shutdown.clone()));

        let ctx = ShardContext {
            shard_id: shard_id.clone(),
            starting_iterator_type: self.options.starting_iterator_type,
            shutdown: self.shutdown.clone(),
            lease: lease.clone(),
        };
        let outcome = consumer.run(ctx).await;

        self.shutdown.shutdown();
        let _ = renew_task.await;
        listener_task.abort();

        let outcome = outcome?;

        if lease.lost() {
            return Err(WardenError::LeaseLost {
                shard_id,
                counter: lease.counter(),
            });
        }

        if outcome == ShardOutcome::Drained && lease.mark_finished().await? {
            info!("Shard {} drained and marked finished", shard_id);
        }

        Ok(outcome)
    }

    /// Exactly one CAS: fresh claim or takeover at the handed counter.
    async fn claim(&self) -> Result<CasOutcome> {
        let opts = &self.options;
        match opts.initial_lease_counter {
            None => {
                self.store
                    .claim_unheld(&opts.shard_id, &opts.owner, opts.lease_duration())
                    .await
            }
            Some(counter) => {
                self.store
                    .take_over(&opts.shard_id, counter, &opts.owner, opts.lease_duration())
                    .await
            }
        }
    }
}

/// Renew at a third of the lease duration; a conflict means another
/// instance took over and this worker must die.
async fn renew_loop(lease: Arc<LeaseHandle>, shutdown: ShutdownSignal) {
    let mut ticker = interval(lease.lease_duration / 3);
    ticker.tick().await; // the claim itself was the first renewal
    let mut shutdown_rx = shutdown.subscribe();

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = ticker.tick() => {
                match lease.renew().await {
                    Ok(true) => debug!("Renewed lease for shard {}", lease.shard_id),
                    Ok(false) => {
                        error!("Lease for shard {} taken over, stopping", lease.shard_id);
                        shutdown.shutdown();
                        break;
                    }
                    // transient; the lease survives until its expiry
                    Err(e) => error!("Failed to renew shard {}: {}", lease.shard_id, e),
                }
            }
        }
    }
}

/// Read structured control messages from stdin. EOF means the supervisor
/// is gone, which is also a stop.
async fn shutdown_listener(shutdown: ShutdownSignal) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if let Ok(msg) = serde_json::from_str::<ControlMessage>(&line) {
                    if msg.is_shutdown() {
                        info!("Received shutdown message");
                        shutdown.shutdown();
                        break;
                    }
                }
            }
            Ok(None) => {
                info!("Supervisor closed stdin, stopping");
                shutdown.shutdown();
                break;
            }
            Err(_) => break,
        }
    }
}
