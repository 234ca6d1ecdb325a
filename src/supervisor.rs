//! Worker process supervisor
//!
//! Spawns one isolated OS process per owned shard and tracks its
//! lifecycle. The supervisor never interprets worker behavior beyond the
//! exit code; a crashed worker is pruned and the allocation path decides
//! whether to replace it on a later tick.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::error::{Result, WardenError};
use crate::metrics::standard::{ACTIVE_WORKERS, WORKERS_SPAWNED, WORKER_CRASHES};
use crate::worker::options::{ControlMessage, LaunchProfile, WORKER_OPTIONS_ENV};
use crate::DEFAULT_SHUTDOWN_GRACE_SECS;

/// Handle to one supervised worker
pub type WorkerId = u64;

/// How long a child must survive its launch before the handle counts as
/// running; a crash inside this window is Spawning -> Exited
const SPAWN_CONFIRM_WINDOW: Duration = Duration::from_millis(250);

/// Lifecycle of one handle; Exited handles are removed from the live set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerPhase {
    /// Process launched, not yet confirmed alive
    Spawning,
    /// Process outlived its launch window
    Running,
    /// Shutdown message sent, grace timer armed
    Stopping,
    /// Process gone; the handle is pruned
    Exited,
}

/// Configuration for the supervisor
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Worker process argv; the options record rides in the environment
    pub worker_command: Vec<String>,
    /// Grace period between the shutdown message and a forced kill
    pub shutdown_grace: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            worker_command: vec!["worker".into()],
            shutdown_grace: Duration::from_secs(DEFAULT_SHUTDOWN_GRACE_SECS),
        }
    }
}

struct WorkerEntry {
    shard_id: String,
    lease_counter: Option<u64>,
    started_at: Instant,
    phase: WorkerPhase,
    stdin: Option<ChildStdin>,
    stop_tx: watch::Sender<bool>,
    exited_rx: watch::Receiver<bool>,
}

/// Snapshot of one live worker, for health and tests
#[derive(Debug, Clone)]
pub struct WorkerSnapshot {
    pub id: WorkerId,
    pub shard_id: String,
    pub lease_counter: Option<u64>,
    pub phase: WorkerPhase,
}

/// Spawns and stops per-shard worker processes
pub struct WorkerSupervisor {
    config: SupervisorConfig,
    launch: LaunchProfile,
    workers: Arc<Mutex<HashMap<WorkerId, WorkerEntry>>>,
    next_id: AtomicU64,
    reset_started: AtomicBool,
}

impl WorkerSupervisor {
    /// Create a supervisor launching workers from the given profile
    pub fn new(config: SupervisorConfig, launch: LaunchProfile) -> Self {
        Self {
            config,
            launch,
            workers: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
            reset_started: AtomicBool::new(false),
        }
    }

    /// Start an isolated worker process for one shard.
    ///
    /// `lease_counter` is the takeover counter; None means claim fresh.
    /// The child performs the CAS itself and exits non-zero when it loses.
    pub fn spawn(&self, shard_id: &str, lease_counter: Option<u64>) -> Result<WorkerId> {
        if self.reset_started.load(Ordering::SeqCst) {
            return Err(WardenError::ShutdownInProgress);
        }

        let options = self.launch.options_for(shard_id, lease_counter);
        let blob = options.encode()?;

        let (program, args) =
            self.config
                .worker_command
                .split_first()
                .ok_or_else(|| WardenError::SpawnFailed {
                    shard_id: shard_id.into(),
                    reason: "worker command is empty".into(),
                })?;

        let mut child = Command::new(program)
            .args(args)
            .env(WORKER_OPTIONS_ENV, blob)
            .stdin(Stdio::piped())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| WardenError::SpawnFailed {
                shard_id: shard_id.into(),
                reason: e.to_string(),
            })?;

        let stdin = child.stdin.take();
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (stop_tx, stop_rx) = watch::channel(false);
        let (exit_tx, exited_rx) = watch::channel(false);

        let live = {
            let mut workers = self.workers.lock();
            workers.insert(
                id,
                WorkerEntry {
                    shard_id: shard_id.to_string(),
                    lease_counter,
                    started_at: Instant::now(),
                    phase: WorkerPhase::Spawning,
                    stdin,
                    stop_tx,
                    exited_rx,
                },
            );
            workers.len()
        };

        WORKERS_SPAWNED.inc();
        ACTIVE_WORKERS.set(live as i64);
        info!(
            "Spawned worker {} for shard {} (takeover counter {:?})",
            id, shard_id, lease_counter
        );

        tokio::spawn(monitor(
            child,
            id,
            shard_id.to_string(),
            stop_rx,
            exit_tx,
            self.config.shutdown_grace,
            self.workers.clone(),
        ));

        Ok(id)
    }

    /// Ask one worker to stop.
    ///
    /// Sends the structured shutdown message, then waits for the child to
    /// exit; the monitor hard-kills it after the grace period. Resolves
    /// once the handle is gone. Unknown handles are already gone.
    pub async fn stop(&self, id: WorkerId) {
        let (stdin, stop_tx, mut exited_rx) = {
            let mut workers = self.workers.lock();
            match workers.get_mut(&id) {
                None => return,
                Some(entry) => {
                    entry.phase = WorkerPhase::Stopping;
                    (
                        entry.stdin.take(),
                        entry.stop_tx.clone(),
                        entry.exited_rx.clone(),
                    )
                }
            }
        };

        if let Some(mut stdin) = stdin {
            let mut line = serde_json::to_string(&ControlMessage::shutdown())
                .expect("shutdown message serializes");
            line.push('\n');
            if let Err(e) = stdin.write_all(line.as_bytes()).await {
                warn!("Failed to send shutdown to worker {}: {}", id, e);
            }
            // dropping stdin closes the pipe; EOF doubles as the signal
        }

        let _ = stop_tx.send(true);

        while !*exited_rx.borrow() {
            if exited_rx.changed().await.is_err() {
                break;
            }
        }
    }

    /// Stop every live worker concurrently.
    pub async fn stop_all(&self) {
        let ids: Vec<WorkerId> = self.workers.lock().keys().copied().collect();
        if ids.is_empty() {
            return;
        }
        info!("Stopping {} workers", ids.len());
        futures::future::join_all(ids.into_iter().map(|id| self.stop(id))).await;
    }

    /// Current live handle count.
    pub fn count(&self) -> usize {
        self.workers.lock().len()
    }

    /// The longest-running live handle; the deterministic shed victim.
    pub fn oldest(&self) -> Option<WorkerId> {
        self.workers
            .lock()
            .iter()
            .min_by_key(|(_, entry)| entry.started_at)
            .map(|(id, _)| *id)
    }

    /// Snapshot of all live workers.
    pub fn snapshot(&self) -> Vec<WorkerSnapshot> {
        self.workers
            .lock()
            .iter()
            .map(|(id, entry)| WorkerSnapshot {
                id: *id,
                shard_id: entry.shard_id.clone(),
                lease_counter: entry.lease_counter,
                phase: entry.phase,
            })
            .collect()
    }

    /// Latch the reset flag. Returns true for the first caller;
    /// afterwards no new workers can be spawned.
    pub fn begin_reset(&self) -> bool {
        !self.reset_started.swap(true, Ordering::SeqCst)
    }

    /// True once a reset has begun.
    pub fn reset_started(&self) -> bool {
        self.reset_started.load(Ordering::SeqCst)
    }
}

/// Per-child task: confirms the launch, observes the exit status,
/// enforces the stop grace window, and prunes the handle.
async fn monitor(
    mut child: Child,
    id: WorkerId,
    shard_id: String,
    mut stop_rx: watch::Receiver<bool>,
    exit_tx: watch::Sender<bool>,
    grace: Duration,
    workers: Arc<Mutex<HashMap<WorkerId, WorkerEntry>>>,
) {
    let confirm = tokio::time::sleep(SPAWN_CONFIRM_WINDOW);
    tokio::pin!(confirm);
    let mut confirmed = false;

    let status = loop {
        tokio::select! {
            status = child.wait() => break status,
            _ = &mut confirm, if !confirmed => {
                confirmed = true;
                confirm_running(&workers, id);
            }
            _ = stop_rx.changed() => {
                break match timeout(grace, child.wait()).await {
                    Ok(status) => status,
                    Err(_) => {
                        warn!(
                            "Worker {} for shard {} still alive after {:?} grace, killing",
                            id, shard_id, grace
                        );
                        let _ = child.kill().await;
                        child.wait().await
                    }
                };
            }
        }
    };

    match status {
        Ok(status) if status.success() => {
            info!("Worker {} for shard {} exited cleanly", id, shard_id);
        }
        Ok(status) => {
            WORKER_CRASHES.inc();
            error!(
                "Worker {} for shard {} exited with {}",
                id, shard_id, status
            );
        }
        Err(e) => {
            error!("Failed to reap worker {} for shard {}: {}", id, shard_id, e);
        }
    }

    let live = {
        let mut workers = workers.lock();
        if let Some(entry) = workers.get_mut(&id) {
            entry.phase = WorkerPhase::Exited;
        }
        workers.remove(&id);
        workers.len()
    };
    ACTIVE_WORKERS.set(live as i64);
    let _ = exit_tx.send(true);
}

/// Spawning -> Running, once the child has outlived its launch window.
/// A handle already moved to Stopping keeps that phase.
fn confirm_running(workers: &Arc<Mutex<HashMap<WorkerId, WorkerEntry>>>, id: WorkerId) {
    if let Some(entry) = workers.lock().get_mut(&id) {
        if entry.phase == WorkerPhase::Spawning {
            entry.phase = WorkerPhase::Running;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::options::{ConnectionConfig, IteratorType};

    fn test_supervisor(command: &[&str], grace: Duration) -> WorkerSupervisor {
        WorkerSupervisor::new(
            SupervisorConfig {
                worker_command: command.iter().map(|s| s.to_string()).collect(),
                shutdown_grace: grace,
            },
            LaunchProfile {
                table_name: "test-leases".into(),
                connection: ConnectionConfig::default(),
                stream_name: "test-stream".into(),
                starting_iterator_type: IteratorType::TrimHorizon,
                owner: "test-instance".into(),
                lease_duration: Duration::from_secs(10),
            },
        )
    }

    #[tokio::test]
    async fn test_fast_crash_is_pruned() {
        let supervisor = test_supervisor(&["sh", "-c", "exit 3"], Duration::from_secs(1));
        supervisor.spawn("shard-0000", None).unwrap();

        // SPAWNING -> EXITED without a stop is a legal transition
        for _ in 0..50 {
            if supervisor.count() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        panic!("crashed worker was not pruned");
    }

    #[tokio::test]
    async fn test_spawn_refused_after_reset() {
        let supervisor = test_supervisor(&["sh", "-c", "exit 0"], Duration::from_secs(1));
        assert!(supervisor.begin_reset());
        assert!(!supervisor.begin_reset());

        let err = supervisor.spawn("shard-0000", None).unwrap_err();
        assert!(matches!(err, WardenError::ShutdownInProgress));
    }

    #[tokio::test]
    async fn test_handle_runs_after_launch_window() {
        let supervisor = test_supervisor(&["sleep", "30"], Duration::from_millis(200));
        supervisor.spawn("shard-0000", None).unwrap();

        assert_eq!(supervisor.snapshot()[0].phase, WorkerPhase::Spawning);

        tokio::time::sleep(SPAWN_CONFIRM_WINDOW + Duration::from_millis(200)).await;
        assert_eq!(supervisor.snapshot()[0].phase, WorkerPhase::Running);

        supervisor.stop_all().await;
    }

    #[tokio::test]
    async fn test_oldest_is_first_spawned() {
        let supervisor = test_supervisor(&["sleep", "30"], Duration::from_millis(200));
        let first = supervisor.spawn("shard-0000", None).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        supervisor.spawn("shard-0001", Some(4)).unwrap();

        assert_eq!(supervisor.count(), 2);
        assert_eq!(supervisor.oldest(), Some(first));

        supervisor.stop_all().await;
        assert_eq!(supervisor.count(), 0);
    }
}
