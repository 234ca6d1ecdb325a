//! Cluster membership loops
//!
//! Two independent cadences: a report task publishing this instance's
//! load, and a fetch task building the peer view that drives allocation.
//! Either loop outlives any individual error; only shutdown stops them.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::{debug, error, info};

use crate::cluster::MemberStore;
use crate::metrics::standard::{MEMBERS_COLLECTED, PEERS_VISIBLE};
use crate::now_ms;
use crate::shutdown::ShutdownSignal;
use crate::supervisor::WorkerSupervisor;

/// Peer loads as of one fetch tick, excluding self and expired members
#[derive(Debug, Clone, Default)]
pub struct NetworkView {
    /// member id -> last reported worker count
    pub peers: HashMap<String, u64>,
}

/// Publish this instance's worker count on a fixed cadence.
pub(crate) async fn report_loop(
    members: Arc<dyn MemberStore>,
    supervisor: Arc<WorkerSupervisor>,
    self_id: String,
    ttl: Duration,
    period: Duration,
    shutdown: ShutdownSignal,
) {
    let mut ticker = interval(period);
    let mut shutdown_rx = shutdown.subscribe();

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = ticker.tick() => {
                let count = supervisor.count() as u64;
                if let Err(e) = members.report(&self_id, count, ttl).await {
                    error!("Failed to report load: {}", e);
                }
            }
        }
    }
    debug!("Report loop stopped");
}

/// Fetch the peer table on a fixed cadence, publish the view, and sweep
/// expired members at most once per `gc_every`.
pub(crate) async fn fetch_loop(
    members: Arc<dyn MemberStore>,
    self_id: String,
    period: Duration,
    gc_every: Duration,
    tx: mpsc::Sender<NetworkView>,
    shutdown: ShutdownSignal,
) {
    let mut ticker = interval(period);
    let mut shutdown_rx = shutdown.subscribe();
    let mut last_gc: Option<Instant> = None;

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = ticker.tick() => {
                match members.fetch_all().await {
                    Ok(rows) => {
                        let now = now_ms();
                        let peers: HashMap<String, u64> = rows
                            .into_iter()
                            .filter(|m| m.id != self_id && !m.is_expired(now))
                            .map(|m| (m.id, m.active_consumers))
                            .collect();
                        PEERS_VISIBLE.set(peers.len() as i64);

                        // a full allocation actor drops the wake-up; the
                        // next tick recomputes from scratch
                        if tx.try_send(NetworkView { peers }).is_err() {
                            debug!("Allocation busy, dropping network view");
                        }
                    }
                    Err(e) => error!("Failed to fetch peers: {}", e),
                }

                if should_collect(last_gc, Instant::now(), gc_every) {
                    last_gc = Some(Instant::now());
                    match members.garbage_collect(now_ms()).await {
                        Ok(0) => {}
                        Ok(removed) => {
                            MEMBERS_COLLECTED.inc_by(removed as u64);
                            info!("Garbage collected {} expired members", removed);
                        }
                        Err(e) => error!("Member sweep failed: {}", e),
                    }
                }
            }
        }
    }
    debug!("Fetch loop stopped");
}

/// Throttle for the member sweep: at most one run per `every`.
pub(crate) fn should_collect(last: Option<Instant>, now: Instant, every: Duration) -> bool {
    match last {
        None => true,
        Some(at) => now.duration_since(at) >= every,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_sweep_always_runs() {
        assert!(should_collect(None, Instant::now(), Duration::from_secs(60)));
    }

    #[test]
    fn test_sweep_is_throttled() {
        let every = Duration::from_secs(60);
        let start = Instant::now();

        let recent = start - Duration::from_secs(10);
        assert!(!should_collect(Some(recent), start, every));

        let stale = start - Duration::from_secs(61);
        assert!(should_collect(Some(stale), start, every));
    }
}
