//! Prometheus metrics for monitoring
//!
//! Counters and gauges for coordinator observability, exported in
//! Prometheus text format over the health server.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Counter metric (monotonically increasing)
pub struct Counter {
    value: AtomicU64,
    name: &'static str,
    help: &'static str,
}

impl Counter {
    /// Create a new counter
    pub const fn new(name: &'static str, help: &'static str) -> Self {
        Self {
            value: AtomicU64::new(0),
            name,
            help,
        }
    }

    /// Increment by 1
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment by delta
    pub fn inc_by(&self, delta: u64) {
        self.value.fetch_add(delta, Ordering::Relaxed);
    }

    /// Get current value
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    /// Format as Prometheus metric
    pub fn to_prometheus(&self) -> String {
        format!(
            "# HELP {} {}\n# TYPE {} counter\n{} {}\n",
            self.name,
            self.help,
            self.name,
            self.name,
            self.get()
        )
    }
}

/// Gauge metric (can go up or down)
pub struct Gauge {
    value: AtomicI64,
    name: &'static str,
    help: &'static str,
}

impl Gauge {
    /// Create a new gauge
    pub const fn new(name: &'static str, help: &'static str) -> Self {
        Self {
            value: AtomicI64::new(0),
            name,
            help,
        }
    }

    /// Set value
    pub fn set(&self, val: i64) {
        self.value.store(val, Ordering::Relaxed);
    }

    /// Get current value
    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }

    /// Format as Prometheus metric
    pub fn to_prometheus(&self) -> String {
        format!(
            "# HELP {} {}\n# TYPE {} gauge\n{} {}\n",
            self.name,
            self.help,
            self.name,
            self.name,
            self.get()
        )
    }
}

/// Standard shardwarden metrics
pub mod standard {
    use super::*;

    /// Live worker processes on this instance
    pub static ACTIVE_WORKERS: Gauge =
        Gauge::new("warden_active_workers", "Number of live worker processes");

    /// Peers currently visible in the member table (excluding self)
    pub static PEERS_VISIBLE: Gauge =
        Gauge::new("warden_peers_visible", "Number of live peer instances");

    /// Workers spawned over the process lifetime
    pub static WORKERS_SPAWNED: Counter = Counter::new(
        "warden_workers_spawned_total",
        "Total worker processes spawned",
    );

    /// Workers stopped by a shed decision
    pub static WORKERS_SHED: Counter = Counter::new(
        "warden_workers_shed_total",
        "Total workers stopped to shed load",
    );

    /// Workers that exited with a non-zero status
    pub static WORKER_CRASHES: Counter = Counter::new(
        "warden_worker_crashes_total",
        "Total worker processes that exited non-zero",
    );

    /// Expired member rows deleted by garbage collection
    pub static MEMBERS_COLLECTED: Counter = Counter::new(
        "warden_members_collected_total",
        "Total expired cluster-member rows deleted",
    );
}

/// Gather all standard metrics in Prometheus text format
pub fn gather_system_metrics() -> String {
    let mut output = String::new();

    output.push_str(&standard::ACTIVE_WORKERS.to_prometheus());
    output.push_str(&standard::PEERS_VISIBLE.to_prometheus());
    output.push_str(&standard::WORKERS_SPAWNED.to_prometheus());
    output.push_str(&standard::WORKERS_SHED.to_prometheus());
    output.push_str(&standard::WORKER_CRASHES.to_prometheus());
    output.push_str(&standard::MEMBERS_COLLECTED.to_prometheus());

    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter() {
        let counter = Counter::new("test_counter", "Test counter");
        assert_eq!(counter.get(), 0);

        counter.inc();
        counter.inc();
        assert_eq!(counter.get(), 2);
    }

    #[test]
    fn test_gauge() {
        let gauge = Gauge::new("test_gauge", "Test gauge");
        gauge.set(4);
        assert_eq!(gauge.get(), 4);

        let prometheus = gauge.to_prometheus();
        assert!(prometheus.contains("test_gauge 4"));
    }
}
