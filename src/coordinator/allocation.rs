//! Allocation decisions
//!
//! Pure logic turning (local load, peer loads, shard view, lease view)
//! into at most one action per tick. The two inequalities create a
//! stable band of width 1 around the minimum peer load, so instances
//! settle instead of trading shards back and forth.

use std::collections::{HashMap, HashSet};

use crate::lease::Lease;

/// What one network tick asks of this instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Claim one more shard
    Acquire,
    /// Stop one worker
    Shed,
    /// Stay put
    Hold,
}

/// Decide the action for one tick.
///
/// Acquire when idle, alone, or at-or-below the lightest peer; shed when
/// more than one above it; hold inside the band.
pub fn decide(worker_count: usize, peers: &HashMap<String, u64>) -> Decision {
    let min_peer_load = match peers.values().copied().min() {
        // no live peers: take everything on offer
        None => return Decision::Acquire,
        Some(min) => min,
    };

    let count = worker_count as u64;
    if worker_count == 0 || count <= min_peer_load {
        Decision::Acquire
    } else if count > min_peer_load + 1 {
        Decision::Shed
    } else {
        Decision::Hold
    }
}

/// A shard worth spawning a worker for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardCandidate {
    /// Shard to claim
    pub shard_id: String,
    /// Counter to take an expired lease over at; None claims fresh
    pub take_over_counter: Option<u64>,
}

/// Pick the shard an acquire should go after.
///
/// Never-leased shards win in stream order; otherwise the first expired,
/// unfinished lease in scan order is taken over at its current counter.
/// Finished shards are never revisited.
pub fn next_candidate(
    shard_ids: &[String],
    leases: &[Lease],
    now_ms: u64,
) -> Option<ShardCandidate> {
    let finished: HashSet<&str> = leases
        .iter()
        .filter(|lease| lease.is_finished)
        .map(|lease| lease.shard_id.as_str())
        .collect();
    let leased: HashSet<&str> = leases
        .iter()
        .map(|lease| lease.shard_id.as_str())
        .collect();

    for shard_id in shard_ids {
        if !finished.contains(shard_id.as_str()) && !leased.contains(shard_id.as_str()) {
            return Some(ShardCandidate {
                shard_id: shard_id.clone(),
                take_over_counter: None,
            });
        }
    }

    leases
        .iter()
        .find(|lease| lease.is_expired(now_ms) && !lease.is_finished)
        .map(|lease| ShardCandidate {
            shard_id: lease.shard_id.clone(),
            take_over_counter: Some(lease.lease_counter),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peers(loads: &[(&str, u64)]) -> HashMap<String, u64> {
        loads.iter().map(|(id, n)| (id.to_string(), *n)).collect()
    }

    fn lease(shard_id: &str, counter: u64, expires_at_ms: u64, finished: bool) -> Lease {
        Lease {
            shard_id: shard_id.into(),
            lease_counter: counter,
            expires_at_ms,
            owner: Some("someone".into()),
            checkpoint: None,
            is_finished: finished,
        }
    }

    #[test]
    fn test_acquires_when_alone() {
        assert_eq!(decide(0, &HashMap::new()), Decision::Acquire);
        assert_eq!(decide(5, &HashMap::new()), Decision::Acquire);
    }

    #[test]
    fn test_band_is_stable() {
        let view = peers(&[("b", 2), ("c", 4)]);
        assert_eq!(decide(0, &view), Decision::Acquire);
        assert_eq!(decide(2, &view), Decision::Acquire);
        assert_eq!(decide(3, &view), Decision::Hold);
        assert_eq!(decide(4, &view), Decision::Shed);
    }

    #[test]
    fn test_decision_is_idempotent() {
        let view = peers(&[("b", 1)]);
        let first = decide(3, &view);
        assert_eq!(first, decide(3, &view));
        assert_eq!(first, Decision::Shed);
    }

    #[test]
    fn test_new_shards_win_in_stream_order() {
        let shard_ids: Vec<String> = ["shard-0000", "shard-0001", "shard-0002"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let leases = vec![lease("shard-0000", 1, u64::MAX, false)];

        let candidate = next_candidate(&shard_ids, &leases, 1_000).unwrap();
        assert_eq!(candidate.shard_id, "shard-0001");
        assert_eq!(candidate.take_over_counter, None);
    }

    #[test]
    fn test_expired_lease_is_taken_over() {
        let shard_ids = vec!["shard-0000".to_string(), "shard-0001".to_string()];
        let leases = vec![
            lease("shard-0000", 3, u64::MAX, false),
            lease("shard-0001", 7, 500, false),
        ];

        let candidate = next_candidate(&shard_ids, &leases, 1_000).unwrap();
        assert_eq!(candidate.shard_id, "shard-0001");
        assert_eq!(candidate.take_over_counter, Some(7));
    }

    #[test]
    fn test_finished_shards_are_never_reclaimed() {
        let shard_ids = vec!["shard-0000".to_string()];
        let leases = vec![lease("shard-0000", 9, 500, true)];

        assert_eq!(next_candidate(&shard_ids, &leases, 1_000), None);
    }

    #[test]
    fn test_fully_leased_and_live_yields_nothing() {
        let shard_ids = vec!["shard-0000".to_string()];
        let leases = vec![lease("shard-0000", 2, u64::MAX, false)];

        assert_eq!(next_candidate(&shard_ids, &leases, 1_000), None);
    }
}
