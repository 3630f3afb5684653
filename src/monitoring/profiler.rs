/*!
 * Lock Contention Profiler
 *
 * Aggregated wait/hold statistics for every observed lock, recorded from
 * the primitives' acquisition and release paths.
 *
 * # Design: Atomic Recording, Copied Snapshots
 *
 * Recording must never introduce the contention it measures, so every
 * `record_*` call is O(1) on atomic cells - no lock is taken and the
 * observed locks are never touched. The only keyed-map write is the
 * one-time insert on first sight of a lock id.
 *
 * `snapshot` returns an owned, serializable copy. Recording that lands
 * while the copy is being built may or may not be included; individual
 * fields are always whole values that were actually held.
 */

use crate::core::data_structures::InlineString;
use crate::sync::AtomicCounter;
use ahash::RandomState;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Contention classification from the observed contention rate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentionSeverity {
    None,
    Low,
    Moderate,
    High,
    Critical,
}

impl ContentionSeverity {
    /// Thresholds: <1% none, <10% low, <30% moderate, <60% high
    pub fn from_rate(rate: f64) -> Self {
        if rate < 0.01 {
            Self::None
        } else if rate < 0.1 {
            Self::Low
        } else if rate < 0.3 {
            Self::Moderate
        } else if rate < 0.6 {
            Self::High
        } else {
            Self::Critical
        }
    }
}

#[derive(Default)]
struct LockStatsCell {
    acquisitions: AtomicCounter,
    contended: AtomicCounter,
    total_wait_ns: AtomicCounter,
    max_wait_ns: AtomicCounter,
    total_hold_ns: AtomicCounter,
    max_hold_ns: AtomicCounter,
    max_concurrent_readers: AtomicCounter,
}

/// Immutable per-lock statistics copy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockSnapshot {
    pub acquisitions: u64,
    pub contended: u64,
    pub total_wait_ns: u64,
    pub max_wait_ns: u64,
    pub avg_wait_ns: u64,
    pub total_hold_ns: u64,
    pub max_hold_ns: u64,
    pub avg_hold_ns: u64,
    pub contention_rate: f64,
    pub max_concurrent_readers: u64,
    pub severity: ContentionSeverity,
}

impl LockStatsCell {
    fn snapshot(&self) -> LockSnapshot {
        let acquisitions = self.acquisitions.get();
        let contended = self.contended.get();
        let total_wait_ns = self.total_wait_ns.get();
        let total_hold_ns = self.total_hold_ns.get();

        let contention_rate = if acquisitions == 0 {
            0.0
        } else {
            contended as f64 / acquisitions as f64
        };

        LockSnapshot {
            acquisitions,
            contended,
            total_wait_ns,
            max_wait_ns: self.max_wait_ns.get(),
            avg_wait_ns: if contended == 0 {
                0
            } else {
                total_wait_ns / contended
            },
            total_hold_ns,
            max_hold_ns: self.max_hold_ns.get(),
            avg_hold_ns: if acquisitions == 0 {
                0
            } else {
                total_hold_ns / acquisitions
            },
            contention_rate,
            max_concurrent_readers: self.max_concurrent_readers.get(),
            severity: ContentionSeverity::from_rate(contention_rate),
        }
    }
}

/// Point-in-time view across all observed locks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfilerSnapshot {
    pub locks: HashMap<String, LockSnapshot>,
}

impl ProfilerSnapshot {
    pub fn get(&self, lock_id: &str) -> Option<&LockSnapshot> {
        self.locks.get(lock_id)
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    /// Lock ids at or above the given severity
    pub fn hot_locks(&self, at_least: ContentionSeverity) -> Vec<&str> {
        let floor = at_least as u8;
        self.locks
            .iter()
            .filter(|(_, s)| s.severity as u8 >= floor)
            .map(|(id, _)| id.as_str())
            .collect()
    }
}

/// Contention profiler shared by the instrumented primitives
pub struct LockProfiler {
    stats: DashMap<InlineString, Arc<LockStatsCell>, RandomState>,
}

impl LockProfiler {
    pub fn new() -> Self {
        Self {
            stats: DashMap::with_hasher(RandomState::new()),
        }
    }

    /// Record one acquisition and how long it waited
    ///
    /// A zero wait is an uncontended acquisition; anything else counts as
    /// contention and accumulates into the wait totals.
    pub fn record_wait(&self, lock_id: &str, wait: Duration) {
        let cell = self.cell(lock_id);
        cell.acquisitions.increment();
        if !wait.is_zero() {
            let wait_ns = wait.as_nanos() as u64;
            cell.contended.increment();
            cell.total_wait_ns.add(wait_ns);
            cell.max_wait_ns.fetch_max(wait_ns);
        }
    }

    /// Record how long a granted acquisition held the lock
    pub fn record_hold(&self, lock_id: &str, hold: Duration) {
        let cell = self.cell(lock_id);
        let hold_ns = hold.as_nanos() as u64;
        cell.total_hold_ns.add(hold_ns);
        cell.max_hold_ns.fetch_max(hold_ns);
    }

    /// Record the reader count observed at a shared admission
    pub fn record_readers(&self, lock_id: &str, concurrent: u64) {
        self.cell(lock_id).max_concurrent_readers.fetch_max(concurrent);
    }

    /// Owned, serializable copy of everything observed so far
    pub fn snapshot(&self) -> ProfilerSnapshot {
        let locks = self
            .stats
            .iter()
            .map(|entry| (entry.key().to_string(), entry.value().snapshot()))
            .collect();
        ProfilerSnapshot { locks }
    }

    /// Drop one lock's statistics (registry eviction path)
    pub fn forget(&self, lock_id: &str) {
        self.stats.remove(lock_id);
    }

    /// Drop all statistics
    pub fn reset(&self) {
        self.stats.clear();
    }

    pub fn observed_locks(&self) -> usize {
        self.stats.len()
    }

    fn cell(&self, lock_id: &str) -> Arc<LockStatsCell> {
        if let Some(cell) = self.stats.get(lock_id) {
            return cell.clone();
        }
        self.stats
            .entry(InlineString::from(lock_id))
            .or_insert_with(Arc::default)
            .clone()
    }
}

impl Default for LockProfiler {
    fn default() -> Self {
        Self::new()
    }
}
