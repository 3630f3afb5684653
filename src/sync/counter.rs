/*!
 * Atomic Counter
 *
 * Lock-free saturating counter for cross-task statistics.
 *
 * # Design: Saturate-and-Report Overflow
 *
 * Statistics counters feed eviction and profiling decisions, so a silent
 * wrap-around would be worse than a pinned value. Increment clamps at
 * `u64::MAX`, decrement clamps at 0; the first saturation in either
 * direction emits a single `tracing::warn!` and latches a flag readable
 * via `saturated()`.
 *
 * All operations are linearizable: concurrent callers never lose updates
 * and `get()` always returns a value the counter actually held.
 */

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::warn;

/// Lock-free saturating counter
///
/// The backing value is reachable only through the atomic operations below.
/// No operation blocks or suspends.
#[derive(Debug, Default)]
pub struct AtomicCounter {
    value: AtomicU64,
    saturated: AtomicBool,
}

impl AtomicCounter {
    /// Create a counter starting at zero
    #[inline]
    pub const fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
            saturated: AtomicBool::new(false),
        }
    }

    /// Create a counter with an initial value
    #[inline]
    pub const fn with_value(initial: u64) -> Self {
        Self {
            value: AtomicU64::new(initial),
            saturated: AtomicBool::new(false),
        }
    }

    /// Add `n`, clamping at `u64::MAX`. Returns the new value.
    #[inline]
    pub fn add(&self, n: u64) -> u64 {
        let mut current = self.value.load(Ordering::Relaxed);
        loop {
            let next = current.saturating_add(n);
            match self.value.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    if current.checked_add(n).is_none() {
                        self.report_saturation();
                    }
                    return next;
                }
                Err(observed) => current = observed,
            }
        }
    }

    /// Subtract `n`, clamping at 0. Returns the new value.
    #[inline]
    pub fn sub(&self, n: u64) -> u64 {
        let mut current = self.value.load(Ordering::Relaxed);
        loop {
            let next = current.saturating_sub(n);
            match self.value.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    if current.checked_sub(n).is_none() {
                        self.report_saturation();
                    }
                    return next;
                }
                Err(observed) => current = observed,
            }
        }
    }

    /// Increment by one. Returns the new value.
    #[inline(always)]
    pub fn increment(&self) -> u64 {
        self.add(1)
    }

    /// Decrement by one. Returns the new value.
    #[inline(always)]
    pub fn decrement(&self) -> u64 {
        self.sub(1)
    }

    /// Current value
    #[inline(always)]
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Acquire)
    }

    /// Replace `expected` with `new`. Returns `true` on success.
    #[inline]
    pub fn compare_and_swap(&self, expected: u64, new: u64) -> bool {
        self.value
            .compare_exchange(expected, new, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Raise the counter to at least `candidate`. Returns the previous value.
    ///
    /// Used for high-water marks (peak concurrent readers, max wait).
    #[inline]
    pub fn fetch_max(&self, candidate: u64) -> u64 {
        self.value.fetch_max(candidate, Ordering::AcqRel)
    }

    /// Reset to zero, clearing the saturation latch
    #[inline]
    pub fn reset(&self) {
        self.value.store(0, Ordering::Release);
        self.saturated.store(false, Ordering::Release);
    }

    /// Whether the counter ever clamped at a bound
    #[inline]
    pub fn saturated(&self) -> bool {
        self.saturated.load(Ordering::Acquire)
    }

    #[cold]
    fn report_saturation(&self) {
        if !self.saturated.swap(true, Ordering::AcqRel) {
            warn!("atomic counter saturated; value clamped at bound");
        }
    }
}
