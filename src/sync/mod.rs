/*!
 * Synchronization Primitives
 *
 * The concurrency core: a saturating atomic counter, a seqlock ring buffer
 * for high-frequency records, a fair async reader/writer lock, and a keyed
 * lock registry with idle eviction.
 *
 * # Composition
 *
 * Consumers receive lock and buffer instances explicitly (constructor or
 * registry); nothing here retrofits itself onto callers or falls back to an
 * alternative implementation at runtime.
 */

mod counter;
mod manager;
mod ring;
mod rwlock;

pub use counter::AtomicCounter;
pub use manager::LockManager;
pub use ring::{RingBatch, RingBuffer, RingStats};
pub use rwlock::{AsyncRwLock, LockCounters, ReadGuard, WriteGuard};
