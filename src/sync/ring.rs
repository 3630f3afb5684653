/*!
 * Lock-Free Ring Buffer
 *
 * Fixed-capacity ring for single-writer-many-reader high-frequency records,
 * synchronized with per-slot sequence numbers instead of a mutex.
 *
 * # Design: Per-Slot Seqlock
 *
 * Every slot carries a sequence number. For logical position `p` in a ring
 * of capacity `C`, generation `g = p / C + 1`:
 *
 * **Write path** (one concurrent writer per slot, guaranteed by the atomic
 * tail claim):
 * 1. Claim logical position `p` by advancing the tail index
 * 2. Store slot sequence `2g - 1` (odd = write in flight)
 * 3. Write the payload
 * 4. Store slot sequence `2g` (even = stable)
 *
 * **Read path** (lock-free, never blocks the writer):
 * 1. Load sequence; anything but the expected `2g` means the record is
 *    mid-write or already overwritten - skip it
 * 2. Read the payload
 * 3. Re-load the sequence; accept the payload only if unchanged
 *
 * A reader can legitimately miss a record that was overwritten between
 * snapshot and read. That is the documented eventual consistency of
 * `recent`/`read_from`, not a defect; what a reader can never observe is a
 * torn payload.
 *
 * # Overflow
 *
 * `Reject` fails `append` with `BufferFull` at capacity; space is freed by
 * `release`, which advances the head past consumed records.
 * `OverwriteOldest` always accepts and silently advances the head, dropping
 * the oldest record.
 */

use crate::core::config::{OverflowMode, RingConfig};
use crate::core::errors::{Result, SyncError};
use crate::sync::counter::AtomicCounter;
use crossbeam_utils::CachePadded;
use serde::{Deserialize, Serialize};
use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{fence, AtomicU64, Ordering};

struct Slot<T> {
    /// 0 = never written; `2g - 1` while generation `g` is in flight; `2g` stable
    seq: AtomicU64,
    payload: UnsafeCell<MaybeUninit<T>>,
}

impl<T> Slot<T> {
    fn vacant() -> Self {
        Self {
            seq: AtomicU64::new(0),
            payload: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }
}

/// Outcome of inspecting one slot for an expected logical position
enum SlotRead<T> {
    Valid(T),
    /// Slot still holds an older generation or an in-flight write
    InFlight,
    /// Slot was reclaimed by a later lap; the record is gone
    Overwritten,
}

/// Counters accumulated by the buffer since construction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RingStats {
    pub appends: u64,
    pub rejected: u64,
    pub overwritten: u64,
}

/// A cursor-based read: records from `read_from`, where to resume, and how
/// many records were lost to overwrite before the cursor could reach them
#[derive(Debug, Clone)]
pub struct RingBatch<T> {
    pub items: Vec<T>,
    pub next: u64,
    pub missed: u64,
}

/// Lock-free seqlock ring buffer
///
/// `T: Copy` is required: a reader copies a possibly-torn payload out of the
/// slot and discards it if sequence validation fails, which is only sound
/// for plain-data records.
pub struct RingBuffer<T> {
    slots: Box<[Slot<T>]>,
    capacity: u64,
    overflow: OverflowMode,
    /// Next logical write position; monotonically increasing, wraps modulo
    /// capacity only when indexing slots
    tail: CachePadded<AtomicU64>,
    /// Oldest retained logical position
    head: CachePadded<AtomicU64>,
    appends: AtomicCounter,
    rejected: AtomicCounter,
    overwritten: AtomicCounter,
}

// SAFETY: slot payloads are published through the seqlock protocol above -
// a reader only keeps a payload whose sequence was stable across the read,
// and every payload crosses threads by copy. T: Send suffices; readers never
// share references into the slots.
unsafe impl<T: Copy + Send> Send for RingBuffer<T> {}
unsafe impl<T: Copy + Send> Sync for RingBuffer<T> {}

impl<T: Copy> RingBuffer<T> {
    /// Create a buffer with the given configuration
    ///
    /// Fails with `InvalidCapacity` for a zero capacity. The backing storage
    /// is allocated once here and never resized.
    pub fn new(config: RingConfig) -> Result<Self> {
        config.validate()?;

        let mut slots = Vec::with_capacity(config.capacity);
        for _ in 0..config.capacity {
            slots.push(Slot::vacant());
        }

        Ok(Self {
            slots: slots.into_boxed_slice(),
            capacity: config.capacity as u64,
            overflow: config.overflow,
            tail: CachePadded::new(AtomicU64::new(0)),
            head: CachePadded::new(AtomicU64::new(0)),
            appends: AtomicCounter::new(),
            rejected: AtomicCounter::new(),
            overwritten: AtomicCounter::new(),
        })
    }

    /// Convenience constructor
    pub fn with_capacity(capacity: usize, overflow: OverflowMode) -> Result<Self> {
        Self::new(RingConfig::new(capacity, overflow))
    }

    /// Append a record, returning the logical sequence it was assigned
    ///
    /// Never suspends. In `Reject` mode fails with `BufferFull` at capacity;
    /// in `OverwriteOldest` mode always succeeds, dropping the oldest record.
    pub fn append(&self, item: T) -> Result<u64> {
        let pos = match self.overflow {
            OverflowMode::Reject => {
                let head = self.head.load(Ordering::Acquire);
                let mut tail = self.tail.load(Ordering::Relaxed);
                loop {
                    if tail.wrapping_sub(head) >= self.capacity {
                        self.rejected.increment();
                        return Err(SyncError::BufferFull(self.capacity as usize));
                    }
                    match self.tail.compare_exchange_weak(
                        tail,
                        tail + 1,
                        Ordering::AcqRel,
                        Ordering::Relaxed,
                    ) {
                        Ok(_) => break tail,
                        Err(observed) => tail = observed,
                    }
                }
            }
            OverflowMode::OverwriteOldest => {
                let pos = self.tail.fetch_add(1, Ordering::AcqRel);
                let reclaim_to = (pos + 1).saturating_sub(self.capacity);
                let mut head = self.head.load(Ordering::Relaxed);
                while head < reclaim_to {
                    match self.head.compare_exchange_weak(
                        head,
                        reclaim_to,
                        Ordering::AcqRel,
                        Ordering::Relaxed,
                    ) {
                        Ok(_) => {
                            self.overwritten.add(reclaim_to - head);
                            break;
                        }
                        Err(observed) => head = observed,
                    }
                }
                pos
            }
        };

        self.write_slot(pos, item);
        self.appends.increment();
        Ok(pos)
    }

    fn write_slot(&self, pos: u64, item: T) {
        let slot = &self.slots[(pos % self.capacity) as usize];
        let generation = pos / self.capacity + 1;

        // Odd marks the write in flight; the release fence orders the mark
        // before the payload store for any reader that validates afterwards
        slot.seq.store(2 * generation - 1, Ordering::Relaxed);
        fence(Ordering::Release);
        unsafe {
            (*slot.payload.get()).write(item);
        }
        slot.seq.store(2 * generation, Ordering::Release);
    }

    fn read_slot(&self, pos: u64) -> SlotRead<T> {
        let slot = &self.slots[(pos % self.capacity) as usize];
        let expect = (pos / self.capacity + 1) * 2;

        loop {
            let seq = slot.seq.load(Ordering::Acquire);
            if seq < expect {
                return SlotRead::InFlight;
            }
            if seq > expect {
                return SlotRead::Overwritten;
            }

            let payload = unsafe { std::ptr::read_volatile(slot.payload.get()) };
            fence(Ordering::Acquire);
            if slot.seq.load(Ordering::Relaxed) == expect {
                // SAFETY: the sequence was the expected even value before and
                // after the copy, so generation `pos / capacity + 1` fully
                // wrote this payload and nothing overlapped it
                return SlotRead::Valid(unsafe { payload.assume_init() });
            }
            // Sequence moved mid-read; reclassify
        }
    }

    /// Up to `n` most recent records, oldest-first within the window
    ///
    /// Never blocks and never returns a torn record. Under a concurrent
    /// writer in overwrite mode, records at the old end of the window may be
    /// reclaimed mid-scan; those are skipped.
    pub fn recent(&self, n: usize) -> Vec<T> {
        let tail = self.tail.load(Ordering::Acquire);
        let head = self.head.load(Ordering::Acquire);
        let len = tail.saturating_sub(head).min(self.capacity);
        let take = (n as u64).min(len);

        let mut out = Vec::with_capacity(take as usize);
        for pos in (tail - take)..tail {
            if let SlotRead::Valid(item) = self.read_slot(pos) {
                out.push(item);
            }
        }
        out
    }

    /// Read forward from a consumer cursor, up to `max` records
    ///
    /// Returns the records, the cursor to resume from, and the count of
    /// records the cursor lost to overwrite. Stops early at an in-flight
    /// slot so nothing stable is skipped.
    pub fn read_from(&self, cursor: u64, max: usize) -> RingBatch<T> {
        let tail = self.tail.load(Ordering::Acquire);
        let head = self.head.load(Ordering::Acquire);

        let start = if cursor < head { head } else { cursor.min(tail) };
        let mut missed = start.saturating_sub(cursor);
        let end = tail.min(start.saturating_add(max as u64));

        let mut items = Vec::with_capacity((end - start) as usize);
        let mut next = start;
        for pos in start..end {
            match self.read_slot(pos) {
                SlotRead::Valid(item) => {
                    items.push(item);
                    next = pos + 1;
                }
                SlotRead::Overwritten => {
                    missed += 1;
                    next = pos + 1;
                }
                SlotRead::InFlight => break,
            }
        }

        RingBatch {
            items,
            next,
            missed,
        }
    }

    /// Advance the head past consumed records (up to `up_to`, exclusive)
    ///
    /// Frees space in `Reject` mode; a no-op for positions already
    /// reclaimed. Returns the number of records released.
    pub fn release(&self, up_to: u64) -> u64 {
        let tail = self.tail.load(Ordering::Acquire);
        let target = up_to.min(tail);
        let mut head = self.head.load(Ordering::Relaxed);
        loop {
            if target <= head {
                return 0;
            }
            match self.head.compare_exchange_weak(
                head,
                target,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return target - head,
                Err(observed) => head = observed,
            }
        }
    }

    /// Approximate number of retained records
    ///
    /// Head and tail are loaded independently, so the value may lag a
    /// concurrent writer by a record or two.
    #[inline]
    pub fn len(&self) -> usize {
        let tail = self.tail.load(Ordering::Acquire);
        let head = self.head.load(Ordering::Acquire);
        tail.saturating_sub(head).min(self.capacity) as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity as usize
    }

    #[inline]
    pub fn overflow_mode(&self) -> OverflowMode {
        self.overflow
    }

    /// Logical position the next append will take
    #[inline]
    pub fn next_sequence(&self) -> u64 {
        self.tail.load(Ordering::Acquire)
    }

    /// Oldest logical position still retained
    #[inline]
    pub fn oldest_retained(&self) -> u64 {
        self.head.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> RingStats {
        RingStats {
            appends: self.appends.get(),
            rejected: self.rejected.get(),
            overwritten: self.overwritten.get(),
        }
    }
}
