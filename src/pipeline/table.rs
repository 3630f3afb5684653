/*!
 * Tabular Market State
 *
 * The unit of locked state: one instrument table guarded by one
 * reader/writer lock. State is reachable only through closures that hold a
 * guard, so the lock discipline is the API, not a convention.
 */

use crate::core::data_structures::InlineString;
use crate::core::errors::Result;
use crate::sync::AsyncRwLock;
use serde::{Deserialize, Serialize};
use std::cell::UnsafeCell;
use std::collections::HashMap;

/// One market-data record as it flows through an ingestion stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tick {
    pub instrument: u32,
    /// Fixed-point price in 1e-8 units
    pub price: i64,
    pub size: u32,
    /// Sequence assigned by the upstream feed
    pub source_seq: u64,
}

/// Last-known values for one instrument
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentRow {
    pub last_price: i64,
    pub last_size: u32,
    pub ticks: u64,
    pub last_source_seq: u64,
}

/// Folded tabular state for one resource
#[derive(Debug, Default)]
pub struct TableState {
    rows: HashMap<u32, InstrumentRow>,
    folded: u64,
}

impl TableState {
    /// Fold one record in. Feed replays can deliver stale sequences, so the
    /// row only moves forward in source order; every tick still counts.
    pub fn apply(&mut self, tick: Tick) {
        let row = self.rows.entry(tick.instrument).or_default();
        if tick.source_seq >= row.last_source_seq {
            row.last_price = tick.price;
            row.last_size = tick.size;
            row.last_source_seq = tick.source_seq;
        }
        row.ticks += 1;
        self.folded += 1;
    }

    pub fn row(&self, instrument: u32) -> Option<InstrumentRow> {
        self.rows.get(&instrument).copied()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Total records folded into this table
    pub fn folded(&self) -> u64 {
        self.folded
    }
}

/// One tabular resource paired with its lock
pub struct Table {
    name: InlineString,
    lock: AsyncRwLock,
    state: UnsafeCell<TableState>,
}

// SAFETY: `state` is only reachable through read_with/write_with, which hold
// the table's lock for the closure's entire run: shared access under a read
// guard, exclusive access under a write guard. The closures cannot leak the
// reference (the borrow is higher-ranked), so aliasing follows the lock's
// mutual-exclusion invariant exactly.
unsafe impl Send for Table {}
unsafe impl Sync for Table {}

impl Table {
    pub(crate) fn new(name: InlineString, lock: AsyncRwLock) -> Self {
        Self {
            name,
            lock,
            state: UnsafeCell::new(TableState::default()),
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The lock guarding this table's state
    #[inline]
    pub fn lock(&self) -> &AsyncRwLock {
        &self.lock
    }

    /// Run `f` with shared access to the state
    pub async fn read_with<R>(&self, f: impl FnOnce(&TableState) -> R) -> Result<R> {
        let _guard = self.lock.read().await?;
        Ok(f(unsafe { &*self.state.get() }))
    }

    /// Run `f` with exclusive access to the state
    pub async fn write_with<R>(&self, f: impl FnOnce(&mut TableState) -> R) -> Result<R> {
        let _guard = self.lock.write().await?;
        Ok(f(unsafe { &mut *self.state.get() }))
    }
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("name", &self.name)
            .field("lock", &self.lock)
            .finish_non_exhaustive()
    }
}
