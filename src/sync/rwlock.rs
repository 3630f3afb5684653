/*!
 * Async Reader/Writer Lock
 *
 * Read-optimized lock for tabular market state: unlimited concurrent
 * readers or one exclusive writer, with a FIFO waiter queue and writer
 * preference to bound writer starvation.
 *
 * # Fairness
 *
 * Requests are served in arrival order within each class. Once a writer is
 * queued, no reader arriving later is admitted before it; readers already
 * holding the lock finish normally. When the last reader (or the writer)
 * releases, the queue head is re-evaluated: the full contiguous run of
 * readers queued ahead of the next writer is admitted together, or a single
 * writer is. A later writer never jumps still-queued readers.
 *
 * # Cancellation and timeouts
 *
 * Waiting is cancel-safe. Dropping a pending acquisition future withdraws
 * the request from the queue; a grant that raced with the drop is rolled
 * back, so no phantom reader or writer count is left behind. A timeout
 * withdraws the request the same way and surfaces `LockTimeout`.
 *
 * The lock is expressed with atomics and short `parking_lot` critical
 * sections (never held across an await), so it is correct on both
 * current-thread and multi-thread runtimes.
 */

use crate::core::config::LockConfig;
use crate::core::data_structures::InlineString;
use crate::core::errors::{Result, SyncError};
use crate::monitoring::LockProfiler;
use crate::sync::counter::AtomicCounter;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Reader,
    Writer,
}

/// Message delivered to a parked waiter
enum Grant {
    Granted,
    Revoked,
}

// Waiter lifecycle, tracked in a cell shared between the queue entry and
// the acquiring future. All transitions happen under the state mutex, which
// is what makes grant/withdraw races resolvable: a withdrawing waiter that
// finds itself no longer QUEUED knows exactly what happened instead.
const QUEUED: u8 = 0;
const GRANTED: u8 = 1;
const REVOKED: u8 = 2;
const ABANDONED: u8 = 3;

struct Waiter {
    ticket: u64,
    role: Role,
    cell: Arc<AtomicU8>,
    tx: oneshot::Sender<Grant>,
}

#[derive(Default)]
struct LockState {
    active_readers: u32,
    writer_active: bool,
    closed: bool,
    next_ticket: u64,
    waiters: VecDeque<Waiter>,
}

struct RwInner {
    name: InlineString,
    config: LockConfig,
    profiler: Option<Arc<LockProfiler>>,
    state: Mutex<LockState>,
    acquisitions: AtomicCounter,
    contentions: AtomicCounter,
    peak_readers: AtomicCounter,
}

/// Per-lock counters since construction
#[derive(Debug, Clone, Copy, Serialize)]
pub struct LockCounters {
    pub acquisitions: u64,
    pub contentions: u64,
    pub peak_readers: u64,
}

/// Async reader/writer lock handle
///
/// Cloning is cheap and yields a handle to the same lock; the registry
/// relies on this to hand the one live instance per key to every caller.
#[derive(Clone)]
pub struct AsyncRwLock {
    inner: Arc<RwInner>,
}

impl AsyncRwLock {
    pub fn new(name: impl Into<InlineString>) -> Self {
        Self::build(name.into(), LockConfig::default(), None)
    }

    pub fn with_config(name: impl Into<InlineString>, config: LockConfig) -> Self {
        Self::build(name.into(), config, None)
    }

    /// Construct with an injected profiler observing every acquisition
    pub fn with_profiler(
        name: impl Into<InlineString>,
        config: LockConfig,
        profiler: Arc<LockProfiler>,
    ) -> Self {
        Self::build(name.into(), config, Some(profiler))
    }

    fn build(name: InlineString, config: LockConfig, profiler: Option<Arc<LockProfiler>>) -> Self {
        Self {
            inner: Arc::new(RwInner {
                name,
                config,
                profiler,
                state: Mutex::new(LockState::default()),
                acquisitions: AtomicCounter::new(),
                contentions: AtomicCounter::new(),
                peak_readers: AtomicCounter::new(),
            }),
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Whether two handles refer to the same lock
    #[inline]
    pub fn same_instance(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Shared acquisition with the configured deadline
    pub async fn read(&self) -> Result<ReadGuard> {
        self.acquire(Role::Reader, self.inner.config.timeout).await?;
        Ok(ReadGuard {
            lock: self.clone(),
            acquired_at: Instant::now(),
        })
    }

    /// Shared acquisition with an explicit deadline
    pub async fn read_timeout(&self, timeout: Duration) -> Result<ReadGuard> {
        self.acquire(Role::Reader, Some(timeout)).await?;
        Ok(ReadGuard {
            lock: self.clone(),
            acquired_at: Instant::now(),
        })
    }

    /// Non-suspending shared acquisition
    pub fn try_read(&self) -> Option<ReadGuard> {
        self.try_acquire(Role::Reader).then(|| ReadGuard {
            lock: self.clone(),
            acquired_at: Instant::now(),
        })
    }

    /// Exclusive acquisition with the configured deadline
    pub async fn write(&self) -> Result<WriteGuard> {
        self.acquire(Role::Writer, self.inner.config.timeout).await?;
        Ok(WriteGuard {
            lock: self.clone(),
            acquired_at: Instant::now(),
        })
    }

    /// Exclusive acquisition with an explicit deadline
    pub async fn write_timeout(&self, timeout: Duration) -> Result<WriteGuard> {
        self.acquire(Role::Writer, Some(timeout)).await?;
        Ok(WriteGuard {
            lock: self.clone(),
            acquired_at: Instant::now(),
        })
    }

    /// Non-suspending exclusive acquisition
    pub fn try_write(&self) -> Option<WriteGuard> {
        self.try_acquire(Role::Writer).then(|| WriteGuard {
            lock: self.clone(),
            acquired_at: Instant::now(),
        })
    }

    /// Revoke every queued waiter and fail all subsequent acquisitions
    ///
    /// Pending acquisitions resolve to `LockCancelled`. Guards already held
    /// are unaffected and release normally.
    pub fn close(&self) {
        let mut state = self.inner.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        let revoked = state.waiters.len();
        for waiter in state.waiters.drain(..) {
            waiter.cell.store(REVOKED, Ordering::Relaxed);
            let _ = waiter.tx.send(Grant::Revoked);
        }
        drop(state);
        if revoked > 0 {
            warn!(lock = %self.inner.name, revoked, "lock closed with queued waiters");
        }
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Current shared holders
    pub fn reader_count(&self) -> u32 {
        self.inner.state.lock().active_readers
    }

    /// Whether the exclusive holder is active
    pub fn writer_active(&self) -> bool {
        self.inner.state.lock().writer_active
    }

    /// Queued acquisition requests
    pub fn waiter_count(&self) -> usize {
        self.inner.state.lock().waiters.len()
    }

    /// No holders and no waiters; the registry's eviction precondition
    pub fn is_idle(&self) -> bool {
        let state = self.inner.state.lock();
        state.active_readers == 0 && !state.writer_active && state.waiters.is_empty()
    }

    pub fn counters(&self) -> LockCounters {
        LockCounters {
            acquisitions: self.inner.acquisitions.get(),
            contentions: self.inner.contentions.get(),
            peak_readers: self.inner.peak_readers.get(),
        }
    }

    fn grantable(state: &LockState, role: Role) -> bool {
        if state.closed || state.writer_active || !state.waiters.is_empty() {
            return false;
        }
        match role {
            Role::Reader => true,
            Role::Writer => state.active_readers == 0,
        }
    }

    fn apply_grant(&self, state: &mut LockState, role: Role) {
        match role {
            Role::Reader => {
                state.active_readers += 1;
                self.track_readers(state.active_readers);
            }
            Role::Writer => state.writer_active = true,
        }
    }

    fn track_readers(&self, concurrent: u32) {
        self.inner.peak_readers.fetch_max(concurrent as u64);
        if let Some(profiler) = &self.inner.profiler {
            profiler.record_readers(&self.inner.name, concurrent as u64);
        }
    }

    fn try_acquire(&self, role: Role) -> bool {
        let mut state = self.inner.state.lock();
        if !Self::grantable(&state, role) {
            return false;
        }
        self.apply_grant(&mut state, role);
        drop(state);
        self.note_acquired(Duration::ZERO);
        true
    }

    async fn acquire(&self, role: Role, timeout: Option<Duration>) -> Result<()> {
        let started = Instant::now();

        let (ticket, cell, rx) = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return Err(SyncError::LockCancelled(self.inner.name.clone()));
            }
            if Self::grantable(&state, role) {
                self.apply_grant(&mut state, role);
                drop(state);
                self.note_acquired(Duration::ZERO);
                return Ok(());
            }

            let (tx, rx) = oneshot::channel();
            let ticket = state.next_ticket;
            state.next_ticket += 1;
            let cell = Arc::new(AtomicU8::new(QUEUED));
            state.waiters.push_back(Waiter {
                ticket,
                role,
                cell: cell.clone(),
                tx,
            });
            (ticket, cell, rx)
        };

        // Withdraws the request if this future is dropped mid-wait
        let mut pending = PendingRequest {
            lock: self,
            ticket,
            role,
            cell: cell.clone(),
            armed: true,
        };

        let outcome = match timeout {
            Some(deadline) => match tokio::time::timeout(deadline, rx).await {
                Ok(received) => received,
                Err(_) => {
                    pending.withdraw();
                    debug!(lock = %self.inner.name, ?role, "acquisition timed out");
                    return Err(SyncError::LockTimeout(self.inner.name.clone()));
                }
            },
            None => rx.await,
        };

        match outcome {
            Ok(Grant::Granted) => {
                pending.armed = false;
                self.note_acquired(started.elapsed());
                Ok(())
            }
            Ok(Grant::Revoked) | Err(_) => {
                pending.armed = false;
                Err(SyncError::LockCancelled(self.inner.name.clone()))
            }
        }
    }

    fn note_acquired(&self, waited: Duration) {
        self.inner.acquisitions.increment();
        if !waited.is_zero() {
            self.inner.contentions.increment();
        }
        if let Some(profiler) = &self.inner.profiler {
            profiler.record_wait(&self.inner.name, waited);
        }
    }

    fn release_read(&self, held: Duration) {
        {
            let mut state = self.inner.state.lock();
            debug_assert!(state.active_readers > 0 && !state.writer_active);
            state.active_readers = state.active_readers.saturating_sub(1);
            if state.active_readers == 0 {
                self.admit(&mut state);
            }
        }
        if let Some(profiler) = &self.inner.profiler {
            profiler.record_hold(&self.inner.name, held);
        }
    }

    fn release_write(&self, held: Duration) {
        {
            let mut state = self.inner.state.lock();
            debug_assert!(state.writer_active && state.active_readers == 0);
            state.writer_active = false;
            self.admit(&mut state);
        }
        if let Some(profiler) = &self.inner.profiler {
            profiler.record_hold(&self.inner.name, held);
        }
    }

    fn release_role(&self, state: &mut LockState, role: Role) {
        match role {
            Role::Reader => {
                state.active_readers = state.active_readers.saturating_sub(1);
                if state.active_readers == 0 {
                    self.admit(state);
                }
            }
            Role::Writer => {
                state.writer_active = false;
                self.admit(state);
            }
        }
    }

    /// Re-evaluate the queue head: admit the contiguous reader run ahead of
    /// the next writer, or a single writer once the lock is free
    fn admit(&self, state: &mut LockState) {
        if state.writer_active {
            return;
        }
        while let Some(front) = state.waiters.front() {
            match front.role {
                Role::Reader => {
                    let waiter = state.waiters.pop_front().expect("front exists");
                    waiter.cell.store(GRANTED, Ordering::Relaxed);
                    if waiter.tx.send(Grant::Granted).is_ok() {
                        state.active_readers += 1;
                        self.track_readers(state.active_readers);
                    } else {
                        // Receiver vanished before its withdraw ran
                        waiter.cell.store(ABANDONED, Ordering::Relaxed);
                    }
                }
                Role::Writer => {
                    if state.active_readers > 0 {
                        break;
                    }
                    let waiter = state.waiters.pop_front().expect("front exists");
                    waiter.cell.store(GRANTED, Ordering::Relaxed);
                    if waiter.tx.send(Grant::Granted).is_ok() {
                        state.writer_active = true;
                        break;
                    }
                    waiter.cell.store(ABANDONED, Ordering::Relaxed);
                }
            }
        }
    }

    /// Remove a waiter that timed out or whose future was dropped
    fn withdraw_request(&self, ticket: u64, role: Role, cell: &AtomicU8) {
        let mut state = self.inner.state.lock();
        match cell.load(Ordering::Relaxed) {
            QUEUED => {
                if let Some(idx) = state.waiters.iter().position(|w| w.ticket == ticket) {
                    state.waiters.remove(idx);
                }
                cell.store(ABANDONED, Ordering::Relaxed);
                // A withdrawn writer may have been the only thing blocking
                // readers queued behind it
                self.admit(&mut state);
            }
            GRANTED => {
                // The grant raced the withdrawal; give it back
                cell.store(ABANDONED, Ordering::Relaxed);
                self.release_role(&mut state, role);
            }
            _ => {}
        }
    }
}

impl std::fmt::Debug for AsyncRwLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("AsyncRwLock")
            .field("name", &self.inner.name)
            .field("active_readers", &state.active_readers)
            .field("writer_active", &state.writer_active)
            .field("waiters", &state.waiters.len())
            .field("closed", &state.closed)
            .finish()
    }
}

/// Cleanup hook for a queued request; idempotent via the waiter cell
struct PendingRequest<'a> {
    lock: &'a AsyncRwLock,
    ticket: u64,
    role: Role,
    cell: Arc<AtomicU8>,
    armed: bool,
}

impl PendingRequest<'_> {
    fn withdraw(&mut self) {
        self.armed = false;
        self.lock.withdraw_request(self.ticket, self.role, &self.cell);
    }
}

impl Drop for PendingRequest<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.lock.withdraw_request(self.ticket, self.role, &self.cell);
        }
    }
}

/// Shared access guard; releases on every exit path
pub struct ReadGuard {
    lock: AsyncRwLock,
    acquired_at: Instant,
}

impl ReadGuard {
    pub fn lock_name(&self) -> &str {
        self.lock.name()
    }
}

impl Drop for ReadGuard {
    fn drop(&mut self) {
        self.lock.release_read(self.acquired_at.elapsed());
    }
}

/// Exclusive access guard; releases on every exit path
pub struct WriteGuard {
    lock: AsyncRwLock,
    acquired_at: Instant,
}

impl WriteGuard {
    pub fn lock_name(&self) -> &str {
        self.lock.name()
    }
}

impl Drop for WriteGuard {
    fn drop(&mut self) {
        self.lock.release_write(self.acquired_at.elapsed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_concurrent_readers() {
        let lock = AsyncRwLock::new("book.BTCUSD");

        let r1 = lock.read().await.unwrap();
        let r2 = lock.read().await.unwrap();
        let r3 = lock.read().await.unwrap();

        assert_eq!(lock.reader_count(), 3);
        assert!(!lock.writer_active());

        drop((r1, r2, r3));
        assert!(lock.is_idle());
    }

    #[tokio::test]
    async fn test_writer_excludes_readers() {
        let lock = AsyncRwLock::new("book.BTCUSD");

        let w = lock.write().await.unwrap();
        assert!(lock.writer_active());
        assert!(lock.try_read().is_none());
        assert!(lock.try_write().is_none());

        drop(w);
        assert!(lock.try_read().is_some());
    }

    #[tokio::test]
    async fn test_reader_blocks_writer_until_release() {
        let lock = AsyncRwLock::new("book.BTCUSD");

        let r = lock.read().await.unwrap();
        assert!(lock.try_write().is_none());
        drop(r);
        assert!(lock.try_write().is_some());
    }

    #[tokio::test]
    async fn test_write_timeout_expires() {
        let lock = AsyncRwLock::new("book.BTCUSD");
        let _r = lock.read().await.unwrap();

        let result = lock.write_timeout(Duration::from_millis(20)).await;
        assert_eq!(
            result.err(),
            Some(SyncError::LockTimeout("book.BTCUSD".into()))
        );

        // The timed-out request left no residue
        assert_eq!(lock.waiter_count(), 0);
        assert_eq!(lock.reader_count(), 1);
    }

    #[tokio::test]
    async fn test_timed_out_writer_unblocks_later_readers() {
        let lock = AsyncRwLock::new("book.BTCUSD");
        let holder = lock.read().await.unwrap();

        let contender = {
            let lock = lock.clone();
            tokio::spawn(async move { lock.write_timeout(Duration::from_millis(30)).await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(lock.waiter_count(), 1);

        // Reader queued behind the writer
        let late_reader = {
            let lock = lock.clone();
            tokio::spawn(async move { lock.read().await.map(|g| drop(g)) })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(lock.waiter_count(), 2);

        // Writer times out; the queued reader must now be admitted even
        // though the original holder is still active
        assert!(contender.await.unwrap().is_err());
        late_reader.await.unwrap().unwrap();
        drop(holder);
        assert!(lock.is_idle());
    }

    #[tokio::test]
    async fn test_close_revokes_waiters() {
        let lock = AsyncRwLock::new("book.BTCUSD");
        let holder = lock.write().await.unwrap();

        let waiter = {
            let lock = lock.clone();
            tokio::spawn(async move { lock.read().await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(lock.waiter_count(), 1);

        lock.close();
        assert_eq!(
            waiter.await.unwrap().err(),
            Some(SyncError::LockCancelled("book.BTCUSD".into()))
        );

        // Existing holder still releases cleanly
        drop(holder);
        assert!(lock.is_idle());
        assert!(lock.read().await.is_err());
    }

    #[tokio::test]
    async fn test_cancelled_waiter_leaves_no_residue() {
        let lock = AsyncRwLock::new("book.BTCUSD");
        let holder = lock.write().await.unwrap();

        let pending = {
            let lock = lock.clone();
            tokio::spawn(async move { lock.read().await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(lock.waiter_count(), 1);

        pending.abort();
        let _ = pending.await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(lock.waiter_count(), 0);

        drop(holder);
        assert!(lock.is_idle());
    }

    #[tokio::test]
    async fn test_counters_track_contention() {
        let lock = AsyncRwLock::new("book.BTCUSD");

        {
            let _r = lock.read().await.unwrap();
        }
        let counters = lock.counters();
        assert_eq!(counters.acquisitions, 1);
        assert_eq!(counters.contentions, 0);

        let w = lock.write().await.unwrap();
        let waiter = {
            let lock = lock.clone();
            tokio::spawn(async move { lock.read().await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        drop(w);
        waiter.await.unwrap().unwrap();

        let counters = lock.counters();
        assert_eq!(counters.acquisitions, 3);
        assert_eq!(counters.contentions, 1);
        assert!(counters.peak_readers >= 1);
    }

    #[tokio::test]
    async fn test_clone_is_same_instance() {
        let lock = AsyncRwLock::new("book.BTCUSD");
        let clone = lock.clone();
        assert!(lock.same_instance(&clone));

        let _w = lock.write().await.unwrap();
        assert!(clone.try_write().is_none());
    }
}
