/*!
 * Fine-Grained Lock Registry
 *
 * Maps a resource key to a lazily-created lock, so independent tables
 * contend only with their own readers and writers.
 *
 * # Multi-Lock Ordering
 *
 * When a caller must hold several keyed locks at once, acquisition must
 * follow the global total order over keys: **lexicographic byte order**.
 * `write_ordered` packages that rule; call sites that acquire manually must
 * follow the same order or risk deadlock against those that do.
 *
 * # Eviction
 *
 * `evict_idle` removes entries whose lock has zero holders and zero waiters
 * and whose last use is older than the threshold. A caller that cached a
 * lock handle across an eviction window keeps a working lock, but the next
 * registry lookup creates a fresh instance with reset statistics; re-fetch
 * from the registry instead of caching handles long-term.
 */

use crate::core::config::ManagerConfig;
use crate::core::data_structures::InlineString;
use crate::core::errors::{Result, SyncError};
use crate::monitoring::LockProfiler;
use crate::sync::rwlock::{AsyncRwLock, WriteGuard};
use ahash::RandomState;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

struct LockEntry {
    lock: AsyncRwLock,
    /// Milliseconds since the registry's epoch
    last_used: AtomicU64,
}

/// Registry of per-resource locks with idle eviction
pub struct LockManager {
    locks: DashMap<InlineString, LockEntry, RandomState>,
    config: ManagerConfig,
    profiler: Option<Arc<LockProfiler>>,
    epoch: Instant,
}

impl LockManager {
    pub fn new() -> Self {
        Self::with_config(ManagerConfig::default())
    }

    pub fn with_config(config: ManagerConfig) -> Self {
        info!(max_idle_ms = config.max_idle.as_millis() as u64, "lock registry initialized");
        Self {
            locks: DashMap::with_hasher(RandomState::new()),
            config,
            profiler: None,
            epoch: Instant::now(),
        }
    }

    /// Every lock this registry creates reports to `profiler`
    pub fn with_profiler(config: ManagerConfig, profiler: Arc<LockProfiler>) -> Self {
        let mut manager = Self::with_config(config);
        manager.profiler = Some(profiler);
        manager
    }

    /// Get the live lock for `key`, creating it on first sight
    ///
    /// Idempotent per key: every caller sees the same instance until the
    /// entry is evicted.
    pub fn get_or_create(&self, key: &str) -> Result<AsyncRwLock> {
        Self::validate_key(key)?;
        let now = self.elapsed_ms();

        let entry = self
            .locks
            .entry(InlineString::from(key))
            .or_insert_with(|| {
                debug!(key, "creating lock for resource");
                let lock = match &self.profiler {
                    Some(profiler) => {
                        AsyncRwLock::with_profiler(key, self.config.lock, profiler.clone())
                    }
                    None => AsyncRwLock::with_config(key, self.config.lock),
                };
                LockEntry {
                    lock,
                    last_used: AtomicU64::new(now),
                }
            });
        entry.last_used.store(now, Ordering::Relaxed);
        Ok(entry.lock.clone())
    }

    /// Acquire write guards for several keys in the documented global order
    ///
    /// Keys are deduplicated and sorted lexicographically before
    /// acquisition, so concurrent callers with overlapping key sets cannot
    /// deadlock against each other.
    pub async fn write_ordered(&self, keys: &[&str]) -> Result<Vec<WriteGuard>> {
        let mut ordered: Vec<&str> = keys.to_vec();
        ordered.sort_unstable();
        ordered.dedup();

        let mut guards = Vec::with_capacity(ordered.len());
        for key in ordered {
            let lock = self.get_or_create(key)?;
            guards.push(lock.write().await?);
        }
        Ok(guards)
    }

    /// Remove entries idle longer than `max_idle`
    ///
    /// Only entries with zero holders and zero waiters are eligible.
    /// Returns the number of entries removed.
    pub fn evict_idle(&self, max_idle: Duration) -> usize {
        let threshold_ms = max_idle.as_millis() as u64;
        let now = self.elapsed_ms();
        let mut removed = 0;

        self.locks.retain(|key, entry| {
            let idle_ms = now.saturating_sub(entry.last_used.load(Ordering::Relaxed));
            let keep = !entry.lock.is_idle() || idle_ms <= threshold_ms;
            if !keep {
                removed += 1;
                if let Some(profiler) = &self.profiler {
                    profiler.forget(key);
                }
                debug!(key = %key, idle_ms, "evicting idle lock");
            }
            keep
        });
        removed
    }

    /// Eviction sweep with the configured threshold
    pub fn sweep(&self) -> usize {
        self.evict_idle(self.config.max_idle)
    }

    /// Remove one entry immediately if its lock has no holders and no
    /// waiters, regardless of idle age. Returns whether it was removed.
    pub fn remove_if_idle(&self, key: &str) -> bool {
        let removed = self
            .locks
            .remove_if(key, |_, entry| entry.lock.is_idle())
            .is_some();
        if removed {
            if let Some(profiler) = &self.profiler {
                profiler.forget(key);
            }
            debug!(key, "removed idle lock");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.locks.contains_key(key)
    }

    pub(crate) fn validate_key(key: &str) -> Result<()> {
        if key.is_empty() || key.len() > 255 || key.chars().any(|c| c.is_control()) {
            return Err(SyncError::ResourceKeyInvalid(key.into()));
        }
        Ok(())
    }

    fn elapsed_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_idempotent_lookup() {
        let manager = LockManager::new();

        let a = manager.get_or_create("book.BTCUSD").unwrap();
        let b = manager.get_or_create("book.BTCUSD").unwrap();
        assert!(a.same_instance(&b));

        let other = manager.get_or_create("book.ETHUSD").unwrap();
        assert!(!a.same_instance(&other));
        assert_eq!(manager.len(), 2);
    }

    #[tokio::test]
    async fn test_invalid_keys_rejected() {
        let manager = LockManager::new();

        assert!(matches!(
            manager.get_or_create(""),
            Err(SyncError::ResourceKeyInvalid(_))
        ));
        assert!(matches!(
            manager.get_or_create("bad\nkey"),
            Err(SyncError::ResourceKeyInvalid(_))
        ));
        assert!(manager.is_empty());
    }

    #[tokio::test]
    async fn test_eviction_skips_held_locks() {
        let manager = LockManager::new();
        let lock = manager.get_or_create("book.BTCUSD").unwrap();

        let _guard = lock.read().await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(manager.evict_idle(Duration::ZERO), 0);
        assert!(manager.contains("book.BTCUSD"));
    }

    #[tokio::test]
    async fn test_eviction_creates_fresh_instance() {
        let manager = LockManager::new();
        let first = manager.get_or_create("book.BTCUSD").unwrap();
        {
            let _g = first.read().await.unwrap();
        }
        assert_eq!(first.counters().acquisitions, 1);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(manager.evict_idle(Duration::ZERO), 1);
        assert!(!manager.contains("book.BTCUSD"));

        let second = manager.get_or_create("book.BTCUSD").unwrap();
        assert!(!first.same_instance(&second));
        assert_eq!(second.counters().acquisitions, 0);
    }

    #[tokio::test]
    async fn test_write_ordered_is_order_insensitive() {
        let manager = Arc::new(LockManager::new());

        // Two tasks acquiring the same pair in opposite argument order
        let a = {
            let manager = manager.clone();
            tokio::spawn(async move {
                for _ in 0..50 {
                    let guards = manager
                        .write_ordered(&["book.ETHUSD", "book.BTCUSD"])
                        .await
                        .unwrap();
                    drop(guards);
                }
            })
        };
        let b = {
            let manager = manager.clone();
            tokio::spawn(async move {
                for _ in 0..50 {
                    let guards = manager
                        .write_ordered(&["book.BTCUSD", "book.ETHUSD"])
                        .await
                        .unwrap();
                    drop(guards);
                }
            })
        };

        a.await.unwrap();
        b.await.unwrap();
    }

    #[tokio::test]
    async fn test_write_ordered_dedups() {
        let manager = LockManager::new();
        let guards = manager
            .write_ordered(&["trades", "trades"])
            .await
            .unwrap();
        assert_eq!(guards.len(), 1);
    }
}
