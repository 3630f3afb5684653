/*!
 * Configuration Surface
 *
 * Runtime configuration for locks, ring buffers, and the registry.
 * All recognized options live here - nothing is defaulted silently elsewhere.
 */

use crate::core::errors::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Ring buffer behavior when logical size reaches capacity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowMode {
    /// `append` fails with `BufferFull`; caller must drain before retrying
    Reject,
    /// `append` always succeeds, silently dropping the oldest record
    OverwriteOldest,
}

/// Lock acquisition configuration
#[derive(Debug, Clone, Copy)]
pub struct LockConfig {
    /// Acquisition deadline; `None` waits indefinitely
    pub timeout: Option<Duration>,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self { timeout: None }
    }
}

impl LockConfig {
    /// Bounded acquisition with the given deadline
    pub const fn bounded(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }

    /// Configuration for latency-sensitive query paths (50ms deadline)
    pub const fn low_latency() -> Self {
        Self {
            timeout: Some(Duration::from_millis(50)),
        }
    }
}

/// Ring buffer configuration
#[derive(Debug, Clone, Copy)]
pub struct RingConfig {
    /// Slot count; fixed at construction, never resized
    pub capacity: usize,
    /// Behavior at capacity
    pub overflow: OverflowMode,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            capacity: 65_536,
            overflow: OverflowMode::OverwriteOldest,
        }
    }
}

impl RingConfig {
    pub const fn new(capacity: usize, overflow: OverflowMode) -> Self {
        Self { capacity, overflow }
    }

    /// Small reject-mode buffer for streams where losing a record is worse
    /// than back-pressure (e.g. order events folded into positions)
    pub const fn lossless(capacity: usize) -> Self {
        Self {
            capacity,
            overflow: OverflowMode::Reject,
        }
    }

    /// Surface misconfiguration at construction time
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(SyncError::InvalidCapacity(self.capacity));
        }
        Ok(())
    }
}

/// Lock registry configuration
#[derive(Debug, Clone, Copy)]
pub struct ManagerConfig {
    /// Entries idle (zero holders, zero waiters) longer than this are
    /// eligible for eviction
    pub max_idle: Duration,
    /// Configuration applied to every lock the registry creates
    pub lock: LockConfig,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_idle: Duration::from_secs(300),
            lock: LockConfig::default(),
        }
    }
}

/// Top-level configuration for the pipeline adapter
#[derive(Debug, Clone, Copy)]
pub struct PipelineConfig {
    /// Configuration for each ingestion stream's ring buffer
    pub ring: RingConfig,
    /// Configuration for the table lock registry
    pub manager: ManagerConfig,
    /// Maximum records folded into a table per `fold` call
    pub fold_batch: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            ring: RingConfig::default(),
            manager: ManagerConfig::default(),
            fold_batch: 1024,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        self.ring.validate()?;
        if self.fold_batch == 0 {
            return Err(SyncError::InvalidCapacity(self.fold_batch));
        }
        Ok(())
    }
}
