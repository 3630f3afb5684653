/*!
 * tickflow
 * Concurrency core for real-time market-data pipelines: a read-optimized
 * async lock, a seqlock ring buffer for high-frequency ingestion, saturating
 * atomic counters, a keyed lock registry, and a contention profiler
 */

pub mod core;
pub mod monitoring;
pub mod pipeline;
pub mod sync;

// Re-exports
pub use crate::core::config::{
    LockConfig, ManagerConfig, OverflowMode, PipelineConfig, RingConfig,
};
pub use crate::core::data_structures::InlineString;
pub use crate::core::errors::{Result, SyncError};
pub use crate::monitoring::{
    init_tracing, ContentionSeverity, LockProfiler, LockSnapshot, ProfilerSnapshot,
};
pub use crate::pipeline::{
    FoldReport, InstrumentRow, PipelineCounters, PipelineManager, Table, TableState, Tick,
};
pub use crate::sync::{
    AsyncRwLock, AtomicCounter, LockCounters, LockManager, ReadGuard, RingBatch, RingBuffer,
    RingStats, WriteGuard,
};
