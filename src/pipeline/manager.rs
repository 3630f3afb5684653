/*!
 * Pipeline Data Manager
 *
 * The integration surface of the crate: one lock per tabular resource, one
 * ring buffer per ingestion stream, a shared contention profiler, and the
 * periodic fold that moves buffered records into locked state.
 *
 * Ingestion tasks call `ingest` (never suspends); an aggregation task calls
 * `fold` per stream, which drains new records under the table's write lock;
 * query tasks call `query` and share the read lock.
 */

use crate::core::config::PipelineConfig;
use crate::core::data_structures::InlineString;
use crate::core::errors::Result;
use crate::monitoring::{LockProfiler, ProfilerSnapshot};
use crate::pipeline::table::{Table, TableState, Tick};
use crate::sync::{AtomicCounter, LockManager, RingBuffer, RingStats};
use ahash::RandomState;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

struct StreamLane {
    ring: RingBuffer<Tick>,
    /// Next logical position the aggregation task will fold from
    cursor: AtomicU64,
}

/// Outcome of one fold pass over a stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FoldReport {
    /// Records applied to the table
    pub applied: u64,
    /// Records lost to overwrite before the cursor reached them
    pub missed: u64,
    /// Cursor position after this pass
    pub next_cursor: u64,
}

/// Running totals across all streams and tables
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineCounters {
    pub ingested: u64,
    pub folded: u64,
}

/// Data manager wiring locks, buffers, and the profiler together
///
/// Lock and buffer instances are built here from explicit configuration and
/// handed to the components that need them; there is no implicit fallback
/// or runtime probing for an alternative implementation.
pub struct PipelineManager {
    config: PipelineConfig,
    profiler: Arc<LockProfiler>,
    locks: LockManager,
    tables: DashMap<InlineString, Arc<Table>, RandomState>,
    streams: DashMap<InlineString, Arc<StreamLane>, RandomState>,
    ingested: AtomicCounter,
    folded: AtomicCounter,
}

impl PipelineManager {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let profiler = Arc::new(LockProfiler::new());
        let locks = LockManager::with_profiler(config.manager, profiler.clone());
        info!(
            ring_capacity = config.ring.capacity,
            fold_batch = config.fold_batch,
            "pipeline manager initialized"
        );
        Ok(Self {
            config,
            profiler,
            locks,
            tables: DashMap::with_hasher(RandomState::new()),
            streams: DashMap::with_hasher(RandomState::new()),
            ingested: AtomicCounter::new(),
            folded: AtomicCounter::new(),
        })
    }

    /// The table for `name`, created on first sight with a registry lock
    pub fn table(&self, name: &str) -> Result<Arc<Table>> {
        if let Some(table) = self.tables.get(name) {
            return Ok(table.clone());
        }
        let lock = self.locks.get_or_create(name)?;
        let table = self
            .tables
            .entry(InlineString::from(name))
            .or_insert_with(|| {
                debug!(table = name, "creating table");
                Arc::new(Table::new(InlineString::from(name), lock))
            });
        Ok(table.clone())
    }

    /// Remove a table; its registry lock goes with it once idle
    pub fn drop_table(&self, name: &str) -> bool {
        let removed = self.tables.remove(name).is_some();
        if removed {
            self.locks.remove_if_idle(name);
        }
        removed
    }

    /// Append one record to a stream's ring buffer. Never suspends.
    pub fn ingest(&self, stream: &str, tick: Tick) -> Result<u64> {
        let lane = self.lane(stream)?;
        let seq = lane.ring.append(tick)?;
        self.ingested.increment();
        Ok(seq)
    }

    /// Fold newly buffered records from `stream` into `table`
    ///
    /// Reads from the stream's consumer cursor, applies records under the
    /// table's write lock, then advances the cursor and releases the folded
    /// range back to the ring. Each stream has one cursor: run one
    /// aggregation task per stream, or folds will double-apply.
    pub async fn fold(&self, stream: &str, table: &str) -> Result<FoldReport> {
        let lane = self.lane(stream)?;
        let table = self.table(table)?;

        let cursor = lane.cursor.load(Ordering::Acquire);
        let batch = lane.ring.read_from(cursor, self.config.fold_batch);
        if batch.items.is_empty() && batch.missed == 0 {
            return Ok(FoldReport {
                applied: 0,
                missed: 0,
                next_cursor: batch.next,
            });
        }

        let applied = table
            .write_with(|state| {
                for tick in &batch.items {
                    state.apply(*tick);
                }
                batch.items.len() as u64
            })
            .await?;

        lane.cursor.store(batch.next, Ordering::Release);
        lane.ring.release(batch.next);
        self.folded.add(applied);

        if batch.missed > 0 {
            warn!(
                stream,
                missed = batch.missed,
                "records lost to overwrite before fold"
            );
        }

        Ok(FoldReport {
            applied,
            missed: batch.missed,
            next_cursor: batch.next,
        })
    }

    /// Run `f` with shared access to a table's state
    pub async fn query<R>(&self, table: &str, f: impl FnOnce(&TableState) -> R) -> Result<R> {
        self.table(table)?.read_with(f).await
    }

    /// Point-in-time contention statistics across every table lock
    pub fn profile(&self) -> ProfilerSnapshot {
        self.profiler.snapshot()
    }

    /// Buffer counters for one ingestion stream
    pub fn stream_stats(&self, stream: &str) -> Option<RingStats> {
        self.streams.get(stream).map(|lane| lane.ring.stats())
    }

    pub fn counters(&self) -> PipelineCounters {
        PipelineCounters {
            ingested: self.ingested.get(),
            folded: self.folded.get(),
        }
    }

    /// Evict registry locks idle beyond the configured threshold
    pub fn evict_idle_locks(&self) -> usize {
        self.locks.sweep()
    }

    fn lane(&self, stream: &str) -> Result<Arc<StreamLane>> {
        if let Some(lane) = self.streams.get(stream) {
            return Ok(lane.clone());
        }
        LockManager::validate_key(stream)?;
        let ring = RingBuffer::new(self.config.ring)?;
        let lane = self
            .streams
            .entry(InlineString::from(stream))
            .or_insert_with(|| {
                debug!(stream, "creating ingestion stream");
                Arc::new(StreamLane {
                    ring,
                    cursor: AtomicU64::new(0),
                })
            });
        Ok(lane.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{OverflowMode, RingConfig};

    fn tick(instrument: u32, price: i64, seq: u64) -> Tick {
        Tick {
            instrument,
            price,
            size: 10,
            source_seq: seq,
        }
    }

    fn small_pipeline(capacity: usize, overflow: OverflowMode) -> PipelineManager {
        let config = PipelineConfig {
            ring: RingConfig::new(capacity, overflow),
            ..PipelineConfig::default()
        };
        PipelineManager::new(config).unwrap()
    }

    #[tokio::test]
    async fn test_ingest_fold_query_roundtrip() {
        let pipeline = small_pipeline(64, OverflowMode::Reject);

        for i in 0..10u64 {
            pipeline.ingest("feed.spot", tick(1, 100 + i as i64, i)).unwrap();
        }

        let report = pipeline.fold("feed.spot", "book.BTCUSD").await.unwrap();
        assert_eq!(report.applied, 10);
        assert_eq!(report.missed, 0);

        let row = pipeline
            .query("book.BTCUSD", |state| state.row(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.last_price, 109);
        assert_eq!(row.ticks, 10);

        let counters = pipeline.counters();
        assert_eq!(counters.ingested, 10);
        assert_eq!(counters.folded, 10);
    }

    #[tokio::test]
    async fn test_fold_releases_reject_capacity() {
        let pipeline = small_pipeline(4, OverflowMode::Reject);

        for i in 0..4u64 {
            pipeline.ingest("feed", tick(1, i as i64, i)).unwrap();
        }
        assert!(pipeline.ingest("feed", tick(1, 99, 99)).is_err());

        pipeline.fold("feed", "book").await.unwrap();

        // Folded range was released; ingestion resumes
        pipeline.ingest("feed", tick(1, 5, 5)).unwrap();
        assert_eq!(pipeline.stream_stats("feed").unwrap().rejected, 1);
    }

    #[tokio::test]
    async fn test_fold_reports_overwritten_records() {
        let pipeline = small_pipeline(4, OverflowMode::OverwriteOldest);

        for i in 0..10u64 {
            pipeline.ingest("feed", tick(1, i as i64, i)).unwrap();
        }

        let report = pipeline.fold("feed", "book").await.unwrap();
        assert_eq!(report.applied, 4);
        assert_eq!(report.missed, 6);

        let folded = pipeline.query("book", |s| s.folded()).await.unwrap();
        assert_eq!(folded, 4);
    }

    #[tokio::test]
    async fn test_fold_is_incremental() {
        let pipeline = small_pipeline(64, OverflowMode::Reject);

        pipeline.ingest("feed", tick(1, 1, 1)).unwrap();
        let first = pipeline.fold("feed", "book").await.unwrap();
        assert_eq!(first.applied, 1);

        let idle = pipeline.fold("feed", "book").await.unwrap();
        assert_eq!(idle.applied, 0);

        pipeline.ingest("feed", tick(1, 2, 2)).unwrap();
        let second = pipeline.fold("feed", "book").await.unwrap();
        assert_eq!(second.applied, 1);

        let ticks = pipeline
            .query("book", |s| s.row(1).map(|r| r.ticks))
            .await
            .unwrap();
        assert_eq!(ticks, Some(2));
    }

    #[tokio::test]
    async fn test_profile_observes_table_locks() {
        let pipeline = small_pipeline(16, OverflowMode::Reject);

        pipeline.ingest("feed", tick(1, 7, 1)).unwrap();
        pipeline.fold("feed", "book.BTCUSD").await.unwrap();
        pipeline
            .query("book.BTCUSD", |_| ())
            .await
            .unwrap();

        let snapshot = pipeline.profile();
        let stats = snapshot.get("book.BTCUSD").unwrap();
        assert!(stats.acquisitions >= 2);
    }

    #[tokio::test]
    async fn test_invalid_stream_key() {
        let pipeline = small_pipeline(16, OverflowMode::Reject);
        assert!(pipeline.ingest("", tick(1, 1, 1)).is_err());
    }

    #[tokio::test]
    async fn test_drop_table() {
        let pipeline = small_pipeline(16, OverflowMode::Reject);
        pipeline.table("book").unwrap();

        assert!(pipeline.drop_table("book"));
        assert!(!pipeline.drop_table("book"));
    }

    #[tokio::test]
    async fn test_zero_capacity_configuration_rejected() {
        let config = PipelineConfig {
            ring: RingConfig::new(0, OverflowMode::Reject),
            ..PipelineConfig::default()
        };
        assert!(PipelineManager::new(config).is_err());
    }
}
