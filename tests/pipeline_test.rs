/*!
 * Pipeline Integration Tests
 *
 * End-to-end flow: ingestion tasks feeding ring buffers, an aggregation
 * task folding under write locks, query tasks sharing read locks, and the
 * profiler observing all of it
 */

use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use tickflow::{
    AtomicCounter, OverflowMode, PipelineConfig, PipelineManager, RingConfig, Tick,
};

fn tick(instrument: u32, price: i64, seq: u64) -> Tick {
    Tick {
        instrument,
        price,
        size: 1,
        source_seq: seq,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_ingest_fold_query_under_concurrency() {
    tickflow::init_tracing();
    let config = PipelineConfig {
        ring: RingConfig::new(4096, OverflowMode::Reject),
        ..PipelineConfig::default()
    };
    let pipeline = Arc::new(PipelineManager::new(config).unwrap());

    const PER_STREAM: u64 = 2_000;
    let streams = ["feed.spot", "feed.perp"];

    // Ingestion: one producer task per stream
    let producers: Vec<_> = streams
        .iter()
        .enumerate()
        .map(|(lane, stream)| {
            let pipeline = pipeline.clone();
            let stream: &'static str = *stream;
            tokio::spawn(async move {
                for seq in 0..PER_STREAM {
                    loop {
                        match pipeline.ingest(stream, tick(lane as u32, seq as i64, seq)) {
                            Ok(_) => break,
                            // Reject mode backpressure: wait for the folder
                            Err(_) => tokio::task::yield_now().await,
                        }
                    }
                }
            })
        })
        .collect();

    // Aggregation: fold each stream into its table until drained
    let folder = {
        let pipeline = pipeline.clone();
        tokio::spawn(async move {
            loop {
                // Snapshot before folding: if everything was already
                // ingested and this pass finds nothing, the streams are dry
                let all_ingested = pipeline.counters().ingested == PER_STREAM * 2;
                let mut applied = 0u64;
                for (stream, table) in [("feed.spot", "book.spot"), ("feed.perp", "book.perp")] {
                    let report = pipeline.fold(stream, table).await.unwrap();
                    assert_eq!(report.missed, 0, "reject mode never loses records");
                    applied += report.applied;
                }
                if all_ingested && applied == 0 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
    };

    // Queries: concurrent readers polling the folded state
    let queries: Vec<_> = (0..4)
        .map(|_| {
            let pipeline = pipeline.clone();
            tokio::spawn(async move {
                for _ in 0..200 {
                    let folded = pipeline
                        .query("book.spot", |state| state.folded())
                        .await
                        .unwrap();
                    assert!(folded <= PER_STREAM);
                    tokio::task::yield_now().await;
                }
            })
        })
        .collect();

    for producer in producers {
        producer.await.unwrap();
    }
    folder.await.unwrap();
    for query in queries {
        query.await.unwrap();
    }

    // Nothing lost, nothing duplicated
    let counters = pipeline.counters();
    assert_eq!(counters.ingested, PER_STREAM * 2);
    assert_eq!(counters.folded, PER_STREAM * 2);

    let spot_row = pipeline
        .query("book.spot", |state| state.row(0))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(spot_row.ticks, PER_STREAM);
    assert_eq!(spot_row.last_source_seq, PER_STREAM - 1);

    // The profiler observed both table locks
    let snapshot = pipeline.profile();
    for table in ["book.spot", "book.perp"] {
        let stats = snapshot.get(table).unwrap();
        assert!(stats.acquisitions > 0, "no acquisitions recorded for {table}");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_counter_totals_across_tasks() {
    // T tasks incrementing N times leave exactly T*N
    let counter = Arc::new(AtomicCounter::new());

    let tasks: Vec<_> = (0..10)
        .map(|_| {
            let counter = counter.clone();
            tokio::spawn(async move {
                for _ in 0..5_000 {
                    counter.increment();
                }
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(counter.get(), 50_000);
}

#[tokio::test]
async fn test_overwrite_stream_reports_loss_and_keeps_tables_consistent() {
    let config = PipelineConfig {
        ring: RingConfig::new(8, OverflowMode::OverwriteOldest),
        ..PipelineConfig::default()
    };
    let pipeline = PipelineManager::new(config).unwrap();

    for seq in 0..50u64 {
        pipeline.ingest("feed", tick(1, seq as i64, seq)).unwrap();
    }

    let report = pipeline.fold("feed", "book").await.unwrap();
    assert_eq!(report.applied, 8);
    assert_eq!(report.missed, 42);

    // The table's view matches exactly what was applied
    let row = pipeline
        .query("book", |state| state.row(1))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.ticks, 8);
    assert_eq!(row.last_source_seq, 49);

    assert_eq!(pipeline.stream_stats("feed").unwrap().overwritten, 42);
}

#[tokio::test]
async fn test_profiler_snapshot_serializes_for_export() {
    let pipeline = PipelineManager::new(PipelineConfig::default()).unwrap();

    pipeline.ingest("feed", tick(1, 10, 1)).unwrap();
    pipeline.fold("feed", "book").await.unwrap();

    let snapshot = pipeline.profile();
    let json = serde_json::to_string(&snapshot).unwrap();
    assert!(json.contains("\"book\""));
    assert!(json.contains("acquisitions"));
}
