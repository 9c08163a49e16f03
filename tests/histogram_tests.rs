//! Latency Histogram Tests
//!
//! Tests for exponential bucketing, concurrent increments and the shared
//! snapshot/reset discipline.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use meshkv_client::metrics::{CommandCategory, LatencyHistogram, NodeMetrics, HIST_BUCKETS};

// =============================================================================
// Bucketing Tests
// =============================================================================

#[test]
fn test_bucket_boundaries() {
    let hist = LatencyHistogram::new();

    hist.record(Duration::from_millis(0)); // bucket 0
    hist.record(Duration::from_millis(1)); // [1, 2)    -> bucket 0
    hist.record(Duration::from_millis(3)); // [2, 4)    -> bucket 1
    hist.record(Duration::from_millis(4)); // [4, 8)    -> bucket 2
    hist.record(Duration::from_millis(1024)); // [1024, 2048) -> bucket 10

    let counts = hist.counts();
    assert_eq!(counts[0], 2);
    assert_eq!(counts[1], 1);
    assert_eq!(counts[2], 1);
    assert_eq!(counts[10], 1);
    assert_eq!(hist.total(), 5);
}

#[test]
fn test_huge_sample_clamps_to_last_bucket() {
    let hist = LatencyHistogram::new();
    hist.record(Duration::from_secs(u32::MAX as u64));
    assert_eq!(hist.counts()[HIST_BUCKETS - 1], 1);
}

// =============================================================================
// Concurrency Tests
// =============================================================================

#[test]
fn test_concurrent_increments_sum_exactly() {
    let hist = Arc::new(LatencyHistogram::new());
    let threads = 8;
    let per_thread = 1000;

    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let hist = hist.clone();
            thread::spawn(move || {
                for i in 0..per_thread {
                    hist.record(Duration::from_millis((t * per_thread + i) as u64 % 500));
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let expected = (threads * per_thread) as u64;
    assert_eq!(hist.total(), expected);
    assert_eq!(hist.counts().iter().sum::<u64>(), expected);
}

// =============================================================================
// Snapshot / Reset Tests
// =============================================================================

#[test]
fn test_snapshot_survives_reset() {
    let metrics = NodeMetrics::new();
    metrics.record(CommandCategory::Read, Duration::from_millis(5));
    metrics.record(CommandCategory::Read, Duration::from_millis(6));

    // A reader holds the histogram across a reset.
    let snapshot = metrics.histogram(CommandCategory::Read);
    let retired = metrics.reset(CommandCategory::Read);

    assert_eq!(snapshot.total(), 2);
    assert_eq!(retired.total(), 2);
    assert_eq!(metrics.histogram(CommandCategory::Read).total(), 0);

    // Samples recorded after the reset land in the fresh histogram only.
    metrics.record(CommandCategory::Read, Duration::from_millis(7));
    assert_eq!(snapshot.total(), 2);
    assert_eq!(metrics.histogram(CommandCategory::Read).total(), 1);
}

#[test]
fn test_categories_are_independent() {
    let metrics = NodeMetrics::new();
    metrics.record(CommandCategory::Write, Duration::from_millis(1));
    metrics.record(CommandCategory::Query, Duration::from_millis(1));

    assert_eq!(metrics.histogram(CommandCategory::Write).total(), 1);
    assert_eq!(metrics.histogram(CommandCategory::Query).total(), 1);
    assert_eq!(metrics.histogram(CommandCategory::Read).total(), 0);
    assert_eq!(metrics.histogram(CommandCategory::None).total(), 0);
}

#[test]
fn test_category_tags() {
    let tags: Vec<_> = CommandCategory::ALL.iter().map(|c| c.as_str()).collect();
    assert_eq!(tags, vec!["none", "conn", "write", "read", "batch", "query"]);
}
