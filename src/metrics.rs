//! Latency metrics
//!
//! Per-(node, command-category) histograms with exponential buckets:
//! bucket `i` counts samples in `[2^i, 2^(i+1))` milliseconds. Increments
//! are lock-free atomics; snapshot readers share the histogram through an
//! `Arc`, so a reset never frees buckets out from under a reader.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

/// Number of exponential buckets (covers up to ~24 days in milliseconds)
pub const HIST_BUCKETS: usize = 32;

/// Command categories used for histogram bucketing and reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandCategory {
    None,
    Conn,
    Write,
    Read,
    Batch,
    Query,
}

impl CommandCategory {
    pub const ALL: [CommandCategory; 6] = [
        CommandCategory::None,
        CommandCategory::Conn,
        CommandCategory::Write,
        CommandCategory::Read,
        CommandCategory::Batch,
        CommandCategory::Query,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CommandCategory::None => "none",
            CommandCategory::Conn => "conn",
            CommandCategory::Write => "write",
            CommandCategory::Read => "read",
            CommandCategory::Batch => "batch",
            CommandCategory::Query => "query",
        }
    }

    fn index(self) -> usize {
        match self {
            CommandCategory::None => 0,
            CommandCategory::Conn => 1,
            CommandCategory::Write => 2,
            CommandCategory::Read => 3,
            CommandCategory::Batch => 4,
            CommandCategory::Query => 5,
        }
    }
}

// =============================================================================
// Latency Histogram
// =============================================================================

/// Fixed-size exponential histogram
pub struct LatencyHistogram {
    buckets: [AtomicU64; HIST_BUCKETS],
    total: AtomicU64,
}

impl LatencyHistogram {
    pub fn new() -> Self {
        Self {
            buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            total: AtomicU64::new(0),
        }
    }

    /// Record one sample
    pub fn record(&self, elapsed: Duration) {
        let ms = elapsed.as_millis() as u64;
        let index = if ms == 0 {
            0
        } else {
            (63 - ms.leading_zeros() as usize).min(HIST_BUCKETS - 1)
        };
        self.buckets[index].fetch_add(1, Ordering::Relaxed);
        self.total.fetch_add(1, Ordering::Relaxed);
    }

    /// Total number of recorded samples
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    /// Copy out the current bucket counts
    pub fn counts(&self) -> [u64; HIST_BUCKETS] {
        std::array::from_fn(|i| self.buckets[i].load(Ordering::Relaxed))
    }
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Per-Node Metrics
// =============================================================================

/// One histogram per command category for a single node
pub struct NodeMetrics {
    hists: RwLock<[Arc<LatencyHistogram>; CommandCategory::ALL.len()]>,
}

impl NodeMetrics {
    pub fn new() -> Self {
        Self {
            hists: RwLock::new(std::array::from_fn(|_| Arc::new(LatencyHistogram::new()))),
        }
    }

    /// Record a sample against a category
    pub fn record(&self, category: CommandCategory, elapsed: Duration) {
        let hist = self.hists.read()[category.index()].clone();
        hist.record(elapsed);
    }

    /// Share the live histogram for a category; the returned handle stays
    /// valid across a concurrent `reset`
    pub fn histogram(&self, category: CommandCategory) -> Arc<LatencyHistogram> {
        self.hists.read()[category.index()].clone()
    }

    /// Swap in a fresh histogram; in-flight readers keep the old one alive
    /// until they drop their handles
    pub fn reset(&self, category: CommandCategory) -> Arc<LatencyHistogram> {
        let mut hists = self.hists.write();
        std::mem::replace(
            &mut hists[category.index()],
            Arc::new(LatencyHistogram::new()),
        )
    }
}

impl Default for NodeMetrics {
    fn default() -> Self {
        Self::new()
    }
}
