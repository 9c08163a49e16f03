//! Cluster node
//!
//! One cluster member: identity, addresses, connection pools, latency
//! histograms and the failure accounting that decides when the node is
//! taken out of rotation. Nodes are shared through `Arc`; a removed node
//! is drained but lives until the last in-flight command drops its handle.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use crate::config::Config;
use crate::error::Result;
use crate::metrics::{CommandCategory, NodeMetrics};
use crate::net::{ConnPool, PipePool};

use super::host::Host;

/// Failure causes, weighted by severity
///
/// A single command timeout barely moves the counter; a failed tend probe
/// or a bad identity moves it a lot. Any success resets it.
#[derive(Debug, Clone, Copy)]
pub enum FailureKind {
    CommandTimeout,
    Network,
    ProbeFailed,
    BadIdentity,
}

impl FailureKind {
    fn weight(self) -> u32 {
        match self {
            FailureKind::CommandTimeout => 1,
            FailureKind::Network => 50,
            FailureKind::ProbeFailed => 100,
            FailureKind::BadIdentity => 1000,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            FailureKind::CommandTimeout => "command timeout",
            FailureKind::Network => "network error",
            FailureKind::ProbeFailed => "probe failed",
            FailureKind::BadIdentity => "bad identity",
        }
    }
}

/// Pool selector: which execution context a command runs in
#[derive(Debug, Clone, Copy)]
pub enum PoolContext {
    /// Calling thread blocks through the state machine
    Sync,
    /// One of the background executor's worker threads
    Worker(usize),
}

/// One cluster member
pub struct Node {
    name: String,
    host: Host,
    addrs: Vec<SocketAddr>,

    /// Exclusive pools: index 0 for sync callers, one per executor worker
    pools: Vec<ConnPool>,
    pipe_pool: PipePool,

    metrics: NodeMetrics,

    failures: AtomicU32,
    failure_threshold: u32,
    active: AtomicBool,

    /// Partition generation last seen from this node's info responses
    partition_generation: AtomicU32,
    /// Peers generation last seen from this node
    peers_generation: AtomicU32,
    /// Consecutive tend cycles with this node unreported and unreachable
    unreported_cycles: AtomicU32,
}

impl Node {
    pub fn new(name: String, host: Host, addrs: Vec<SocketAddr>, config: &Config) -> Self {
        // Pool 0 serves sync callers; workers each get their own slot so
        // executor contexts never contend on a shared pool.
        let n_pools = 1 + config.executor_threads;
        let pools = (0..n_pools)
            .map(|_| ConnPool::new(name.clone(), addrs.clone(), config.max_conns_per_node))
            .collect();

        let pipe_pool = PipePool::new(name.clone(), addrs.clone(), config.max_pipe_conns_per_node);

        Self {
            name,
            host,
            addrs,
            pools,
            pipe_pool,
            metrics: NodeMetrics::new(),
            failures: AtomicU32::new(0),
            failure_threshold: config.failure_threshold,
            active: AtomicBool::new(true),
            partition_generation: AtomicU32::new(u32::MAX),
            peers_generation: AtomicU32::new(0),
            unreported_cycles: AtomicU32::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn host(&self) -> &Host {
        &self.host
    }

    pub fn addrs(&self) -> &[SocketAddr] {
        &self.addrs
    }

    /// Pool for an execution context
    pub fn pool(&self, ctx: PoolContext) -> &ConnPool {
        match ctx {
            PoolContext::Sync => &self.pools[0],
            // Worker indexes beyond the pool count wrap.
            PoolContext::Worker(i) => &self.pools[1 + (i % (self.pools.len() - 1))],
        }
    }

    pub fn pipe_pool(&self) -> &PipePool {
        &self.pipe_pool
    }

    pub fn metrics(&self) -> &NodeMetrics {
        &self.metrics
    }

    /// Record one latency sample
    pub fn record_latency(&self, category: CommandCategory, elapsed: Duration) {
        self.metrics.record(category, elapsed);
    }

    // -------------------------------------------------------------------------
    // Health
    // -------------------------------------------------------------------------

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Accumulate a failure; crossing the threshold pulls the node out of
    /// rotation until a success resets it
    pub fn record_failure(&self, kind: FailureKind) {
        let count = self.failures.fetch_add(kind.weight(), Ordering::Relaxed) + kind.weight();

        if count >= self.failure_threshold && self.active.swap(false, Ordering::AcqRel) {
            tracing::info!(
                "Node {} marked inactive: {} (failure score {})",
                self.name,
                kind.as_str(),
                count
            );
        }
    }

    /// Any success clears accumulated failures and restores the node
    pub fn record_success(&self) {
        self.failures.store(0, Ordering::Relaxed);
        if !self.active.swap(true, Ordering::AcqRel) {
            tracing::info!("Node {} restored to rotation", self.name);
        }
    }

    // -------------------------------------------------------------------------
    // Tend bookkeeping
    // -------------------------------------------------------------------------

    pub fn partition_generation(&self) -> u32 {
        self.partition_generation.load(Ordering::Acquire)
    }

    pub fn set_partition_generation(&self, generation: u32) {
        self.partition_generation.store(generation, Ordering::Release);
    }

    pub fn peers_generation(&self) -> u32 {
        self.peers_generation.load(Ordering::Acquire)
    }

    pub fn set_peers_generation(&self, generation: u32) {
        self.peers_generation.store(generation, Ordering::Release);
    }

    /// Bump the unreported counter, returning the new count
    pub fn mark_unreported(&self) -> u32 {
        self.unreported_cycles.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn mark_reported(&self) {
        self.unreported_cycles.store(0, Ordering::Relaxed);
    }

    // -------------------------------------------------------------------------
    // Maintenance
    // -------------------------------------------------------------------------

    /// Evict idle pooled connections past the threshold
    pub fn close_idle(&self, max_idle: Duration) {
        for pool in &self.pools {
            pool.close_idle(max_idle);
        }
    }

    /// Drain the node on removal: pools are closed and queued pipelined
    /// commands are failed. Checked-out connections die when their holders
    /// release them; the node object itself lives until the last `Arc`
    /// drops.
    pub fn close(&self) {
        self.active.store(false, Ordering::Release);
        for pool in &self.pools {
            pool.close_all();
        }
        self.pipe_pool
            .close_all(&format!("node {} removed from cluster", self.name));
        tracing::info!("Node {} drained", self.name);
    }

    /// Open connection count across all pools
    pub fn open_connections(&self) -> usize {
        self.pools.iter().map(|p| p.open_count()).sum::<usize>() + self.pipe_pool.open_count()
    }

    /// Run one info exchange against this node using the sync pool
    pub fn info(&self, names: &[&str], timeout: Duration) -> Result<Vec<(String, String)>> {
        let pool = &self.pools[0];
        let started = std::time::Instant::now();
        let (mut conn, fresh) = pool.acquire(timeout)?;
        if fresh {
            self.record_latency(CommandCategory::Conn, started.elapsed());
        }

        match conn.info(names, timeout) {
            Ok(pairs) => {
                pool.release(conn);
                Ok(pairs)
            }
            Err(e) => {
                pool.destroy(conn);
                Err(e)
            }
        }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.name)
            .field("host", &self.host)
            .field("active", &self.is_active())
            .finish()
    }
}
