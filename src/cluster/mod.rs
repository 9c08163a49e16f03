//! Cluster state and lifecycle
//!
//! The cluster owns the node set and the routing snapshot, runs the tender
//! that keeps both current, and is the entry point command execution
//! consults for node selection.
//!
//! ## Concurrency Model
//!
//! - Node set and routing snapshot: single writer (the tender), many
//!   readers (caller threads, executor workers). Readers clone an `Arc`
//!   out of a short critical section; the tender publishes replacements
//!   wholesale, so a reader always sees a coherent snapshot.
//! - Per-node pools guard themselves; there is no cross-node locking.

mod host;
mod node;
mod peers;
mod tend;

pub use host::Host;
pub use node::{FailureKind, Node, PoolContext};
pub use peers::TendPeers;

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use crate::command::{self, CommandHandle, CommandPolicy, Executor, Operation, Record};
use crate::config::Config;
use crate::error::{ClientError, Result};
use crate::metrics::CommandCategory;
use crate::routing::{Key, KeyDigest, PartitionMap};
use crate::txn::Txn;

use tend::Tender;

// =============================================================================
// Shared Cluster State
// =============================================================================

/// State shared between caller threads, executor workers and the tender
pub(crate) struct ClusterInner {
    pub(crate) config: Config,

    nodes: RwLock<Vec<Arc<Node>>>,
    partition_map: RwLock<Arc<PartitionMap>>,
    n_partitions: AtomicU32,

    /// Round-robin cursor for fallback node selection
    round_robin: AtomicUsize,
    /// Bumped whenever membership or the routing snapshot changes
    generation: AtomicU32,
    shutdown: AtomicBool,
}

impl ClusterInner {
    fn new(config: Config) -> Self {
        let n_partitions = config.n_partitions;
        Self {
            config,
            nodes: RwLock::new(Vec::new()),
            partition_map: RwLock::new(Arc::new(PartitionMap::empty(n_partitions))),
            n_partitions: AtomicU32::new(n_partitions),
            round_robin: AtomicUsize::new(0),
            generation: AtomicU32::new(0),
            shutdown: AtomicBool::new(false),
        }
    }

    pub(crate) fn nodes(&self) -> Vec<Arc<Node>> {
        self.nodes.read().clone()
    }

    pub(crate) fn node_by_name(&self, name: &str) -> Option<Arc<Node>> {
        self.nodes.read().iter().find(|n| n.name() == name).cloned()
    }

    pub(crate) fn node_by_host(&self, host: &Host) -> Option<Arc<Node>> {
        self.nodes
            .read()
            .iter()
            .find(|n| n.host().name == host.name && n.host().port == host.port)
            .cloned()
    }

    pub(crate) fn add_node(&self, node: Arc<Node>) {
        tracing::info!("Adding node {} at {}", node.name(), node.host());
        self.nodes.write().push(node);
        self.bump_generation();
    }

    pub(crate) fn remove_node(&self, name: &str) -> Option<Arc<Node>> {
        let mut nodes = self.nodes.write();
        let index = nodes.iter().position(|n| n.name() == name)?;
        let node = nodes.remove(index);
        tracing::info!("Removing node {} at {}", node.name(), node.host());
        drop(nodes);
        self.bump_generation();
        Some(node)
    }

    /// Round-robin over active nodes, used when the partition map has no
    /// owner for the target partition
    pub(crate) fn random_node(&self) -> Option<Arc<Node>> {
        let nodes = self.nodes.read();
        if nodes.is_empty() {
            return None;
        }

        for _ in 0..nodes.len() {
            let index = self.round_robin.fetch_add(1, Ordering::Relaxed) % nodes.len();
            let node = &nodes[index];
            if node.is_active() {
                return Some(node.clone());
            }
        }
        None
    }

    /// Select the node a command should target
    pub(crate) fn node_for(
        &self,
        namespace: &str,
        digest: &KeyDigest,
        is_write: bool,
    ) -> Result<Arc<Node>> {
        let map = self.partition_map.read().clone();
        let partition_id = digest.partition_id(self.n_partitions());

        if let Some(node) = map.get_node(namespace, partition_id, is_write) {
            return Ok(node);
        }

        // Map not yet populated for this partition; any active node can
        // proxy or reject, and the tender may repair the map meanwhile.
        self.random_node().ok_or(ClientError::NoAvailableNode)
    }

    pub(crate) fn partition_map(&self) -> Arc<PartitionMap> {
        self.partition_map.read().clone()
    }

    /// Publish a new routing snapshot; concurrent readers keep the old one
    /// until their next lookup
    pub(crate) fn set_partition_map(&self, map: PartitionMap) {
        *self.partition_map.write() = Arc::new(map);
        self.bump_generation();
    }

    pub(crate) fn n_partitions(&self) -> u32 {
        self.n_partitions.load(Ordering::Acquire)
    }

    pub(crate) fn set_n_partitions(&self, n: u32) {
        self.n_partitions.store(n, Ordering::Release);
    }

    pub(crate) fn generation(&self) -> u32 {
        self.generation.load(Ordering::Acquire)
    }

    fn bump_generation(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }
}

// =============================================================================
// Cluster Handle
// =============================================================================

/// A connected cluster client
pub struct Cluster {
    inner: Arc<ClusterInner>,
    executor: Executor,
    tender: Option<Tender>,
}

impl Cluster {
    /// Connect to a cluster: probe the seed hosts, then start the tender
    /// and the background executor
    ///
    /// Unreachable seeds are tolerated; the tender keeps retrying them
    /// until nodes appear. Use [`Cluster::wait_ready`] to block until the
    /// cluster is usable.
    pub fn connect(config: Config) -> Result<Self> {
        config.validate()?;

        let inner = Arc::new(ClusterInner::new(config));

        let seeds = tend::tend_cycle(&inner);
        if !seeds.invalid_hosts.is_empty() {
            tracing::warn!(
                "{} seed host(s) unreachable at startup",
                seeds.invalid_hosts.len()
            );
        }

        let executor = Executor::new(inner.clone(), inner.config.executor_threads);
        let tender = Tender::start(inner.clone());

        Ok(Self {
            inner,
            executor,
            tender: Some(tender),
        })
    }

    /// Block until the node set and routing snapshot are populated, or the
    /// timeout elapses
    pub fn wait_ready(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;

        loop {
            let has_nodes = !self.inner.nodes.read().is_empty();
            let has_map = self.inner.partition_map().namespaces().next().is_some();
            if has_nodes && has_map {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(ClientError::Timeout {
                    attempts: 0,
                    last_error: "cluster not ready".to_string(),
                });
            }
            std::thread::sleep(Duration::from_millis(20));
        }
    }

    // -------------------------------------------------------------------------
    // Synchronous Commands
    // -------------------------------------------------------------------------

    /// Read a record. `Ok(None)` means the server reported the key absent.
    pub fn get(
        &self,
        policy: Option<&CommandPolicy>,
        txn: Option<&Txn>,
        key: &Key,
    ) -> Result<Option<Record>> {
        let policy = policy.unwrap_or(&self.inner.config.default_policy);
        match command::execute(
            &self.inner,
            policy,
            key,
            &Operation::Get,
            txn,
            None,
            PoolContext::Sync,
        ) {
            Ok(record) => Ok(Some(record)),
            Err(ClientError::KeyNotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Write a record, returning its new generation
    pub fn put(
        &self,
        policy: Option<&CommandPolicy>,
        txn: Option<&Txn>,
        key: &Key,
        value: &[u8],
    ) -> Result<Record> {
        let policy = policy.unwrap_or(&self.inner.config.default_policy);
        command::execute(
            &self.inner,
            policy,
            key,
            &Operation::Put(value.to_vec()),
            txn,
            None,
            PoolContext::Sync,
        )
    }

    /// Delete a record. `Ok(false)` means the key did not exist.
    pub fn delete(
        &self,
        policy: Option<&CommandPolicy>,
        txn: Option<&Txn>,
        key: &Key,
    ) -> Result<bool> {
        let policy = policy.unwrap_or(&self.inner.config.default_policy);
        match command::execute(
            &self.inner,
            policy,
            key,
            &Operation::Delete,
            txn,
            None,
            PoolContext::Sync,
        ) {
            Ok(_) => Ok(true),
            Err(ClientError::KeyNotFound) => Ok(false),
            Err(e) => Err(e),
        }
    }

    // -------------------------------------------------------------------------
    // Background and Pipelined Commands
    // -------------------------------------------------------------------------

    /// Submit a command to the background executor
    pub fn submit(
        &self,
        policy: Option<&CommandPolicy>,
        txn: Option<Arc<Txn>>,
        key: Key,
        op: Operation,
    ) -> CommandHandle {
        let policy = policy
            .cloned()
            .unwrap_or_else(|| self.inner.config.default_policy.clone());
        self.executor.submit(policy, txn, key, op)
    }

    /// Execute a batch over pipelined connections
    ///
    /// Commands routed to the same node share a pipelined connection;
    /// responses come back in write order per connection. Results are
    /// returned in input order.
    pub fn execute_pipelined(
        &self,
        policy: Option<&CommandPolicy>,
        batch: &[(Key, Operation)],
    ) -> Vec<Result<Record>> {
        let policy = policy.unwrap_or(&self.inner.config.default_policy);
        command::execute_pipelined(&self.inner, policy, batch)
    }

    // -------------------------------------------------------------------------
    // Introspection
    // -------------------------------------------------------------------------

    /// Current node handles
    pub fn nodes(&self) -> Vec<Arc<Node>> {
        self.inner.nodes()
    }

    /// Topology generation; bumps whenever membership or routing changes
    pub fn generation(&self) -> u32 {
        self.inner.generation()
    }

    /// Snapshot of cluster statistics
    pub fn stats(&self) -> ClusterStats {
        let nodes = self.inner.nodes();
        ClusterStats {
            generation: self.inner.generation(),
            nodes: nodes
                .iter()
                .map(|node| NodeStats {
                    name: node.name().to_string(),
                    host: node.host().to_string(),
                    active: node.is_active(),
                    open_connections: node.open_connections(),
                    samples: CommandCategory::ALL
                        .iter()
                        .map(|c| (c.as_str(), node.metrics().histogram(*c).total()))
                        .collect(),
                })
                .collect(),
        }
    }

    /// Shut the cluster down: stop the tender and executor, drain every
    /// node
    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if self.inner.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }

        tracing::info!("Cluster shutting down");

        if let Some(tender) = self.tender.take() {
            tender.stop();
        }
        self.executor.shutdown();

        let nodes: Vec<Arc<Node>> = {
            let mut guard = self.inner.nodes.write();
            guard.drain(..).collect()
        };
        for node in nodes {
            node.close();
        }
    }
}

impl Drop for Cluster {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Point-in-time cluster statistics
#[derive(Debug, Clone)]
pub struct ClusterStats {
    pub generation: u32,
    pub nodes: Vec<NodeStats>,
}

/// Per-node statistics snapshot
#[derive(Debug, Clone)]
pub struct NodeStats {
    pub name: String,
    pub host: String,
    pub active: bool,
    pub open_connections: usize,
    /// Total recorded samples per command category
    pub samples: Vec<(&'static str, u64)>,
}
