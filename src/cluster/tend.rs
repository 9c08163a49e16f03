//! Tender
//!
//! Periodic cluster maintenance on a dedicated thread: probe every known
//! node for its identity, generations and peers; merge discoveries;
//! schedule removals; refresh the routing snapshot when anything moved.
//! One unreachable peer degrades that node's standing, never the cycle.

use std::collections::HashSet;
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam::channel::{bounded, Receiver, Sender};

use crate::cluster::{ClusterInner, FailureKind, Host, Node, TendPeers};
use crate::error::{ClientError, Result};
use crate::net::Connection;
use crate::protocol::info::find_info_value;
use crate::routing::PartitionMapBuilder;

use super::peers;

// =============================================================================
// Tender Thread
// =============================================================================

/// Handle to the tending thread
pub(crate) struct Tender {
    stop_tx: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl Tender {
    /// Start tending on a dedicated thread
    pub(crate) fn start(inner: Arc<ClusterInner>) -> Self {
        let (stop_tx, stop_rx) = bounded::<()>(1);

        let handle = std::thread::Builder::new()
            .name("meshkv-tend".to_string())
            .spawn(move || run(inner, stop_rx))
            .expect("failed to spawn tend thread");

        Self {
            stop_tx,
            handle: Some(handle),
        }
    }

    /// Stop the tender and wait for the current cycle to finish
    pub(crate) fn stop(mut self) {
        let _ = self.stop_tx.send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn run(inner: Arc<ClusterInner>, stop_rx: Receiver<()>) {
    tracing::debug!("Tend thread started");

    loop {
        // Sleep doubles as the shutdown wait.
        if stop_rx.recv_timeout(inner.config.tend_interval).is_ok() {
            break;
        }
        if inner.is_shutdown() {
            break;
        }

        let result = tend_cycle(&inner);
        if result.generation_changed {
            tracing::debug!(
                "Tend cycle changed topology, generation now {}",
                inner.generation()
            );
        }
    }

    tracing::debug!("Tend thread stopped");
}

// =============================================================================
// Tend Cycle
// =============================================================================

/// Run one tend cycle, returning the transient cycle result
pub(crate) fn tend_cycle(inner: &ClusterInner) -> TendPeers {
    let mut cycle = TendPeers::new();

    // Fallen off the edge of the cluster: go back to the seeds.
    if inner.nodes().is_empty() {
        seed_nodes(inner, &mut cycle);
    }

    let mut partitions_changed = false;

    // Probe every known node for identity, generations and peers.
    for node in inner.nodes() {
        let pairs = match node.info(
            &["node", "partition-generation", "peers-generation", "peers"],
            inner.config.probe_timeout,
        ) {
            Ok(pairs) => pairs,
            Err(e) => {
                tracing::debug!("Probe of node {} failed: {}", node.name(), e);
                node.record_failure(FailureKind::ProbeFailed);
                continue;
            }
        };

        node.record_success();
        cycle.responded.insert(node.name().to_string());

        if let Some(name) = find_info_value(&pairs, "node") {
            if name != node.name() {
                tracing::warn!(
                    "Node name changed at {}: was {}, now {}",
                    node.host(),
                    node.name(),
                    name
                );
                node.record_failure(FailureKind::BadIdentity);
                cycle.removals.push(node.name().to_string());
                continue;
            }
        }

        if let Some(value) = find_info_value(&pairs, "peers-generation") {
            match peers::parse_info_number("peers-generation", value) {
                Ok(generation) => node.set_peers_generation(generation),
                Err(e) => tracing::warn!("{}", e),
            }
        }

        if let Some(value) = find_info_value(&pairs, "partition-generation") {
            match peers::parse_info_number("partition-generation", value) {
                Ok(generation) => {
                    if generation != node.partition_generation() {
                        partitions_changed = true;
                    }
                }
                Err(e) => tracing::warn!("{}", e),
            }
        }

        if let Some(value) = find_info_value(&pairs, "peers") {
            for host in peers::parse_service_list(value) {
                cycle.reported_hosts.insert(host);
            }
        }
    }

    // Add hosts reported by peers that we do not know yet.
    for host in cycle.reported_hosts.clone() {
        if inner.node_by_host(&host).is_some() {
            continue;
        }
        match probe_new_host(inner, &host) {
            Ok(Some(node)) => {
                inner.add_node(node);
                cycle.generation_changed = true;
            }
            Ok(None) => {} // known node under another address
            Err(e) => {
                tracing::debug!("Reported host {} not usable: {}", host, e);
                cycle.invalid_hosts.push(host);
            }
        }
    }

    // Schedule removals: unreachable nodes nobody vouches for, after the
    // grace period.
    for node in inner.nodes() {
        let vouched = cycle.responded.contains(node.name())
            || cycle
                .reported_hosts
                .iter()
                .any(|h| h.name == node.host().name && h.port == node.host().port);

        if vouched && node.is_active() {
            node.mark_reported();
            continue;
        }

        // A cycle where nothing responded says more about us than about
        // the cluster; do not advance removal clocks on it.
        if cycle.responded.is_empty() {
            continue;
        }

        let misses = node.mark_unreported();
        if misses >= inner.config.removal_grace_cycles {
            cycle.removals.push(node.name().to_string());
        }
    }

    cycle.removals.sort();
    cycle.removals.dedup();
    for name in &cycle.removals {
        if let Some(node) = inner.remove_node(name) {
            // Pools drain now; the node object survives until the last
            // in-flight command releases its handle.
            node.close();
            cycle.generation_changed = true;
        }
    }

    // Refresh routing when membership or any partition generation moved.
    let map_unpopulated = inner.partition_map().namespaces().next().is_none();
    if cycle.generation_changed || partitions_changed || (map_unpopulated && !inner.nodes().is_empty())
    {
        refresh_partition_map(inner);
        cycle.generation_changed = true;
    }

    // Routine pool hygiene.
    for node in inner.nodes() {
        node.close_idle(inner.config.max_conn_idle);
    }

    cycle
}

// =============================================================================
// Discovery
// =============================================================================

/// Probe the configured seed hosts and create nodes for the ones that
/// answer
fn seed_nodes(inner: &ClusterInner, cycle: &mut TendPeers) {
    for host in inner.config.seed_hosts.clone() {
        if inner.node_by_host(&host).is_some() {
            continue;
        }
        match probe_new_host(inner, &host) {
            Ok(Some(node)) => {
                inner.add_node(node);
                cycle.generation_changed = true;
            }
            Ok(None) => {}
            Err(e) => {
                tracing::debug!("Seed host {} unreachable: {}", host, e);
                cycle.invalid_hosts.push(host);
            }
        }
    }
}

/// Connect to an unknown host, learn its node name and create the node
///
/// Returns `Ok(None)` when the host turns out to be a known node reachable
/// under another address.
fn probe_new_host(inner: &ClusterInner, host: &Host) -> Result<Option<Arc<Node>>> {
    let addrs = host.resolve()?;
    let timeout = inner.config.probe_timeout;

    let mut last_err = None;
    for addr in &addrs {
        let mut conn = match Connection::connect(addr, timeout) {
            Ok(conn) => conn,
            Err(e) => {
                last_err = Some(e);
                continue;
            }
        };

        let pairs = match conn.info(&["node", "partitions"], timeout) {
            Ok(pairs) => pairs,
            Err(e) => {
                last_err = Some(e);
                continue;
            }
        };

        let name = find_info_value(&pairs, "node")
            .ok_or_else(|| {
                ClientError::Protocol(format!("Host {} returned no node name", host))
            })?
            .to_string();

        if let Some(existing) = inner.node_by_name(&name) {
            tracing::info!(
                "Host {} is node {} already known at {}",
                host,
                name,
                existing.host()
            );
            existing.mark_reported();
            return Ok(None);
        }

        if let Some(value) = find_info_value(&pairs, "partitions") {
            let n = peers::parse_info_number("partitions", value)?;
            if !n.is_power_of_two() {
                return Err(ClientError::Protocol(format!(
                    "Node {} reports non-power-of-two partition count {}",
                    name, n
                )));
            }
            if n != inner.n_partitions() {
                tracing::warn!(
                    "Node {} reports {} partitions, expected {}; adopting server value",
                    name,
                    n,
                    inner.n_partitions()
                );
                inner.set_n_partitions(n);
            }
        }

        let node = Arc::new(Node::new(name, host.clone(), addrs.clone(), &inner.config));
        return Ok(Some(node));
    }

    Err(last_err
        .unwrap_or_else(|| ClientError::Connection(format!("No addresses for host {}", host))))
}

// =============================================================================
// Routing Refresh
// =============================================================================

/// Rebuild the replica map from every active node's ownership claims and
/// publish it atomically
fn refresh_partition_map(inner: &ClusterInner) {
    let mut builder = PartitionMapBuilder::new(inner.n_partitions());
    let mut contributed = HashSet::new();

    for node in inner.nodes() {
        if !node.is_active() {
            continue;
        }

        let pairs = match node.info(
            &["replicas-write", "replicas-read", "partition-generation"],
            inner.config.probe_timeout,
        ) {
            Ok(pairs) => pairs,
            Err(e) => {
                tracing::debug!("Replica fetch from {} failed: {}", node.name(), e);
                node.record_failure(FailureKind::ProbeFailed);
                continue;
            }
        };

        node.record_success();

        if let Some(value) = find_info_value(&pairs, "replicas-write") {
            for (ns, pid) in peers::parse_replica_list(value, inner.n_partitions()) {
                builder.set(&ns, pid, true, &node);
            }
        }
        if let Some(value) = find_info_value(&pairs, "replicas-read") {
            for (ns, pid) in peers::parse_replica_list(value, inner.n_partitions()) {
                builder.set(&ns, pid, false, &node);
            }
        }
        if let Some(value) = find_info_value(&pairs, "partition-generation") {
            if let Ok(generation) = peers::parse_info_number("partition-generation", value) {
                node.set_partition_generation(generation);
            }
        }

        contributed.insert(node.name().to_string());
    }

    tracing::debug!(
        "Publishing routing snapshot from {} node(s)",
        contributed.len()
    );
    inner.set_partition_map(builder.build());
}
