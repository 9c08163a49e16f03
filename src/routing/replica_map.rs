//! Replica map
//!
//! Per-namespace assignment of partitions to owning nodes. A map is built
//! once per tend cycle that saw changes, then published wholesale as an
//! immutable snapshot; in-flight node selection always sees either the old
//! or the new snapshot, never a half-updated one.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::cluster::Node;

#[derive(Clone, Default)]
struct Replicas {
    master: Option<Arc<Node>>,
    replica: Option<Arc<Node>>,
}

/// Immutable routing snapshot
pub struct PartitionMap {
    n_partitions: u32,
    tables: HashMap<String, Vec<Replicas>>,
    /// Alternates read traffic between master and replica
    read_counter: AtomicU32,
}

impl PartitionMap {
    /// An empty snapshot; every lookup fails until the tender publishes a
    /// populated one
    pub fn empty(n_partitions: u32) -> Self {
        Self {
            n_partitions,
            tables: HashMap::new(),
            read_counter: AtomicU32::new(0),
        }
    }

    pub fn n_partitions(&self) -> u32 {
        self.n_partitions
    }

    /// Namespaces present in this snapshot
    pub fn namespaces(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(|s| s.as_str())
    }

    /// Select the owning node for a partition
    ///
    /// Writes must land on the master. Reads may go to any replica; traffic
    /// alternates between master and replica when both are live.
    pub fn get_node(&self, namespace: &str, partition_id: u32, is_write: bool) -> Option<Arc<Node>> {
        let table = self.tables.get(namespace)?;
        let replicas = table.get(partition_id as usize)?;

        let master = replicas.master.as_ref().filter(|n| n.is_active());
        let replica = replicas.replica.as_ref().filter(|n| n.is_active());

        if is_write {
            return master.cloned();
        }

        match (master, replica) {
            (Some(m), Some(r)) => {
                let turn = self.read_counter.fetch_add(1, Ordering::Relaxed);
                Some(if turn & 1 == 0 { m.clone() } else { r.clone() })
            }
            (Some(m), None) => Some(m.clone()),
            (None, Some(r)) => Some(r.clone()),
            (None, None) => None,
        }
    }

    /// Whether the node masters any partition in this snapshot
    pub fn node_is_present(&self, node: &Arc<Node>) -> bool {
        self.tables.values().any(|table| {
            table.iter().any(|r| {
                r.master
                    .as_ref()
                    .map(|m| Arc::ptr_eq(m, node))
                    .unwrap_or(false)
            })
        })
    }
}

/// Accumulates replica assignments during a tend cycle
pub struct PartitionMapBuilder {
    n_partitions: u32,
    tables: HashMap<String, Vec<Replicas>>,
}

impl PartitionMapBuilder {
    pub fn new(n_partitions: u32) -> Self {
        Self {
            n_partitions,
            tables: HashMap::new(),
        }
    }

    /// Record one `ns:partition` ownership claim
    ///
    /// Out-of-range partition ids are rejected by the caller, which parses
    /// them off the wire.
    pub fn set(&mut self, namespace: &str, partition_id: u32, is_master: bool, node: &Arc<Node>) {
        let n = self.n_partitions as usize;
        let table = self
            .tables
            .entry(namespace.to_string())
            .or_insert_with(|| vec![Replicas::default(); n]);

        let replicas = &mut table[partition_id as usize];
        if is_master {
            replicas.master = Some(node.clone());
        } else {
            replicas.replica = Some(node.clone());
        }
    }

    pub fn build(self) -> PartitionMap {
        PartitionMap {
            n_partitions: self.n_partitions,
            tables: self.tables,
            read_counter: AtomicU32::new(0),
        }
    }
}
