//! Peers merge
//!
//! The transient result of one tend cycle: which hosts the reachable
//! peers report, which known nodes went unreported, and which hosts
//! failed outright. Built, consumed, and discarded each cycle.

use std::collections::HashSet;

use crate::error::{ClientError, Result};

use super::host::Host;

/// Transient per-cycle tend result
#[derive(Debug, Default)]
pub struct TendPeers {
    /// Hosts reported by reachable peers this cycle (deduplicated)
    pub reported_hosts: HashSet<Host>,
    /// Node names that answered their own probe this cycle
    pub responded: HashSet<String>,
    /// Node names scheduled for removal
    pub removals: Vec<String>,
    /// Hosts that failed to resolve or connect (diagnostic only)
    pub invalid_hosts: Vec<Host>,
    /// Whether the node set or any partition generation changed
    pub generation_changed: bool,
}

impl TendPeers {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Parse a peers service list: `host:port;host:port;...`
///
/// Individual malformed entries are skipped with a warning; one bad peer
/// must not invalidate the rest of the list.
pub fn parse_service_list(value: &str) -> Vec<Host> {
    let mut hosts = Vec::new();

    for part in value.split(';') {
        if part.is_empty() {
            continue;
        }
        match Host::parse(part) {
            Ok(host) => hosts.push(host),
            Err(e) => tracing::warn!("Skipping malformed peer entry {:?}: {}", part, e),
        }
    }

    hosts
}

/// Parse a `replicas-read` / `replicas-write` value: `ns:pid;ns:pid;...`
///
/// Returns `(namespace, partition_id)` pairs; entries with an invalid id
/// or namespace are skipped with a warning.
pub fn parse_replica_list(value: &str, n_partitions: u32) -> Vec<(String, u32)> {
    let mut entries = Vec::new();

    for part in value.split(';') {
        if part.is_empty() {
            continue;
        }
        let Some((ns, pid_str)) = part.split_once(':') else {
            tracing::warn!("Skipping malformed replica entry {:?}", part);
            continue;
        };

        let ns = ns.trim();
        if ns.is_empty() || ns.len() > 31 {
            tracing::warn!("Invalid replica namespace {:?}", ns);
            continue;
        }

        match pid_str.trim().parse::<u32>() {
            Ok(pid) if pid < n_partitions => entries.push((ns.to_string(), pid)),
            _ => tracing::warn!(
                "Invalid partition id {:?}, max {}",
                pid_str,
                n_partitions - 1
            ),
        }
    }

    entries
}

/// Parse a numeric info value (generations, partition counts)
pub fn parse_info_number(name: &str, value: &str) -> Result<u32> {
    value
        .trim()
        .parse::<u32>()
        .map_err(|_| ClientError::Protocol(format!("Non-numeric info value for {}: {:?}", name, value)))
}
