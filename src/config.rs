//! Client configuration
//!
//! Centralized configuration with sensible defaults.

use std::time::Duration;

use crate::cluster::Host;
use crate::command::CommandPolicy;
use crate::error::{ClientError, Result};

/// Main configuration for a MeshKV cluster client
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Cluster Configuration
    // -------------------------------------------------------------------------
    /// Seed hosts contacted at startup and whenever the node set drops to
    /// zero. Syntax: "host:port" or "[ipv6]:port", comma-separated.
    pub seed_hosts: Vec<Host>,

    /// Expected partition count per namespace. Must be a power of two; the
    /// value reported by the first contacted node wins if they disagree.
    pub n_partitions: u32,

    // -------------------------------------------------------------------------
    // Tending Configuration
    // -------------------------------------------------------------------------
    /// Interval between tend cycles
    pub tend_interval: Duration,

    /// Per-probe timeout for tend info requests. Keeps a dead node from
    /// stalling the whole cycle.
    pub probe_timeout: Duration,

    /// Consecutive cycles a node may go unreported by all reachable peers
    /// before it is scheduled for removal
    pub removal_grace_cycles: u32,

    /// Accumulated failure weight at which a node is marked inactive
    pub failure_threshold: u32,

    // -------------------------------------------------------------------------
    // Connection Pool Configuration
    // -------------------------------------------------------------------------
    /// Max exclusive connections per node (shared by all sync callers)
    pub max_conns_per_node: usize,

    /// Max pipelined connections per node
    pub max_pipe_conns_per_node: usize,

    /// Idle connections unused past this threshold are closed by the tender
    pub max_conn_idle: Duration,

    // -------------------------------------------------------------------------
    // Command Execution Configuration
    // -------------------------------------------------------------------------
    /// Default policy applied when a call passes no explicit policy
    pub default_policy: CommandPolicy,

    /// Worker threads in the background executor
    pub executor_threads: usize,

    /// When set, a connection whose command timed out mid-read is drained
    /// (bounded by this duration) and re-pooled instead of destroyed
    pub recover_timeout: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            seed_hosts: Vec::new(),
            n_partitions: 4096,
            tend_interval: Duration::from_secs(1),
            probe_timeout: Duration::from_millis(500),
            removal_grace_cycles: 2,
            failure_threshold: 800,
            max_conns_per_node: 128,
            max_pipe_conns_per_node: 8,
            max_conn_idle: Duration::from_secs(55),
            default_policy: CommandPolicy::default(),
            executor_threads: 4,
            recover_timeout: Some(Duration::from_millis(50)),
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Validate invariants the routing math depends on
    pub fn validate(&self) -> Result<()> {
        if self.seed_hosts.is_empty() {
            return Err(ClientError::Config("no seed hosts configured".to_string()));
        }
        if !self.n_partitions.is_power_of_two() {
            return Err(ClientError::Config(format!(
                "partition count must be a power of two, got {}",
                self.n_partitions
            )));
        }
        if self.executor_threads == 0 {
            return Err(ClientError::Config(
                "executor thread count must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Add seed hosts from a "host:port,host:port" list
    pub fn seed_hosts(mut self, hosts: &str) -> Result<Self> {
        self.config.seed_hosts = Host::parse_list(hosts)?;
        Ok(self)
    }

    /// Add a single pre-parsed seed host
    pub fn seed_host(mut self, host: Host) -> Self {
        self.config.seed_hosts.push(host);
        self
    }

    /// Set the expected partition count (power of two)
    pub fn n_partitions(mut self, n: u32) -> Self {
        self.config.n_partitions = n;
        self
    }

    /// Set the tend interval
    pub fn tend_interval(mut self, interval: Duration) -> Self {
        self.config.tend_interval = interval;
        self
    }

    /// Set the per-probe timeout used by the tender
    pub fn probe_timeout(mut self, timeout: Duration) -> Self {
        self.config.probe_timeout = timeout;
        self
    }

    /// Set how many unreported cycles a node survives before removal
    pub fn removal_grace_cycles(mut self, cycles: u32) -> Self {
        self.config.removal_grace_cycles = cycles;
        self
    }

    /// Set the max exclusive connections per node
    pub fn max_conns_per_node(mut self, count: usize) -> Self {
        self.config.max_conns_per_node = count;
        self
    }

    /// Set the max pipelined connections per node
    pub fn max_pipe_conns_per_node(mut self, count: usize) -> Self {
        self.config.max_pipe_conns_per_node = count;
        self
    }

    /// Set the idle threshold after which pooled connections are closed
    pub fn max_conn_idle(mut self, idle: Duration) -> Self {
        self.config.max_conn_idle = idle;
        self
    }

    /// Set the default command policy
    pub fn default_policy(mut self, policy: CommandPolicy) -> Self {
        self.config.default_policy = policy;
        self
    }

    /// Set the background executor thread count
    pub fn executor_threads(mut self, count: usize) -> Self {
        self.config.executor_threads = count;
        self
    }

    /// Enable or disable mid-read timeout recovery
    pub fn recover_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.recover_timeout = timeout;
        self
    }

    pub fn build(self) -> Result<Config> {
        self.config.validate()?;
        Ok(self.config)
    }
}
