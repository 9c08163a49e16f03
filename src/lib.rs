//! # MeshKV Client
//!
//! A client for the MeshKV distributed key-value store with:
//! - Cluster topology discovery and background tending
//! - Digest-based partition routing (reads to any replica, writes to the
//!   master)
//! - Pooled exclusive connections and pipelined multiplexed connections
//! - A deadline-driven command state machine with retry and cancellation
//! - Multi-record transaction bookkeeping for optimistic concurrency
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Caller API                           │
//! │             (get / put / delete / submit / batch)           │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                  Command Executor                           │
//! │   (state machine: select → connect → write → read → parse)  │
//! └──────┬──────────────┬───────────────────────────┬───────────┘
//!        │              │                           │
//!        ▼              ▼                           ▼
//! ┌─────────────┐ ┌─────────────┐          ┌─────────────────┐
//! │   Router    │ │ Conn Pools  │          │  Txn Monitor    │
//! │ (digest →   │ │ (exclusive  │          │ (read versions, │
//! │  partition) │ │ + pipelined)│          │   write set)    │
//! └──────┬──────┘ └──────┬──────┘          └─────────────────┘
//!        │               │
//! ┌──────▼───────────────▼──────────────────────────────────────┐
//! │                       Cluster                               │
//! │        (node set + routing snapshot, tended 1/sec)          │
//! └─────────────────────────────────────────────────────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod cluster;
pub mod command;
pub mod metrics;
pub mod net;
pub mod protocol;
pub mod routing;
pub mod txn;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use cluster::{Cluster, ClusterStats, Host, Node, NodeStats};
pub use command::{CancelToken, CommandHandle, CommandPolicy, Operation, Record};
pub use config::{Config, ConfigBuilder};
pub use error::{ClientError, Result};
pub use metrics::CommandCategory;
pub use routing::{Key, KeyDigest};
pub use txn::Txn;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of the MeshKV client
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
