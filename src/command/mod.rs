//! Command execution
//!
//! One logical request is a command: it selects a node, borrows a
//! connection, writes, reads and parses, retrying on transient failures
//! until it succeeds or its deadline expires.

mod executor;

pub(crate) use executor::execute;
pub(crate) use executor::execute_pipelined;
pub use executor::{CommandHandle, CommandState, Executor};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::metrics::CommandCategory;
use crate::protocol::{INFO_DELETE, INFO_READ, INFO_WRITE};

// =============================================================================
// Policy
// =============================================================================

/// Per-command execution policy
#[derive(Debug, Clone)]
pub struct CommandPolicy {
    /// Total time budget for the command, shared across all retries
    pub timeout: Duration,

    /// Upper bound on any single socket wait; keeps cancellation and the
    /// deadline observable mid-read
    pub socket_timeout: Duration,

    /// Retries allowed after the first attempt
    pub max_retries: u32,

    /// Pause before retrying when no node is available
    pub retry_backoff: Duration,
}

impl Default for CommandPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(1),
            socket_timeout: Duration::from_millis(250),
            max_retries: 2,
            retry_backoff: Duration::from_millis(10),
        }
    }
}

// =============================================================================
// Operations
// =============================================================================

/// The request kinds a command can carry
#[derive(Debug, Clone)]
pub enum Operation {
    Get,
    Put(Vec<u8>),
    Delete,
}

impl Operation {
    /// Writes must route to the partition master
    pub fn is_write(&self) -> bool {
        !matches!(self, Operation::Get)
    }

    /// Info flag byte for the wire header
    pub fn info_flags(&self) -> u8 {
        match self {
            Operation::Get => INFO_READ,
            Operation::Put(_) => INFO_WRITE,
            Operation::Delete => INFO_WRITE | INFO_DELETE,
        }
    }

    /// Latency category this command reports under
    pub fn category(&self) -> CommandCategory {
        match self {
            Operation::Get => CommandCategory::Read,
            Operation::Put(_) | Operation::Delete => CommandCategory::Write,
        }
    }
}

/// A successful command result
#[derive(Debug, Clone)]
pub struct Record {
    pub value: Option<Vec<u8>>,
    pub generation: u32,
    /// Record version reported by the server, when versioning is active
    pub version: Option<u64>,
}

// =============================================================================
// Cancellation
// =============================================================================

/// Cooperative cancellation token
///
/// Observed at every state transition of the command machine; socket waits
/// are bounded by the policy's socket timeout, so cancellation is seen
/// within one poll interval.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_canceled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}
