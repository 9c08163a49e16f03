//! Error types for the MeshKV client
//!
//! Provides a unified error type for all operations, plus the
//! retryability classification the command executor relies on.

use thiserror::Error;

/// Result type alias using ClientError
pub type Result<T> = std::result::Result<T, ClientError>;

/// Unified error type for MeshKV client operations
#[derive(Debug, Error)]
pub enum ClientError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Max connections exceeded for node {node}: {limit}")]
    MaxConnectionsExceeded { node: String, limit: usize },

    // -------------------------------------------------------------------------
    // Protocol Errors
    // -------------------------------------------------------------------------
    /// Malformed header or message body. Fatal to the connection it was
    /// read from; never retried on the same connection.
    #[error("Protocol error: {0}")]
    Protocol(String),

    // -------------------------------------------------------------------------
    // Routing / Topology Errors
    // -------------------------------------------------------------------------
    /// No node currently owns the target partition. Retryable while the
    /// tender may still repair the partition map.
    #[error("No available node for partition")]
    NoAvailableNode,

    #[error("Node {0} is no longer active")]
    NodeInactive(String),

    // -------------------------------------------------------------------------
    // Server Results
    // -------------------------------------------------------------------------
    /// The server explicitly reported a per-record condition. Returned
    /// directly to the caller, never silently retried.
    #[error("Key not found")]
    KeyNotFound,

    #[error("Generation mismatch")]
    GenerationMismatch,

    #[error("Server error: {0}")]
    Server(u8),

    // -------------------------------------------------------------------------
    // Deadline / Cancellation
    // -------------------------------------------------------------------------
    #[error("Command timed out after {attempts} attempt(s), last error: {last_error}")]
    Timeout { attempts: u32, last_error: String },

    /// Caller-initiated abort. Distinct from success and failure so callers
    /// can tell "never ran to completion" from "ran and failed".
    #[error("Command canceled")]
    Canceled,

    // -------------------------------------------------------------------------
    // Usage Errors
    // -------------------------------------------------------------------------
    #[error("Transaction error: {0}")]
    Txn(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ClientError {
    /// Whether the executor may recover this error locally by retrying the
    /// command on a (possibly different) node before the deadline.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Io(_) => true,
            ClientError::Connection(_) => true,
            ClientError::NoAvailableNode => true,
            ClientError::NodeInactive(_) => true,
            ClientError::MaxConnectionsExceeded { .. } => true,
            // Protocol desync, server results, usage errors, timeouts and
            // cancellation are all surfaced verbatim.
            _ => false,
        }
    }

    /// Whether the connection a command was using must be destroyed rather
    /// than returned to its pool.
    pub fn poisons_connection(&self) -> bool {
        matches!(
            self,
            ClientError::Io(_) | ClientError::Connection(_) | ClientError::Protocol(_)
        )
    }
}
