//! Transport layer
//!
//! Exclusive and pipelined TCP connections plus the per-node pools that
//! own them.

mod connection;
mod pipeline;
mod pool;

pub use connection::Connection;
pub use pipeline::{PipeConnection, PipePool, PipeResult};
pub use pool::ConnPool;
