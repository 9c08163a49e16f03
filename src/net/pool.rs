//! Exclusive connection pool
//!
//! Bounded per-node pool of reusable connections. Checkout never blocks:
//! at the connection limit, acquire fails fast and the caller decides
//! whether to retry elsewhere.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::{ClientError, Result};
use crate::net::Connection;

/// Bounded pool of exclusive connections to one node
pub struct ConnPool {
    node_name: String,
    addrs: Vec<SocketAddr>,
    limit: usize,
    idle: Mutex<VecDeque<Connection>>,
    /// Open connections, idle and checked out
    total: AtomicUsize,
}

impl ConnPool {
    pub fn new(node_name: String, addrs: Vec<SocketAddr>, limit: usize) -> Self {
        Self {
            node_name,
            addrs,
            limit,
            idle: Mutex::new(VecDeque::new()),
            total: AtomicUsize::new(0),
        }
    }

    /// Check out an idle connection, or open a new one while under the
    /// per-node limit
    ///
    /// Returns the connection and whether it was freshly opened (callers
    /// record connect latency for fresh ones).
    pub fn acquire(&self, connect_timeout: Duration) -> Result<(Connection, bool)> {
        // Reuse the most recently returned connection first; stale ones are
        // validated and dropped.
        loop {
            let candidate = self.idle.lock().pop_back();
            match candidate {
                Some(conn) => {
                    if conn.is_alive() {
                        return Ok((conn, false));
                    }
                    tracing::debug!(
                        "Dropping stale pooled connection to {} ({})",
                        self.node_name,
                        conn.peer_addr()
                    );
                    conn.close();
                    self.total.fetch_sub(1, Ordering::Relaxed);
                }
                None => break,
            }
        }

        // Claim a slot before connecting so concurrent callers can't
        // overshoot the limit.
        let claimed = self
            .total
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                if n < self.limit {
                    Some(n + 1)
                } else {
                    None
                }
            })
            .is_ok();

        if !claimed {
            return Err(ClientError::MaxConnectionsExceeded {
                node: self.node_name.clone(),
                limit: self.limit,
            });
        }

        let mut last_err = None;
        for addr in &self.addrs {
            match Connection::connect(addr, connect_timeout) {
                Ok(conn) => return Ok((conn, true)),
                Err(e) => last_err = Some(e),
            }
        }

        self.total.fetch_sub(1, Ordering::Relaxed);
        Err(last_err.unwrap_or_else(|| {
            ClientError::Connection(format!("No addresses for node {}", self.node_name))
        }))
    }

    /// Return a clean connection to the pool
    pub fn release(&self, mut conn: Connection) {
        conn.touch();
        self.idle.lock().push_back(conn);
    }

    /// Destroy an errored or canceled connection; it never re-enters the
    /// pool
    pub fn destroy(&self, conn: Connection) {
        conn.close();
        self.total.fetch_sub(1, Ordering::Relaxed);
    }

    /// Close idle connections unused past the threshold
    pub fn close_idle(&self, max_idle: Duration) {
        let mut idle = self.idle.lock();
        let before = idle.len();
        idle.retain(|conn| conn.idle_for() < max_idle);
        let closed = before - idle.len();
        if closed > 0 {
            self.total.fetch_sub(closed, Ordering::Relaxed);
            tracing::debug!("Closed {} idle connection(s) to {}", closed, self.node_name);
        }
    }

    /// Drain the pool; checked-out connections are destroyed by their
    /// holders on release
    pub fn close_all(&self) {
        let mut idle = self.idle.lock();
        let drained = idle.len();
        for conn in idle.drain(..) {
            conn.close();
        }
        self.total.fetch_sub(drained, Ordering::Relaxed);
    }

    /// Open connections, idle and checked out
    pub fn open_count(&self) -> usize {
        self.total.load(Ordering::Relaxed)
    }

    /// Connections sitting idle in the pool
    pub fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }
}
