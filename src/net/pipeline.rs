//! Pipelined connections
//!
//! A pipelined connection multiplexes many concurrent commands over one
//! socket. Writers serialize on a lock (one write in flight, later writers
//! queue); responses are strictly FIFO, so a dedicated reader thread
//! completes pending commands in the exact order their requests were
//! written. Any transport error fails every queued command rather than
//! leaving it hanging silently, and the connection is discarded, not
//! pooled.

use std::io::{BufReader, BufWriter, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam::channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;

use crate::error::{ClientError, Result};
use crate::protocol::{self, decode_message, MessageFrame, MessageType};

/// Result delivered to a pipelined caller. Errors cross the channel as
/// strings because every queued caller receives its own copy.
pub type PipeResult = std::result::Result<MessageFrame, String>;

/// A pipelined connection shared by many concurrent commands
pub struct PipeConnection {
    node_name: String,
    peer_addr: String,
    stream: TcpStream,
    writer: Mutex<BufWriter<TcpStream>>,
    /// Response slots in write order; the reader thread completes the front
    pending: Mutex<std::collections::VecDeque<Sender<PipeResult>>>,
    canceled: AtomicBool,
}

impl PipeConnection {
    /// Open a pipelined connection and start its reader thread
    pub fn connect(addr: &SocketAddr, timeout: Duration, node_name: &str) -> Result<Arc<Self>> {
        let stream = TcpStream::connect_timeout(addr, timeout)
            .map_err(|e| ClientError::Connection(format!("Connect to {} failed: {}", addr, e)))?;
        stream.set_nodelay(true)?;

        // The reader thread blocks on the socket with no timeout; shutdown
        // is how it gets unstuck.
        stream.set_read_timeout(None)?;

        let peer_addr = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| addr.to_string());

        let read_stream = stream.try_clone()?;
        let write_stream = stream.try_clone()?;

        let conn = Arc::new(Self {
            node_name: node_name.to_string(),
            peer_addr,
            stream,
            writer: Mutex::new(BufWriter::new(write_stream)),
            pending: Mutex::new(std::collections::VecDeque::new()),
            canceled: AtomicBool::new(false),
        });

        let reader_conn = conn.clone();
        thread::Builder::new()
            .name(format!("meshkv-pipe-{}", conn.peer_addr))
            .spawn(move || reader_conn.read_loop(BufReader::new(read_stream)))
            .map_err(|e| ClientError::Connection(format!("Failed to spawn reader: {}", e)))?;

        tracing::debug!("Pipelined connection established to {}", conn.peer_addr);
        Ok(conn)
    }

    /// Queue one request: write its bytes and reserve the next FIFO
    /// response slot
    ///
    /// The writer lock covers both the slot reservation and the socket
    /// write, so slot order always matches write order even with many
    /// concurrent submitters.
    pub fn submit(&self, frame: &[u8]) -> Result<Receiver<PipeResult>> {
        let (tx, rx) = bounded(1);

        let mut writer = self.writer.lock();

        if self.canceled.load(Ordering::Acquire) {
            return Err(ClientError::Connection(format!(
                "Pipelined connection to {} is canceled",
                self.peer_addr
            )));
        }

        self.pending.lock().push_back(tx);

        let write_result = writer.write_all(frame).and_then(|_| writer.flush());
        if let Err(e) = write_result {
            drop(writer);
            // The reserved slot (and everyone behind it) gets the error.
            self.fail_all(&format!("Write to {} failed: {}", self.peer_addr, e));
            return Err(ClientError::Connection(format!(
                "Write to {} failed: {}",
                self.peer_addr, e
            )));
        }

        tracing::trace!(
            "Pipelined request queued to {} ({} pending)",
            self.peer_addr,
            self.pending_count()
        );

        Ok(rx)
    }

    /// Outstanding responses not yet consumed
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Whether this connection has been canceled and must not be reused
    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::Acquire)
    }

    /// Cancel the connection: fail every queued command and shut the
    /// socket down
    pub fn cancel(&self, reason: &str) {
        self.fail_all(reason);
    }

    fn fail_all(&self, reason: &str) {
        if self.canceled.swap(true, Ordering::AcqRel) {
            return;
        }

        let _ = self.stream.shutdown(Shutdown::Both);

        let mut pending = self.pending.lock();
        if !pending.is_empty() {
            tracing::debug!(
                "Failing {} queued command(s) on pipelined connection to {}: {}",
                pending.len(),
                self.peer_addr,
                reason
            );
        }
        for slot in pending.drain(..) {
            // A caller that gave up already dropped its receiver.
            let _ = slot.send(Err(reason.to_string()));
        }
    }

    /// Reader thread: decode frames in arrival order and complete the
    /// front slot. Response order equals write order by the server's FIFO
    /// contract; a frame with no waiting slot means desynchronization.
    fn read_loop(self: Arc<Self>, mut reader: BufReader<TcpStream>) {
        loop {
            let frame = match protocol::read_frame(&mut reader) {
                Ok((proto, body)) => {
                    if proto.msg_type != MessageType::Message {
                        self.fail_all(&format!(
                            "Unexpected {:?} frame on pipelined connection to {}",
                            proto.msg_type, self.peer_addr
                        ));
                        return;
                    }
                    match decode_message(&body) {
                        Ok(frame) => frame,
                        Err(e) => {
                            self.fail_all(&format!(
                                "Malformed response from {}: {}",
                                self.peer_addr, e
                            ));
                            return;
                        }
                    }
                }
                Err(e) => {
                    if !self.canceled.load(Ordering::Acquire) {
                        self.fail_all(&format!("Read from {} failed: {}", self.peer_addr, e));
                    }
                    return;
                }
            };

            let slot = self.pending.lock().pop_front();
            match slot {
                Some(slot) => {
                    // Send fails only when the caller abandoned the command;
                    // the response is discarded and order is preserved.
                    let _ = slot.send(Ok(frame));
                }
                None => {
                    self.fail_all(&format!(
                        "Unsolicited response from {} on pipelined connection",
                        self.peer_addr
                    ));
                    return;
                }
            }
        }
    }

    pub fn peer_addr(&self) -> &str {
        &self.peer_addr
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }
}

// =============================================================================
// Pipelined Pool
// =============================================================================

/// Per-node collection of pipelined connections
pub struct PipePool {
    node_name: String,
    addrs: Vec<SocketAddr>,
    limit: usize,
    conns: Mutex<Vec<Arc<PipeConnection>>>,
}

impl PipePool {
    pub fn new(node_name: String, addrs: Vec<SocketAddr>, limit: usize) -> Self {
        Self {
            node_name,
            addrs,
            limit,
            conns: Mutex::new(Vec::new()),
        }
    }

    /// Get a pipelined connection with spare capacity
    ///
    /// Prefers opening new connections while under the limit; the server
    /// processes one connection's commands sequentially, so more
    /// connections mean more parallelism. At the limit, the least-loaded
    /// live connection is shared.
    pub fn acquire(&self, connect_timeout: Duration) -> Result<Arc<PipeConnection>> {
        let mut conns = self.conns.lock();
        conns.retain(|c| !c.is_canceled());

        if conns.len() < self.limit {
            let mut last_err = None;
            for addr in &self.addrs {
                match PipeConnection::connect(addr, connect_timeout, &self.node_name) {
                    Ok(conn) => {
                        conns.push(conn.clone());
                        return Ok(conn);
                    }
                    Err(e) => last_err = Some(e),
                }
            }
            // Fall through to sharing an existing connection if any.
            if conns.is_empty() {
                return Err(last_err.unwrap_or_else(|| {
                    ClientError::Connection(format!("No addresses for node {}", self.node_name))
                }));
            }
        }

        let conn = conns
            .iter()
            .min_by_key(|c| c.pending_count())
            .cloned()
            .ok_or_else(|| ClientError::Connection(format!("No addresses for node {}", self.node_name)))?;
        Ok(conn)
    }

    /// Cancel every connection; queued commands all receive the reason
    pub fn close_all(&self, reason: &str) {
        let mut conns = self.conns.lock();
        for conn in conns.drain(..) {
            conn.cancel(reason);
        }
    }

    pub fn open_count(&self) -> usize {
        self.conns.lock().len()
    }
}
