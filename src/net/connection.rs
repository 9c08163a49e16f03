//! Exclusive connection
//!
//! One transport endpoint bound to one node, checked out by one command at
//! a time. Buffered in both directions, with deadline-bounded socket
//! timeouts so a stuck peer can never block a caller indefinitely.

use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::time::{Duration, Instant};

use crate::error::{ClientError, Result};
use crate::protocol::{self, info, MessageType, ProtoHeader};

/// An exclusive, buffered TCP connection
pub struct Connection {
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
    peer_addr: String,
    last_used: Instant,
}

impl Connection {
    /// Open a connection with a bounded connect timeout
    pub fn connect(addr: &SocketAddr, timeout: Duration) -> Result<Self> {
        let stream = TcpStream::connect_timeout(addr, timeout)
            .map_err(|e| ClientError::Connection(format!("Connect to {} failed: {}", addr, e)))?;

        // Disable Nagle's algorithm for low latency
        stream.set_nodelay(true)?;

        let peer_addr = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| addr.to_string());

        let read_stream = stream.try_clone()?;
        let write_stream = stream;

        tracing::debug!("Connection established to {}", peer_addr);

        Ok(Self {
            reader: BufReader::new(read_stream),
            writer: BufWriter::new(write_stream),
            peer_addr,
            last_used: Instant::now(),
        })
    }

    /// Configure socket timeouts; `None` means block indefinitely
    pub fn set_timeouts(&self, read: Option<Duration>, write: Option<Duration>) -> Result<()> {
        self.reader.get_ref().set_read_timeout(read)?;
        self.writer.get_ref().set_write_timeout(write)?;
        Ok(())
    }

    /// Write a complete buffer and flush
    pub fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        self.writer.write_all(buf)?;
        self.writer.flush()?;
        self.last_used = Instant::now();
        Ok(())
    }

    /// Fill `buf[*filled..]`, advancing `filled` as bytes arrive
    ///
    /// Returns Ok(true) when the buffer is complete, Ok(false) on a socket
    /// timeout (partial progress is preserved in `filled` so the read can
    /// be resumed or the connection drained).
    pub fn read_into(&mut self, buf: &mut [u8], filled: &mut usize) -> Result<bool> {
        while *filled < buf.len() {
            match self.reader.read(&mut buf[*filled..]) {
                Ok(0) => {
                    return Err(ClientError::Connection(format!(
                        "Connection closed by {}",
                        self.peer_addr
                    )))
                }
                Ok(n) => *filled += n,
                Err(ref e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {
                    return Ok(false)
                }
                Err(e) => return Err(e.into()),
            }
        }
        self.last_used = Instant::now();
        Ok(true)
    }

    /// Read one complete frame, blocking up to the configured read timeout
    pub fn read_frame(&mut self) -> Result<(ProtoHeader, Vec<u8>)> {
        let frame = protocol::read_frame(&mut self.reader)?;
        self.last_used = Instant::now();
        Ok(frame)
    }

    /// Run one info exchange on this connection
    pub fn info(&mut self, names: &[&str], timeout: Duration) -> Result<Vec<(String, String)>> {
        self.set_timeouts(Some(timeout), Some(timeout))?;

        let request = info::encode_info_request(names);
        self.write_all(&request)?;

        let (proto, body) = self.read_frame()?;
        if proto.msg_type != MessageType::Info {
            return Err(ClientError::Protocol(format!(
                "Expected info response from {}, got {:?}",
                self.peer_addr, proto.msg_type
            )));
        }

        let text = std::str::from_utf8(&body).map_err(|_| {
            ClientError::Protocol(format!("Non-UTF8 info response from {}", self.peer_addr))
        })?;

        Ok(info::parse_info_response(text))
    }

    /// Quick liveness check before reuse from a pool
    ///
    /// A readable socket means the peer closed it or left bytes behind from
    /// a desynchronized exchange; either way the connection is unusable.
    pub fn is_alive(&self) -> bool {
        let stream = self.reader.get_ref();
        if stream.set_nonblocking(true).is_err() {
            return false;
        }

        let mut probe = [0u8; 1];
        let alive = match stream.peek(&mut probe) {
            Ok(_) => false,
            Err(ref e) if e.kind() == ErrorKind::WouldBlock => true,
            Err(_) => false,
        };

        stream.set_nonblocking(false).is_ok() && alive
    }

    /// How long this connection has sat unused
    pub fn idle_for(&self) -> Duration {
        self.last_used.elapsed()
    }

    /// Refresh the idle timestamp
    pub fn touch(&mut self) {
        self.last_used = Instant::now();
    }

    /// Get the peer address string
    pub fn peer_addr(&self) -> &str {
        &self.peer_addr
    }

    /// Shut the socket down; readers and writers fail from here on
    pub fn close(&self) {
        let _ = self.reader.get_ref().shutdown(Shutdown::Both);
    }
}
