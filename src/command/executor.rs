//! Command executor
//!
//! Drives one logical request through the explicit state machine:
//!
//! ```text
//! Init → SelectNode → Connect → Write → ReadHeader → ReadBody → Parse
//!                                  └──────────── Retry ←──────────┘
//! ```
//!
//! The deadline is absolute: computed once at `Init` and consumed across
//! every retry. Transient network and topology errors re-enter
//! `SelectNode` (possibly landing on a different node); protocol desync,
//! server-reported results, usage errors and cancellation are surfaced
//! verbatim.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use crossbeam::channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};

use crate::cluster::{ClusterInner, FailureKind, Node, PoolContext};
use crate::error::{ClientError, Result};
use crate::metrics::CommandCategory;
use crate::net::Connection;
use crate::protocol::{
    decode_message, decode_proto_header, encode_message, FieldType, MessageFrame, MessageType,
    ProtoHeader, ResultCode, PROTO_HEADER_SIZE,
};
use crate::routing::Key;
use crate::txn::Txn;

use super::{CancelToken, CommandPolicy, Operation, Record};

/// States of the command machine, in transition order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandState {
    Init,
    SelectNode,
    Connect,
    Write,
    ReadHeader,
    ReadBody,
    Parse,
    Done,
    Retry,
    Failed,
}

// =============================================================================
// Synchronous Execution
// =============================================================================

/// Execute one logical command to completion
pub(crate) fn execute(
    inner: &ClusterInner,
    policy: &CommandPolicy,
    key: &Key,
    op: &Operation,
    txn: Option<&Txn>,
    cancel: Option<&CancelToken>,
    ctx: PoolContext,
) -> Result<Record> {
    // Init: validate before any I/O and fix the absolute deadline.
    if key.namespace.is_empty() || key.namespace.len() > 31 {
        return Err(ClientError::Config(format!(
            "Invalid namespace: {:?}",
            key.namespace
        )));
    }
    if let Some(txn) = txn {
        txn.set_namespace(&key.namespace)?;
    }

    let deadline = Instant::now() + policy.timeout;
    let frame = encode_request(key, op, txn);

    let mut attempts: u32 = 0;
    loop {
        attempts += 1;

        let error = match run_attempt(inner, policy, key, op, &frame, deadline, cancel, ctx) {
            Ok(response) => {
                return classify_response(response, op, key, txn).map_err(|e| match e {
                    ClientError::Timeout { last_error, .. } => ClientError::Timeout {
                        attempts,
                        last_error,
                    },
                    e => e,
                })
            }
            Err(AttemptError::Fatal(e)) => return Err(e),
            Err(AttemptError::Retryable(e)) => e,
        };

        // Retry resolution: past the deadline or out of budget means the
        // command fails as a timeout carrying the last error seen.
        if Instant::now() >= deadline || attempts > policy.max_retries {
            return Err(ClientError::Timeout {
                attempts,
                last_error: error.to_string(),
            });
        }

        if matches!(error, ClientError::NoAvailableNode) {
            // Give the tender a moment to repair the map.
            let pause = policy
                .retry_backoff
                .min(deadline.saturating_duration_since(Instant::now()));
            std::thread::sleep(pause);
        }

        tracing::debug!(
            "Retrying command for {} after attempt {}: {}",
            key.digest,
            attempts,
            error
        );
    }
}

enum AttemptError {
    /// May be retried on a (possibly different) node
    Retryable(ClientError),
    /// Surfaced verbatim; no further attempts
    Fatal(ClientError),
}

/// One pass through the state machine against one node
#[allow(clippy::too_many_arguments)]
fn run_attempt(
    inner: &ClusterInner,
    policy: &CommandPolicy,
    key: &Key,
    op: &Operation,
    frame: &[u8],
    deadline: Instant,
    cancel: Option<&CancelToken>,
    ctx: PoolContext,
) -> std::result::Result<MessageFrame, AttemptError> {
    use AttemptError::*;

    let started = Instant::now();

    let mut state = CommandState::SelectNode;
    let mut node: Option<Arc<Node>> = None;
    let mut conn: Option<Connection> = None;

    let mut header = [0u8; PROTO_HEADER_SIZE];
    let mut header_filled = 0usize;
    let mut proto: Option<ProtoHeader> = None;
    let mut body: Vec<u8> = Vec::new();
    let mut body_filled = 0usize;

    loop {
        // Cancellation is observed at every transition; a held connection
        // is discarded, never pooled.
        if cancel.map(|c| c.is_canceled()).unwrap_or(false) {
            if let Some(c) = conn.take() {
                if let Some(n) = node.as_ref() {
                    n.pool(ctx).destroy(c);
                }
            }
            return Err(Fatal(ClientError::Canceled));
        }
        tracing::trace!("Command for {} entering {:?}", key.digest, state);

        state = match state {
            CommandState::SelectNode => {
                let target = inner
                    .node_for(&key.namespace, &key.digest, op.is_write())
                    .map_err(Retryable)?;
                node = Some(target);
                CommandState::Connect
            }

            CommandState::Connect => {
                let n = node.as_ref().expect("node selected");
                let Some(remaining) = remaining_time(deadline) else {
                    return Err(Retryable(ClientError::Connection(
                        "deadline exceeded before connect".to_string(),
                    )));
                };
                let connect_timeout = io_wait(policy, remaining);

                let t0 = Instant::now();
                match n.pool(ctx).acquire(connect_timeout) {
                    Ok((c, fresh)) => {
                        if fresh {
                            n.record_latency(CommandCategory::Conn, t0.elapsed());
                        }
                        conn = Some(c);
                        CommandState::Write
                    }
                    Err(e) => {
                        if !matches!(e, ClientError::MaxConnectionsExceeded { .. }) {
                            n.record_failure(FailureKind::Network);
                        }
                        return Err(Retryable(e));
                    }
                }
            }

            CommandState::Write => {
                let Some(remaining) = remaining_time(deadline) else {
                    destroy_held(&node, &mut conn, ctx);
                    return Err(Retryable(ClientError::Connection(
                        "deadline exceeded before write".to_string(),
                    )));
                };
                let wait = io_wait(policy, remaining);

                let io = {
                    let c = conn.as_mut().expect("connection acquired");
                    c.set_timeouts(Some(wait), Some(wait))
                        .and_then(|_| c.write_all(frame))
                };

                match io {
                    Ok(()) => CommandState::ReadHeader,
                    Err(e) => {
                        destroy_held(&node, &mut conn, ctx);
                        if let Some(n) = node.as_ref() {
                            n.record_failure(FailureKind::Network);
                        }
                        return Err(Retryable(e));
                    }
                }
            }

            CommandState::ReadHeader => {
                let read = {
                    let c = conn.as_mut().expect("connection acquired");
                    read_staged(c, &mut header, &mut header_filled, deadline, policy, cancel)
                };

                match read {
                    Ok(()) => match decode_proto_header(&header) {
                        Ok(p) if p.msg_type == MessageType::Message => {
                            body = vec![0u8; p.size as usize];
                            body_filled = 0;
                            proto = Some(p);
                            CommandState::ReadBody
                        }
                        Ok(p) => {
                            // Desynchronized stream; the connection is unusable.
                            destroy_held(&node, &mut conn, ctx);
                            return Err(Fatal(ClientError::Protocol(format!(
                                "Unexpected {:?} frame in command response",
                                p.msg_type
                            ))));
                        }
                        Err(e) => {
                            destroy_held(&node, &mut conn, ctx);
                            return Err(Fatal(e));
                        }
                    },
                    Err(abort) => {
                        let recovery = ReadRecovery {
                            stage: ReadStage::Header,
                            header,
                            header_filled,
                            body_expected: 0,
                            body_filled: 0,
                        };
                        let n = node.as_ref().expect("node selected");
                        return Err(abandon_read(inner, n, ctx, conn.take(), recovery, abort));
                    }
                }
            }

            CommandState::ReadBody => {
                let read = {
                    let c = conn.as_mut().expect("connection acquired");
                    read_staged(c, &mut body, &mut body_filled, deadline, policy, cancel)
                };

                match read {
                    Ok(()) => CommandState::Parse,
                    Err(abort) => {
                        let recovery = ReadRecovery {
                            stage: ReadStage::Body,
                            header,
                            header_filled,
                            body_expected: proto.map(|p| p.size as usize).unwrap_or(0),
                            body_filled,
                        };
                        let n = node.as_ref().expect("node selected");
                        return Err(abandon_read(inner, n, ctx, conn.take(), recovery, abort));
                    }
                }
            }

            CommandState::Parse => {
                let n = node.as_ref().expect("node selected");

                match decode_message(&body) {
                    Ok(response) => {
                        let c = conn.take().expect("connection acquired");
                        n.pool(ctx).release(c);
                        n.record_success();
                        n.record_latency(op.category(), started.elapsed());
                        return Ok(response);
                    }
                    Err(e) => {
                        destroy_held(&node, &mut conn, ctx);
                        return Err(Fatal(e));
                    }
                }
            }

            // Entry, exit and retry states live in `execute`; reaching them
            // here is a logic error.
            CommandState::Init
            | CommandState::Done
            | CommandState::Retry
            | CommandState::Failed => unreachable!("state {:?} handled by execute()", state),
        };
    }
}

fn destroy_held(node: &Option<Arc<Node>>, conn: &mut Option<Connection>, ctx: PoolContext) {
    if let Some(c) = conn.take() {
        if let Some(n) = node.as_ref() {
            n.pool(ctx).destroy(c);
        } else {
            c.close();
        }
    }
}

// =============================================================================
// Staged Reads and Recovery
// =============================================================================

enum ReadAbort {
    TimedOut,
    Canceled,
    Io(ClientError),
}

/// Fill a buffer under the absolute deadline, polling in socket-timeout
/// slices so cancellation is observed between polls
fn read_staged(
    conn: &mut Connection,
    buf: &mut [u8],
    filled: &mut usize,
    deadline: Instant,
    policy: &CommandPolicy,
    cancel: Option<&CancelToken>,
) -> std::result::Result<(), ReadAbort> {
    loop {
        if cancel.map(|c| c.is_canceled()).unwrap_or(false) {
            return Err(ReadAbort::Canceled);
        }
        let Some(remaining) = remaining_time(deadline) else {
            return Err(ReadAbort::TimedOut);
        };

        let wait = io_wait(policy, remaining);
        if let Err(e) = conn.set_timeouts(Some(wait), Some(wait)) {
            return Err(ReadAbort::Io(e));
        }

        match conn.read_into(buf, filled) {
            Ok(true) => return Ok(()),
            Ok(false) => continue,
            Err(e) => return Err(ReadAbort::Io(e)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadStage {
    Header,
    Body,
}

/// Captured read progress at the moment a mid-stream abort happened
///
/// Knowing the exact stage, the partial buffer and the expected capacity
/// lets recovery discard exactly the unread remainder instead of
/// resynchronizing blindly.
struct ReadRecovery {
    stage: ReadStage,
    header: [u8; PROTO_HEADER_SIZE],
    header_filled: usize,
    body_expected: usize,
    body_filled: usize,
}

/// Resolve an aborted read: try to drain the in-flight response so the
/// connection can be pooled again, otherwise destroy it
fn abandon_read(
    inner: &ClusterInner,
    node: &Arc<Node>,
    ctx: PoolContext,
    conn: Option<Connection>,
    recovery: ReadRecovery,
    abort: ReadAbort,
) -> AttemptError {
    let Some(mut conn) = conn else {
        return AttemptError::Retryable(ClientError::Connection("connection lost".to_string()));
    };
    let pool = node.pool(ctx);

    let recovered = match (&abort, inner.config.recover_timeout) {
        (ReadAbort::Io(_), _) => false,
        (_, Some(budget)) => try_recover(&mut conn, &recovery, budget),
        (_, None) => false,
    };

    if recovered {
        tracing::debug!(
            "Recovered connection to {} after mid-read abort",
            node.name()
        );
        pool.release(conn);
    } else {
        pool.destroy(conn);
    }

    match abort {
        ReadAbort::Canceled => AttemptError::Fatal(ClientError::Canceled),
        ReadAbort::TimedOut => {
            node.record_failure(FailureKind::CommandTimeout);
            // The outer loop sees the deadline is gone and reports Timeout.
            AttemptError::Retryable(ClientError::Connection("timed out mid-read".to_string()))
        }
        ReadAbort::Io(e) => {
            node.record_failure(FailureKind::Network);
            AttemptError::Retryable(e)
        }
    }
}

/// Drain the remainder of an in-flight response within a short budget
fn try_recover(conn: &mut Connection, recovery: &ReadRecovery, budget: Duration) -> bool {
    let deadline = Instant::now() + budget;
    if conn.set_timeouts(Some(budget), Some(budget)).is_err() {
        return false;
    }

    match recovery.stage {
        ReadStage::Header => {
            let mut header = recovery.header;
            let mut filled = recovery.header_filled;
            loop {
                match conn.read_into(&mut header, &mut filled) {
                    Ok(true) => break,
                    Ok(false) => {
                        if Instant::now() >= deadline {
                            return false;
                        }
                    }
                    Err(_) => return false,
                }
            }
            let Ok(proto) = decode_proto_header(&header) else {
                return false;
            };
            drain(conn, proto.size as usize, deadline)
        }
        ReadStage::Body => drain(
            conn,
            recovery.body_expected - recovery.body_filled,
            deadline,
        ),
    }
}

fn drain(conn: &mut Connection, mut remaining: usize, deadline: Instant) -> bool {
    let mut scratch = [0u8; 4096];

    while remaining > 0 {
        let want = remaining.min(scratch.len());
        let mut filled = 0usize;
        match conn.read_into(&mut scratch[..want], &mut filled) {
            Ok(true) => remaining -= want,
            Ok(false) => {
                remaining -= filled;
                if Instant::now() >= deadline {
                    return false;
                }
            }
            Err(_) => return false,
        }
    }
    true
}

fn remaining_time(deadline: Instant) -> Option<Duration> {
    let now = Instant::now();
    if now >= deadline {
        None
    } else {
        Some(deadline - now)
    }
}

/// One socket wait slice: bounded by the policy and the deadline, but
/// never so small it truncates to a zero (infinite) socket timeout
fn io_wait(policy: &CommandPolicy, remaining: Duration) -> Duration {
    policy
        .socket_timeout
        .min(remaining)
        .max(Duration::from_millis(1))
}

// =============================================================================
// Request Encoding and Response Classification
// =============================================================================

/// Build the wire frame for a command
fn encode_request(key: &Key, op: &Operation, txn: Option<&Txn>) -> BytesMut {
    let txn_id;
    let mut fields: Vec<(FieldType, &[u8])> = vec![
        (FieldType::Namespace, key.namespace.as_bytes()),
        (FieldType::Set, key.set.as_bytes()),
        (FieldType::Digest, key.digest.as_bytes()),
    ];

    let mut record_version = 0;
    if let Some(txn) = txn {
        txn_id = txn.id().to_be_bytes();
        fields.push((FieldType::TxnId, &txn_id));
        // Carry the expected version so the server can detect conflicts.
        record_version = txn.get_read_version(&key.digest).unwrap_or(0);
    }

    let value = match op {
        Operation::Put(value) => Some(value.as_slice()),
        _ => None,
    };

    encode_message(op.info_flags(), 0, record_version, &fields, value)
}

/// Map a response frame to the caller-visible result and feed the
/// transaction monitor on success
fn classify_response(
    frame: MessageFrame,
    op: &Operation,
    key: &Key,
    txn: Option<&Txn>,
) -> Result<Record> {
    let version = (frame.record_version != 0).then_some(frame.record_version);

    match frame.result {
        ResultCode::Ok => {
            if let Some(txn) = txn {
                match op {
                    Operation::Get => txn.on_read(&key.digest, version),
                    Operation::Put(_) | Operation::Delete => {
                        txn.on_write(&key.digest, version, true)
                    }
                }
            }
            Ok(Record {
                value: frame.value,
                generation: frame.generation,
                version,
            })
        }
        ResultCode::NotFound => Err(ClientError::KeyNotFound),
        ResultCode::GenerationMismatch => Err(ClientError::GenerationMismatch),
        // Server-side timeouts surface as the usual timeout outcome.
        ResultCode::ServerTimeout => Err(ClientError::Timeout {
            attempts: 0,
            last_error: "server-side timeout".to_string(),
        }),
        code => Err(ClientError::Server(code.as_u8())),
    }
}

// =============================================================================
// Background Executor
// =============================================================================

struct Job {
    policy: CommandPolicy,
    txn: Option<Arc<Txn>>,
    key: Key,
    op: Operation,
    cancel: CancelToken,
    reply: Sender<Result<Record>>,
}

/// Fixed pool of worker threads running the same state machine
///
/// Each worker owns a pool slot on every node, so contexts never contend
/// on a shared exclusive pool.
pub struct Executor {
    tx: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl Executor {
    pub(crate) fn new(inner: Arc<ClusterInner>, threads: usize) -> Self {
        let (tx, rx) = unbounded::<Job>();

        let workers = (0..threads)
            .map(|index| {
                let inner = inner.clone();
                let rx: Receiver<Job> = rx.clone();
                std::thread::Builder::new()
                    .name(format!("meshkv-exec-{}", index))
                    .spawn(move || {
                        for job in rx.iter() {
                            let result = execute(
                                &inner,
                                &job.policy,
                                &job.key,
                                &job.op,
                                job.txn.as_deref(),
                                Some(&job.cancel),
                                PoolContext::Worker(index),
                            );
                            // A dropped handle just discards the result.
                            let _ = job.reply.send(result);
                        }
                    })
                    .expect("failed to spawn executor worker")
            })
            .collect();

        Self {
            tx: Some(tx),
            workers,
        }
    }

    /// Queue a command; the handle delivers the result and carries the
    /// cancellation token
    pub(crate) fn submit(
        &self,
        policy: CommandPolicy,
        txn: Option<Arc<Txn>>,
        key: Key,
        op: Operation,
    ) -> CommandHandle {
        let (reply_tx, reply_rx) = bounded(1);
        let cancel = CancelToken::new();

        let job = Job {
            policy,
            txn,
            key,
            op,
            cancel: cancel.clone(),
            reply: reply_tx.clone(),
        };

        match &self.tx {
            Some(tx) if tx.send(job).is_ok() => {}
            _ => {
                let _ = reply_tx.send(Err(ClientError::Canceled));
            }
        }

        CommandHandle {
            rx: reply_rx,
            cancel,
        }
    }

    /// Stop accepting work and join the workers
    pub(crate) fn shutdown(&mut self) {
        self.tx.take();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

/// Handle to a command running on the background executor
pub struct CommandHandle {
    rx: Receiver<Result<Record>>,
    cancel: CancelToken,
}

impl CommandHandle {
    /// Request cooperative cancellation
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Block until the command completes
    pub fn wait(self) -> Result<Record> {
        self.rx.recv().unwrap_or(Err(ClientError::Canceled))
    }

    /// Block up to `timeout`; `None` means the command is still running
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<Record>> {
        match self.rx.recv_timeout(timeout) {
            Ok(result) => Some(result),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(Err(ClientError::Canceled)),
        }
    }
}

// =============================================================================
// Pipelined Execution
// =============================================================================

/// Execute a batch over pipelined connections, preserving input order in
/// the results
pub(crate) fn execute_pipelined(
    inner: &ClusterInner,
    policy: &CommandPolicy,
    batch: &[(Key, Operation)],
) -> Vec<Result<Record>> {
    let deadline = Instant::now() + policy.timeout;

    // Issue every request first; responses are collected afterwards so the
    // writes pipeline.
    let slots: Vec<Result<(Arc<Node>, Instant, Receiver<crate::net::PipeResult>)>> = batch
        .iter()
        .map(|(key, op)| {
            let node = inner.node_for(&key.namespace, &key.digest, op.is_write())?;
            let pipe = node.pipe_pool().acquire(policy.socket_timeout)?;
            let frame = encode_request(key, op, None);
            let rx = pipe.submit(&frame)?;
            Ok((node, Instant::now(), rx))
        })
        .collect();

    slots
        .into_iter()
        .zip(batch.iter())
        .map(|(slot, (key, op))| {
            let (node, started, rx) = slot?;
            match rx.recv_deadline(deadline) {
                Ok(Ok(frame)) => {
                    node.record_latency(CommandCategory::Batch, started.elapsed());
                    node.record_success();
                    classify_response(frame, op, key, None)
                }
                Ok(Err(reason)) => {
                    node.record_failure(FailureKind::Network);
                    Err(ClientError::Connection(reason))
                }
                Err(_) => {
                    node.record_failure(FailureKind::CommandTimeout);
                    Err(ClientError::Timeout {
                        attempts: 1,
                        last_error: "pipelined response not received before deadline".to_string(),
                    })
                }
            }
        })
        .collect()
}
