//! Multi-record transaction monitor
//!
//! Bookkeeping for an optimistic multi-record transaction: the bound
//! namespace, the last-observed read version per key, and the set of keys
//! written. Commit validation compares the recorded read versions against
//! the server's current ones; that protocol lives outside this type.

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;
use rand::Rng;

use crate::error::{ClientError, Result};
use crate::routing::KeyDigest;

struct TxnState {
    namespace: Option<String>,
    reads: HashMap<KeyDigest, u64>,
    writes: HashSet<KeyDigest>,
    roll_attempted: bool,
}

/// A multi-record transaction context
///
/// Owned by one logical transaction flow; sharing one transaction across
/// threads is the caller's synchronization problem.
pub struct Txn {
    id: u64,
    state: Mutex<TxnState>,
}

impl Txn {
    /// Create a transaction with a fresh random non-zero id
    pub fn new() -> Self {
        let mut rng = rand::thread_rng();
        // Zero is reserved as "invalid".
        let mut id: u64 = rng.gen();
        while id == 0 {
            id = rng.gen();
        }

        Self {
            id,
            state: Mutex::new(TxnState {
                namespace: None,
                reads: HashMap::new(),
                writes: HashSet::new(),
                roll_attempted: false,
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Bind the transaction to a namespace
    ///
    /// Succeeds when unbound or when the namespace matches the existing
    /// binding; a mismatch is a usage error and no I/O is attempted.
    pub fn set_namespace(&self, namespace: &str) -> Result<()> {
        let mut state = self.state.lock();
        match &state.namespace {
            None => {
                state.namespace = Some(namespace.to_string());
                Ok(())
            }
            Some(bound) if bound == namespace => Ok(()),
            Some(bound) => Err(ClientError::Txn(format!(
                "Namespace must be the same for all commands in the transaction: bound {}, got {}",
                bound, namespace
            ))),
        }
    }

    pub fn namespace(&self) -> Option<String> {
        self.state.lock().namespace.clone()
    }

    /// Record the version observed by a read; last write wins per key
    pub fn on_read(&self, digest: &KeyDigest, version: Option<u64>) {
        if let Some(version) = version {
            self.state.lock().reads.insert(*digest, version);
        }
    }

    /// Version recorded for a key, if any
    pub fn get_read_version(&self, digest: &KeyDigest) -> Option<u64> {
        self.state.lock().reads.get(digest).copied()
    }

    /// Record the outcome of a write
    ///
    /// A write that observed a version keeps the key as a read dependency;
    /// a completed write moves the key from the read map into the write
    /// set.
    pub fn on_write(&self, digest: &KeyDigest, version: Option<u64>, ok: bool) {
        let mut state = self.state.lock();
        match version {
            Some(version) => {
                state.reads.insert(*digest, version);
            }
            None if ok => {
                state.reads.remove(digest);
                state.writes.insert(*digest);
            }
            None => {}
        }
    }

    /// Whether the key is in the write set
    pub fn writes_contain(&self, digest: &KeyDigest) -> bool {
        self.state.lock().writes.contains(digest)
    }

    pub fn read_count(&self) -> usize {
        self.state.lock().reads.len()
    }

    pub fn write_count(&self) -> usize {
        self.state.lock().writes.len()
    }

    /// Latch a single commit/abort attempt; returns false if one was
    /// already attempted
    pub fn set_roll_attempted(&self) -> bool {
        let mut state = self.state.lock();
        if state.roll_attempted {
            return false;
        }
        state.roll_attempted = true;
        true
    }

    /// Clear all recorded state, leaving the transaction reusable
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.namespace = None;
        state.reads.clear();
        state.writes.clear();
        state.roll_attempted = false;
    }
}

impl Default for Txn {
    fn default() -> Self {
        Self::new()
    }
}
