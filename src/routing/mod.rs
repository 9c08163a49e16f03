//! Key digesting and partition routing
//!
//! Pure routing math: (set, user key) → 160-bit digest → partition id.
//! Which node owns a partition is the replica map's business.

mod replica_map;

pub use replica_map::{PartitionMap, PartitionMapBuilder};

use std::fmt;

use ripemd::{Digest as _, Ripemd160};

use crate::error::{ClientError, Result};

/// Digest size in bytes (160 bits)
pub const DIGEST_SIZE: usize = 20;

// =============================================================================
// Key Digest
// =============================================================================

/// 20-byte record digest, the unit of routing and record identity
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyDigest([u8; DIGEST_SIZE]);

impl KeyDigest {
    /// Compute the digest of a record: set bytes first, then the user key
    pub fn compute(set: &str, user_key: &[u8]) -> Self {
        let mut hasher = Ripemd160::new();
        hasher.update(set.as_bytes());
        hasher.update(user_key);
        KeyDigest(hasher.finalize().into())
    }

    /// Wrap raw digest bytes (e.g. received on the wire)
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; DIGEST_SIZE] = bytes.try_into().map_err(|_| {
            ClientError::Protocol(format!(
                "Digest must be {} bytes, got {}",
                DIGEST_SIZE,
                bytes.len()
            ))
        })?;
        Ok(KeyDigest(arr))
    }

    pub fn as_bytes(&self) -> &[u8; DIGEST_SIZE] {
        &self.0
    }

    /// Partition id: the low log2(n_partitions) bits of the digest.
    /// `n_partitions` must be a power of two.
    pub fn partition_id(&self, n_partitions: u32) -> u32 {
        u32::from_le_bytes([self.0[0], self.0[1], self.0[2], self.0[3]]) & (n_partitions - 1)
    }
}

impl fmt::Display for KeyDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x")?;
        for b in &self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

impl fmt::Debug for KeyDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyDigest({})", self)
    }
}

// =============================================================================
// Key
// =============================================================================

/// A fully-addressed record key
#[derive(Debug, Clone)]
pub struct Key {
    pub namespace: String,
    pub set: String,
    pub user_key: Vec<u8>,
    pub digest: KeyDigest,
}

impl Key {
    /// Build a key, computing its digest
    pub fn new(namespace: impl Into<String>, set: impl Into<String>, user_key: &[u8]) -> Self {
        let set = set.into();
        let digest = KeyDigest::compute(&set, user_key);
        Self {
            namespace: namespace.into(),
            set,
            user_key: user_key.to_vec(),
            digest,
        }
    }
}
