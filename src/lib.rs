//! # Weft
//!
//! A sharded DAG ledger core. Instead of one linear chain, the ledger is a
//! collection of independent application **shards**, each forming its own DAG
//! of transactions. Every network participant (a **submitter**) additionally
//! maintains a linear per-sequence chain across the shards it touches, which
//! is what makes double-spends detectable: binding two different transactions
//! to the same (submitter, sequence, shard) slot is rejected.
//!
//! The crate is organized leaves-first:
//! - [`storage`] — abstract named key/value provider (sled-backed)
//! - [`repo`] — the ledger repository: transaction table, shard DAGs,
//!   shard tips, submitter history
//! - [`shard`] — shard layer: registration/replay, anchor computation,
//!   DAG attachment rules
//! - [`endorse`] — endorser: submitter-side anchor and transaction checks
//! - [`stack`] — the facade wiring the layers together for applications
//!
//! Networking, peer discovery and driver programs live outside this crate;
//! the facade's `handle` entry point is what a transport layer calls for
//! inbound transactions.

pub mod config;
pub mod crypto;
pub mod dto;
pub mod endorse;
pub mod repo;
pub mod shard;
pub mod stack;
pub mod state;
pub mod storage;

use serde::{Deserialize, Serialize};

/// Protocol constants
pub mod constants {
    /// Length of every content hash in the protocol (SHA-512).
    pub const HASH_LEN: usize = 64;
    /// Shard sequence assigned to the synthetic genesis node.
    pub const GENESIS_SHARD_SEQ: u64 = 0;
    /// Shard sequence of the first real transaction in a shard.
    pub const FIRST_SHARD_SEQ: u64 = 1;
    /// Submitter sequence of a submitter's first transaction.
    pub const FIRST_SUBMITTER_SEQ: u64 = 1;
    /// Separator byte between submitter id and sequence in history keys.
    pub const HISTORY_KEY_SEPARATOR: u8 = b':';
}

/// A 64-byte SHA-512 content hash identifying transactions and DAG nodes.
///
/// Ordering is the big-endian (lexicographic) comparison of the raw bytes,
/// used as the deterministic tie-breaker during anchor parent selection.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TxHash(pub [u8; constants::HASH_LEN]);

impl TxHash {
    /// The all-zero hash, used as the "no parent" marker on genesis nodes.
    pub const fn zero() -> Self {
        TxHash([0u8; constants::HASH_LEN])
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; constants::HASH_LEN]
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Short hex prefix for log lines and test diagnostics.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..8])
    }
}

impl Default for TxHash {
    fn default() -> Self {
        TxHash::zero()
    }
}

impl std::fmt::Debug for TxHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TxHash({}..)", self.short())
    }
}

impl std::fmt::Display for TxHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl Serialize for TxHash {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_bytes(&self.0)
    }
}

impl<'de> Deserialize<'de> for TxHash {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let bytes: Vec<u8> = serde::Deserialize::deserialize(d)?;
        // Reject anything but exactly 64 bytes so a corrupt record cannot
        // smuggle a short hash into DAG links.
        if bytes.len() != constants::HASH_LEN {
            return Err(serde::de::Error::custom(format!(
                "invalid hash: expected {} bytes, got {}",
                constants::HASH_LEN,
                bytes.len()
            )));
        }
        let mut hash = [0u8; constants::HASH_LEN];
        hash.copy_from_slice(&bytes);
        Ok(TxHash(hash))
    }
}

/// Compute the SHA-512 digest of the concatenation of `parts`.
///
/// Transaction ids are defined over the *raw* concatenation of the two
/// signatures, so no length prefixing happens here. Callers needing an
/// unambiguous multi-part digest should use [`sha512_tagged`].
pub fn sha512(parts: &[&[u8]]) -> TxHash {
    use sha2::{Digest, Sha512};
    let mut hasher = Sha512::new();
    for part in parts {
        hasher.update(part);
    }
    let mut hash = [0u8; constants::HASH_LEN];
    hash.copy_from_slice(&hasher.finalize());
    TxHash(hash)
}

/// SHA-512 over length-prefixed parts, preventing ambiguous concatenation
/// (e.g. `["AB","C"]` vs `["A","BC"]`). Used for signing digests.
pub fn sha512_tagged(parts: &[&[u8]]) -> TxHash {
    use sha2::{Digest, Sha512};
    let mut hasher = Sha512::new();
    for part in parts {
        hasher.update((part.len() as u64).to_be_bytes());
        hasher.update(part);
    }
    let mut hash = [0u8; constants::HASH_LEN];
    hash.copy_from_slice(&hasher.finalize());
    TxHash(hash)
}
