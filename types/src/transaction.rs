//! Transactions as the propagation layer sees them: a content hash and an
//! opaque payload. Signing and semantic validation belong to external
//! collaborators.

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use serde::{Deserialize, Serialize};

use crate::Hash;

/// A transaction identified by the Blake2b-256 hash of its content.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Content hash — `compute_hash()` of the fields below.
    pub hash: Hash,
    /// Opaque transaction body.
    pub payload: Vec<u8>,
    /// Creation time (unix milliseconds).
    pub timestamp: u64,
}

impl Transaction {
    /// Build a transaction and stamp its content hash.
    pub fn new(payload: Vec<u8>, timestamp: u64) -> Self {
        let mut tx = Self {
            hash: Hash::ZERO,
            payload,
            timestamp,
        };
        tx.hash = tx.compute_hash();
        tx
    }

    /// Blake2b-256 over payload ‖ timestamp.
    pub fn compute_hash(&self) -> Hash {
        let mut hasher = Blake2b::<U32>::new();
        hasher.update(&self.payload);
        hasher.update(self.timestamp.to_be_bytes());
        Hash::new(hasher.finalize().into())
    }
}
