//! Blocks as the propagation layer sees them: a header carrying height and
//! hash, plus the packaged transactions. Validity rules are enforced by the
//! chain store, not here.

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use serde::{Deserialize, Serialize};

use crate::{Hash, Transaction};

/// Block header — the only part the propagation core inspects.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Chain height, 0 for genesis.
    pub height: u64,
    /// Hash of the parent block; zero for genesis.
    pub parent_hash: Hash,
    /// Assembly time (unix milliseconds).
    pub timestamp: u64,
    /// Content hash — `Block::compute_hash()` of the header fields and
    /// transaction hashes.
    pub hash: Hash,
}

/// An immutable block. Once appended to the chain store it never changes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Build a block and stamp its content hash.
    pub fn new(
        height: u64,
        parent_hash: Hash,
        timestamp: u64,
        transactions: Vec<Transaction>,
    ) -> Self {
        let mut block = Self {
            header: BlockHeader {
                height,
                parent_hash,
                timestamp,
                hash: Hash::ZERO,
            },
            transactions,
        };
        block.header.hash = block.compute_hash();
        block
    }

    pub fn height(&self) -> u64 {
        self.header.height
    }

    pub fn hash(&self) -> Hash {
        self.header.hash
    }

    /// Blake2b-256 over height ‖ parent ‖ timestamp ‖ transaction hashes.
    pub fn compute_hash(&self) -> Hash {
        let mut hasher = Blake2b::<U32>::new();
        hasher.update(self.header.height.to_be_bytes());
        hasher.update(self.header.parent_hash.as_bytes());
        hasher.update(self.header.timestamp.to_be_bytes());
        for tx in &self.transactions {
            hasher.update(tx.hash.as_bytes());
        }
        Hash::new(hasher.finalize().into())
    }
}
