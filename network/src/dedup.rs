//! Bounded recency cache over hashes.
//!
//! Backs the per-peer and node-wide "already seen" sets for gossip. When
//! the cache is full the least recently marked hash is evicted, so a hash
//! that keeps circulating stays resident while one-off noise ages out.

use std::collections::{BTreeMap, HashMap};

use chronos_types::Hash;

use crate::NetworkError;

/// A fixed-capacity set of hashes with least-recently-marked eviction.
///
/// `mark` refreshes recency for hashes already present; `contains` never
/// changes recency.
pub struct KnownCache {
    capacity: usize,
    /// Hash to its recency sequence number.
    entries: HashMap<Hash, u64>,
    /// Sequence number back to hash, ordered oldest first.
    order: BTreeMap<u64, Hash>,
    next_seq: u64,
}

impl KnownCache {
    pub fn new(capacity: usize) -> Result<Self, NetworkError> {
        if capacity == 0 {
            return Err(NetworkError::InvalidCapacity(capacity));
        }
        Ok(Self {
            capacity,
            entries: HashMap::with_capacity(capacity),
            order: BTreeMap::new(),
            next_seq: 0,
        })
    }

    /// Record the hash as seen, refreshing its recency if already present.
    /// Evicts the least recently marked hash when over capacity.
    pub fn mark(&mut self, hash: Hash) {
        let seq = self.next_seq;
        self.next_seq += 1;
        if let Some(old_seq) = self.entries.insert(hash, seq) {
            self.order.remove(&old_seq);
        }
        self.order.insert(seq, hash);
        if self.entries.len() > self.capacity {
            if let Some((&oldest, &victim)) = self.order.iter().next() {
                self.order.remove(&oldest);
                self.entries.remove(&victim);
            }
        }
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.entries.contains_key(hash)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
