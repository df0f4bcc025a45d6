//! In-memory chain store and transaction pool.
//!
//! Used by the daemon's default wiring and by tests. Both types apply
//! work synchronously under a mutex, so `append_block_task` completes
//! before it returns even though the trait allows deferral.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use chronos_types::{Block, Hash, Transaction};
use tracing::warn;

use crate::{ChainError, ChainStore, TxPool};

/// Maximum transactions drained per packaging round.
const PACKAGE_BATCH: usize = 512;

#[derive(Default)]
struct ChainInner {
    /// Blocks ordered by height, contiguous from genesis.
    blocks: Vec<Block>,
    /// Hash index into `blocks`.
    by_hash: HashMap<Hash, usize>,
    /// Committed transactions by hash.
    transactions: HashMap<Hash, Transaction>,
}

/// A fully in-memory [`ChainStore`].
#[derive(Default)]
pub struct MemoryChain {
    inner: Mutex<ChainInner>,
}

impl MemoryChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// A chain seeded with a genesis block at height 0.
    pub fn with_genesis() -> Self {
        let chain = Self::new();
        let genesis = Block::new(0, Hash::ZERO, 0, Vec::new());
        chain.append_block_task(genesis);
        chain
    }

    /// Heights in the order blocks were applied. Test hook.
    pub fn applied_heights(&self) -> Vec<u64> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.blocks.iter().map(|b| b.height()).collect()
    }
}

impl ChainStore for MemoryChain {
    fn latest_block(&self) -> Result<Block, ChainError> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.blocks.last().cloned().ok_or(ChainError::EmptyChain)
    }

    fn package_new_block(&self, transactions: Vec<Transaction>) -> Result<Block, ChainError> {
        let head = self.latest_block()?;
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| ChainError::Packaging(e.to_string()))?
            .as_secs();
        Ok(Block::new(
            head.height() + 1,
            head.hash(),
            timestamp,
            transactions,
        ))
    }

    fn append_block_task(&self, block: Block) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let expected = inner.blocks.len() as u64;
        if block.height() != expected {
            warn!(
                height = block.height(),
                expected,
                hash = %block.hash(),
                "dropping out-of-order block"
            );
            return;
        }
        if expected > 0 {
            let head_hash = inner.blocks[inner.blocks.len() - 1].hash();
            if block.header.parent_hash != head_hash {
                warn!(
                    height = block.height(),
                    hash = %block.hash(),
                    "dropping block with mismatched parent"
                );
                return;
            }
        }
        let idx = inner.blocks.len();
        inner.by_hash.insert(block.hash(), idx);
        for tx in &block.transactions {
            inner.transactions.insert(tx.hash, tx.clone());
        }
        inner.blocks.push(block);
    }

    fn block_by_hash(&self, hash: &Hash) -> Result<Block, ChainError> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner
            .by_hash
            .get(hash)
            .map(|&idx| inner.blocks[idx].clone())
            .ok_or_else(|| ChainError::BlockNotFound(hash.to_hex()))
    }

    fn block_by_height(&self, height: u64) -> Result<Block, ChainError> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner
            .blocks
            .get(height as usize)
            .cloned()
            .ok_or_else(|| ChainError::BlockNotFound(format!("height {height}")))
    }

    fn transaction_by_hash(&self, hash: &Hash) -> Result<Transaction, ChainError> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner
            .transactions
            .get(hash)
            .cloned()
            .ok_or_else(|| ChainError::TransactionNotFound(hash.to_hex()))
    }

    fn buffered_height(&self) -> i64 {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.blocks.len() as i64 - 1
    }
}

/// A fully in-memory [`TxPool`].
#[derive(Default)]
pub struct MemoryTxPool {
    pending: Mutex<HashMap<String, Transaction>>,
}

impl MemoryTxPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TxPool for MemoryTxPool {
    fn add(&self, tx: Transaction) {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.entry(tx.hash.to_hex()).or_insert(tx);
    }

    fn contains(&self, hash_hex: &str) -> bool {
        let pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.contains_key(hash_hex)
    }

    fn get(&self, hash_hex: &str) -> Option<Transaction> {
        let pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.get(hash_hex).cloned()
    }

    fn package(&self) -> Vec<Transaction> {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        let keys: Vec<String> = pending.keys().take(PACKAGE_BATCH).cloned().collect();
        keys.iter()
            .filter_map(|k| pending.remove(k))
            .collect()
    }
}
