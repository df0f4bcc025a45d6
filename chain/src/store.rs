//! Chain store trait.

use chronos_types::{Block, Hash, Transaction};

use crate::ChainError;

/// Trait for the block chain store the propagation layer talks to.
///
/// Validity rules (parent linkage, signatures, state transitions) are the
/// implementation's responsibility; callers assume an appended block was
/// admitted or silently rejected by those rules.
pub trait ChainStore: Send + Sync {
    /// The current chain head. [`ChainError::EmptyChain`] while the store
    /// is still awaiting its genesis block.
    fn latest_block(&self) -> Result<Block, ChainError>;

    /// Assemble a new block at the current head from the given
    /// transactions. Does not append it.
    fn package_new_block(&self, transactions: Vec<Transaction>) -> Result<Block, ChainError>;

    /// Enqueue a block for asynchronous application. Never blocks the
    /// caller; out-of-order or duplicate blocks are the store's problem
    /// to reject.
    fn append_block_task(&self, block: Block);

    /// Look up an applied block by hash.
    fn block_by_hash(&self, hash: &Hash) -> Result<Block, ChainError>;

    /// Look up an applied block by height.
    fn block_by_height(&self, height: u64) -> Result<Block, ChainError>;

    /// Look up a committed (mined) transaction by hash.
    fn transaction_by_hash(&self, hash: &Hash) -> Result<Transaction, ChainError>;

    /// Height of the highest block accepted into the store, including
    /// blocks enqueued but not yet flushed. -1 while empty.
    fn buffered_height(&self) -> i64;
}
