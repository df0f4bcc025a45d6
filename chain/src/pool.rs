//! Transaction pool trait.

use chronos_types::Transaction;

/// Trait for the pending-transaction pool.
///
/// Keys are lowercase hex encodings of the transaction hash.
pub trait TxPool: Send + Sync {
    /// Add a pending transaction. Duplicates are ignored.
    fn add(&self, tx: Transaction);

    /// Whether the pool currently holds a transaction with this hash.
    fn contains(&self, hash_hex: &str) -> bool;

    /// Fetch a pending transaction by hash, if present.
    fn get(&self, hash_hex: &str) -> Option<Transaction>;

    /// Remove and return a batch of pending transactions for block
    /// packaging. May return an empty batch.
    fn package(&self) -> Vec<Transaction>;
}
