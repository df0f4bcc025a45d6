//! Narrow interfaces to the chain store and transaction pool.
//!
//! The propagation layer never touches storage or admission rules
//! directly; it depends only on the [`ChainStore`] and [`TxPool`] traits.
//! [`MemoryChain`] and [`MemoryTxPool`] are deterministic in-memory
//! backends used for tests and single-process deployments.

pub mod error;
pub mod memory;
pub mod pool;
pub mod store;

pub use error::ChainError;
pub use memory::{MemoryChain, MemoryTxPool};
pub use pool::TxPool;
pub use store::ChainStore;
