//! Fundamental types for the chronos node.
//!
//! Defines the content-hash type and the block/transaction payloads that
//! the propagation layer moves between peers. The propagation core only
//! reads `height` and `hash`; everything else is opaque payload.

pub mod block;
pub mod hash;
pub mod transaction;

pub use block::{Block, BlockHeader};
pub use hash::Hash;
pub use transaction::Transaction;
