//! Peer links, gossip bookkeeping, and chain synchronization.
//!
//! A [`Peer`] owns one remote connection: a framed read loop feeding the
//! node's inbound channel and a bounded write queue drained by a write
//! loop. [`KnownCache`] tracks which hashes a peer (or the node itself)
//! has already seen so gossip is not echoed back. [`SyncEngine`] drives a
//! lagging node from `Unsynced` through `Syncing` to `Synced` by
//! buffering fetched blocks and applying them in height order.

pub mod dedup;
pub mod error;
pub mod peer;
pub mod sync;

pub use dedup::KnownCache;
pub use error::NetworkError;
pub use peer::{spawn_peer_loops, Peer, MAX_KNOWN_BLOCK, MAX_KNOWN_TRANSACTION};
pub use sync::{SyncEngine, SyncStatus};
