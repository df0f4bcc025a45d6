//! Top-level P2P wire message envelope.
//!
//! Every message sent between chronos nodes is one [`WireMessage`] frame.
//! The closed enum doubles as the dispatch table: the coordinator matches
//! on the variant, so an unhandled kind is a compile error rather than a
//! missing entry in a function-pointer map. Payload encoding is bincode
//! and is identical across peers speaking the same [`PROTOCOL_ID`].

use serde::{Deserialize, Serialize};

use chronos_types::{Block, Hash, Transaction};

/// Protocol version identifier. Peers speaking different identifiers must
/// not exchange frames.
pub const PROTOCOL_ID: &str = "/chronos/1.0.0";

/// Top-level P2P wire message.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum WireMessage {
    /// Connection handshake carrying the sender's chain head.
    Status(StatusMsg),
    /// A freshly produced or accepted block, full payload.
    NewBlock(Block),
    /// Hash-only block announcement; receiver may request the bodies.
    NewBlockHashes(Vec<Hash>),
    /// Request for the bodies of previously announced blocks.
    GetBlockBodies(Vec<Hash>),
    /// Bodies answering a [`WireMessage::GetBlockBodies`].
    BlockBodies(Vec<Block>),
    /// Transaction broadcast, full payloads.
    Transactions(Vec<Transaction>),
    /// Hash-only announcement of transactions sitting in the sender's pool.
    NewPooledTransactionHashes(Vec<Hash>),
    /// Request for one pooled transaction by hash.
    GetPooledTransaction(Hash),
    /// Ask the peer for its current sync status.
    SyncStatusReq,
    /// Sync status snapshot answering a [`WireMessage::SyncStatusReq`].
    SyncStatus(SyncStatusMsg),
    /// Request the blocks in the inclusive height range `[start, end]`.
    SyncGetBlocks { start: u64, end: u64 },
    /// Blocks answering a [`WireMessage::SyncGetBlocks`].
    SyncBlocks(Vec<Block>),
}

/// Handshake payload: the sender's chain head.
///
/// `latest_height` is -1 (with a zero hash) while the sender is still
/// waiting for its genesis block; such a peer is not yet useful as a sync
/// source.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusMsg {
    pub latest_height: i64,
    pub latest_hash: Hash,
}

/// Sync status snapshot: chain head plus the buffered sync window.
///
/// `buffered_end_height` is -1 when the window is empty. The same -1 /
/// zero-hash sentinel as [`StatusMsg`] applies to the head fields.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatusMsg {
    pub latest_height: i64,
    pub latest_hash: Hash,
    pub buffered_start_height: u64,
    pub buffered_end_height: i64,
}

impl SyncStatusMsg {
    /// Snapshot for a node that has no block yet.
    pub fn empty() -> Self {
        Self {
            latest_height: -1,
            latest_hash: Hash::ZERO,
            buffered_start_height: 0,
            buffered_end_height: -1,
        }
    }

    /// Whether the sender has nothing to offer as a sync source.
    pub fn is_empty(&self) -> bool {
        self.latest_height < 0
    }
}
