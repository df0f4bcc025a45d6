//! One connected remote peer: send queue, gossip bookkeeping, and the
//! framed read/write loops that service its socket.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chronos_messages::WireMessage;
use chronos_types::{Block, Hash, Transaction};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::{KnownCache, NetworkError};

/// Hard ceiling on a single wire frame.
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Capacity of the per-peer cache of block hashes the peer is known to have.
pub const MAX_KNOWN_BLOCK: usize = 1024;

/// Capacity of the per-peer cache of transaction hashes the peer is known
/// to have.
pub const MAX_KNOWN_TRANSACTION: usize = 32768;

/// A connected remote peer.
///
/// All methods are safe to call from any task. Once [`Peer::mark_stopped`]
/// fires the peer never accepts another message; the flag is one-way.
pub struct Peer {
    id: String,
    outbound: mpsc::Sender<WireMessage>,
    known_blocks: Mutex<KnownCache>,
    known_transactions: Mutex<KnownCache>,
    stopped: AtomicBool,
}

impl Peer {
    /// Build a peer and the receiving half of its outbound queue. The
    /// receiver is handed to [`spawn_peer_loops`].
    pub fn new(
        id: String,
        send_queue_capacity: usize,
        known_block_capacity: usize,
        known_tx_capacity: usize,
    ) -> Result<(Arc<Self>, mpsc::Receiver<WireMessage>), NetworkError> {
        let (outbound, outbound_rx) = mpsc::channel(send_queue_capacity.max(1));
        let peer = Arc::new(Self {
            id,
            outbound,
            known_blocks: Mutex::new(KnownCache::new(known_block_capacity)?),
            known_transactions: Mutex::new(KnownCache::new(known_tx_capacity)?),
            stopped: AtomicBool::new(false),
        });
        Ok((peer, outbound_rx))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Enqueue a message for the write loop. Returns false if the peer is
    /// stopped or its queue is full; the newest message is the one dropped.
    pub fn send(&self, msg: WireMessage) -> bool {
        if self.stopped() {
            return false;
        }
        match self.outbound.try_send(msg) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(peer = %self.id, "peer send queue full, dropping message");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Send the full block and remember the peer now has it.
    pub fn deliver_block(&self, block: &Block) -> bool {
        self.mark_block(block.hash());
        self.send(WireMessage::NewBlock(block.clone()))
    }

    /// Send only the block hash and remember the peer now has it.
    pub fn announce_block(&self, hash: Hash) -> bool {
        self.mark_block(hash);
        self.send(WireMessage::NewBlockHashes(vec![hash]))
    }

    /// Send the full transaction and remember the peer now has it.
    pub fn deliver_transaction(&self, tx: &Transaction) -> bool {
        self.mark_transaction(tx.hash);
        self.send(WireMessage::Transactions(vec![tx.clone()]))
    }

    /// Send only the transaction hash and remember the peer now has it.
    pub fn announce_transaction(&self, hash: Hash) -> bool {
        self.mark_transaction(hash);
        self.send(WireMessage::NewPooledTransactionHashes(vec![hash]))
    }

    pub fn known_block(&self, hash: &Hash) -> bool {
        self.known_blocks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(hash)
    }

    pub fn known_transaction(&self, hash: &Hash) -> bool {
        self.known_transactions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(hash)
    }

    pub fn mark_block(&self, hash: Hash) {
        self.known_blocks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .mark(hash);
    }

    pub fn mark_transaction(&self, hash: Hash) {
        self.known_transactions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .mark(hash);
    }

    pub fn stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Mark the peer dead. Irreversible.
    pub fn mark_stopped(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

/// Encode a message into a 4-byte big-endian length-prefixed frame.
pub fn encode_frame(msg: &WireMessage) -> Result<Vec<u8>, NetworkError> {
    let payload = bincode::serialize(msg).map_err(|e| NetworkError::Encode(e.to_string()))?;
    if payload.len() > MAX_MESSAGE_SIZE {
        return Err(NetworkError::MessageTooLarge(payload.len()));
    }
    let mut frame = Vec::with_capacity(4 + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Read one length-prefixed frame and decode it.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<WireMessage, NetworkError> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_MESSAGE_SIZE {
        return Err(NetworkError::MessageTooLarge(len));
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    bincode::deserialize(&payload).map_err(|e| NetworkError::Decode(e.to_string()))
}

/// Spawn the read and write loops for a connected peer.
///
/// The read loop forwards every decoded frame to `inbound_tx` tagged with
/// the peer; any read or decode error marks the peer stopped and ends the
/// loop. The write loop drains the peer's outbound queue until the queue
/// closes or a write fails. Both loops also exit when `shutdown_rx`
/// fires, so the returned handles can be joined at node stop.
pub fn spawn_peer_loops<R, W>(
    peer: Arc<Peer>,
    mut reader: R,
    mut writer: W,
    mut outbound_rx: mpsc::Receiver<WireMessage>,
    inbound_tx: mpsc::Sender<(Arc<Peer>, WireMessage)>,
    shutdown_rx: broadcast::Receiver<()>,
) -> (JoinHandle<()>, JoinHandle<()>)
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let mut write_shutdown_rx = shutdown_rx.resubscribe();
    let mut read_shutdown_rx = shutdown_rx;

    let read_peer = Arc::clone(&peer);
    let read_handle = tokio::spawn(async move {
        loop {
            tokio::select! {
                read = read_frame(&mut reader) => match read {
                    Ok(msg) => {
                        if inbound_tx.send((Arc::clone(&read_peer), msg)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        debug!(peer = %read_peer.id, error = %e, "peer read loop ended");
                        break;
                    }
                },
                _ = read_shutdown_rx.recv() => break,
            }
        }
        read_peer.mark_stopped();
    });

    let write_handle = tokio::spawn(async move {
        loop {
            let msg = tokio::select! {
                msg = outbound_rx.recv() => match msg {
                    Some(msg) => msg,
                    None => break,
                },
                _ = write_shutdown_rx.recv() => break,
            };
            let frame = match encode_frame(&msg) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(peer = %peer.id, error = %e, "dropping unencodable message");
                    continue;
                }
            };
            if let Err(e) = writer.write_all(&frame).await {
                debug!(peer = %peer.id, error = %e, "peer write loop ended");
                break;
            }
        }
        peer.mark_stopped();
    });

    (read_handle, write_handle)
}
