//! Chain synchronization engine.
//!
//! A node starts `Unsynced`, polls its peers for their heads, and once a
//! peer claims a higher chain it moves to `Syncing`: fetched blocks land
//! in a height-ordered buffer and are applied strictly in order. The
//! engine reports `Synced` when the local head catches the best
//! advertised height; reports at or below the local head are ignored
//! from then on, while a taller advertisement re-enters `Syncing`.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chronos_chain::ChainStore;
use chronos_messages::WireMessage;
use chronos_types::Block;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::Peer;

/// Blocks requested per sync round.
pub const SYNC_BATCH: u64 = 64;

/// How long to wait for a sync request to make progress before re-issuing.
pub const SYNC_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Interval between sync engine ticks.
const TICK_INTERVAL: Duration = Duration::from_millis(500);

/// Ticks between head polls once synced. Keeps a quiet node from
/// staying one block behind forever after a dropped gossip frame.
const SYNCED_POLL_TICKS: u32 = 20;

/// Synchronization state. `Synced` holds until a peer advertises a
/// height above the local head, which drops the engine back to
/// `Syncing`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncStatus {
    /// No peer has reported a head yet.
    Unsynced,
    /// A peer is ahead of us and blocks are being fetched.
    Syncing,
    /// Local head has reached the best advertised height.
    Synced,
}

struct SyncInner {
    status: SyncStatus,
    /// Fetched blocks waiting for their predecessors, keyed by height.
    buffer: BTreeMap<u64, Block>,
    /// Highest height any peer has advertised. -1 until the first report.
    best_height: i64,
    peers: Vec<Arc<Peer>>,
    /// Outstanding block-range request, if any.
    last_request: Option<(u64, u64, Instant)>,
    /// Ticks since the last head poll while synced.
    ticks_since_poll: u32,
}

/// Drives a node from `Unsynced` to `Synced` against its connected peers.
pub struct SyncEngine {
    inner: Mutex<SyncInner>,
    chain: Arc<dyn ChainStore>,
    batch: u64,
    request_timeout: Duration,
}

impl SyncEngine {
    pub fn new(chain: Arc<dyn ChainStore>, batch: u64, request_timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(SyncInner {
                status: SyncStatus::Unsynced,
                buffer: BTreeMap::new(),
                best_height: -1,
                peers: Vec::new(),
                last_request: None,
                ticks_since_poll: 0,
            }),
            chain,
            batch: batch.max(1),
            request_timeout,
        }
    }

    pub fn status(&self) -> SyncStatus {
        self.lock().status
    }

    pub fn synced(&self) -> bool {
        self.status() == SyncStatus::Synced
    }

    /// Force the terminal state. Used by nodes that bootstrap a fresh
    /// network and have nobody to sync from.
    pub fn set_synced(&self) {
        let mut inner = self.lock();
        if inner.status != SyncStatus::Synced {
            info!("sync complete");
            inner.status = SyncStatus::Synced;
            inner.buffer.clear();
            inner.last_request = None;
        }
    }

    pub fn add_peer(&self, peer: Arc<Peer>) {
        self.lock().peers.push(peer);
    }

    /// Fold in a peer's advertised chain head. A negative height is the
    /// "no block yet" sentinel; such a peer is not a usable sync source
    /// and its report changes nothing.
    pub fn observe_status(&self, height: i64) {
        if height < 0 {
            return;
        }
        let local = self.chain.buffered_height();
        let mut inner = self.lock();
        if height > local {
            if inner.status != SyncStatus::Syncing {
                info!(local, remote = height, "peer is ahead, starting sync");
            }
            inner.status = SyncStatus::Syncing;
            inner.best_height = inner.best_height.max(height);
        } else if inner.status == SyncStatus::Unsynced {
            drop(inner);
            self.set_synced();
        }
    }

    /// Buffer a fetched block and apply every consecutive block now
    /// available. Heights at or below the local head are ignored, and the
    /// first block received for a height wins.
    pub fn append_block(&self, block: Block) {
        let height = block.height();
        let mut inner = self.lock();
        if (height as i64) <= self.chain.buffered_height() {
            return;
        }
        inner.buffer.entry(height).or_insert(block);

        let mut applied_any = false;
        loop {
            let next = (self.chain.buffered_height() + 1) as u64;
            match inner.buffer.remove(&next) {
                Some(ready) => {
                    self.chain.append_block_task(ready);
                    applied_any = true;
                }
                None => break,
            }
        }
        if applied_any {
            inner.last_request = None;
        }
        if inner.best_height >= 0 && self.chain.buffered_height() >= inner.best_height {
            drop(inner);
            self.set_synced();
        }
    }

    /// Lowest buffered height and highest buffered height (-1 when the
    /// buffer is empty).
    pub fn buffered_window(&self) -> (u64, i64) {
        let inner = self.lock();
        let start = inner.buffer.keys().next().copied().unwrap_or(0);
        let end = inner
            .buffer
            .keys()
            .next_back()
            .map(|&h| h as i64)
            .unwrap_or(-1);
        (start, end)
    }

    /// One round of the sync protocol: prune dead peers, poll heads while
    /// not yet synced, and request the next block range while syncing.
    pub fn tick(&self) {
        let mut inner = self.lock();
        inner.peers.retain(|p| !p.stopped());

        match inner.status {
            SyncStatus::Synced => {
                // Slow head poll so a dropped gossip frame cannot leave
                // this node permanently one block behind.
                inner.ticks_since_poll += 1;
                if inner.ticks_since_poll >= SYNCED_POLL_TICKS {
                    inner.ticks_since_poll = 0;
                    for peer in &inner.peers {
                        peer.send(WireMessage::SyncStatusReq);
                    }
                }
            }
            SyncStatus::Unsynced => {
                for peer in &inner.peers {
                    peer.send(WireMessage::SyncStatusReq);
                }
            }
            SyncStatus::Syncing => {
                for peer in &inner.peers {
                    peer.send(WireMessage::SyncStatusReq);
                }
                let local = self.chain.buffered_height();
                if inner.best_height >= 0 && local >= inner.best_height {
                    drop(inner);
                    self.set_synced();
                    return;
                }
                let start = (local + 1) as u64;
                let end = (local + self.batch as i64).min(inner.best_height) as u64;
                if let Some((req_start, req_end, at)) = inner.last_request {
                    if req_start == start && req_end == end && at.elapsed() < self.request_timeout
                    {
                        return;
                    }
                }
                debug!(start, end, "requesting block range");
                for peer in &inner.peers {
                    peer.send(WireMessage::SyncGetBlocks { start, end });
                }
                inner.last_request = Some((start, end, Instant::now()));
            }
        }
    }

    /// Run [`SyncEngine::tick`] on an interval until shutdown.
    pub fn spawn(self: &Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(TICK_INTERVAL);
            loop {
                tokio::select! {
                    _ = interval.tick() => engine.tick(),
                    _ = shutdown_rx.recv() => {
                        debug!("sync engine stopping");
                        break;
                    }
                }
            }
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SyncInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}
