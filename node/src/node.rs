//! Node runtime: TCP listener, bootstrap dialing, and task supervision.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chronos_chain::{ChainStore, TxPool};
use chronos_network::{spawn_peer_loops, Peer, SyncEngine};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::{Coordinator, NodeConfig, NodeError, NodeMetrics, ShutdownController};

/// Timeout for an outbound TCP connection attempt.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// How long to wait for background tasks to finish during shutdown.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// A running chronos node.
///
/// Owns the coordinator and every background task. Chain storage and the
/// transaction pool are injected, so tests and the daemon wire in whatever
/// backing they need.
pub struct ChronosNode {
    config: NodeConfig,
    coordinator: Arc<Coordinator>,
    engine: Arc<SyncEngine>,
    shutdown: Arc<ShutdownController>,
    metrics: Arc<NodeMetrics>,
    task_handles: Vec<JoinHandle<()>>,
    /// Read/write loop handles of every attached peer, shared with the
    /// accept and bootstrap tasks that attach them.
    peer_task_handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl ChronosNode {
    pub fn new(
        config: NodeConfig,
        chain: Arc<dyn ChainStore>,
        pool: Arc<dyn TxPool>,
    ) -> Result<Self, NodeError> {
        let metrics = Arc::new(NodeMetrics::new());
        let shutdown = Arc::new(ShutdownController::new());
        let engine = Arc::new(SyncEngine::new(
            Arc::clone(&chain),
            config.sync_batch,
            Duration::from_millis(config.sync_request_timeout_ms),
        ));
        let coordinator = Coordinator::new(
            config.clone(),
            chain,
            pool,
            Arc::clone(&engine),
            Arc::clone(&metrics),
            Arc::clone(&shutdown),
        )?;
        Ok(Self {
            config,
            coordinator,
            engine,
            shutdown,
            metrics,
            task_handles: Vec::new(),
            peer_task_handles: Arc::new(Mutex::new(Vec::new())),
        })
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    pub fn metrics(&self) -> &Arc<NodeMetrics> {
        &self.metrics
    }

    pub fn shutdown_controller(&self) -> &Arc<ShutdownController> {
        &self.shutdown
    }

    /// Bind the P2P listener and start every background task. Returns the
    /// locally bound address.
    pub async fn start(&mut self) -> Result<std::net::SocketAddr, NodeError> {
        let listener = TcpListener::bind(("0.0.0.0", self.config.port)).await?;
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, protocol = chronos_messages::PROTOCOL_ID, "p2p listener bound");

        self.task_handles.push(self.coordinator.spawn_dispatch());
        self.task_handles.push(self.coordinator.spawn_production());
        self.task_handles
            .push(self.engine.spawn(self.shutdown.subscribe()));
        self.task_handles.push(self.spawn_accept_loop(listener));

        if self.config.bootstrap_peers.is_empty() {
            // Nothing to sync from; this node seeds the network.
            self.engine.set_synced();
        } else {
            self.task_handles.push(self.spawn_bootstrap());
        }

        Ok(local_addr)
    }

    fn spawn_accept_loop(&self, listener: TcpListener) -> JoinHandle<()> {
        let coordinator = Arc::clone(&self.coordinator);
        let config = self.config.clone();
        let shutdown = Arc::clone(&self.shutdown);
        let peer_handles = Arc::clone(&self.peer_task_handles);
        let mut shutdown_rx = self.shutdown.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    accepted = listener.accept() => match accepted {
                        Ok((stream, addr)) => {
                            let id = addr.to_string();
                            if let Err(e) = attach_peer(
                                &coordinator,
                                &config,
                                &shutdown,
                                &peer_handles,
                                stream,
                                id,
                            )
                            .await
                            {
                                warn!(peer = %addr, error = %e, "failed to attach inbound peer");
                            }
                        }
                        Err(e) => {
                            warn!(error = %e, "accept failed");
                        }
                    },
                    _ = shutdown_rx.recv() => {
                        debug!("accept loop stopping");
                        break;
                    }
                }
            }
        })
    }

    fn spawn_bootstrap(&self) -> JoinHandle<()> {
        let coordinator = Arc::clone(&self.coordinator);
        let config = self.config.clone();
        let shutdown = Arc::clone(&self.shutdown);
        let peer_handles = Arc::clone(&self.peer_task_handles);
        tokio::spawn(async move {
            for addr in &config.bootstrap_peers {
                match connect_to_peer(&coordinator, &config, &shutdown, &peer_handles, addr).await
                {
                    Ok(()) => info!(peer = %addr, "bootstrap peer connected"),
                    Err(e) => warn!(peer = %addr, error = %e, "bootstrap connect failed"),
                }
            }
        })
    }

    /// Signal shutdown and wait, bounded, for every background task: the
    /// node's own loops, the coordinator's fan-out loops, and each peer's
    /// read/write loops.
    pub async fn stop(&mut self) {
        info!("stopping node");
        self.shutdown.shutdown();
        let mut handles = std::mem::take(&mut self.task_handles);
        handles.extend(self.coordinator.drain_task_handles());
        handles.extend(
            self.peer_task_handles
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .drain(..),
        );
        for handle in handles {
            match tokio::time::timeout(SHUTDOWN_TIMEOUT, handle).await {
                Ok(_) => {}
                Err(_) => warn!("task did not stop within the shutdown timeout"),
            }
        }
    }
}

/// Dial `addr`, then register the connection with the coordinator.
pub async fn connect_to_peer(
    coordinator: &Arc<Coordinator>,
    config: &NodeConfig,
    shutdown: &ShutdownController,
    peer_handles: &Arc<Mutex<Vec<JoinHandle<()>>>>,
    addr: &str,
) -> Result<(), NodeError> {
    let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr))
        .await
        .map_err(|_| NodeError::Other(format!("connect to {addr} timed out")))??;
    attach_peer(coordinator, config, shutdown, peer_handles, stream, addr.to_string()).await
}

/// Split the stream, spawn the peer's read/write loops (bound to the
/// shutdown signal and tracked for joining), and register the peer.
async fn attach_peer(
    coordinator: &Arc<Coordinator>,
    config: &NodeConfig,
    shutdown: &ShutdownController,
    peer_handles: &Arc<Mutex<Vec<JoinHandle<()>>>>,
    stream: TcpStream,
    id: String,
) -> Result<(), NodeError> {
    stream.set_nodelay(true)?;
    let (reader, writer) = stream.into_split();
    let (peer, outbound_rx) = Peer::new(
        id,
        config.peer_send_queue_capacity,
        config.known_block_capacity,
        config.known_tx_capacity,
    )?;
    let (read_handle, write_handle) = spawn_peer_loops(
        Arc::clone(&peer),
        reader,
        writer,
        outbound_rx,
        coordinator.inbound_sender(),
        shutdown.subscribe(),
    );
    {
        let mut handles = peer_handles.lock().unwrap_or_else(|e| e.into_inner());
        handles.push(read_handle);
        handles.push(write_handle);
    }
    if !coordinator.add_peer(Arc::clone(&peer)).await {
        peer.mark_stopped();
    }
    Ok(())
}
