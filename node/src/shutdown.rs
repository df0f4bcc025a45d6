//! Graceful shutdown for the chronos node.
//!
//! One `tokio::sync::broadcast` channel fans the stop signal out to
//! every long-running loop: the coordinator's dispatch, production, and
//! fan-out tasks, the sync engine driver, the accept loop, and each
//! peer's read/write loops. The daemon triggers it from SIGINT/SIGTERM;
//! tests trigger it programmatically via [`ShutdownController::shutdown`].

use tokio::signal;
use tokio::sync::broadcast;

/// Coordinates graceful shutdown across all node subsystems.
///
/// Each loop holds a receiver from [`subscribe`](Self::subscribe) and
/// `select!`s on it alongside its main work; `ChronosNode::stop` then
/// joins the loop handles. Firing the signal notifies every receiver.
pub struct ShutdownController {
    tx: broadcast::Sender<()>,
}

impl ShutdownController {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx }
    }

    /// Get a receiver that will be notified on shutdown.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Trigger shutdown programmatically.
    pub fn shutdown(&self) {
        let _ = self.tx.send(());
    }

    /// Wait for SIGTERM or SIGINT, then trigger shutdown.
    pub async fn wait_for_signal(&self) {
        let ctrl_c = signal::ctrl_c();

        #[cfg(unix)]
        let terminate = async {
            signal::unix::signal(signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => { tracing::info!("received SIGINT, shutting down"); }
            _ = terminate => { tracing::info!("received SIGTERM, shutting down"); }
        }

        self.shutdown();
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}
