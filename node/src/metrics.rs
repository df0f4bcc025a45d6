//! Prometheus metrics for the chronos node.
//!
//! Covers gossip queue throughput, block production, and peer liveness.
//! The [`NodeMetrics`] struct owns a dedicated [`Registry`] so an external
//! exposition endpoint can encode it into the Prometheus text format.

use prometheus::{
    register_int_counter_with_registry, register_int_gauge_with_registry, IntCounter, IntGauge,
    Opts, Registry,
};

/// Central collection of all node-level Prometheus metrics.
pub struct NodeMetrics {
    /// The Prometheus registry that owns every metric below.
    pub registry: Registry,

    /// Total messages enqueued towards peers.
    pub send_queue_total: IntCounter,
    /// Total messages received from peers.
    pub recv_queue_total: IntCounter,
    /// Total blocks produced locally.
    pub blocks_produced: IntCounter,
    /// Total transactions received (network or local submission).
    pub transactions_received: IntCounter,
    /// Current number of connected peers.
    pub peer_count: IntGauge,
}

impl NodeMetrics {
    /// Create a fresh set of metrics, all registered under a new
    /// [`Registry`].
    pub fn new() -> Self {
        let registry = Registry::new();

        let send_queue_total = register_int_counter_with_registry!(
            Opts::new(
                "chronos_p2p_send_queue_total",
                "Total messages enqueued towards peers"
            ),
            registry
        )
        .expect("failed to register send_queue_total counter");

        let recv_queue_total = register_int_counter_with_registry!(
            Opts::new(
                "chronos_p2p_recv_queue_total",
                "Total messages received from peers"
            ),
            registry
        )
        .expect("failed to register recv_queue_total counter");

        let blocks_produced = register_int_counter_with_registry!(
            Opts::new(
                "chronos_blocks_produced_total",
                "Total blocks produced locally"
            ),
            registry
        )
        .expect("failed to register blocks_produced counter");

        let transactions_received = register_int_counter_with_registry!(
            Opts::new(
                "chronos_transactions_received_total",
                "Total transactions received"
            ),
            registry
        )
        .expect("failed to register transactions_received counter");

        let peer_count = register_int_gauge_with_registry!(
            Opts::new("chronos_peer_count", "Current number of connected peers"),
            registry
        )
        .expect("failed to register peer_count gauge");

        Self {
            registry,
            send_queue_total,
            recv_queue_total,
            blocks_produced,
            transactions_received,
            peer_count,
        }
    }
}

impl Default for NodeMetrics {
    fn default() -> Self {
        Self::new()
    }
}
