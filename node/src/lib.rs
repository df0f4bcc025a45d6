//! The chronos node: coordinator, TCP plumbing, and runtime wiring.
//!
//! [`ChronosNode`] assembles the pieces: it listens for and dials peers,
//! hands each connection to the [`Coordinator`], and supervises the
//! background tasks until shutdown. The coordinator owns the gossip and
//! dispatch logic; chain storage and the transaction pool are injected as
//! trait objects so callers pick the backing implementation.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod node;
pub mod shutdown;

pub use config::{FanoutPolicy, NodeConfig};
pub use coordinator::Coordinator;
pub use error::NodeError;
pub use logging::{init_logging, LogFormat};
pub use metrics::NodeMetrics;
pub use node::ChronosNode;
pub use shutdown::ShutdownController;
