//! chronos daemon — entry point for running a chronos node.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use chronos_chain::{ChainStore, MemoryChain, MemoryTxPool, TxPool};
use chronos_node::{init_logging, ChronosNode, LogFormat, NodeConfig};

#[derive(Parser)]
#[command(name = "chronos-daemon", about = "chronos blockchain node daemon")]
struct Cli {
    /// Path to a TOML configuration file. If provided, file settings are
    /// used as the base; CLI flags and env vars override them.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Port for P2P connections.
    #[arg(long, env = "CHRONOS_P2P_PORT")]
    port: Option<u16>,

    /// Bootstrap peer addresses (comma-separated: "1.2.3.4:9610,5.6.7.8:9610").
    #[arg(long, env = "CHRONOS_BOOTSTRAP_PEERS", value_delimiter = ',')]
    bootstrap_peers: Vec<String>,

    /// Maximum number of peer connections.
    #[arg(long, env = "CHRONOS_MAX_PEERS")]
    max_peers: Option<usize>,

    /// Block production interval in milliseconds.
    #[arg(long, env = "CHRONOS_BLOCK_INTERVAL_MS")]
    block_interval_ms: Option<u64>,

    /// Log format: "human" or "json".
    #[arg(long, env = "CHRONOS_LOG_FORMAT")]
    log_format: Option<String>,

    /// Log level: "trace", "debug", "info", "warn", "error".
    #[arg(long, env = "CHRONOS_LOG_LEVEL")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match cli.config {
        Some(ref path) => NodeConfig::from_toml_file(
            path.to_str()
                .ok_or_else(|| anyhow::anyhow!("config path is not valid UTF-8"))?,
        )?,
        None => NodeConfig::default(),
    };
    if let Some(port) = cli.port {
        config.port = port;
    }
    if !cli.bootstrap_peers.is_empty() {
        config.bootstrap_peers = cli.bootstrap_peers;
    }
    if let Some(max_peers) = cli.max_peers {
        config.max_peers = max_peers;
    }
    if let Some(interval) = cli.block_interval_ms {
        config.block_interval_ms = interval;
    }
    if let Some(format) = cli.log_format {
        config.log_format = format;
    }
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }

    let format = match config.log_format.as_str() {
        "json" => LogFormat::Json,
        _ => LogFormat::Human,
    };
    init_logging(format, &config.log_level);

    let chain = Arc::new(MemoryChain::with_genesis());
    let pool = Arc::new(MemoryTxPool::new());
    let mut node = ChronosNode::new(
        config,
        chain as Arc<dyn ChainStore>,
        pool as Arc<dyn TxPool>,
    )?;
    node.start().await?;

    node.shutdown_controller().wait_for_signal().await;
    node.stop().await;

    Ok(())
}
