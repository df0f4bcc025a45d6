//! End-to-end tests over real TCP sockets: bootstrap sync and gossip
//! between two in-process nodes.

use std::sync::Arc;
use std::time::Duration;

use chronos_chain::{ChainStore, MemoryChain, MemoryTxPool, TxPool};
use chronos_node::{ChronosNode, NodeConfig};
use chronos_types::Transaction;

struct TestNode {
    node: ChronosNode,
    chain: Arc<MemoryChain>,
    pool: Arc<MemoryTxPool>,
}

async fn start_node(chain: Arc<MemoryChain>, bootstrap: Vec<String>) -> (TestNode, String) {
    let pool = Arc::new(MemoryTxPool::new());
    let config = NodeConfig {
        port: 0,
        bootstrap_peers: bootstrap,
        // Keep the production ticker out of the way; tests drive gossip
        // explicitly.
        block_interval_ms: 600_000,
        ..NodeConfig::default()
    };
    let mut node = ChronosNode::new(
        config,
        Arc::clone(&chain) as Arc<dyn ChainStore>,
        Arc::clone(&pool) as Arc<dyn TxPool>,
    )
    .unwrap();
    let addr = node.start().await.unwrap();
    let addr = format!("127.0.0.1:{}", addr.port());
    (TestNode { node, chain, pool }, addr)
}

async fn wait_for<F: Fn() -> bool>(what: &str, cond: F) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("timed out waiting for {what}");
}

fn grown_chain(blocks: u64) -> Arc<MemoryChain> {
    let chain = Arc::new(MemoryChain::with_genesis());
    for _ in 0..blocks {
        let block = chain.package_new_block(Vec::new()).unwrap();
        chain.append_block_task(block);
    }
    chain
}

#[tokio::test]
async fn lagging_node_syncs_from_bootstrap_peer() {
    let (mut seed, seed_addr) = start_node(grown_chain(5), Vec::new()).await;
    assert!(seed.node.engine().synced());

    let (mut lagging, _) = start_node(grown_chain(0), vec![seed_addr]).await;

    wait_for("lagging node to catch up", || {
        lagging.node.engine().synced() && lagging.chain.buffered_height() == 5
    })
    .await;
    assert_eq!(
        lagging.chain.latest_block().unwrap().hash(),
        seed.chain.latest_block().unwrap().hash()
    );

    lagging.node.stop().await;
    seed.node.stop().await;
}

#[tokio::test]
async fn blocks_and_transactions_gossip_between_synced_nodes() {
    let (mut seed, seed_addr) = start_node(grown_chain(0), Vec::new()).await;
    let (mut other, _) = start_node(grown_chain(0), vec![seed_addr]).await;

    wait_for("both nodes synced and connected", || {
        seed.node.engine().synced() && other.node.engine().synced()
    })
    .await;

    // A transaction submitted on the seed reaches the other node's pool.
    seed.node.coordinator().start_fanout();
    let tx = Transaction::new(b"gossip me".to_vec(), 42);
    seed.node.coordinator().add_transaction(tx.clone());
    let tx_hex = tx.hash.to_hex();
    wait_for("transaction to reach the other pool", || {
        other.pool.contains(&tx_hex)
    })
    .await;

    // A block applied on the seed reaches the other node's chain.
    let block = seed.chain.package_new_block(vec![tx]).unwrap();
    seed.chain.append_block_task(block.clone());
    seed.node.coordinator().broadcast_block(block.clone());
    wait_for("block to reach the other chain", || {
        other.chain.buffered_height() == 1
    })
    .await;
    assert_eq!(
        other.chain.block_by_height(1).unwrap().hash(),
        block.hash()
    );

    other.node.stop().await;
    seed.node.stop().await;
}
