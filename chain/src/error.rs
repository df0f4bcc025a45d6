use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("block not found: {0}")]
    BlockNotFound(String),

    #[error("transaction not found: {0}")]
    TransactionNotFound(String),

    #[error("chain has no blocks yet (awaiting genesis)")]
    EmptyChain,

    #[error("block packaging failed: {0}")]
    Packaging(String),
}
