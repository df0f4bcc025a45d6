use thiserror::Error;

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("cache capacity must be non-zero, got {0}")]
    InvalidCapacity(usize),

    #[error("message exceeds maximum frame size: {0} bytes")]
    MessageTooLarge(usize),

    #[error("failed to decode message: {0}")]
    Decode(String),

    #[error("failed to encode message: {0}")]
    Encode(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
