use thiserror::Error;

/// Result type for rate limit operations
pub type Result<T> = std::result::Result<T, RateLimitError>;

/// Errors that can occur in the rate limit engine
#[derive(Error, Debug)]
pub enum RateLimitError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid client identifier: {0}")]
    InvalidClientId(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Malformed store reply: {0}")]
    MalformedReply(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
