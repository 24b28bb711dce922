//! Error types for the event bus

use thiserror::Error;

/// Result type for event bus operations
pub type Result<T> = std::result::Result<T, Error>;

/// Event bus errors
#[derive(Error, Debug)]
pub enum Error {
    /// NATS connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Publish failed
    #[error("Publish error: {0}")]
    Publish(String),

    /// JetStream error
    #[error("JetStream error: {0}")]
    JetStream(String),

    /// Stream creation failed
    #[error("Stream creation error: {0}")]
    StreamCreation(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Operation timed out
    #[error("Timeout after {0}ms")]
    Timeout(u64),
}
