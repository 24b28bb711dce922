//! Error types for the webhook gateway

use thiserror::Error;

/// Result type for gateway operations
pub type Result<T> = std::result::Result<T, Error>;

/// Gateway errors
#[derive(Error, Debug)]
pub enum Error {
    /// Signature verification failed; the request is rejected outright
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    /// Body is not a parseable gateway event
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    /// Handler cannot make progress; the event goes to the dead-letter
    /// path for an operator
    #[error("Unrecoverable: {0}")]
    Unrecoverable(String),

    /// Payment core error
    #[error(transparent)]
    Core(#[from] payment_core::Error),

    /// Escrow error
    #[error(transparent)]
    Escrow(#[from] escrow::Error),

    /// Event publish error
    #[error(transparent)]
    Publish(#[from] event_bus::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}
