//! Error types for escrow operations

use thiserror::Error;
use uuid::Uuid;

/// Result type for escrow operations
pub type Result<T> = std::result::Result<T, Error>;

/// Escrow errors
#[derive(Error, Debug)]
pub enum Error {
    /// Operation not valid in the current escrow/payment state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Release gate closed: too early, open dispute, or gate unreachable
    #[error("Not eligible for release: {0}")]
    NotEligible(String),

    /// Release already scheduled; the eligibility date is never moved
    #[error("Release already scheduled for escrow {0}")]
    AlreadyScheduled(Uuid),

    /// Funds already disbursed; distinct from a blocked operation
    #[error("Escrow {0} already released")]
    AlreadyReleased(Uuid),

    /// Cancellation reason below the minimum length
    #[error("Cancellation reason too short: {got} chars, minimum {min}")]
    ReasonTooShort {
        /// Required minimum
        min: usize,
        /// What the caller provided
        got: usize,
    },

    /// Payment core error
    #[error(transparent)]
    Core(#[from] payment_core::Error),

    /// Event publish error
    #[error(transparent)]
    Publish(#[from] event_bus::Error),
}
