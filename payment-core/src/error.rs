//! Error types for the payment core

use crate::state_machine::PaymentState;
use thiserror::Error;
use uuid::Uuid;

/// Result type for payment core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Payment core errors
#[derive(Error, Debug)]
pub enum Error {
    /// Storage error (RocksDB)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Transition not present in the legal table; state is left untouched
    #[error("Illegal transition: {from} -> {to}")]
    IllegalTransition {
        /// State the payment was in
        from: PaymentState,
        /// Requested target state
        to: PaymentState,
    },

    /// Conservation-of-funds violation. Fatal: automated flows for this
    /// payment must halt and an operator must investigate.
    #[error("Ledger imbalance for payment {payment_id}: net {net_cents} cents")]
    LedgerImbalance {
        /// Payment whose movements fail to net to zero
        payment_id: Uuid,
        /// Non-zero cross-account net
        net_cents: i64,
    },

    /// Payment not found
    #[error("Payment not found: {0}")]
    PaymentNotFound(Uuid),

    /// Escrow not found
    #[error("Escrow not found: {0}")]
    EscrowNotFound(Uuid),

    /// External event already processed
    #[error("Duplicate event: {0}")]
    DuplicateEvent(String),

    /// Movement failed validation (non-positive amount, overflow, ...)
    #[error("Invalid movement: {0}")]
    InvalidMovement(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Other(msg)
    }
}

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::Other(msg.to_string())
    }
}
