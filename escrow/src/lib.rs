//! WanderPay Escrow
//!
//! Holds captured booking funds until the post-trip hold period passes
//! and no dispute is open, then disburses the platform commission and
//! the agent payout through the money-movement ledger.
//!
//! # Lifecycle
//!
//! ```text
//! NOT_STARTED -> HOLDING -> PENDING_RELEASE -> RELEASED
//!                   \            \
//!                    +-> CANCELLED <-+
//! ```
//!
//! Commission and payout are fixed once at hold time; the release never
//! recomputes them.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

pub mod config;
pub mod disputes;
pub mod error;
pub mod manager;
pub mod scheduler;

// Re-exports
pub use config::{commission_for, EscrowConfig};
pub use disputes::{DisputeGate, InMemoryDisputeGate};
pub use error::{Error, Result};
pub use manager::EscrowManager;
pub use scheduler::{ReleaseScheduler, SweepReport};
