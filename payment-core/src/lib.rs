//! WanderPay Payment Core
//!
//! Authoritative payment lifecycle and money-movement ledger for the
//! marketplace settlement subsystem.
//!
//! # Architecture
//!
//! - **Strict state machine**: every payment moves only through the legal
//!   transition table, never by direct field mutation
//! - **Append-only ledger**: fund movements between logical accounts are
//!   immutable once recorded
//! - **Atomic commits**: a state transition and its ledger entry land in a
//!   single storage write batch
//! - **Per-entity locking**: concurrent webhook deliveries for one payment
//!   are serialized through a lock registry
//!
//! # Invariants
//!
//! - Conservation of funds: the cross-account net of all movements for a
//!   payment is always zero
//! - Ledger rows are never updated or deleted
//! - Illegal transitions leave state untouched

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

pub mod audit;
pub mod clock;
pub mod config;
pub mod error;
pub mod idempotency;
pub mod ledger;
pub mod metrics;
pub mod state_machine;
pub mod storage;
pub mod types;

// Re-exports
pub use audit::{AuditKind, AuditRecord, AuditSink, InMemoryAuditSink, TracingAuditSink};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use error::{Error, Result};
pub use idempotency::{Claim, IdempotencyStore};
pub use ledger::{LockRegistry, MovementDraft, Payments};
pub use metrics::Metrics;
pub use state_machine::PaymentState;
pub use storage::Storage;
pub use types::{
    ActorMetadata, Currency, EscrowRecord, EscrowStatus, IdempotencyRecord, LedgerAccount,
    MoneyBreakdown, MoneyMovementEntry, MovementType, PaymentRecord,
};
