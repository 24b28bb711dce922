//! Audit sink collaborator
//!
//! Every ledger append and every state transition is forwarded to the
//! audit sink as a structured record, synchronously with the write.
//! Supplementary descriptive metadata is best-effort.

use crate::state_machine::PaymentState;
use crate::types::{ActorMetadata, EscrowStatus, MovementType};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What happened
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AuditKind {
    /// Payment state machine transition
    StateTransition {
        /// Previous state
        from: PaymentState,
        /// New state
        to: PaymentState,
    },

    /// Ledger entry appended
    LedgerAppend {
        /// Movement kind
        movement_type: MovementType,
        /// Amount in minor units
        amount_cents: i64,
    },

    /// Escrow status change
    EscrowChange {
        /// Previous status
        from: EscrowStatus,
        /// New status
        to: EscrowStatus,
        /// Mandatory human-readable reason for cancellations
        reason: Option<String>,
    },
}

/// One structured audit record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    /// When it happened
    pub occurred_at: DateTime<Utc>,

    /// Payment concerned
    pub payment_id: Uuid,

    /// Booking concerned, if known
    pub booking_id: Option<Uuid>,

    /// What happened
    pub kind: AuditKind,

    /// Who did it
    pub actor: ActorMetadata,
}

/// Receives audit records
pub trait AuditSink: Send + Sync {
    /// Record one event. Implementations must not fail the caller;
    /// delivery problems are the sink's concern.
    fn record(&self, record: AuditRecord);
}

/// Emits audit records as structured tracing events
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, record: AuditRecord) {
        match &record.kind {
            AuditKind::StateTransition { from, to } => {
                tracing::info!(
                    payment_id = %record.payment_id,
                    actor = %record.actor.actor,
                    from = %from,
                    to = %to,
                    "audit: state transition"
                );
            }
            AuditKind::LedgerAppend {
                movement_type,
                amount_cents,
            } => {
                tracing::info!(
                    payment_id = %record.payment_id,
                    actor = %record.actor.actor,
                    movement = %movement_type,
                    amount_cents,
                    "audit: ledger append"
                );
            }
            AuditKind::EscrowChange { from, to, reason } => {
                tracing::info!(
                    payment_id = %record.payment_id,
                    actor = %record.actor.actor,
                    from = %from,
                    to = %to,
                    reason = reason.as_deref().unwrap_or(""),
                    "audit: escrow change"
                );
            }
        }
    }
}

/// Collects audit records in memory (tests)
#[derive(Debug, Default)]
pub struct InMemoryAuditSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl InMemoryAuditSink {
    /// New empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything recorded so far
    pub fn snapshot(&self) -> Vec<AuditRecord> {
        self.records.lock().clone()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn record(&self, record: AuditRecord) {
        self.records.lock().push(record);
    }
}
