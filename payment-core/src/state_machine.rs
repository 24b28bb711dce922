//! Payment state machine
//!
//! The authoritative lifecycle of a single payment. Every mutation of
//! `PaymentRecord.state` goes through [`check_transition`]; there is no
//! other write path.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Payment lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentState {
    /// Record created, checkout not yet started
    Initiated,
    /// Checkout session handed to the customer
    AwaitingPayment,
    /// Gateway is processing the payment
    Processing,
    /// Funds authorized, not yet captured
    Authorized,
    /// Funds captured by the platform (merchant of record)
    Captured,
    /// Payment failed (terminal)
    Failed,
    /// Payment cancelled before capture (terminal)
    Cancelled,
    /// Refund in flight at the gateway
    RefundProcessing,
    /// Part of the captured amount refunded
    PartiallyRefunded,
    /// Full captured amount refunded (terminal)
    FullyRefunded,
    /// Customer opened a chargeback with their bank
    ChargebackInitiated,
    /// Chargeback closed either way (terminal)
    ChargebackResolved,
}

impl PaymentState {
    /// Legal destination states from this state
    pub fn allowed_transitions(&self) -> &'static [PaymentState] {
        use PaymentState::*;
        match self {
            Initiated => &[AwaitingPayment, Cancelled],
            AwaitingPayment => &[Processing, Cancelled, Failed],
            Processing => &[Authorized, Failed],
            Authorized => &[Captured, Cancelled, RefundProcessing],
            Captured => &[RefundProcessing, ChargebackInitiated],
            RefundProcessing => &[PartiallyRefunded, FullyRefunded, Failed],
            PartiallyRefunded => &[RefundProcessing, ChargebackInitiated],
            ChargebackInitiated => &[ChargebackResolved],
            Failed | Cancelled | FullyRefunded | ChargebackResolved => &[],
        }
    }

    /// Whether `target` is a legal destination from this state
    pub fn can_transition_to(&self, target: PaymentState) -> bool {
        self.allowed_transitions().contains(&target)
    }

    /// Terminal states accept no further transitions
    pub fn is_terminal(&self) -> bool {
        self.allowed_transitions().is_empty()
    }

    /// Wire name (matches the serde representation)
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentState::Initiated => "INITIATED",
            PaymentState::AwaitingPayment => "AWAITING_PAYMENT",
            PaymentState::Processing => "PROCESSING",
            PaymentState::Authorized => "AUTHORIZED",
            PaymentState::Captured => "CAPTURED",
            PaymentState::Failed => "FAILED",
            PaymentState::Cancelled => "CANCELLED",
            PaymentState::RefundProcessing => "REFUND_PROCESSING",
            PaymentState::PartiallyRefunded => "PARTIALLY_REFUNDED",
            PaymentState::FullyRefunded => "FULLY_REFUNDED",
            PaymentState::ChargebackInitiated => "CHARGEBACK_INITIATED",
            PaymentState::ChargebackResolved => "CHARGEBACK_RESOLVED",
        }
    }

    /// All states, for exhaustive tests
    pub fn all() -> &'static [PaymentState] {
        use PaymentState::*;
        &[
            Initiated,
            AwaitingPayment,
            Processing,
            Authorized,
            Captured,
            Failed,
            Cancelled,
            RefundProcessing,
            PartiallyRefunded,
            FullyRefunded,
            ChargebackInitiated,
            ChargebackResolved,
        ]
    }
}

impl fmt::Display for PaymentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Validate a transition against the legal table
pub fn check_transition(from: PaymentState, to: PaymentState) -> Result<()> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(Error::IllegalTransition { from, to })
    }
}
