//! Core types for the payment settlement domain
//!
//! All types are designed for:
//! - Deterministic serialization (bincode)
//! - Exact arithmetic (integer minor currency units, never floats)

use crate::state_machine::PaymentState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// ISO 4217 currency code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
pub enum Currency {
    /// US Dollar
    USD,
    /// Euro
    EUR,
    /// British Pound
    GBP,
}

impl Currency {
    /// ISO 4217 code
    pub fn code(&self) -> &'static str {
        match self {
            Currency::USD => "USD",
            Currency::EUR => "EUR",
            Currency::GBP => "GBP",
        }
    }

    /// Parse from string
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "USD" => Some(Currency::USD),
            "EUR" => Some(Currency::EUR),
            "GBP" => Some(Currency::GBP),
            _ => None,
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Logical ledger account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LedgerAccount {
    /// The paying traveler
    Customer,
    /// Captured funds held by the platform pending release
    PlatformEscrow,
    /// Platform commission revenue
    PlatformRevenue,
    /// The service-providing agent
    Agent,
}

impl LedgerAccount {
    /// Stable account code used in audit records
    pub fn code(&self) -> &'static str {
        match self {
            LedgerAccount::Customer => "customer",
            LedgerAccount::PlatformEscrow => "platform_escrow",
            LedgerAccount::PlatformRevenue => "platform_revenue",
            LedgerAccount::Agent => "agent",
        }
    }
}

impl fmt::Display for LedgerAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Kind of fund movement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MovementType {
    /// Direct customer charge (non-escrowed capture)
    Charge,
    /// Funds returned to the customer
    Refund,
    /// Captured funds placed into escrow
    EscrowHold,
    /// Platform commission taken out of escrow
    Commission,
    /// Agent payout released from escrow
    Payout,
}

impl MovementType {
    /// Stable movement code used in audit records
    pub fn code(&self) -> &'static str {
        match self {
            MovementType::Charge => "charge",
            MovementType::Refund => "refund",
            MovementType::EscrowHold => "escrow_hold",
            MovementType::Commission => "commission",
            MovementType::Payout => "payout",
        }
    }
}

impl fmt::Display for MovementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Money amounts for one payment, all in minor currency units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoneyBreakdown {
    /// Gross amount charged to the customer
    pub gross_cents: i64,

    /// Gateway processing fee
    pub gateway_fee_cents: i64,

    /// Platform commission
    pub platform_commission_cents: i64,

    /// Currency
    pub currency: Currency,
}

/// Who performed an operation, for the audit trail
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorMetadata {
    /// Acting principal ("webhook:stripe", "scheduler", "ops:jane", ...)
    pub actor: String,

    /// Channel the action arrived through
    pub channel: String,
}

impl ActorMetadata {
    /// Action driven by a gateway webhook
    pub fn webhook(provider: &str) -> Self {
        Self {
            actor: format!("webhook:{provider}"),
            channel: "webhook".to_string(),
        }
    }

    /// Action driven by the release scheduler
    pub fn scheduler() -> Self {
        Self {
            actor: "scheduler".to_string(),
            channel: "scheduler".to_string(),
        }
    }

    /// Manual operator action
    pub fn operator(name: &str) -> Self {
        Self {
            actor: format!("ops:{name}"),
            channel: "ops".to_string(),
        }
    }

    /// Internal API call from another platform service
    pub fn service(name: &str) -> Self {
        Self {
            actor: format!("service:{name}"),
            channel: "api".to_string(),
        }
    }
}

/// One attempted payment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRecord {
    /// Payment ID (UUIDv7 for time-ordering)
    pub payment_id: Uuid,

    /// Booking this payment funds
    pub booking_id: Uuid,

    /// Paying traveler
    pub user_id: Uuid,

    /// Service-providing agent
    pub agent_id: Uuid,

    /// Amounts in minor currency units
    pub breakdown: MoneyBreakdown,

    /// Gateway-assigned payment/session id
    pub external_payment_id: Option<String>,

    /// Gateway-assigned charge id (reconciliation key)
    pub external_charge_id: Option<String>,

    /// Current lifecycle state; mutated only through a transition
    pub state: PaymentState,

    /// Created timestamp
    pub created_at: DateTime<Utc>,

    /// When funds were authorized
    pub authorized_at: Option<DateTime<Utc>>,

    /// When funds were captured
    pub captured_at: Option<DateTime<Utc>>,

    /// Last state transition timestamp
    pub last_transition_at: DateTime<Utc>,

    /// Version, bumped on every write (optimistic check)
    pub version: u64,
}

/// Escrow lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EscrowStatus {
    /// No funds held yet
    NotStarted,
    /// Funds held, release date unknown
    Holding,
    /// Release date known, waiting for eligibility
    PendingRelease,
    /// Commission and payout disbursed (terminal)
    Released,
    /// Hold cancelled by dispute or booking cancellation (terminal)
    Cancelled,
}

impl EscrowStatus {
    /// Wire name (matches the serde representation)
    pub fn as_str(&self) -> &'static str {
        match self {
            EscrowStatus::NotStarted => "NOT_STARTED",
            EscrowStatus::Holding => "HOLDING",
            EscrowStatus::PendingRelease => "PENDING_RELEASE",
            EscrowStatus::Released => "RELEASED",
            EscrowStatus::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for EscrowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Escrow hold for one captured payment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscrowRecord {
    /// Escrow ID
    pub escrow_id: Uuid,

    /// Booking the held funds belong to
    pub booking_id: Uuid,

    /// Captured payment backing the hold
    pub payment_id: Uuid,

    /// Agent awaiting payout
    pub agent_id: Uuid,

    /// Held amount (minor units); starts at the gross, shrunk only by
    /// partial refunds
    pub amount_cents: i64,

    /// Platform commission on the held amount
    pub platform_commission_cents: i64,

    /// Agent payout; with the commission always reconstructs the held
    /// amount exactly
    pub agent_payout_cents: i64,

    /// Current status
    pub status: EscrowStatus,

    /// When the hold started
    pub hold_started_at: Option<DateTime<Utc>>,

    /// Earliest release instant; set exactly once, never backdated
    pub release_eligible_at: Option<DateTime<Utc>>,

    /// When funds were released
    pub released_at: Option<DateTime<Utc>>,

    /// When the hold was cancelled
    pub cancelled_at: Option<DateTime<Utc>>,

    /// Version, bumped on every write
    pub version: u64,
}

/// Append-only record of one fund movement between logical accounts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoneyMovementEntry {
    /// Entry ID (UUIDv7 for time-ordering)
    pub entry_id: Uuid,

    /// Booking the movement belongs to
    pub booking_id: Uuid,

    /// Payment the movement belongs to
    pub payment_id: Uuid,

    /// Kind of movement
    pub movement_type: MovementType,

    /// Amount in minor units, always positive
    pub amount_cents: i64,

    /// Debited account
    pub from_account: LedgerAccount,

    /// Credited account
    pub to_account: LedgerAccount,

    /// Gateway transaction reference, if any
    pub external_transaction_id: Option<String>,

    /// When the movement occurred
    pub occurred_at: DateTime<Utc>,

    /// Who recorded it
    pub recorded_by: ActorMetadata,
}

/// Processed-marker for one external event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    /// Deterministic key: `{provider}_webhook_{external_event_id}`
    pub key: String,

    /// When the key was first claimed
    pub claimed_at: DateTime<Utc>,

    /// When processing finished; `None` while in flight
    pub processed_at: Option<DateTime<Utc>>,
}
