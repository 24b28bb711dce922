//! Domain event envelope for pub/sub

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Event type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    /// Payment created
    PaymentInitiated,
    /// Funds authorized by the gateway
    PaymentAuthorized,
    /// Funds captured
    PaymentCaptured,
    /// Payment failed
    PaymentFailed,
    /// Payment cancelled before capture
    PaymentCancelled,
    /// Refund settled (partial or full)
    PaymentRefunded,
    /// Chargeback opened by the card network
    ChargebackInitiated,
    /// Chargeback resolved
    ChargebackResolved,
    /// Escrow hold started
    EscrowHoldStarted,
    /// Escrow release scheduled
    EscrowReleaseScheduled,
    /// Commission and payout disbursed
    EscrowReleased,
    /// Escrow hold cancelled
    EscrowCancelled,
    /// Dispute opened on a booking
    DisputeOpened,
    /// Dispute resolved
    DisputeResolved,
}

impl EventType {
    /// NATS subject prefix for this event type
    pub fn subject_prefix(&self) -> &'static str {
        match self {
            EventType::PaymentInitiated => "wanderpay.payment.initiated",
            EventType::PaymentAuthorized => "wanderpay.payment.authorized",
            EventType::PaymentCaptured => "wanderpay.payment.captured",
            EventType::PaymentFailed => "wanderpay.payment.failed",
            EventType::PaymentCancelled => "wanderpay.payment.cancelled",
            EventType::PaymentRefunded => "wanderpay.payment.refunded",
            EventType::ChargebackInitiated => "wanderpay.chargeback.initiated",
            EventType::ChargebackResolved => "wanderpay.chargeback.resolved",
            EventType::EscrowHoldStarted => "wanderpay.escrow.hold_started",
            EventType::EscrowReleaseScheduled => "wanderpay.escrow.release_scheduled",
            EventType::EscrowReleased => "wanderpay.escrow.released",
            EventType::EscrowCancelled => "wanderpay.escrow.cancelled",
            EventType::DisputeOpened => "wanderpay.dispute.opened",
            EventType::DisputeResolved => "wanderpay.dispute.resolved",
        }
    }

    /// JetStream stream name for this event type
    pub fn stream_name(&self) -> &'static str {
        match self {
            EventType::PaymentInitiated
            | EventType::PaymentAuthorized
            | EventType::PaymentCaptured
            | EventType::PaymentFailed
            | EventType::PaymentCancelled
            | EventType::PaymentRefunded
            | EventType::ChargebackInitiated
            | EventType::ChargebackResolved => "PAYMENT_EVENTS",
            EventType::EscrowHoldStarted
            | EventType::EscrowReleaseScheduled
            | EventType::EscrowReleased
            | EventType::EscrowCancelled => "ESCROW_EVENTS",
            EventType::DisputeOpened | EventType::DisputeResolved => "DISPUTE_EVENTS",
        }
    }

    /// Subject family covered by this event's stream
    pub fn stream_subjects(&self) -> Vec<String> {
        match self.stream_name() {
            "PAYMENT_EVENTS" => vec![
                "wanderpay.payment.>".to_string(),
                "wanderpay.chargeback.>".to_string(),
            ],
            "ESCROW_EVENTS" => vec!["wanderpay.escrow.>".to_string()],
            _ => vec!["wanderpay.dispute.>".to_string()],
        }
    }
}

/// Partition key for routing events
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PartitionKey {
    /// Partition by booking
    Booking(Uuid),
    /// Partition by agent
    Agent(Uuid),
    /// Broadcast to all partitions
    Broadcast,
}

impl PartitionKey {
    /// Partitioning string for the NATS subject
    pub fn to_subject_segment(&self) -> String {
        match self {
            PartitionKey::Booking(id) => format!("booking.{}", id.simple()),
            PartitionKey::Agent(id) => format!("agent.{}", id.simple()),
            PartitionKey::Broadcast => "broadcast".to_string(),
        }
    }

    /// Compute partition number for load balancing
    pub fn partition_number(&self, num_partitions: u32) -> u32 {
        let hash = match self {
            PartitionKey::Booking(id) => blake3::hash(id.as_bytes()),
            PartitionKey::Agent(id) => blake3::hash(id.as_bytes()),
            PartitionKey::Broadcast => return 0,
        };

        let hash_bytes = hash.as_bytes();
        let hash_u32 =
            u32::from_le_bytes([hash_bytes[0], hash_bytes[1], hash_bytes[2], hash_bytes[3]]);
        hash_u32 % num_partitions
    }
}

/// Domain event envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainEvent {
    /// Event ID (UUIDv7 for ordering); doubles as the dedup key
    pub event_id: Uuid,

    /// Event type
    pub event_type: EventType,

    /// Partition key for routing
    pub partition_key: PartitionKey,

    /// Payload (JSON-serialized)
    pub payload: serde_json::Value,

    /// Timestamp
    pub timestamp: DateTime<Utc>,

    /// Correlation ID (ties all events of one flow together)
    pub correlation_id: Option<String>,

    /// Causation ID (the event or webhook that triggered this one)
    pub causation_id: Option<String>,
}

impl DomainEvent {
    /// Create new event
    pub fn new(
        event_type: EventType,
        partition_key: PartitionKey,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            event_id: Uuid::now_v7(),
            event_type,
            partition_key,
            payload,
            timestamp: Utc::now(),
            correlation_id: None,
            causation_id: None,
        }
    }

    /// Set correlation ID
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Set causation ID
    pub fn with_causation_id(mut self, causation_id: impl Into<String>) -> Self {
        self.causation_id = Some(causation_id.into());
        self
    }

    /// Serialize to bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| Error::Deserialization(e.to_string()))
    }

    /// NATS subject for this event
    pub fn subject(&self) -> String {
        format!(
            "{}.{}",
            self.event_type.subject_prefix(),
            self.partition_key.to_subject_segment()
        )
    }
}
