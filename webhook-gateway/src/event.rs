//! Gateway event parsing and classification
//!
//! The gateway posts JSON of the shape
//! `{"id": "evt_...", "type": "...", "data": {"object": {...}}}`.
//! Classification maps the type string onto the handler categories; an
//! unknown type is acknowledged and skipped, never an error.

use crate::error::{Error, Result};
use serde_json::Value;
use uuid::Uuid;

/// Handler category for a gateway event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// Customer completed checkout
    CheckoutCompleted,
    /// Checkout session timed out
    CheckoutExpired,
    /// Funds authorized, capture pending
    PaymentAuthorized,
    /// Funds captured
    PaymentCaptured,
    /// Payment attempt failed
    PaymentFailed,
    /// Charge confirmed (carries the charge id)
    ChargeSucceeded,
    /// Charge refunded, partially or fully
    ChargeRefunded,
    /// Cardholder dispute opened
    DisputeOpened,
    /// Dispute closed
    DisputeClosed,
    /// Type we do not consume
    Unhandled(String),
}

/// One parsed gateway event
#[derive(Debug, Clone)]
pub struct GatewayEvent {
    /// Gateway-assigned event id (idempotency key material)
    pub event_id: String,

    /// Handler category
    pub kind: EventKind,

    /// Charge id from the event object
    pub charge_id: Option<String>,

    /// Payment intent / session payment id
    pub payment_intent_id: Option<String>,

    /// Our payment id, from checkout metadata
    pub payment_id: Option<Uuid>,

    /// Our booking id, from checkout metadata
    pub booking_id: Option<Uuid>,

    /// Amount on the object, minor units
    pub amount_cents: Option<i64>,

    /// Refunded amount, minor units
    pub amount_refunded_cents: Option<i64>,

    /// Raw body for the dead-letter path
    pub raw: Value,
}

impl GatewayEvent {
    /// Parse raw webhook bytes
    pub fn parse(body: &[u8]) -> Result<Self> {
        let raw: Value = serde_json::from_slice(body)
            .map_err(|e| Error::MalformedPayload(e.to_string()))?;

        let event_id = raw["id"]
            .as_str()
            .ok_or_else(|| Error::MalformedPayload("Missing event id".to_string()))?
            .to_string();
        let event_type = raw["type"]
            .as_str()
            .ok_or_else(|| Error::MalformedPayload("Missing event type".to_string()))?;

        let kind = classify(event_type);
        let object = &raw["data"]["object"];

        let charge_id = match object["object"].as_str() {
            Some("charge") => object["id"].as_str().map(String::from),
            _ => object["latest_charge"]
                .as_str()
                .or_else(|| object["charge"].as_str())
                .map(String::from),
        };
        let payment_intent_id = match object["object"].as_str() {
            Some("payment_intent") => object["id"].as_str().map(String::from),
            _ => object["payment_intent"].as_str().map(String::from),
        };

        let metadata = &object["metadata"];
        let payment_id = metadata["payment_id"]
            .as_str()
            .and_then(|s| Uuid::parse_str(s).ok());
        let booking_id = metadata["booking_id"]
            .as_str()
            .and_then(|s| Uuid::parse_str(s).ok());

        Ok(Self {
            event_id,
            kind,
            charge_id,
            payment_intent_id,
            payment_id,
            booking_id,
            amount_cents: object["amount"].as_i64(),
            amount_refunded_cents: object["amount_refunded"].as_i64(),
            raw,
        })
    }

    /// Whether a full refund settled (refunded == amount)
    pub fn is_full_refund(&self) -> bool {
        match (self.amount_cents, self.amount_refunded_cents) {
            (Some(amount), Some(refunded)) => refunded >= amount,
            _ => false,
        }
    }
}

fn classify(event_type: &str) -> EventKind {
    match event_type {
        "checkout.session.completed" => EventKind::CheckoutCompleted,
        "checkout.session.expired" => EventKind::CheckoutExpired,
        "payment_intent.amount_capturable_updated" => EventKind::PaymentAuthorized,
        "payment_intent.succeeded" => EventKind::PaymentCaptured,
        "payment_intent.payment_failed" => EventKind::PaymentFailed,
        "charge.succeeded" => EventKind::ChargeSucceeded,
        "charge.refunded" => EventKind::ChargeRefunded,
        "charge.dispute.created" => EventKind::DisputeOpened,
        "charge.dispute.closed" => EventKind::DisputeClosed,
        other => EventKind::Unhandled(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_payment_intent_event() {
        let payment_id = Uuid::new_v4();
        let booking_id = Uuid::new_v4();
        let body = json!({
            "id": "evt_123",
            "type": "payment_intent.succeeded",
            "data": {"object": {
                "object": "payment_intent",
                "id": "pi_123",
                "latest_charge": "ch_123",
                "amount": 100_000,
                "metadata": {
                    "payment_id": payment_id.to_string(),
                    "booking_id": booking_id.to_string(),
                }
            }}
        });

        let event = GatewayEvent::parse(body.to_string().as_bytes()).unwrap();
        assert_eq!(event.event_id, "evt_123");
        assert_eq!(event.kind, EventKind::PaymentCaptured);
        assert_eq!(event.payment_intent_id.as_deref(), Some("pi_123"));
        assert_eq!(event.charge_id.as_deref(), Some("ch_123"));
        assert_eq!(event.payment_id, Some(payment_id));
        assert_eq!(event.booking_id, Some(booking_id));
        assert_eq!(event.amount_cents, Some(100_000));
    }

    #[test]
    fn test_parse_charge_event_and_full_refund() {
        let body = json!({
            "id": "evt_9",
            "type": "charge.refunded",
            "data": {"object": {
                "object": "charge",
                "id": "ch_9",
                "payment_intent": "pi_9",
                "amount": 50_000,
                "amount_refunded": 50_000,
            }}
        });

        let event = GatewayEvent::parse(body.to_string().as_bytes()).unwrap();
        assert_eq!(event.kind, EventKind::ChargeRefunded);
        assert_eq!(event.charge_id.as_deref(), Some("ch_9"));
        assert!(event.is_full_refund());
    }

    #[test]
    fn test_unknown_type_is_unhandled_not_error() {
        let body = json!({
            "id": "evt_x",
            "type": "invoice.created",
            "data": {"object": {}}
        });

        let event = GatewayEvent::parse(body.to_string().as_bytes()).unwrap();
        assert_eq!(event.kind, EventKind::Unhandled("invoice.created".to_string()));
    }

    #[test]
    fn test_missing_id_is_malformed() {
        let body = json!({"type": "charge.succeeded", "data": {"object": {}}});
        let err = GatewayEvent::parse(body.to_string().as_bytes()).unwrap_err();
        assert!(matches!(err, Error::MalformedPayload(_)));
    }
}
