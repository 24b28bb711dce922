//! Webhook ingestion pipeline
//!
//! Per delivery: verify signature over the raw bytes, claim the
//! idempotency key, classify, dispatch, mark processed. Handlers are
//! idempotent and order-tolerant: a rejected state transition is a
//! benign artifact of gateway redelivery order, logged and acknowledged.
//! Anything a handler genuinely cannot process is parked on the
//! dead-letter path and still acknowledged, so the gateway stops
//! redelivering.

use crate::dlq::DeadLetters;
use crate::error::{Error, Result};
use crate::event::{EventKind, GatewayEvent};
use crate::signature::SignatureVerifier;
use escrow::EscrowManager;
use event_bus::{DomainEvent, EventPublisher, EventType, PartitionKey};
use payment_core::{
    ActorMetadata, Claim, IdempotencyStore, PaymentRecord, PaymentState, Payments,
};
use serde_json::json;
use std::sync::Arc;

/// How one delivery was handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Handled and marked processed
    Processed,
    /// Key already claimed; nothing done
    Duplicate,
    /// Rejected transition from redelivery order; acknowledged
    OutOfOrder,
    /// Event type we do not consume
    Skipped,
    /// Parked on the dead-letter path; acknowledged
    DeadLettered,
}

/// The ingestion pipeline
pub struct WebhookPipeline {
    provider: String,
    verifier: SignatureVerifier,
    payments: Arc<Payments>,
    escrow: Arc<EscrowManager>,
    idempotency: Arc<IdempotencyStore>,
    publisher: Arc<dyn EventPublisher>,
    dead_letters: Arc<DeadLetters>,
}

impl WebhookPipeline {
    /// Assemble the pipeline from its collaborators
    pub fn new(
        provider: impl Into<String>,
        verifier: SignatureVerifier,
        payments: Arc<Payments>,
        escrow: Arc<EscrowManager>,
        idempotency: Arc<IdempotencyStore>,
        publisher: Arc<dyn EventPublisher>,
        dead_letters: Arc<DeadLetters>,
    ) -> Self {
        Self {
            provider: provider.into(),
            verifier,
            payments,
            escrow,
            idempotency,
            publisher,
            dead_letters,
        }
    }

    /// Dead letters parked so far
    pub fn dead_letters(&self) -> &Arc<DeadLetters> {
        &self.dead_letters
    }

    /// Ingest one delivery. Only a signature failure is an error; every
    /// verified delivery is acknowledged with an outcome.
    pub async fn ingest(&self, signature_header: &str, body: &[u8]) -> Result<IngestOutcome> {
        // before anything else; a failure leaves no trace
        self.verifier.verify(signature_header, body)?;

        let event = match GatewayEvent::parse(body) {
            Ok(event) => event,
            Err(e) => {
                self.dead_letters.push(
                    &self.provider,
                    None,
                    e.to_string(),
                    json!({ "raw": String::from_utf8_lossy(body) }),
                );
                return Ok(IngestOutcome::DeadLettered);
            }
        };

        if let EventKind::Unhandled(ref event_type) = event.kind {
            tracing::debug!(event_id = %event.event_id, event_type, "Event type skipped");
            return Ok(IngestOutcome::Skipped);
        }

        let key = IdempotencyStore::webhook_key(&self.provider, &event.event_id);
        let now = self.payments.clock().now();
        if self.idempotency.claim(&key, now)? == Claim::Duplicate {
            tracing::info!(key, "Duplicate delivery ignored");
            return Ok(IngestOutcome::Duplicate);
        }

        match self.dispatch(&event, &key).await {
            Ok(()) => {
                self.idempotency.mark_processed(&key, self.payments.clock().now())?;
                Ok(IngestOutcome::Processed)
            }
            Err(e) if is_ordering_artifact(&e) => {
                tracing::warn!(
                    event_id = %event.event_id,
                    kind = ?event.kind,
                    "Out-of-order delivery ignored: {e}"
                );
                self.idempotency.mark_processed(&key, self.payments.clock().now())?;
                Ok(IngestOutcome::OutOfOrder)
            }
            Err(e) => {
                self.dead_letters.push(
                    &self.provider,
                    Some(event.event_id.clone()),
                    e.to_string(),
                    event.raw.clone(),
                );
                Ok(IngestOutcome::DeadLettered)
            }
        }
    }

    async fn dispatch(&self, event: &GatewayEvent, key: &str) -> Result<()> {
        match event.kind {
            EventKind::CheckoutCompleted => self.on_checkout_completed(event).await,
            EventKind::CheckoutExpired => self.on_checkout_expired(event, key).await,
            EventKind::PaymentAuthorized => self.on_payment_authorized(event, key).await,
            EventKind::PaymentCaptured => self.on_payment_captured(event, key).await,
            EventKind::PaymentFailed => self.on_payment_failed(event, key).await,
            EventKind::ChargeSucceeded => self.on_charge_succeeded(event).await,
            EventKind::ChargeRefunded => self.on_charge_refunded(event, key).await,
            EventKind::DisputeOpened => self.on_dispute_opened(event, key).await,
            EventKind::DisputeClosed => self.on_dispute_closed(event, key).await,
            EventKind::Unhandled(_) => Ok(()),
        }
    }

    fn actor(&self) -> ActorMetadata {
        ActorMetadata::webhook(&self.provider)
    }

    /// Our payment for a gateway event: checkout metadata first, then
    /// the charge-id index
    fn resolve_payment(&self, event: &GatewayEvent) -> Result<PaymentRecord> {
        if let Some(payment_id) = event.payment_id {
            return Ok(self.payments.get(payment_id)?);
        }
        if let Some(ref charge_id) = event.charge_id {
            if let Some(payment) = self.payments.find_by_external_charge(charge_id)? {
                return Ok(payment);
            }
        }
        Err(Error::Unrecoverable(format!(
            "Event {} references no known payment",
            event.event_id
        )))
    }

    async fn on_checkout_completed(&self, event: &GatewayEvent) -> Result<()> {
        let payment = self.resolve_payment(event)?;
        self.payments.set_external_refs(
            payment.payment_id,
            event.payment_intent_id.clone(),
            event.charge_id.clone(),
        )?;
        self.payments.transition(
            payment.payment_id,
            PaymentState::AwaitingPayment,
            None,
            &self.actor(),
        )?;
        Ok(())
    }

    async fn on_checkout_expired(&self, event: &GatewayEvent, key: &str) -> Result<()> {
        let payment = self.resolve_payment(event)?;
        let payment = self.payments.transition(
            payment.payment_id,
            PaymentState::Cancelled,
            None,
            &self.actor(),
        )?;
        self.emit(EventType::PaymentCancelled, &payment, key, json!({
            "booking_id": payment.booking_id,
            "payment_id": payment.payment_id,
            "reason": "checkout_expired",
        }))
        .await
    }

    async fn on_payment_authorized(&self, event: &GatewayEvent, key: &str) -> Result<()> {
        let mut payment = self.resolve_payment(event)?;
        if payment.state == PaymentState::AwaitingPayment {
            payment = self.payments.transition(
                payment.payment_id,
                PaymentState::Processing,
                None,
                &self.actor(),
            )?;
        }
        let payment = self.payments.transition(
            payment.payment_id,
            PaymentState::Authorized,
            None,
            &self.actor(),
        )?;
        self.emit(EventType::PaymentAuthorized, &payment, key, json!({
            "booking_id": payment.booking_id,
            "payment_id": payment.payment_id,
            "gross_cents": payment.breakdown.gross_cents,
        }))
        .await
    }

    async fn on_payment_captured(&self, event: &GatewayEvent, key: &str) -> Result<()> {
        let mut payment = self.resolve_payment(event)?;
        self.payments.set_external_refs(
            payment.payment_id,
            event.payment_intent_id.clone(),
            event.charge_id.clone(),
        )?;

        // tolerate skipped intermediate deliveries
        if payment.state == PaymentState::AwaitingPayment {
            payment = self.payments.transition(
                payment.payment_id,
                PaymentState::Processing,
                None,
                &self.actor(),
            )?;
        }
        if payment.state == PaymentState::Processing {
            payment = self.payments.transition(
                payment.payment_id,
                PaymentState::Authorized,
                None,
                &self.actor(),
            )?;
        }
        let payment = self.payments.transition(
            payment.payment_id,
            PaymentState::Captured,
            None,
            &self.actor(),
        )?;

        // the hold writes the escrow_hold ledger row for the cash-in
        self.escrow.start_hold(payment.payment_id, &self.actor()).await?;

        // downstream consumers own the post-payment disclosure
        self.emit(EventType::PaymentCaptured, &payment, key, json!({
            "booking_id": payment.booking_id,
            "payment_id": payment.payment_id,
            "agent_id": payment.agent_id,
            "gross_cents": payment.breakdown.gross_cents,
            "disclose": ["itinerary_detail", "agent_contact"],
        }))
        .await
    }

    async fn on_payment_failed(&self, event: &GatewayEvent, key: &str) -> Result<()> {
        let payment = self.resolve_payment(event)?;
        let payment = self.payments.transition(
            payment.payment_id,
            PaymentState::Failed,
            None,
            &self.actor(),
        )?;
        self.emit(EventType::PaymentFailed, &payment, key, json!({
            "booking_id": payment.booking_id,
            "payment_id": payment.payment_id,
        }))
        .await
    }

    async fn on_charge_succeeded(&self, event: &GatewayEvent) -> Result<()> {
        // bookkeeping only: make the charge id resolvable for later events
        let payment = self.resolve_payment(event)?;
        self.payments.set_external_refs(
            payment.payment_id,
            event.payment_intent_id.clone(),
            event.charge_id.clone(),
        )?;
        Ok(())
    }

    async fn on_charge_refunded(&self, event: &GatewayEvent, key: &str) -> Result<()> {
        let payment = self.resolve_payment(event)?;
        let refunded = event.amount_refunded_cents.ok_or_else(|| {
            Error::Unrecoverable(format!("Refund event {} carries no amount", event.event_id))
        })?;
        let full = event.is_full_refund();

        // the escrow manager holds the booking lock across the whole
        // check-refund-cancel sequence
        let payment = match self
            .escrow
            .process_refund(
                payment.payment_id,
                refunded,
                full,
                event.charge_id.clone(),
                &self.actor(),
            )
            .await
        {
            Ok(payment) => payment,
            Err(escrow::Error::AlreadyReleased(escrow_id)) => {
                // funds already left escrow; an operator must claw back
                return Err(Error::Unrecoverable(format!(
                    "Refund after release on escrow {escrow_id}"
                )));
            }
            Err(e) => return Err(e.into()),
        };

        self.emit(EventType::PaymentRefunded, &payment, key, json!({
            "booking_id": payment.booking_id,
            "payment_id": payment.payment_id,
            "refunded_cents": refunded,
            "full": full,
        }))
        .await
    }

    async fn on_dispute_opened(&self, event: &GatewayEvent, key: &str) -> Result<()> {
        let payment = self.resolve_payment(event)?;

        // close the release gate first; a redelivered transition below
        // may legitimately be rejected
        match self.escrow.open_dispute(payment.booking_id, &self.actor()).await {
            Ok(()) => {}
            Err(escrow::Error::AlreadyReleased(escrow_id)) => {
                return Err(Error::Unrecoverable(format!(
                    "Dispute on released escrow {escrow_id}"
                )));
            }
            Err(e) => return Err(e.into()),
        }

        let payment = self.payments.transition(
            payment.payment_id,
            PaymentState::ChargebackInitiated,
            None,
            &self.actor(),
        )?;
        self.emit(EventType::ChargebackInitiated, &payment, key, json!({
            "booking_id": payment.booking_id,
            "payment_id": payment.payment_id,
        }))
        .await
    }

    async fn on_dispute_closed(&self, event: &GatewayEvent, key: &str) -> Result<()> {
        let payment = self.resolve_payment(event)?;
        let payment = self.payments.transition(
            payment.payment_id,
            PaymentState::ChargebackResolved,
            None,
            &self.actor(),
        )?;
        self.escrow
            .resolve_dispute(payment.booking_id, &self.actor())
            .await?;
        self.emit(EventType::ChargebackResolved, &payment, key, json!({
            "booking_id": payment.booking_id,
            "payment_id": payment.payment_id,
        }))
        .await
    }

    async fn emit(
        &self,
        event_type: EventType,
        payment: &PaymentRecord,
        causation: &str,
        payload: serde_json::Value,
    ) -> Result<()> {
        self.publisher
            .publish(
                &DomainEvent::new(event_type, PartitionKey::Booking(payment.booking_id), payload)
                    .with_correlation_id(payment.booking_id.to_string())
                    .with_causation_id(causation),
            )
            .await?;
        Ok(())
    }
}

fn is_ordering_artifact(error: &Error) -> bool {
    matches!(
        error,
        Error::Core(payment_core::Error::IllegalTransition { .. })
            | Error::Escrow(escrow::Error::Core(payment_core::Error::IllegalTransition { .. }))
    )
}
