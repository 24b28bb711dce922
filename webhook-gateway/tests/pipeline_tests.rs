//! Pipeline integration tests: signed deliveries end to end

use chrono::Utc;
use escrow::{EscrowConfig, EscrowManager, InMemoryDisputeGate};
use event_bus::{EventType, InMemoryPublisher};
use payment_core::{
    Config, Currency, EscrowStatus, IdempotencyStore, InMemoryAuditSink, LedgerAccount,
    ManualClock, Metrics, MoneyBreakdown, MovementType, PaymentRecord, PaymentState, Payments,
    Storage,
};
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;
use uuid::Uuid;
use webhook_gateway::{IngestOutcome, SignatureVerifier, WebhookPipeline};

const SECRET: &str = "whsec_pipeline_test";

struct Harness {
    pipeline: WebhookPipeline,
    payments: Arc<Payments>,
    publisher: Arc<InMemoryPublisher>,
    verifier: SignatureVerifier,
    _temp: TempDir,
}

fn harness() -> Harness {
    let temp = TempDir::new().unwrap();
    let mut config = Config::default();
    config.data_dir = temp.path().to_path_buf();

    let storage = Arc::new(Storage::open(&config).unwrap());
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let payments = Arc::new(Payments::new(
        storage.clone(),
        clock,
        Arc::new(InMemoryAuditSink::new()),
        Metrics::new().unwrap(),
    ));
    let idempotency = Arc::new(IdempotencyStore::open(storage).unwrap());
    let publisher = Arc::new(InMemoryPublisher::new());

    let escrow_manager = Arc::new(EscrowManager::new(
        payments.clone(),
        publisher.clone(),
        Arc::new(InMemoryDisputeGate::new()),
        EscrowConfig::default(),
    ));

    let verifier = SignatureVerifier::new(SECRET);
    let pipeline = WebhookPipeline::new(
        "stripe",
        verifier.clone(),
        payments.clone(),
        escrow_manager,
        idempotency,
        publisher.clone(),
        Arc::new(webhook_gateway::DeadLetters::new()),
    );

    Harness {
        pipeline,
        payments,
        publisher,
        verifier,
        _temp: temp,
    }
}

fn new_payment(h: &Harness, gross_cents: i64) -> PaymentRecord {
    h.payments
        .create(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            MoneyBreakdown {
                gross_cents,
                gateway_fee_cents: gross_cents * 29 / 1000,
                platform_commission_cents: gross_cents / 10,
                currency: Currency::USD,
            },
        )
        .unwrap()
}

async fn deliver(h: &Harness, body: &serde_json::Value) -> IngestOutcome {
    let bytes = body.to_string();
    let header = h.verifier.sign(1_700_000_000, bytes.as_bytes());
    h.pipeline.ingest(&header, bytes.as_bytes()).await.unwrap()
}

fn checkout_completed(payment: &PaymentRecord, event_id: &str) -> serde_json::Value {
    json!({
        "id": event_id,
        "type": "checkout.session.completed",
        "data": {"object": {
            "object": "checkout.session",
            "id": "cs_1",
            "payment_intent": "pi_1",
            "metadata": {
                "payment_id": payment.payment_id.to_string(),
                "booking_id": payment.booking_id.to_string(),
            }
        }}
    })
}

fn intent_succeeded(payment: &PaymentRecord, event_id: &str) -> serde_json::Value {
    json!({
        "id": event_id,
        "type": "payment_intent.succeeded",
        "data": {"object": {
            "object": "payment_intent",
            "id": "pi_1",
            "latest_charge": "ch_1",
            "amount": payment.breakdown.gross_cents,
            "metadata": {
                "payment_id": payment.payment_id.to_string(),
                "booking_id": payment.booking_id.to_string(),
            }
        }}
    })
}

fn charge_refunded(payment: &PaymentRecord, event_id: &str, refunded: i64) -> serde_json::Value {
    json!({
        "id": event_id,
        "type": "charge.refunded",
        "data": {"object": {
            "object": "charge",
            "id": "ch_1",
            "payment_intent": "pi_1",
            "amount": payment.breakdown.gross_cents,
            "amount_refunded": refunded,
            "metadata": {
                "payment_id": payment.payment_id.to_string(),
            }
        }}
    })
}

/// Capture over webhooks: the payment lands in CAPTURED, the escrow
/// holds the gross amount, and exactly one escrow_hold row exists
#[tokio::test]
async fn capture_flow_holds_funds_in_escrow() {
    let h = harness();
    let payment = new_payment(&h, 100_000);

    assert_eq!(deliver(&h, &checkout_completed(&payment, "evt_1")).await, IngestOutcome::Processed);
    assert_eq!(deliver(&h, &intent_succeeded(&payment, "evt_2")).await, IngestOutcome::Processed);

    let loaded = h.payments.get(payment.payment_id).unwrap();
    assert_eq!(loaded.state, PaymentState::Captured);
    assert!(loaded.captured_at.is_some());
    assert_eq!(loaded.external_charge_id.as_deref(), Some("ch_1"));

    let escrow = h
        .payments
        .find_escrow_by_booking(payment.booking_id)
        .unwrap()
        .unwrap();
    assert_eq!(escrow.status, EscrowStatus::Holding);
    assert_eq!(escrow.amount_cents, 100_000);
    assert_eq!(escrow.platform_commission_cents, 10_000);
    assert_eq!(escrow.agent_payout_cents, 90_000);

    let movements = h.payments.movements_for(payment.payment_id).unwrap();
    assert_eq!(movements.len(), 1);
    assert_eq!(movements[0].movement_type, MovementType::EscrowHold);
    assert_eq!(movements[0].from_account, LedgerAccount::Customer);
    assert_eq!(movements[0].to_account, LedgerAccount::PlatformEscrow);

    let captured: Vec<_> = h
        .publisher
        .published()
        .into_iter()
        .filter(|e| e.event_type == EventType::PaymentCaptured)
        .collect();
    assert_eq!(captured.len(), 1);
    assert_eq!(
        captured[0].causation_id.as_deref(),
        Some("stripe_webhook_evt_2")
    );
}

/// Redelivering the same event id changes nothing
#[tokio::test]
async fn double_delivery_is_idempotent() {
    let h = harness();
    let payment = new_payment(&h, 100_000);

    deliver(&h, &checkout_completed(&payment, "evt_1")).await;
    assert_eq!(deliver(&h, &intent_succeeded(&payment, "evt_2")).await, IngestOutcome::Processed);
    assert_eq!(deliver(&h, &intent_succeeded(&payment, "evt_2")).await, IngestOutcome::Duplicate);
    assert_eq!(deliver(&h, &intent_succeeded(&payment, "evt_2")).await, IngestOutcome::Duplicate);

    let movements = h.payments.movements_for(payment.payment_id).unwrap();
    assert_eq!(movements.len(), 1);
    assert_eq!(h.payments.get(payment.payment_id).unwrap().version,
        // create + awaiting + processing + authorized + captured + refs on checkout + refs on capture
        7
    );
}

/// A capture redelivered (new event id) after a refund settles is a
/// benign ordering artifact: acknowledged, state untouched
#[tokio::test]
async fn capture_after_refund_is_ignored() {
    let h = harness();
    let payment = new_payment(&h, 100_000);

    deliver(&h, &checkout_completed(&payment, "evt_1")).await;
    deliver(&h, &intent_succeeded(&payment, "evt_2")).await;
    assert_eq!(
        deliver(&h, &charge_refunded(&payment, "evt_3", 100_000)).await,
        IngestOutcome::Processed
    );

    let loaded = h.payments.get(payment.payment_id).unwrap();
    assert_eq!(loaded.state, PaymentState::FullyRefunded);

    // gateway retries the old capture with a fresh event id
    assert_eq!(
        deliver(&h, &intent_succeeded(&payment, "evt_4")).await,
        IngestOutcome::OutOfOrder
    );

    let after = h.payments.get(payment.payment_id).unwrap();
    assert_eq!(after.state, PaymentState::FullyRefunded);
    assert_eq!(after.version, loaded.version);
    assert_eq!(h.payments.metrics().illegal_transitions_total.get(), 1);
    assert!(h.pipeline.dead_letters().is_empty());
}

/// Full refund returns the held funds and cancels the escrow
#[tokio::test]
async fn full_refund_returns_escrowed_funds() {
    let h = harness();
    let payment = new_payment(&h, 80_000);

    deliver(&h, &checkout_completed(&payment, "evt_1")).await;
    deliver(&h, &intent_succeeded(&payment, "evt_2")).await;
    deliver(&h, &charge_refunded(&payment, "evt_3", 80_000)).await;

    let escrow = h
        .payments
        .find_escrow_by_booking(payment.booking_id)
        .unwrap()
        .unwrap();
    assert_eq!(escrow.status, EscrowStatus::Cancelled);

    let balances = h.payments.reconcile(payment.payment_id).unwrap();
    assert_eq!(balances[&LedgerAccount::Customer], 0);
    assert_eq!(balances[&LedgerAccount::PlatformEscrow], 0);

    let kinds: Vec<_> = h
        .payments
        .movements_for(payment.payment_id)
        .unwrap()
        .iter()
        .map(|m| m.movement_type)
        .collect();
    assert_eq!(kinds, vec![MovementType::EscrowHold, MovementType::Refund]);
}

/// Partial refunds shrink the escrow split by the cumulative delta; a
/// final full refund cancels the hold and zeroes the ledger
#[tokio::test]
async fn partial_refunds_shrink_the_escrow_split() {
    let h = harness();
    let payment = new_payment(&h, 100_000);

    deliver(&h, &checkout_completed(&payment, "evt_1")).await;
    deliver(&h, &intent_succeeded(&payment, "evt_2")).await;

    assert_eq!(
        deliver(&h, &charge_refunded(&payment, "evt_3", 40_000)).await,
        IngestOutcome::Processed
    );
    assert_eq!(
        h.payments.get(payment.payment_id).unwrap().state,
        PaymentState::PartiallyRefunded
    );
    let escrow = h
        .payments
        .find_escrow_by_booking(payment.booking_id)
        .unwrap()
        .unwrap();
    assert_eq!(escrow.status, EscrowStatus::Holding);
    assert_eq!(escrow.amount_cents, 60_000);
    assert_eq!(escrow.platform_commission_cents, 6_000);
    assert_eq!(escrow.agent_payout_cents, 54_000);

    // the gateway reports cumulative totals; only the delta is appended
    assert_eq!(
        deliver(&h, &charge_refunded(&payment, "evt_4", 70_000)).await,
        IngestOutcome::Processed
    );
    let escrow = h
        .payments
        .find_escrow_by_booking(payment.booking_id)
        .unwrap()
        .unwrap();
    assert_eq!(escrow.amount_cents, 30_000);
    let refunds: Vec<i64> = h
        .payments
        .movements_for(payment.payment_id)
        .unwrap()
        .iter()
        .filter(|m| m.movement_type == MovementType::Refund)
        .map(|m| m.amount_cents)
        .collect();
    assert_eq!(refunds, vec![40_000, 30_000]);

    assert_eq!(
        deliver(&h, &charge_refunded(&payment, "evt_5", 100_000)).await,
        IngestOutcome::Processed
    );
    let escrow = h
        .payments
        .find_escrow_by_booking(payment.booking_id)
        .unwrap()
        .unwrap();
    assert_eq!(escrow.status, EscrowStatus::Cancelled);
    assert_eq!(
        h.payments.get(payment.payment_id).unwrap().state,
        PaymentState::FullyRefunded
    );

    let balances = h.payments.reconcile(payment.payment_id).unwrap();
    assert_eq!(balances[&LedgerAccount::Customer], 0);
    assert_eq!(balances[&LedgerAccount::PlatformEscrow], 0);

    // the settled total redelivered under a fresh id appends nothing
    let before = h.payments.get(payment.payment_id).unwrap().version;
    assert_eq!(
        deliver(&h, &charge_refunded(&payment, "evt_6", 100_000)).await,
        IngestOutcome::Processed
    );
    assert_eq!(h.payments.get(payment.payment_id).unwrap().version, before);
}

#[tokio::test]
async fn bad_signature_is_rejected_and_leaves_no_trace() {
    let h = harness();
    let payment = new_payment(&h, 50_000);

    let body = intent_succeeded(&payment, "evt_sig").to_string();
    let forged = SignatureVerifier::new("whsec_wrong").sign(1_700_000_000, body.as_bytes());

    let err = h.pipeline.ingest(&forged, body.as_bytes()).await.unwrap_err();
    assert!(matches!(err, webhook_gateway::Error::InvalidSignature(_)));

    // nothing was claimed: the genuine delivery still processes
    assert_eq!(deliver(&h, &checkout_completed(&payment, "evt_1")).await, IngestOutcome::Processed);
    assert_eq!(deliver(&h, &intent_succeeded(&payment, "evt_sig")).await, IngestOutcome::Processed);
}

#[tokio::test]
async fn unknown_payment_reference_is_dead_lettered() {
    let h = harness();

    let body = json!({
        "id": "evt_orphan",
        "type": "payment_intent.succeeded",
        "data": {"object": {
            "object": "payment_intent",
            "id": "pi_unknown",
            "latest_charge": "ch_unknown",
            "amount": 10_000,
        }}
    });

    assert_eq!(deliver(&h, &body).await, IngestOutcome::DeadLettered);

    let letters = h.pipeline.dead_letters().list();
    assert_eq!(letters.len(), 1);
    assert_eq!(letters[0].event_id.as_deref(), Some("evt_orphan"));
    assert_eq!(letters[0].provider, "stripe");
}

#[tokio::test]
async fn unconsumed_event_types_are_skipped() {
    let h = harness();

    let body = json!({
        "id": "evt_invoice",
        "type": "invoice.created",
        "data": {"object": {}}
    });

    assert_eq!(deliver(&h, &body).await, IngestOutcome::Skipped);
    assert!(h.pipeline.dead_letters().is_empty());
    assert!(h.publisher.is_empty());
}

/// Dispute webhooks drive the chargeback states and close the gate
#[tokio::test]
async fn dispute_flow_blocks_and_reopens() {
    let h = harness();
    let payment = new_payment(&h, 100_000);

    deliver(&h, &checkout_completed(&payment, "evt_1")).await;
    deliver(&h, &intent_succeeded(&payment, "evt_2")).await;

    let opened = json!({
        "id": "evt_d1",
        "type": "charge.dispute.created",
        "data": {"object": {
            "object": "dispute",
            "charge": "ch_1",
        }}
    });
    assert_eq!(deliver(&h, &opened).await, IngestOutcome::Processed);
    assert_eq!(
        h.payments.get(payment.payment_id).unwrap().state,
        PaymentState::ChargebackInitiated
    );

    let closed = json!({
        "id": "evt_d2",
        "type": "charge.dispute.closed",
        "data": {"object": {
            "object": "dispute",
            "charge": "ch_1",
        }}
    });
    assert_eq!(deliver(&h, &closed).await, IngestOutcome::Processed);
    assert_eq!(
        h.payments.get(payment.payment_id).unwrap().state,
        PaymentState::ChargebackResolved
    );

    let types: Vec<_> = h.publisher.published().iter().map(|e| e.event_type).collect();
    assert!(types.contains(&EventType::DisputeOpened));
    assert!(types.contains(&EventType::ChargebackInitiated));
    assert!(types.contains(&EventType::ChargebackResolved));
}
