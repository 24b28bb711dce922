//! HTTP surface: payment intake, webhook intake, health, reconciliation,
//! dead letters
//!
//! The webhook endpoint reads the raw body (`web::Bytes`) so the
//! signature verifies over exactly what the gateway sent. The gateway
//! only ever sees a terse acknowledgment: 400 for a bad signature, 200
//! for everything else.

use crate::config::GatewayConfig;
use crate::dlq::DeadLetters;
use crate::error::Error;
use crate::pipeline::{IngestOutcome, WebhookPipeline};
use actix_web::{web, HttpRequest, HttpResponse};
use event_bus::{DomainEvent, EventPublisher, EventType, PartitionKey};
use payment_core::{Currency, MoneyBreakdown, Payments};
use prometheus::{Encoder, TextEncoder};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

/// Shared application state
pub struct AppState {
    /// Ingestion pipeline
    pub pipeline: Arc<WebhookPipeline>,
    /// Payments facade (health, reconciliation)
    pub payments: Arc<Payments>,
    /// Outbound domain events
    pub publisher: Arc<dyn EventPublisher>,
    /// Dead-letter store
    pub dead_letters: Arc<DeadLetters>,
    /// Gateway configuration
    pub config: GatewayConfig,
}

/// POST /payments request body
#[derive(Debug, Deserialize)]
pub struct CreatePaymentRequest {
    /// Booking the payment settles
    pub booking_id: Uuid,
    /// Paying traveler
    pub user_id: Uuid,
    /// Agent owed the payout
    pub agent_id: Uuid,
    /// Gross amount, minor units
    pub gross_cents: i64,
    /// Gateway processing fee, minor units
    pub gateway_fee_cents: i64,
    /// Platform commission, minor units
    pub platform_commission_cents: i64,
    /// Settlement currency
    pub currency: Currency,
}

/// POST /payments, opens a record in INITIATED and announces it
pub async fn create_payment(
    body: web::Json<CreatePaymentRequest>,
    state: web::Data<AppState>,
) -> HttpResponse {
    let req = body.into_inner();
    let breakdown = MoneyBreakdown {
        gross_cents: req.gross_cents,
        gateway_fee_cents: req.gateway_fee_cents,
        platform_commission_cents: req.platform_commission_cents,
        currency: req.currency,
    };

    match state
        .payments
        .create(req.booking_id, req.user_id, req.agent_id, breakdown)
    {
        Ok(payment) => {
            let event = DomainEvent::new(
                EventType::PaymentInitiated,
                PartitionKey::Booking(payment.booking_id),
                json!({
                    "booking_id": payment.booking_id,
                    "payment_id": payment.payment_id,
                    "user_id": payment.user_id,
                    "agent_id": payment.agent_id,
                    "gross_cents": payment.breakdown.gross_cents,
                }),
            )
            .with_correlation_id(payment.booking_id.to_string());
            if let Err(e) = state.publisher.publish(&event).await {
                tracing::error!(payment_id = %payment.payment_id, "Publish failed: {e}");
            }
            HttpResponse::Created().json(payment)
        }
        Err(payment_core::Error::InvalidMovement(msg)) => {
            HttpResponse::BadRequest().json(json!({ "error": msg }))
        }
        Err(e) => {
            tracing::error!("Payment creation failed: {e}");
            HttpResponse::InternalServerError().json(json!({ "error": "internal" }))
        }
    }
}

/// POST /webhooks, raw-body intake
pub async fn receive_webhook(
    req: HttpRequest,
    body: web::Bytes,
    state: web::Data<AppState>,
) -> HttpResponse {
    let signature = req
        .headers()
        .get(&state.config.signature_header)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    match state.pipeline.ingest(signature, &body).await {
        Ok(outcome) => {
            let outcome = match outcome {
                IngestOutcome::Processed => "processed",
                IngestOutcome::Duplicate => "duplicate",
                IngestOutcome::OutOfOrder => "out_of_order",
                IngestOutcome::Skipped => "skipped",
                IngestOutcome::DeadLettered => "dead_lettered",
            };
            HttpResponse::Ok().json(json!({ "received": true, "outcome": outcome }))
        }
        Err(Error::InvalidSignature(_)) => {
            HttpResponse::BadRequest().json(json!({ "error": "invalid signature" }))
        }
        Err(e) => {
            // terse by design; detail stays in the logs
            tracing::error!("Webhook intake failed: {e}");
            HttpResponse::InternalServerError().json(json!({ "error": "internal" }))
        }
    }
}

/// GET /health
pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    match state.payments.storage().stats() {
        Ok(stats) => HttpResponse::Ok().json(json!({
            "status": "healthy",
            "version": env!("CARGO_PKG_VERSION"),
            "payments": stats.total_payments,
            "movements": stats.total_movements,
            "escrows": stats.total_escrows,
            "dead_letters": state.dead_letters.len(),
        })),
        Err(e) => HttpResponse::ServiceUnavailable().json(json!({
            "status": "unhealthy",
            "error": e.to_string(),
        })),
    }
}

/// GET /payments/{id}/reconcile, conservation check on demand
pub async fn reconcile_payment(
    path: web::Path<Uuid>,
    state: web::Data<AppState>,
) -> HttpResponse {
    let payment_id = path.into_inner();
    match state.payments.reconcile(payment_id) {
        Ok(balances) => {
            let balances: serde_json::Map<String, serde_json::Value> = balances
                .into_iter()
                .map(|(account, cents)| (account.code().to_string(), json!(cents)))
                .collect();
            HttpResponse::Ok().json(json!({ "payment_id": payment_id, "balances": balances }))
        }
        Err(payment_core::Error::PaymentNotFound(_)) => {
            HttpResponse::NotFound().json(json!({ "error": "payment not found" }))
        }
        Err(e @ payment_core::Error::LedgerImbalance { .. }) => {
            HttpResponse::InternalServerError().json(json!({
                "payment_id": payment_id,
                "error": e.to_string(),
            }))
        }
        Err(e) => {
            tracing::error!(payment_id = %payment_id, "Reconcile failed: {e}");
            HttpResponse::InternalServerError().json(json!({ "error": "internal" }))
        }
    }
}

/// GET /dead-letters, listing for manual investigation
pub async fn list_dead_letters(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(state.dead_letters.list())
}

/// GET /metrics, Prometheus exposition
pub async fn metrics(state: web::Data<AppState>) -> HttpResponse {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();

    let families = state.payments.metrics().registry().gather();
    if let Err(e) = encoder.encode(&families, &mut buffer) {
        tracing::error!("Metrics encoding failed: {e}");
        return HttpResponse::InternalServerError().finish();
    }
    // event-bus metrics live in the default registry
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        tracing::error!("Metrics encoding failed: {e}");
        return HttpResponse::InternalServerError().finish();
    }

    HttpResponse::Ok()
        .content_type(encoder.format_type())
        .body(buffer)
}

/// Route table
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/payments", web::post().to(create_payment))
        .route("/webhooks", web::post().to(receive_webhook))
        .route("/health", web::get().to(health_check))
        .route("/payments/{id}/reconcile", web::get().to(reconcile_payment))
        .route("/dead-letters", web::get().to(list_dead_letters))
        .route("/metrics", web::get().to(metrics));
}
