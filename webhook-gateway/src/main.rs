use actix_web::{middleware::Logger, web, App, HttpServer};
use escrow::{EscrowConfig, EscrowManager, InMemoryDisputeGate, ReleaseScheduler};
use event_bus::{NatsPublisher, PublisherConfig};
use payment_core::{
    Config, IdempotencyStore, Metrics, Payments, Storage, SystemClock, TracingAuditSink,
};
use std::sync::Arc;
use tracing::info;
use webhook_gateway::{
    config::GatewayConfig, dlq::DeadLetters, http, signature::SignatureVerifier, WebhookPipeline,
};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "webhook_gateway=info,payment_core=info,actix_web=info".into()),
        )
        .init();

    info!("Starting webhook gateway...");

    let gateway_config = GatewayConfig::from_env()?;
    let core_config = Config::from_env()?;

    let storage = Arc::new(Storage::open(&core_config)?);
    let payments = Arc::new(Payments::new(
        storage.clone(),
        Arc::new(SystemClock),
        Arc::new(TracingAuditSink),
        Metrics::new()?,
    ));
    let idempotency = Arc::new(IdempotencyStore::open(storage)?);

    let mut publisher_config = PublisherConfig::default();
    if let Ok(nats_url) = std::env::var("NATS_URL") {
        publisher_config.nats_url = nats_url;
    }
    let publisher = Arc::new(NatsPublisher::connect(publisher_config).await?);

    let escrow_manager = Arc::new(EscrowManager::new(
        payments.clone(),
        publisher.clone(),
        Arc::new(InMemoryDisputeGate::new()),
        EscrowConfig::default(),
    ));

    let scheduler = ReleaseScheduler::new(escrow_manager.clone());
    tokio::spawn(async move { scheduler.run().await });

    let dead_letters = Arc::new(DeadLetters::new());
    let pipeline = Arc::new(WebhookPipeline::new(
        gateway_config.provider.clone(),
        SignatureVerifier::new(gateway_config.signing_secret.clone()),
        payments.clone(),
        escrow_manager,
        idempotency,
        publisher.clone(),
        dead_letters.clone(),
    ));

    let bind_address = gateway_config.bind_address();
    info!("Listening on {bind_address}");

    let state = web::Data::new(http::AppState {
        pipeline,
        payments,
        publisher,
        dead_letters,
        config: gateway_config,
    });

    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .app_data(state.clone())
            .configure(http::configure)
    })
    .bind(&bind_address)?
    .run()
    .await?;

    Ok(())
}
