//! Domain event publisher with retry logic
//!
//! [`NatsPublisher`] publishes to JetStream with per-event dedup via
//! the `Nats-Msg-Id` header, so redelivering the same event within the
//! stream's duplicate window is harmless. [`InMemoryPublisher`] records
//! events in order for tests.

use crate::{
    event::DomainEvent,
    metrics::{EVENT_PUBLISH_DURATION, EVENT_PUBLISH_RETRIES, EVENT_PUBLISH_TOTAL},
    Error, Result,
};
use async_nats::jetstream::{
    stream::{Config as StreamConfig, RetentionPolicy, StorageType},
    Context as JetStreamContext,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Publisher configuration
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    /// NATS server URL
    pub nats_url: String,

    /// Publish timeout
    pub publish_timeout: Duration,

    /// Max retry attempts
    pub max_retry_attempts: u32,

    /// Initial retry delay
    pub initial_retry_delay: Duration,

    /// Max retry delay
    pub max_retry_delay: Duration,

    /// JetStream deduplication window
    pub duplicate_window: Duration,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            nats_url: "nats://localhost:4222".to_string(),
            publish_timeout: Duration::from_secs(5),
            max_retry_attempts: 3,
            initial_retry_delay: Duration::from_millis(100),
            max_retry_delay: Duration::from_secs(2),
            duplicate_window: Duration::from_secs(300),
        }
    }
}

/// Something that can publish domain events
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish one event
    async fn publish(&self, event: &DomainEvent) -> Result<()>;
}

/// JetStream-backed publisher
pub struct NatsPublisher {
    context: JetStreamContext,
    config: PublisherConfig,
}

impl NatsPublisher {
    /// Connect to NATS and build the publisher
    pub async fn connect(config: PublisherConfig) -> Result<Self> {
        info!("Connecting to NATS JetStream at {}", config.nats_url);

        let client = async_nats::connect(&config.nats_url)
            .await
            .map_err(|e| Error::Connection(e.to_string()))?;
        let context = async_nats::jetstream::new(client);

        Ok(Self { context, config })
    }

    async fn ensure_stream(&self, event: &DomainEvent) -> Result<()> {
        let stream_config = StreamConfig {
            name: event.event_type.stream_name().to_string(),
            subjects: event.event_type.stream_subjects(),
            retention: RetentionPolicy::Limits,
            max_messages: 10_000_000,
            max_age: Duration::from_secs(30 * 24 * 3600),
            storage: StorageType::File,
            duplicate_window: self.config.duplicate_window,
            ..Default::default()
        };

        self.context
            .get_or_create_stream(stream_config)
            .await
            .map_err(|e| Error::StreamCreation(e.to_string()))?;

        Ok(())
    }

    async fn publish_once(&self, event: &DomainEvent, payload: &[u8]) -> Result<()> {
        let mut headers = async_nats::HeaderMap::new();
        headers.insert("Nats-Msg-Id", event.event_id.to_string().as_str());
        if let Some(ref correlation_id) = event.correlation_id {
            headers.insert("Correlation-Id", correlation_id.as_str());
        }

        let ack = tokio::time::timeout(
            self.config.publish_timeout,
            self.context.publish_with_headers(
                event.subject(),
                headers,
                bytes::Bytes::copy_from_slice(payload),
            ),
        )
        .await
        .map_err(|_| Error::Timeout(self.config.publish_timeout.as_millis() as u64))?
        .map_err(|e| Error::Publish(e.to_string()))?;

        ack.await
            .map_err(|e| Error::JetStream(format!("Publish ack failed: {e}")))?;

        Ok(())
    }

    async fn publish_with_retry(&self, event: &DomainEvent, payload: &[u8]) -> Result<()> {
        let mut attempts = 0;
        let mut delay = self.config.initial_retry_delay;

        loop {
            attempts += 1;

            match self.publish_once(event, payload).await {
                Ok(()) => {
                    if attempts > 1 {
                        info!(
                            event_id = %event.event_id,
                            attempts,
                            "Event published after retries"
                        );
                    }
                    return Ok(());
                }
                Err(e) => {
                    if attempts >= self.config.max_retry_attempts {
                        error!(
                            event_id = %event.event_id,
                            attempts,
                            "Failed to publish event: {e}"
                        );
                        return Err(e);
                    }

                    EVENT_PUBLISH_RETRIES
                        .with_label_values(&[event.event_type.subject_prefix()])
                        .inc();
                    warn!(
                        event_id = %event.event_id,
                        attempt = attempts,
                        retry_in = ?delay,
                        "Publish failed, retrying: {e}"
                    );
                    tokio::time::sleep(delay).await;

                    // Exponential backoff
                    delay = (delay * 2).min(self.config.max_retry_delay);
                }
            }
        }
    }
}

#[async_trait]
impl EventPublisher for NatsPublisher {
    async fn publish(&self, event: &DomainEvent) -> Result<()> {
        let start = Instant::now();
        let payload = event.to_bytes()?;

        self.ensure_stream(event).await?;
        let result = self.publish_with_retry(event, &payload).await;

        let event_type = event.event_type.subject_prefix();
        EVENT_PUBLISH_DURATION
            .with_label_values(&[event_type])
            .observe(start.elapsed().as_secs_f64());

        let status = if result.is_ok() { "success" } else { "error" };
        EVENT_PUBLISH_TOTAL
            .with_label_values(&[event_type, status])
            .inc();

        result
    }
}

/// Collects published events in order (tests)
#[derive(Debug, Default)]
pub struct InMemoryPublisher {
    events: Mutex<Vec<DomainEvent>>,
}

impl InMemoryPublisher {
    /// New empty publisher
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything published so far, in publish order
    pub fn published(&self) -> Vec<DomainEvent> {
        self.events.lock().clone()
    }

    /// Number of events published
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// Whether nothing was published
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

#[async_trait]
impl EventPublisher for InMemoryPublisher {
    async fn publish(&self, event: &DomainEvent) -> Result<()> {
        self.events.lock().push(event.clone());
        Ok(())
    }
}
