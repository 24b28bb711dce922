//! WanderPay Webhook Gateway
//!
//! Inbound edge for payment gateway webhooks. Every delivery is
//! verified (HMAC-SHA256 over the raw body), deduplicated through the
//! idempotency store, classified, and dispatched to an order-tolerant
//! handler. The gateway always gets a terse acknowledgment; anything a
//! handler cannot process is parked on the dead-letter path.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

pub mod config;
pub mod dlq;
pub mod error;
pub mod event;
pub mod http;
pub mod pipeline;
pub mod signature;

// Re-exports
pub use config::GatewayConfig;
pub use dlq::{DeadLetter, DeadLetters};
pub use error::{Error, Result};
pub use event::{EventKind, GatewayEvent};
pub use pipeline::{IngestOutcome, WebhookPipeline};
pub use signature::SignatureVerifier;
