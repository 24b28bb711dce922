//! WanderPay Event Bus
//!
//! Domain event publishing over NATS JetStream. Every settlement-side
//! state change emits an immutable [`DomainEvent`] so downstream
//! consumers (notifications, analytics, ops tooling) observe the flow
//! without coupling to the payment core.
//!
//! Dedup is delegated to JetStream: the event id rides the
//! `Nats-Msg-Id` header, so republishing after a crash is safe within
//! the stream's duplicate window.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

pub mod error;
pub mod event;
pub mod metrics;
pub mod publisher;

// Re-exports
pub use error::{Error, Result};
pub use event::{DomainEvent, EventType, PartitionKey};
pub use publisher::{EventPublisher, InMemoryPublisher, NatsPublisher, PublisherConfig};
