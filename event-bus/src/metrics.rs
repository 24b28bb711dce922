//! Prometheus metrics for the event bus

use lazy_static::lazy_static;
use prometheus::{register_counter_vec, register_histogram_vec, CounterVec, HistogramVec};

lazy_static! {
    /// Total events published
    pub static ref EVENT_PUBLISH_TOTAL: CounterVec = register_counter_vec!(
        "event_bus_publish_total",
        "Total domain events published",
        &["event_type", "status"]
    )
    .unwrap();

    /// Event publish duration
    pub static ref EVENT_PUBLISH_DURATION: HistogramVec = register_histogram_vec!(
        "event_bus_publish_duration_seconds",
        "Domain event publish duration in seconds",
        &["event_type"]
    )
    .unwrap();

    /// Publish retries
    pub static ref EVENT_PUBLISH_RETRIES: CounterVec = register_counter_vec!(
        "event_bus_publish_retries_total",
        "Publish attempts beyond the first",
        &["event_type"]
    )
    .unwrap();
}
