//! Prometheus metrics for the payment core
//!
//! # Metrics
//!
//! - `payments_transitions_total` - Successful state transitions
//! - `payments_illegal_transitions_total` - Rejected transitions (ordering artifacts)
//! - `payments_movements_total` - Ledger entries appended
//! - `payments_ledger_imbalance_total` - Reconciliation failures (pages an operator)

use prometheus::{IntCounter, Opts, Registry};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Successful state transitions
    pub transitions_total: IntCounter,

    /// Rejected illegal transitions
    pub illegal_transitions_total: IntCounter,

    /// Ledger entries appended
    pub movements_total: IntCounter,

    /// Reconciliation failures
    pub ledger_imbalance_total: IntCounter,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create a collector with its own registry
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let transitions_total = IntCounter::with_opts(Opts::new(
            "payments_transitions_total",
            "Successful payment state transitions",
        ))?;
        registry.register(Box::new(transitions_total.clone()))?;

        let illegal_transitions_total = IntCounter::with_opts(Opts::new(
            "payments_illegal_transitions_total",
            "Rejected illegal payment state transitions",
        ))?;
        registry.register(Box::new(illegal_transitions_total.clone()))?;

        let movements_total = IntCounter::with_opts(Opts::new(
            "payments_movements_total",
            "Money-movement ledger entries appended",
        ))?;
        registry.register(Box::new(movements_total.clone()))?;

        let ledger_imbalance_total = IntCounter::with_opts(Opts::new(
            "payments_ledger_imbalance_total",
            "Ledger reconciliation failures",
        ))?;
        registry.register(Box::new(ledger_imbalance_total.clone()))?;

        Ok(Self {
            transitions_total,
            illegal_transitions_total,
            movements_total,
            ledger_imbalance_total,
            registry,
        })
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}
