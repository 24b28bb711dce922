//! Escrow configuration

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Escrow manager configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscrowConfig {
    /// Days funds stay held after trip completion
    pub hold_days: i64,

    /// Platform commission rate in basis points
    pub commission_rate_bps: u32,

    /// Max wait on the dispute gate before failing closed (ms)
    pub dispute_gate_timeout_ms: u64,

    /// Release scheduler scan cadence (seconds)
    pub scheduler_interval_secs: u64,

    /// Minimum length of a cancellation reason
    pub min_cancel_reason_len: usize,
}

impl Default for EscrowConfig {
    fn default() -> Self {
        Self {
            hold_days: 14,
            commission_rate_bps: 1_000,
            dispute_gate_timeout_ms: 2_000,
            scheduler_interval_secs: 60,
            min_cancel_reason_len: 8,
        }
    }
}

impl EscrowConfig {
    /// Dispute gate timeout as a Duration
    pub fn dispute_gate_timeout(&self) -> Duration {
        Duration::from_millis(self.dispute_gate_timeout_ms)
    }

    /// Scheduler cadence as a Duration
    pub fn scheduler_interval(&self) -> Duration {
        Duration::from_secs(self.scheduler_interval_secs)
    }
}

/// Platform commission in minor units for a gross amount.
///
/// Floor rounding: the sub-cent remainder stays with the agent payout,
/// so commission + payout always reconstructs the gross exactly. The
/// product is computed in i128; a result that does not fit back into
/// minor units is rejected.
pub fn commission_for(gross_cents: i64, rate_bps: u32) -> Result<i64> {
    let commission = i128::from(gross_cents) * i128::from(rate_bps) / 10_000;
    i64::try_from(commission).map_err(|_| {
        Error::InvalidState(format!(
            "Commission for {gross_cents} cents at {rate_bps} bps overflows"
        ))
    })
}
