//! Time-driven release scheduler
//!
//! Periodically sweeps escrows whose hold period has elapsed and tries
//! to release them. A sweep is best-effort: `NotEligible` (dispute
//! opened meanwhile, gate down) and `AlreadyReleased` are benign and
//! the escrow is retried on the next pass.

use crate::error::Error;
use crate::manager::EscrowManager;
use payment_core::{ActorMetadata, EscrowStatus};
use std::sync::Arc;

/// Outcome of one sweep
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    /// Due escrows examined
    pub examined: usize,
    /// Successfully released
    pub released: usize,
    /// Blocked (dispute, gate down, raced)
    pub skipped: usize,
    /// Failed with a non-benign error
    pub failed: usize,
}

/// Scans for due escrows on a fixed cadence
pub struct ReleaseScheduler {
    manager: Arc<EscrowManager>,
}

impl ReleaseScheduler {
    /// New scheduler over the manager
    pub fn new(manager: Arc<EscrowManager>) -> Self {
        Self { manager }
    }

    /// Run forever, sweeping on the configured cadence
    pub async fn run(&self) {
        let cadence = self.manager.config().scheduler_interval();
        let mut interval = tokio::time::interval(cadence);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        tracing::info!(cadence = ?cadence, "Release scheduler started");

        loop {
            interval.tick().await;
            match self.sweep().await {
                Ok(report) if report.examined > 0 => {
                    tracing::info!(
                        examined = report.examined,
                        released = report.released,
                        skipped = report.skipped,
                        failed = report.failed,
                        "Release sweep finished"
                    );
                }
                Ok(_) => {}
                Err(e) => tracing::error!("Release sweep failed: {e}"),
            }
        }
    }

    /// One sweep over all due escrows
    pub async fn sweep(&self) -> crate::Result<SweepReport> {
        let payments = self.manager.payments();
        let now = payments.clock().now();
        let actor = ActorMetadata::scheduler();

        let mut report = SweepReport::default();

        for escrow in payments.list_escrows()? {
            if escrow.status != EscrowStatus::PendingRelease {
                continue;
            }
            let due = matches!(escrow.release_eligible_at, Some(at) if at <= now);
            if !due {
                continue;
            }

            report.examined += 1;
            match self.manager.release_funds(escrow.booking_id, &actor).await {
                Ok(_) => report.released += 1,
                Err(Error::NotEligible(reason)) => {
                    tracing::debug!(
                        escrow_id = %escrow.escrow_id,
                        reason,
                        "Release skipped"
                    );
                    report.skipped += 1;
                }
                Err(Error::AlreadyReleased(_)) => report.skipped += 1,
                Err(e) => {
                    tracing::error!(
                        escrow_id = %escrow.escrow_id,
                        "Release failed: {e}"
                    );
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }
}
