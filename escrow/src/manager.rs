//! Escrow lifecycle manager
//!
//! Holds captured funds, schedules their release after the post-trip
//! hold period, and disburses commission + payout once the release gate
//! opens. Every check-then-act sequence runs under the per-booking lock
//! so a dispute opening cannot race a release: exactly one side wins.

use crate::config::{commission_for, EscrowConfig};
use crate::disputes::DisputeGate;
use crate::error::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use event_bus::{DomainEvent, EventPublisher, EventType, PartitionKey};
use payment_core::{
    ActorMetadata, EscrowRecord, EscrowStatus, LedgerAccount, MovementDraft, MovementType,
    PaymentRecord, PaymentState, Payments,
};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

/// Escrow manager
pub struct EscrowManager {
    payments: Arc<Payments>,
    publisher: Arc<dyn EventPublisher>,
    gate: Arc<dyn DisputeGate>,
    config: EscrowConfig,
}

impl EscrowManager {
    /// Assemble the manager from its collaborators
    pub fn new(
        payments: Arc<Payments>,
        publisher: Arc<dyn EventPublisher>,
        gate: Arc<dyn DisputeGate>,
        config: EscrowConfig,
    ) -> Self {
        Self {
            payments,
            publisher,
            gate,
            config,
        }
    }

    /// Shared payments facade
    pub fn payments(&self) -> &Arc<Payments> {
        &self.payments
    }

    /// Configuration in effect
    pub fn config(&self) -> &EscrowConfig {
        &self.config
    }

    /// Start holding a captured payment's funds.
    ///
    /// Commission is fixed here, once, from the configured rate; the
    /// payout is the exact remainder. Writes the `Holding` record and
    /// the `escrow_hold` ledger entry in one batch.
    pub async fn start_hold(&self, payment_id: Uuid, actor: &ActorMetadata) -> Result<EscrowRecord> {
        let booking_id = self.payments.get(payment_id)?.booking_id;
        let lock = self.payments.booking_lock(booking_id);
        let _guard = lock.lock().await;

        // re-read under the lock
        let payment = self.payments.get(payment_id)?;
        if payment.state != PaymentState::Captured {
            return Err(Error::InvalidState(format!(
                "Cannot hold funds for payment in {}, must be CAPTURED",
                payment.state
            )));
        }
        if let Some(existing) = self.payments.find_escrow_by_booking(payment.booking_id)? {
            return Err(Error::InvalidState(format!(
                "Booking {} already has escrow {} ({})",
                payment.booking_id, existing.escrow_id, existing.status
            )));
        }

        let now = self.payments.clock().now();
        let amount = payment.breakdown.gross_cents;
        let commission = commission_for(amount, self.config.commission_rate_bps)?;
        let payout = amount - commission;

        let escrow = EscrowRecord {
            escrow_id: Uuid::now_v7(),
            booking_id: payment.booking_id,
            payment_id,
            agent_id: payment.agent_id,
            amount_cents: amount,
            platform_commission_cents: commission,
            agent_payout_cents: payout,
            status: EscrowStatus::Holding,
            hold_started_at: Some(now),
            release_eligible_at: None,
            released_at: None,
            cancelled_at: None,
            version: 1,
        };

        let hold = MovementDraft {
            movement_type: MovementType::EscrowHold,
            amount_cents: amount,
            from_account: LedgerAccount::Customer,
            to_account: LedgerAccount::PlatformEscrow,
            external_transaction_id: payment.external_charge_id.clone(),
        };
        self.payments
            .commit_escrow(EscrowStatus::NotStarted, &escrow, vec![hold], actor, None)?;

        tracing::info!(
            escrow_id = %escrow.escrow_id,
            booking_id = %escrow.booking_id,
            amount_cents = amount,
            commission_cents = commission,
            payout_cents = payout,
            "Escrow hold started"
        );

        self.publish(
            EventType::EscrowHoldStarted,
            &escrow,
            json!({
                "escrow_id": escrow.escrow_id,
                "booking_id": escrow.booking_id,
                "payment_id": payment_id,
                "amount_cents": amount,
                "platform_commission_cents": commission,
                "agent_payout_cents": payout,
            }),
        )
        .await?;

        Ok(escrow)
    }

    /// Schedule the release: eligibility is trip completion plus the
    /// hold period. The date is set exactly once and never moved.
    pub async fn schedule_release(
        &self,
        booking_id: Uuid,
        trip_completed_at: DateTime<Utc>,
        actor: &ActorMetadata,
    ) -> Result<EscrowRecord> {
        let lock = self.payments.booking_lock(booking_id);
        let _guard = lock.lock().await;

        let mut escrow = self.escrow_for(booking_id)?;
        match escrow.status {
            EscrowStatus::Released => return Err(Error::AlreadyReleased(escrow.escrow_id)),
            EscrowStatus::Cancelled => {
                return Err(Error::InvalidState(format!(
                    "Escrow {} is cancelled",
                    escrow.escrow_id
                )))
            }
            _ => {}
        }
        if escrow.release_eligible_at.is_some() {
            return Err(Error::AlreadyScheduled(escrow.escrow_id));
        }

        let prev = escrow.status;
        let eligible_at = trip_completed_at + Duration::days(self.config.hold_days);
        escrow.release_eligible_at = Some(eligible_at);
        escrow.status = EscrowStatus::PendingRelease;
        escrow.version += 1;

        self.payments
            .commit_escrow(prev, &escrow, vec![], actor, None)?;

        tracing::info!(
            escrow_id = %escrow.escrow_id,
            booking_id = %booking_id,
            eligible_at = %eligible_at,
            "Escrow release scheduled"
        );

        self.publish(
            EventType::EscrowReleaseScheduled,
            &escrow,
            json!({
                "escrow_id": escrow.escrow_id,
                "booking_id": booking_id,
                "release_eligible_at": eligible_at,
            }),
        )
        .await?;

        Ok(escrow)
    }

    /// Disburse commission and payout once the gate opens.
    ///
    /// The gate is the hold clock plus the dispute check; a gate that
    /// times out blocks the release. Appends both ledger entries and
    /// flips the status in one batch, then reconciles the payment as a
    /// post-condition.
    pub async fn release_funds(
        &self,
        booking_id: Uuid,
        actor: &ActorMetadata,
    ) -> Result<EscrowRecord> {
        let lock = self.payments.booking_lock(booking_id);
        let _guard = lock.lock().await;

        let mut escrow = self.escrow_for(booking_id)?;
        match escrow.status {
            EscrowStatus::Released => return Err(Error::AlreadyReleased(escrow.escrow_id)),
            EscrowStatus::Holding | EscrowStatus::PendingRelease => {}
            other => {
                return Err(Error::InvalidState(format!(
                    "Cannot release escrow {} in {other}",
                    escrow.escrow_id
                )))
            }
        }

        let now = self.payments.clock().now();
        let eligible_at = escrow.release_eligible_at.ok_or_else(|| {
            Error::NotEligible(format!("Release not scheduled for escrow {}", escrow.escrow_id))
        })?;
        if now < eligible_at {
            return Err(Error::NotEligible(format!(
                "Hold period ends at {eligible_at}, now is {now}"
            )));
        }
        self.check_dispute_gate(booking_id).await?;

        // what escrow actually holds must cover the disbursement; a
        // refund may have drained part of the original split
        let balances = self.payments.reconcile(escrow.payment_id)?;
        let held = balances
            .get(&LedgerAccount::PlatformEscrow)
            .copied()
            .unwrap_or(0);
        let due = escrow.platform_commission_cents + escrow.agent_payout_cents;
        if held < due {
            return Err(Error::NotEligible(format!(
                "Escrow {} holds {held} cents, disbursement needs {due}",
                escrow.escrow_id
            )));
        }

        let prev = escrow.status;
        escrow.status = EscrowStatus::Released;
        escrow.released_at = Some(now);
        escrow.version += 1;

        let mut drafts = Vec::with_capacity(2);
        if escrow.platform_commission_cents > 0 {
            drafts.push(MovementDraft {
                movement_type: MovementType::Commission,
                amount_cents: escrow.platform_commission_cents,
                from_account: LedgerAccount::PlatformEscrow,
                to_account: LedgerAccount::PlatformRevenue,
                external_transaction_id: None,
            });
        }
        drafts.push(MovementDraft {
            movement_type: MovementType::Payout,
            amount_cents: escrow.agent_payout_cents,
            from_account: LedgerAccount::PlatformEscrow,
            to_account: LedgerAccount::Agent,
            external_transaction_id: None,
        });

        self.payments
            .commit_escrow(prev, &escrow, drafts, actor, None)?;

        // conservation post-condition; LedgerImbalance is fatal
        self.payments.reconcile(escrow.payment_id)?;

        tracing::info!(
            escrow_id = %escrow.escrow_id,
            booking_id = %booking_id,
            commission_cents = escrow.platform_commission_cents,
            payout_cents = escrow.agent_payout_cents,
            "Escrow released"
        );

        self.publish(
            EventType::EscrowReleased,
            &escrow,
            json!({
                "escrow_id": escrow.escrow_id,
                "booking_id": booking_id,
                "payment_id": escrow.payment_id,
                "agent_id": escrow.agent_id,
                "platform_commission_cents": escrow.platform_commission_cents,
                "agent_payout_cents": escrow.agent_payout_cents,
            }),
        )
        .await?;

        Ok(escrow)
    }

    /// Cancel the hold. Moves no funds; the refund rides the payment
    /// state machine separately. The reason lands in the audit trail.
    pub async fn cancel_hold(
        &self,
        booking_id: Uuid,
        reason: &str,
        actor: &ActorMetadata,
    ) -> Result<EscrowRecord> {
        let trimmed = reason.trim();
        if trimmed.chars().count() < self.config.min_cancel_reason_len {
            return Err(Error::ReasonTooShort {
                min: self.config.min_cancel_reason_len,
                got: trimmed.chars().count(),
            });
        }

        let lock = self.payments.booking_lock(booking_id);
        let _guard = lock.lock().await;

        let mut escrow = self.escrow_for(booking_id)?;
        match escrow.status {
            EscrowStatus::Released => return Err(Error::AlreadyReleased(escrow.escrow_id)),
            // intent already satisfied
            EscrowStatus::Cancelled => return Ok(escrow),
            _ => {}
        }

        let prev = escrow.status;
        let now = self.payments.clock().now();
        escrow.status = EscrowStatus::Cancelled;
        escrow.cancelled_at = Some(now);
        escrow.version += 1;

        self.payments
            .commit_escrow(prev, &escrow, vec![], actor, Some(trimmed.to_string()))?;

        tracing::info!(
            escrow_id = %escrow.escrow_id,
            booking_id = %booking_id,
            reason = trimmed,
            "Escrow hold cancelled"
        );

        self.publish(
            EventType::EscrowCancelled,
            &escrow,
            json!({
                "escrow_id": escrow.escrow_id,
                "booking_id": booking_id,
                "reason": trimmed,
            }),
        )
        .await?;

        Ok(escrow)
    }

    /// Apply a gateway refund to the payment and its escrow in one
    /// locked step.
    ///
    /// `refunded_total_cents` is the gateway's cumulative figure; only
    /// the delta since the last recorded refund is appended to the
    /// ledger. A partial refund shrinks the hold and re-derives the
    /// commission/payout split from the remaining amount; a full refund
    /// cancels the hold. Holding the booking lock across the whole
    /// sequence keeps a concurrent release from disbursing the original
    /// split while the refund drains it.
    pub async fn process_refund(
        &self,
        payment_id: Uuid,
        refunded_total_cents: i64,
        full: bool,
        external_transaction_id: Option<String>,
        actor: &ActorMetadata,
    ) -> Result<PaymentRecord> {
        let booking_id = self.payments.get(payment_id)?.booking_id;
        let lock = self.payments.booking_lock(booking_id);
        let _guard = lock.lock().await;

        let mut escrow = self.escrow_for(booking_id)?;
        if escrow.status == EscrowStatus::Released {
            return Err(Error::AlreadyReleased(escrow.escrow_id));
        }

        let already_refunded: i64 = self
            .payments
            .movements_for(payment_id)?
            .iter()
            .filter(|m| m.movement_type == MovementType::Refund)
            .map(|m| m.amount_cents)
            .sum();
        let delta = refunded_total_cents - already_refunded;
        if delta <= 0 {
            // cumulative total already on the ledger; redelivery
            tracing::info!(
                payment_id = %payment_id,
                refunded_total_cents,
                "Refund already recorded, nothing to append"
            );
            return Ok(self.payments.get(payment_id)?);
        }

        self.payments.transition(
            payment_id,
            PaymentState::RefundProcessing,
            Some(MovementDraft {
                movement_type: MovementType::Refund,
                amount_cents: delta,
                from_account: LedgerAccount::PlatformEscrow,
                to_account: LedgerAccount::Customer,
                external_transaction_id,
            }),
            actor,
        )?;
        let target = if full {
            PaymentState::FullyRefunded
        } else {
            PaymentState::PartiallyRefunded
        };
        let payment = self.payments.transition(payment_id, target, None, actor)?;

        let prev = escrow.status;
        if prev != EscrowStatus::Cancelled {
            if full || delta >= escrow.amount_cents {
                let reason = "charge fully refunded at gateway";
                escrow.status = EscrowStatus::Cancelled;
                escrow.cancelled_at = Some(self.payments.clock().now());
                escrow.version += 1;
                self.payments
                    .commit_escrow(prev, &escrow, vec![], actor, Some(reason.to_string()))?;

                tracing::info!(
                    escrow_id = %escrow.escrow_id,
                    booking_id = %booking_id,
                    "Escrow hold cancelled by full refund"
                );
                self.publish(
                    EventType::EscrowCancelled,
                    &escrow,
                    json!({
                        "escrow_id": escrow.escrow_id,
                        "booking_id": booking_id,
                        "reason": reason,
                    }),
                )
                .await?;
            } else {
                escrow.amount_cents -= delta;
                escrow.platform_commission_cents =
                    commission_for(escrow.amount_cents, self.config.commission_rate_bps)?;
                escrow.agent_payout_cents = escrow.amount_cents - escrow.platform_commission_cents;
                escrow.version += 1;
                self.payments.commit_escrow(
                    prev,
                    &escrow,
                    vec![],
                    actor,
                    Some(format!("partial refund of {delta} cents shrank the hold")),
                )?;

                tracing::info!(
                    escrow_id = %escrow.escrow_id,
                    booking_id = %booking_id,
                    amount_cents = escrow.amount_cents,
                    commission_cents = escrow.platform_commission_cents,
                    payout_cents = escrow.agent_payout_cents,
                    "Escrow hold shrunk by partial refund"
                );
            }
        }

        // conservation post-condition; LedgerImbalance is fatal
        self.payments.reconcile(payment_id)?;

        Ok(payment)
    }

    /// Open a dispute on a booking. Races a concurrent release under
    /// the booking lock: if the funds already left escrow the dispute
    /// path sees the distinct [`Error::AlreadyReleased`] outcome.
    pub async fn open_dispute(&self, booking_id: Uuid, actor: &ActorMetadata) -> Result<()> {
        let lock = self.payments.booking_lock(booking_id);
        let _guard = lock.lock().await;

        if let Some(escrow) = self.payments.find_escrow_by_booking(booking_id)? {
            if escrow.status == EscrowStatus::Released {
                return Err(Error::AlreadyReleased(escrow.escrow_id));
            }
        }

        self.gate
            .open(booking_id)
            .await
            .map_err(|e| Error::NotEligible(format!("Dispute gate error: {e}")))?;

        tracing::warn!(booking_id = %booking_id, actor = %actor.actor, "Dispute opened");

        self.publisher
            .publish(
                &DomainEvent::new(
                    EventType::DisputeOpened,
                    PartitionKey::Booking(booking_id),
                    json!({ "booking_id": booking_id }),
                )
                .with_correlation_id(booking_id.to_string()),
            )
            .await?;

        Ok(())
    }

    /// Resolve a booking's dispute, reopening the release gate
    pub async fn resolve_dispute(&self, booking_id: Uuid, actor: &ActorMetadata) -> Result<()> {
        let lock = self.payments.booking_lock(booking_id);
        let _guard = lock.lock().await;

        self.gate
            .resolve(booking_id)
            .await
            .map_err(|e| Error::NotEligible(format!("Dispute gate error: {e}")))?;

        tracing::info!(booking_id = %booking_id, actor = %actor.actor, "Dispute resolved");

        self.publisher
            .publish(
                &DomainEvent::new(
                    EventType::DisputeResolved,
                    PartitionKey::Booking(booking_id),
                    json!({ "booking_id": booking_id }),
                )
                .with_correlation_id(booking_id.to_string()),
            )
            .await?;

        Ok(())
    }

    async fn check_dispute_gate(&self, booking_id: Uuid) -> Result<()> {
        let query = self.gate.has_open_dispute(booking_id);
        match tokio::time::timeout(self.config.dispute_gate_timeout(), query).await {
            Ok(Ok(false)) => Ok(()),
            Ok(Ok(true)) => Err(Error::NotEligible(format!(
                "Open dispute on booking {booking_id}"
            ))),
            Ok(Err(e)) => {
                // fail closed
                tracing::error!(booking_id = %booking_id, "Dispute gate failed: {e}");
                Err(Error::NotEligible(format!("Dispute gate error: {e}")))
            }
            Err(_) => {
                tracing::error!(booking_id = %booking_id, "Dispute gate timed out");
                Err(Error::NotEligible("Dispute gate timed out".to_string()))
            }
        }
    }

    fn escrow_for(&self, booking_id: Uuid) -> Result<EscrowRecord> {
        self.payments
            .find_escrow_by_booking(booking_id)?
            .ok_or_else(|| Error::InvalidState(format!("No escrow for booking {booking_id}")))
    }

    async fn publish(
        &self,
        event_type: EventType,
        escrow: &EscrowRecord,
        payload: serde_json::Value,
    ) -> Result<()> {
        self.publisher
            .publish(
                &DomainEvent::new(event_type, PartitionKey::Booking(escrow.booking_id), payload)
                    .with_correlation_id(escrow.booking_id.to_string()),
            )
            .await?;
        Ok(())
    }
}
