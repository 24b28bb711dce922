//! Payment facade: state transitions and the money-movement ledger
//!
//! All writes to a payment go through [`Payments`]. A transition and its
//! ledger entry are committed in a single storage batch; a rejected
//! transition writes nothing. Ledger rows are append-only.

use crate::audit::{AuditKind, AuditRecord, AuditSink};
use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::metrics::Metrics;
use crate::state_machine::{check_transition, PaymentState};
use crate::storage::Storage;
use crate::types::{
    ActorMetadata, EscrowRecord, EscrowStatus, LedgerAccount, MoneyBreakdown, MoneyMovementEntry,
    MovementType, PaymentRecord,
};
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Per-entity async locks. Concurrent operations touching the same
/// booking serialize on its lock; distinct bookings run in parallel.
#[derive(Default)]
pub struct LockRegistry {
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl LockRegistry {
    /// New empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock handle for one entity; created on first use
    pub fn for_entity(&self, id: Uuid) -> Arc<Mutex<()>> {
        self.locks.entry(id).or_default().value().clone()
    }
}

/// A movement about to be appended, before ids and timestamps are stamped
#[derive(Debug, Clone)]
pub struct MovementDraft {
    /// Kind of movement
    pub movement_type: MovementType,
    /// Amount in minor units, must be positive
    pub amount_cents: i64,
    /// Debited account
    pub from_account: LedgerAccount,
    /// Credited account
    pub to_account: LedgerAccount,
    /// Gateway transaction reference
    pub external_transaction_id: Option<String>,
}

impl MovementDraft {
    fn validate(&self) -> Result<()> {
        if self.amount_cents <= 0 {
            return Err(Error::InvalidMovement(format!(
                "Amount must be positive, got {}",
                self.amount_cents
            )));
        }
        if self.from_account == self.to_account {
            return Err(Error::InvalidMovement(format!(
                "Self-transfer on account {}",
                self.from_account
            )));
        }
        Ok(())
    }

    fn into_entry(
        self,
        booking_id: Uuid,
        payment_id: Uuid,
        actor: &ActorMetadata,
        occurred_at: chrono::DateTime<chrono::Utc>,
    ) -> MoneyMovementEntry {
        MoneyMovementEntry {
            entry_id: Uuid::now_v7(),
            booking_id,
            payment_id,
            movement_type: self.movement_type,
            amount_cents: self.amount_cents,
            from_account: self.from_account,
            to_account: self.to_account,
            external_transaction_id: self.external_transaction_id,
            occurred_at,
            recorded_by: actor.clone(),
        }
    }
}

/// Authoritative payment store
pub struct Payments {
    storage: Arc<Storage>,
    clock: Arc<dyn Clock>,
    audit: Arc<dyn AuditSink>,
    metrics: Metrics,
    locks: LockRegistry,
    // serializes the read-check-commit of each payment record
    write_locks: DashMap<Uuid, Arc<parking_lot::Mutex<()>>>,
}

impl Payments {
    /// Assemble the facade from its collaborators
    pub fn new(
        storage: Arc<Storage>,
        clock: Arc<dyn Clock>,
        audit: Arc<dyn AuditSink>,
        metrics: Metrics,
    ) -> Self {
        Self {
            storage,
            clock,
            audit,
            metrics,
            locks: LockRegistry::new(),
            write_locks: DashMap::new(),
        }
    }

    fn write_lock(&self, payment_id: Uuid) -> Arc<parking_lot::Mutex<()>> {
        self.write_locks.entry(payment_id).or_default().value().clone()
    }

    /// Shared storage handle
    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    /// Injected clock
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Metrics collector
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Per-booking lock; hold it across check-then-act sequences
    pub fn booking_lock(&self, booking_id: Uuid) -> Arc<Mutex<()>> {
        self.locks.for_entity(booking_id)
    }

    /// Create a payment in `INITIATED`
    pub fn create(
        &self,
        booking_id: Uuid,
        user_id: Uuid,
        agent_id: Uuid,
        breakdown: MoneyBreakdown,
    ) -> Result<PaymentRecord> {
        if breakdown.gross_cents <= 0 {
            return Err(Error::InvalidMovement(format!(
                "Gross amount must be positive, got {}",
                breakdown.gross_cents
            )));
        }

        let now = self.clock.now();
        let payment = PaymentRecord {
            payment_id: Uuid::now_v7(),
            booking_id,
            user_id,
            agent_id,
            breakdown,
            external_payment_id: None,
            external_charge_id: None,
            state: PaymentState::Initiated,
            created_at: now,
            authorized_at: None,
            captured_at: None,
            last_transition_at: now,
            version: 1,
        };

        self.storage.put_payment(&payment)?;

        tracing::info!(
            payment_id = %payment.payment_id,
            booking_id = %booking_id,
            gross_cents = payment.breakdown.gross_cents,
            "Payment created"
        );

        Ok(payment)
    }

    /// Attach gateway identifiers once the gateway assigns them
    pub fn set_external_refs(
        &self,
        payment_id: Uuid,
        external_payment_id: Option<String>,
        external_charge_id: Option<String>,
    ) -> Result<PaymentRecord> {
        let lock = self.write_lock(payment_id);
        let _guard = lock.lock();

        let mut payment = self.storage.get_payment(payment_id)?;

        let mut changed = false;
        if let Some(pid) = external_payment_id {
            if payment.external_payment_id.as_deref() != Some(pid.as_str()) {
                payment.external_payment_id = Some(pid);
                changed = true;
            }
        }
        if let Some(cid) = external_charge_id {
            if payment.external_charge_id.as_deref() != Some(cid.as_str()) {
                payment.external_charge_id = Some(cid);
                changed = true;
            }
        }
        if !changed {
            return Ok(payment);
        }
        payment.version += 1;

        self.storage.put_payment(&payment)?;
        Ok(payment)
    }

    /// Get a payment
    pub fn get(&self, payment_id: Uuid) -> Result<PaymentRecord> {
        self.storage.get_payment(payment_id)
    }

    /// Look up a payment by gateway charge id
    pub fn find_by_external_charge(&self, charge_id: &str) -> Result<Option<PaymentRecord>> {
        self.storage.find_payment_by_charge(charge_id)
    }

    /// Movements for a payment, in append order
    pub fn movements_for(&self, payment_id: Uuid) -> Result<Vec<MoneyMovementEntry>> {
        self.storage.movements_for_payment(payment_id)
    }

    /// Apply a state transition, with an optional ledger entry committed
    /// in the same batch. Rejects illegal transitions without touching
    /// state or the ledger.
    pub fn transition(
        &self,
        payment_id: Uuid,
        target: PaymentState,
        movement: Option<MovementDraft>,
        actor: &ActorMetadata,
    ) -> Result<PaymentRecord> {
        let lock = self.write_lock(payment_id);
        let _guard = lock.lock();

        let mut payment = self.storage.get_payment(payment_id)?;
        let from = payment.state;

        if let Err(err) = check_transition(from, target) {
            self.metrics.illegal_transitions_total.inc();
            tracing::warn!(
                payment_id = %payment_id,
                from = %from,
                to = %target,
                "Illegal transition rejected"
            );
            return Err(err);
        }

        if let Some(ref draft) = movement {
            draft.validate()?;
        }

        let now = self.clock.now();
        payment.state = target;
        payment.last_transition_at = now;
        payment.version += 1;
        match target {
            PaymentState::Authorized if payment.authorized_at.is_none() => {
                payment.authorized_at = Some(now);
            }
            PaymentState::Captured if payment.captured_at.is_none() => {
                payment.captured_at = Some(now);
            }
            _ => {}
        }

        let entry =
            movement.map(|draft| draft.into_entry(payment.booking_id, payment_id, actor, now));

        self.storage.commit_transition(&payment, entry.as_ref())?;

        self.metrics.transitions_total.inc();
        self.audit.record(AuditRecord {
            occurred_at: now,
            payment_id,
            booking_id: Some(payment.booking_id),
            kind: AuditKind::StateTransition { from, to: target },
            actor: actor.clone(),
        });

        if let Some(entry) = entry {
            self.metrics.movements_total.inc();
            self.audit.record(AuditRecord {
                occurred_at: now,
                payment_id,
                booking_id: Some(payment.booking_id),
                kind: AuditKind::LedgerAppend {
                    movement_type: entry.movement_type,
                    amount_cents: entry.amount_cents,
                },
                actor: actor.clone(),
            });
        }

        tracing::info!(
            payment_id = %payment_id,
            from = %from,
            to = %target,
            version = payment.version,
            "State transition applied"
        );

        Ok(payment)
    }

    // Escrow record access (lifecycle rules live in the escrow crate)

    /// Get an escrow record
    pub fn get_escrow(&self, escrow_id: Uuid) -> Result<EscrowRecord> {
        self.storage.get_escrow(escrow_id)
    }

    /// Escrow held for a booking
    pub fn find_escrow_by_booking(&self, booking_id: Uuid) -> Result<Option<EscrowRecord>> {
        self.storage.find_escrow_by_booking(booking_id)
    }

    /// Escrow backing a payment
    pub fn find_escrow_by_payment(&self, payment_id: Uuid) -> Result<Option<EscrowRecord>> {
        self.storage.find_escrow_by_payment(payment_id)
    }

    /// All escrow records
    pub fn list_escrows(&self) -> Result<Vec<EscrowRecord>> {
        self.storage.list_escrows()
    }

    /// Commit an escrow status change plus its ledger entries atomically
    pub fn commit_escrow(
        &self,
        prev_status: EscrowStatus,
        escrow: &EscrowRecord,
        drafts: Vec<MovementDraft>,
        actor: &ActorMetadata,
        reason: Option<String>,
    ) -> Result<Vec<MoneyMovementEntry>> {
        let now = self.clock.now();

        let mut entries = Vec::with_capacity(drafts.len());
        for draft in drafts {
            draft.validate()?;
            entries.push(draft.into_entry(escrow.booking_id, escrow.payment_id, actor, now));
        }

        self.storage.commit_escrow(escrow, &entries)?;

        self.audit.record(AuditRecord {
            occurred_at: now,
            payment_id: escrow.payment_id,
            booking_id: Some(escrow.booking_id),
            kind: AuditKind::EscrowChange {
                from: prev_status,
                to: escrow.status,
                reason,
            },
            actor: actor.clone(),
        });
        for entry in &entries {
            self.metrics.movements_total.inc();
            self.audit.record(AuditRecord {
                occurred_at: now,
                payment_id: escrow.payment_id,
                booking_id: Some(escrow.booking_id),
                kind: AuditKind::LedgerAppend {
                    movement_type: entry.movement_type,
                    amount_cents: entry.amount_cents,
                },
                actor: actor.clone(),
            });
        }

        Ok(entries)
    }

    /// Conservation-of-funds check over one payment's movements.
    ///
    /// Returns per-account balances on success. Fails with
    /// [`Error::LedgerImbalance`] when the cross-account net is non-zero
    /// or the escrow account has been driven negative. Both are fatal
    /// findings that must halt automated flows for this payment.
    pub fn reconcile(&self, payment_id: Uuid) -> Result<BTreeMap<LedgerAccount, i64>> {
        let movements = self.storage.movements_for_payment(payment_id)?;

        let mut balances: BTreeMap<LedgerAccount, i64> = BTreeMap::new();
        for entry in &movements {
            let from = balances.entry(entry.from_account).or_insert(0);
            *from = from.checked_sub(entry.amount_cents).ok_or_else(|| {
                Error::InvalidMovement(format!("Balance overflow for payment {payment_id}"))
            })?;

            let to = balances.entry(entry.to_account).or_insert(0);
            *to = to.checked_add(entry.amount_cents).ok_or_else(|| {
                Error::InvalidMovement(format!("Balance overflow for payment {payment_id}"))
            })?;
        }

        let mut net: i64 = 0;
        for balance in balances.values() {
            net = net.checked_add(*balance).ok_or_else(|| {
                Error::InvalidMovement(format!("Balance overflow for payment {payment_id}"))
            })?;
        }

        let escrow_balance = balances
            .get(&LedgerAccount::PlatformEscrow)
            .copied()
            .unwrap_or(0);

        if net != 0 || escrow_balance < 0 {
            let imbalance = if net != 0 { net } else { escrow_balance };
            self.metrics.ledger_imbalance_total.inc();
            tracing::error!(
                payment_id = %payment_id,
                net_cents = net,
                escrow_cents = escrow_balance,
                "LEDGER IMBALANCE: conservation of funds violated"
            );
            return Err(Error::LedgerImbalance {
                payment_id,
                net_cents: imbalance,
            });
        }

        Ok(balances)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::InMemoryAuditSink;
    use crate::clock::ManualClock;
    use crate::types::Currency;
    use crate::Config;
    use chrono::Utc;
    use tempfile::TempDir;

    struct Fixture {
        payments: Payments,
        audit: Arc<InMemoryAuditSink>,
        clock: Arc<ManualClock>,
        _temp: TempDir,
    }

    fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data_dir = temp.path().to_path_buf();

        let storage = Arc::new(Storage::open(&config).unwrap());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let audit = Arc::new(InMemoryAuditSink::new());
        let payments = Payments::new(
            storage,
            clock.clone(),
            audit.clone(),
            Metrics::new().unwrap(),
        );

        Fixture {
            payments,
            audit,
            clock,
            _temp: temp,
        }
    }

    fn breakdown(gross: i64) -> MoneyBreakdown {
        MoneyBreakdown {
            gross_cents: gross,
            gateway_fee_cents: gross * 29 / 1000,
            platform_commission_cents: gross / 10,
            currency: Currency::USD,
        }
    }

    fn capture(payments: &Payments, payment_id: Uuid) {
        let actor = ActorMetadata::webhook("stripe");
        for target in [
            PaymentState::AwaitingPayment,
            PaymentState::Processing,
            PaymentState::Authorized,
            PaymentState::Captured,
        ] {
            payments.transition(payment_id, target, None, &actor).unwrap();
        }
    }

    #[test]
    fn test_create_and_transition() {
        let f = fixture();
        let payment = f
            .payments
            .create(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), breakdown(50_000))
            .unwrap();
        assert_eq!(payment.state, PaymentState::Initiated);
        assert_eq!(payment.version, 1);

        capture(&f.payments, payment.payment_id);

        let loaded = f.payments.get(payment.payment_id).unwrap();
        assert_eq!(loaded.state, PaymentState::Captured);
        assert_eq!(loaded.version, 5);
        assert!(loaded.authorized_at.is_some());
        assert!(loaded.captured_at.is_some());
    }

    #[test]
    fn test_illegal_transition_leaves_state_untouched() {
        let f = fixture();
        let payment = f
            .payments
            .create(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), breakdown(50_000))
            .unwrap();

        let actor = ActorMetadata::webhook("stripe");
        let err = f
            .payments
            .transition(payment.payment_id, PaymentState::Captured, None, &actor)
            .unwrap_err();
        assert!(matches!(err, Error::IllegalTransition { .. }));

        let loaded = f.payments.get(payment.payment_id).unwrap();
        assert_eq!(loaded.state, PaymentState::Initiated);
        assert_eq!(loaded.version, 1);
        assert_eq!(f.payments.metrics().illegal_transitions_total.get(), 1);
    }

    #[test]
    fn test_transition_with_movement_is_atomic_and_audited() {
        let f = fixture();
        let payment = f
            .payments
            .create(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), breakdown(80_000))
            .unwrap();
        capture(&f.payments, payment.payment_id);

        let actor = ActorMetadata::webhook("stripe");
        let draft = MovementDraft {
            movement_type: MovementType::Refund,
            amount_cents: 80_000,
            from_account: LedgerAccount::PlatformEscrow,
            to_account: LedgerAccount::Customer,
            external_transaction_id: Some("re_1".to_string()),
        };
        f.payments
            .transition(
                payment.payment_id,
                PaymentState::RefundProcessing,
                Some(draft),
                &actor,
            )
            .unwrap();

        let movements = f.payments.movements_for(payment.payment_id).unwrap();
        assert_eq!(movements.len(), 1);
        assert_eq!(movements[0].movement_type, MovementType::Refund);
        assert_eq!(movements[0].recorded_by.actor, "webhook:stripe");

        let appended = f
            .audit
            .snapshot()
            .into_iter()
            .filter(|r| matches!(r.kind, AuditKind::LedgerAppend { .. }))
            .count();
        assert_eq!(appended, 1);
    }

    #[test]
    fn test_movement_validation() {
        let f = fixture();
        let payment = f
            .payments
            .create(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), breakdown(50_000))
            .unwrap();
        let actor = ActorMetadata::service("checkout");

        let zero = MovementDraft {
            movement_type: MovementType::Charge,
            amount_cents: 0,
            from_account: LedgerAccount::Customer,
            to_account: LedgerAccount::PlatformRevenue,
            external_transaction_id: None,
        };
        let err = f
            .payments
            .transition(payment.payment_id, PaymentState::AwaitingPayment, Some(zero), &actor)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidMovement(_)));

        // the failed movement must not have advanced the state
        assert_eq!(
            f.payments.get(payment.payment_id).unwrap().state,
            PaymentState::Initiated
        );

        let self_transfer = MovementDraft {
            movement_type: MovementType::Charge,
            amount_cents: 100,
            from_account: LedgerAccount::Customer,
            to_account: LedgerAccount::Customer,
            external_transaction_id: None,
        };
        let err = f
            .payments
            .transition(
                payment.payment_id,
                PaymentState::AwaitingPayment,
                Some(self_transfer),
                &actor,
            )
            .unwrap_err();
        assert!(matches!(err, Error::InvalidMovement(_)));
    }

    #[test]
    fn test_find_by_external_charge() {
        let f = fixture();
        let payment = f
            .payments
            .create(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), breakdown(50_000))
            .unwrap();
        f.payments
            .set_external_refs(
                payment.payment_id,
                Some("pi_42".to_string()),
                Some("ch_42".to_string()),
            )
            .unwrap();

        let found = f.payments.find_by_external_charge("ch_42").unwrap().unwrap();
        assert_eq!(found.payment_id, payment.payment_id);
        assert_eq!(found.external_payment_id.as_deref(), Some("pi_42"));
    }

    #[test]
    fn test_reconcile_balanced_flow() {
        let f = fixture();
        let payment = f
            .payments
            .create(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), breakdown(100_000))
            .unwrap();
        capture(&f.payments, payment.payment_id);

        let escrow = EscrowRecord {
            escrow_id: Uuid::now_v7(),
            booking_id: payment.booking_id,
            payment_id: payment.payment_id,
            agent_id: payment.agent_id,
            amount_cents: 100_000,
            platform_commission_cents: 10_000,
            agent_payout_cents: 90_000,
            status: EscrowStatus::Holding,
            hold_started_at: Some(f.clock.now()),
            release_eligible_at: None,
            released_at: None,
            cancelled_at: None,
            version: 1,
        };
        let actor = ActorMetadata::webhook("stripe");
        f.payments
            .commit_escrow(
                EscrowStatus::NotStarted,
                &escrow,
                vec![MovementDraft {
                    movement_type: MovementType::EscrowHold,
                    amount_cents: 100_000,
                    from_account: LedgerAccount::Customer,
                    to_account: LedgerAccount::PlatformEscrow,
                    external_transaction_id: Some("ch_1".to_string()),
                }],
                &actor,
                None,
            )
            .unwrap();

        let mut released = escrow.clone();
        released.status = EscrowStatus::Released;
        released.version += 1;
        f.payments
            .commit_escrow(
                EscrowStatus::Holding,
                &released,
                vec![
                    MovementDraft {
                        movement_type: MovementType::Commission,
                        amount_cents: 10_000,
                        from_account: LedgerAccount::PlatformEscrow,
                        to_account: LedgerAccount::PlatformRevenue,
                        external_transaction_id: None,
                    },
                    MovementDraft {
                        movement_type: MovementType::Payout,
                        amount_cents: 90_000,
                        from_account: LedgerAccount::PlatformEscrow,
                        to_account: LedgerAccount::Agent,
                        external_transaction_id: None,
                    },
                ],
                &ActorMetadata::scheduler(),
                None,
            )
            .unwrap();

        let balances = f.payments.reconcile(payment.payment_id).unwrap();
        assert_eq!(balances[&LedgerAccount::Customer], -100_000);
        assert_eq!(balances[&LedgerAccount::PlatformEscrow], 0);
        assert_eq!(balances[&LedgerAccount::PlatformRevenue], 10_000);
        assert_eq!(balances[&LedgerAccount::Agent], 90_000);
    }

    #[test]
    fn test_reconcile_flags_negative_escrow() {
        let f = fixture();
        let payment = f
            .payments
            .create(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), breakdown(50_000))
            .unwrap();

        // payout with no prior hold, written behind the facade's back
        let rogue = MoneyMovementEntry {
            entry_id: Uuid::now_v7(),
            booking_id: payment.booking_id,
            payment_id: payment.payment_id,
            movement_type: MovementType::Payout,
            amount_cents: 50_000,
            from_account: LedgerAccount::PlatformEscrow,
            to_account: LedgerAccount::Agent,
            external_transaction_id: None,
            occurred_at: f.clock.now(),
            recorded_by: ActorMetadata::scheduler(),
        };
        f.payments
            .storage()
            .commit_transition(&payment, Some(&rogue))
            .unwrap();

        let err = f.payments.reconcile(payment.payment_id).unwrap_err();
        assert!(matches!(err, Error::LedgerImbalance { .. }));
        assert_eq!(f.payments.metrics().ledger_imbalance_total.get(), 1);
    }

    #[tokio::test]
    async fn test_booking_lock_serializes() {
        let f = fixture();
        let booking_id = Uuid::new_v4();

        let lock = f.payments.booking_lock(booking_id);
        let guard = lock.lock().await;

        let second = f.payments.booking_lock(booking_id);
        assert!(second.try_lock().is_err());

        drop(guard);
        assert!(second.try_lock().is_ok());
    }
}
