//! Storage layer using RocksDB
//!
//! # Column Families
//!
//! - `payments` - Payment records (key: payment_id)
//! - `escrows` - Escrow records (key: escrow_id)
//! - `movements` - Append-only money-movement log (key: entry_id)
//! - `idempotency` - Processed external events (key: idempotency key)
//! - `indices` - Secondary indices for fast lookups

use crate::{
    error::{Error, Result},
    types::{EscrowRecord, IdempotencyRecord, MoneyMovementEntry, PaymentRecord},
    Config,
};
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, DBCompactionStyle, IteratorMode, Options, WriteBatch, DB,
};
use std::sync::Arc;
use uuid::Uuid;

/// Column family names
const CF_PAYMENTS: &str = "payments";
const CF_ESCROWS: &str = "escrows";
const CF_MOVEMENTS: &str = "movements";
const CF_IDEMPOTENCY: &str = "idempotency";
const CF_INDICES: &str = "indices";

/// Index key prefixes
const IDX_CHARGE: &[u8] = b"chg|";
const IDX_ESCROW_BOOKING: &[u8] = b"bkg|";
const IDX_ESCROW_PAYMENT: &[u8] = b"pay|";

/// Storage wrapper for RocksDB
pub struct Storage {
    db: Arc<DB>,
}

impl Storage {
    /// Open or create database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;

        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_target_file_size_base(config.rocksdb.target_file_size_mb * 1024 * 1024);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);

        // Universal compaction for the append-heavy movement log
        db_opts.set_compaction_style(DBCompactionStyle::Universal);

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_PAYMENTS, Self::cf_options_state()),
            ColumnFamilyDescriptor::new(CF_ESCROWS, Self::cf_options_state()),
            ColumnFamilyDescriptor::new(CF_MOVEMENTS, Self::cf_options_log()),
            ColumnFamilyDescriptor::new(CF_IDEMPOTENCY, Self::cf_options_state()),
            ColumnFamilyDescriptor::new(CF_INDICES, Self::cf_options_indices()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        tracing::info!("Opened RocksDB at {:?}", path);

        Ok(Self { db: Arc::new(db) })
    }

    // Column family options

    fn cf_options_log() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
        opts.set_bottommost_compression_type(rocksdb::DBCompressionType::Zstd);
        opts
    }

    fn cf_options_state() -> Options {
        let mut opts = Options::default();
        // Frequently read, use LZ4 for speed
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    fn cf_options_indices() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false);
        opts.set_block_based_table_factory(&block_opts);
        opts
    }

    fn cf_handle(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {name} not found")))
    }

    // Payment operations

    /// Put payment record (plus external-charge index when present)
    pub fn put_payment(&self, payment: &PaymentRecord) -> Result<()> {
        let mut batch = WriteBatch::default();
        self.batch_payment(&mut batch, payment)?;
        self.db.write(batch)?;
        Ok(())
    }

    /// Get payment by ID
    pub fn get_payment(&self, payment_id: Uuid) -> Result<PaymentRecord> {
        let cf = self.cf_handle(CF_PAYMENTS)?;
        let value = self
            .db
            .get_cf(cf, payment_id.as_bytes())?
            .ok_or(Error::PaymentNotFound(payment_id))?;
        Ok(bincode::deserialize(&value)?)
    }

    /// Look up a payment by gateway charge id
    pub fn find_payment_by_charge(&self, charge_id: &str) -> Result<Option<PaymentRecord>> {
        let cf = self.cf_handle(CF_INDICES)?;
        let key = Self::index_key_charge(charge_id);

        match self.db.get_cf(cf, &key)? {
            Some(value) => {
                let payment_id = Self::uuid_from_value(&value)?;
                Ok(Some(self.get_payment(payment_id)?))
            }
            None => Ok(None),
        }
    }

    /// Commit a state transition plus its optional ledger entry atomically
    pub fn commit_transition(
        &self,
        payment: &PaymentRecord,
        movement: Option<&MoneyMovementEntry>,
    ) -> Result<()> {
        let mut batch = WriteBatch::default();
        self.batch_payment(&mut batch, payment)?;
        if let Some(entry) = movement {
            self.batch_movement(&mut batch, entry)?;
        }
        self.db.write(batch)?;

        tracing::debug!(
            payment_id = %payment.payment_id,
            state = %payment.state,
            "Transition committed"
        );

        Ok(())
    }

    // Escrow operations

    /// Commit an escrow record plus its ledger entries atomically
    pub fn commit_escrow(
        &self,
        escrow: &EscrowRecord,
        movements: &[MoneyMovementEntry],
    ) -> Result<()> {
        let mut batch = WriteBatch::default();

        let cf_escrows = self.cf_handle(CF_ESCROWS)?;
        batch.put_cf(
            cf_escrows,
            escrow.escrow_id.as_bytes(),
            bincode::serialize(escrow)?,
        );

        let cf_indices = self.cf_handle(CF_INDICES)?;
        batch.put_cf(
            cf_indices,
            Self::index_key_escrow_booking(escrow.booking_id),
            escrow.escrow_id.as_bytes(),
        );
        batch.put_cf(
            cf_indices,
            Self::index_key_escrow_payment(escrow.payment_id),
            escrow.escrow_id.as_bytes(),
        );

        for entry in movements {
            self.batch_movement(&mut batch, entry)?;
        }

        self.db.write(batch)?;

        tracing::debug!(
            escrow_id = %escrow.escrow_id,
            status = %escrow.status,
            movements = movements.len(),
            "Escrow committed"
        );

        Ok(())
    }

    /// Get escrow by ID
    pub fn get_escrow(&self, escrow_id: Uuid) -> Result<EscrowRecord> {
        let cf = self.cf_handle(CF_ESCROWS)?;
        let value = self
            .db
            .get_cf(cf, escrow_id.as_bytes())?
            .ok_or(Error::EscrowNotFound(escrow_id))?;
        Ok(bincode::deserialize(&value)?)
    }

    /// Look up the escrow held for a booking
    pub fn find_escrow_by_booking(&self, booking_id: Uuid) -> Result<Option<EscrowRecord>> {
        self.find_escrow_by_index(Self::index_key_escrow_booking(booking_id))
    }

    /// Look up the escrow backing a payment
    pub fn find_escrow_by_payment(&self, payment_id: Uuid) -> Result<Option<EscrowRecord>> {
        self.find_escrow_by_index(Self::index_key_escrow_payment(payment_id))
    }

    fn find_escrow_by_index(&self, key: Vec<u8>) -> Result<Option<EscrowRecord>> {
        let cf = self.cf_handle(CF_INDICES)?;
        match self.db.get_cf(cf, &key)? {
            Some(value) => {
                let escrow_id = Self::uuid_from_value(&value)?;
                Ok(Some(self.get_escrow(escrow_id)?))
            }
            None => Ok(None),
        }
    }

    /// All escrow records (scheduler scan)
    pub fn list_escrows(&self) -> Result<Vec<EscrowRecord>> {
        let cf = self.cf_handle(CF_ESCROWS)?;
        let mut escrows = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item?;
            escrows.push(bincode::deserialize(&value)?);
        }
        Ok(escrows)
    }

    // Movement operations

    /// Get movement by entry ID
    pub fn get_movement(&self, entry_id: Uuid) -> Result<MoneyMovementEntry> {
        let cf = self.cf_handle(CF_MOVEMENTS)?;
        let value = self
            .db
            .get_cf(cf, entry_id.as_bytes())?
            .ok_or_else(|| Error::Storage(format!("Movement not found: {entry_id}")))?;
        Ok(bincode::deserialize(&value)?)
    }

    /// Movements for a payment, in append order (entry ids are UUIDv7)
    pub fn movements_for_payment(&self, payment_id: Uuid) -> Result<Vec<MoneyMovementEntry>> {
        let cf_indices = self.cf_handle(CF_INDICES)?;
        let prefix = Self::index_key_payment_movement(payment_id, None);

        let mut entries = Vec::new();
        for item in self.db.prefix_iterator_cf(cf_indices, &prefix) {
            let (key, _) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            if key.len() >= prefix.len() + 16 {
                let entry_bytes: [u8; 16] = key[prefix.len()..prefix.len() + 16]
                    .try_into()
                    .map_err(|_| Error::Storage("Corrupt movement index key".to_string()))?;
                entries.push(self.get_movement(Uuid::from_bytes(entry_bytes))?);
            }
        }

        Ok(entries)
    }

    // Idempotency operations

    /// Persist an idempotency record
    pub fn put_idempotency(&self, record: &IdempotencyRecord) -> Result<()> {
        let cf = self.cf_handle(CF_IDEMPOTENCY)?;
        self.db
            .put_cf(cf, record.key.as_bytes(), bincode::serialize(record)?)?;
        Ok(())
    }

    /// Fetch an idempotency record
    pub fn get_idempotency(&self, key: &str) -> Result<Option<IdempotencyRecord>> {
        let cf = self.cf_handle(CF_IDEMPOTENCY)?;
        match self.db.get_cf(cf, key.as_bytes())? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    /// All idempotency records (startup load, purge scans)
    pub fn list_idempotency(&self) -> Result<Vec<IdempotencyRecord>> {
        let cf = self.cf_handle(CF_IDEMPOTENCY)?;
        let mut records = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item?;
            records.push(bincode::deserialize(&value)?);
        }
        Ok(records)
    }

    /// Delete an idempotency record (retention purge only)
    pub fn delete_idempotency(&self, key: &str) -> Result<()> {
        let cf = self.cf_handle(CF_IDEMPOTENCY)?;
        self.db.delete_cf(cf, key.as_bytes())?;
        Ok(())
    }

    // Batch helpers

    fn batch_payment(&self, batch: &mut WriteBatch, payment: &PaymentRecord) -> Result<()> {
        let cf_payments = self.cf_handle(CF_PAYMENTS)?;
        batch.put_cf(
            cf_payments,
            payment.payment_id.as_bytes(),
            bincode::serialize(payment)?,
        );

        if let Some(ref charge_id) = payment.external_charge_id {
            let cf_indices = self.cf_handle(CF_INDICES)?;
            batch.put_cf(
                cf_indices,
                Self::index_key_charge(charge_id),
                payment.payment_id.as_bytes(),
            );
        }

        Ok(())
    }

    fn batch_movement(&self, batch: &mut WriteBatch, entry: &MoneyMovementEntry) -> Result<()> {
        let cf_movements = self.cf_handle(CF_MOVEMENTS)?;
        batch.put_cf(
            cf_movements,
            entry.entry_id.as_bytes(),
            bincode::serialize(entry)?,
        );

        let cf_indices = self.cf_handle(CF_INDICES)?;
        let idx = Self::index_key_payment_movement(entry.payment_id, Some(entry.entry_id));
        batch.put_cf(cf_indices, &idx, &[]);

        Ok(())
    }

    // Index key helpers

    fn index_key_payment_movement(payment_id: Uuid, entry_id: Option<Uuid>) -> Vec<u8> {
        let mut key = Vec::with_capacity(36);
        key.extend_from_slice(b"mov|");
        key.extend_from_slice(payment_id.as_bytes());
        if let Some(eid) = entry_id {
            key.extend_from_slice(eid.as_bytes());
        }
        key
    }

    fn index_key_charge(charge_id: &str) -> Vec<u8> {
        let mut key = IDX_CHARGE.to_vec();
        key.extend_from_slice(charge_id.as_bytes());
        key
    }

    fn index_key_escrow_booking(booking_id: Uuid) -> Vec<u8> {
        let mut key = IDX_ESCROW_BOOKING.to_vec();
        key.extend_from_slice(booking_id.as_bytes());
        key
    }

    fn index_key_escrow_payment(payment_id: Uuid) -> Vec<u8> {
        let mut key = IDX_ESCROW_PAYMENT.to_vec();
        key.extend_from_slice(payment_id.as_bytes());
        key
    }

    fn uuid_from_value(value: &[u8]) -> Result<Uuid> {
        let bytes: [u8; 16] = value
            .try_into()
            .map_err(|_| Error::Storage("Corrupt index value".to_string()))?;
        Ok(Uuid::from_bytes(bytes))
    }

    // Statistics

    /// Approximate row counts for the health endpoint
    pub fn stats(&self) -> Result<StorageStats> {
        Ok(StorageStats {
            total_payments: self.approximate_count(CF_PAYMENTS)?,
            total_movements: self.approximate_count(CF_MOVEMENTS)?,
            total_escrows: self.approximate_count(CF_ESCROWS)?,
        })
    }

    fn approximate_count(&self, cf_name: &str) -> Result<u64> {
        let cf = self.cf_handle(cf_name)?;
        let prop = self
            .db
            .property_int_value_cf(cf, "rocksdb.estimate-num-keys")?
            .unwrap_or(0);
        Ok(prop)
    }
}

/// Storage statistics
#[derive(Debug, Clone)]
pub struct StorageStats {
    /// Approximate payment count
    pub total_payments: u64,
    /// Approximate movement count
    pub total_movements: u64,
    /// Approximate escrow count
    pub total_escrows: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::PaymentState;
    use crate::types::{
        ActorMetadata, Currency, EscrowStatus, LedgerAccount, MoneyBreakdown, MovementType,
    };
    use chrono::Utc;
    use tempfile::TempDir;

    fn test_storage() -> (Storage, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        (Storage::open(&config).unwrap(), temp_dir)
    }

    fn test_payment() -> PaymentRecord {
        let now = Utc::now();
        PaymentRecord {
            payment_id: Uuid::now_v7(),
            booking_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            agent_id: Uuid::new_v4(),
            breakdown: MoneyBreakdown {
                gross_cents: 100_000,
                gateway_fee_cents: 2_900,
                platform_commission_cents: 10_000,
                currency: Currency::USD,
            },
            external_payment_id: Some("pi_123".to_string()),
            external_charge_id: Some("ch_123".to_string()),
            state: PaymentState::Initiated,
            created_at: now,
            authorized_at: None,
            captured_at: None,
            last_transition_at: now,
            version: 1,
        }
    }

    fn test_movement(payment: &PaymentRecord) -> MoneyMovementEntry {
        MoneyMovementEntry {
            entry_id: Uuid::now_v7(),
            booking_id: payment.booking_id,
            payment_id: payment.payment_id,
            movement_type: MovementType::EscrowHold,
            amount_cents: 100_000,
            from_account: LedgerAccount::Customer,
            to_account: LedgerAccount::PlatformEscrow,
            external_transaction_id: Some("ch_123".to_string()),
            occurred_at: Utc::now(),
            recorded_by: ActorMetadata::webhook("stripe"),
        }
    }

    #[test]
    fn test_put_and_get_payment() {
        let (storage, _temp) = test_storage();
        let payment = test_payment();

        storage.put_payment(&payment).unwrap();

        let retrieved = storage.get_payment(payment.payment_id).unwrap();
        assert_eq!(retrieved.payment_id, payment.payment_id);
        assert_eq!(retrieved.breakdown.gross_cents, 100_000);
    }

    #[test]
    fn test_find_payment_by_charge() {
        let (storage, _temp) = test_storage();
        let payment = test_payment();
        storage.put_payment(&payment).unwrap();

        let found = storage.find_payment_by_charge("ch_123").unwrap();
        assert!(found.is_some());
        assert_eq!(found.unwrap().payment_id, payment.payment_id);

        assert!(storage.find_payment_by_charge("ch_missing").unwrap().is_none());
    }

    #[test]
    fn test_commit_transition_with_movement() {
        let (storage, _temp) = test_storage();
        let mut payment = test_payment();
        storage.put_payment(&payment).unwrap();

        payment.state = PaymentState::AwaitingPayment;
        payment.version += 1;
        let movement = test_movement(&payment);

        storage.commit_transition(&payment, Some(&movement)).unwrap();

        let retrieved = storage.get_payment(payment.payment_id).unwrap();
        assert_eq!(retrieved.state, PaymentState::AwaitingPayment);
        assert_eq!(retrieved.version, 2);

        let movements = storage.movements_for_payment(payment.payment_id).unwrap();
        assert_eq!(movements.len(), 1);
        assert_eq!(movements[0].amount_cents, 100_000);
    }

    #[test]
    fn test_movements_are_scoped_to_payment() {
        let (storage, _temp) = test_storage();

        let payment_a = test_payment();
        let payment_b = test_payment();
        storage.put_payment(&payment_a).unwrap();
        storage.put_payment(&payment_b).unwrap();

        storage
            .commit_transition(&payment_a, Some(&test_movement(&payment_a)))
            .unwrap();
        storage
            .commit_transition(&payment_a, Some(&test_movement(&payment_a)))
            .unwrap();
        storage
            .commit_transition(&payment_b, Some(&test_movement(&payment_b)))
            .unwrap();

        assert_eq!(storage.movements_for_payment(payment_a.payment_id).unwrap().len(), 2);
        assert_eq!(storage.movements_for_payment(payment_b.payment_id).unwrap().len(), 1);
    }

    #[test]
    fn test_escrow_roundtrip_with_indices() {
        let (storage, _temp) = test_storage();
        let payment = test_payment();

        let escrow = EscrowRecord {
            escrow_id: Uuid::now_v7(),
            booking_id: payment.booking_id,
            payment_id: payment.payment_id,
            agent_id: payment.agent_id,
            amount_cents: 100_000,
            platform_commission_cents: 10_000,
            agent_payout_cents: 90_000,
            status: EscrowStatus::Holding,
            hold_started_at: Some(Utc::now()),
            release_eligible_at: None,
            released_at: None,
            cancelled_at: None,
            version: 1,
        };

        storage.commit_escrow(&escrow, &[test_movement(&payment)]).unwrap();

        let by_booking = storage.find_escrow_by_booking(payment.booking_id).unwrap();
        assert_eq!(by_booking.unwrap().escrow_id, escrow.escrow_id);

        let by_payment = storage.find_escrow_by_payment(payment.payment_id).unwrap();
        assert_eq!(by_payment.unwrap().escrow_id, escrow.escrow_id);

        assert_eq!(storage.list_escrows().unwrap().len(), 1);
        assert_eq!(storage.movements_for_payment(payment.payment_id).unwrap().len(), 1);
    }

    #[test]
    fn test_idempotency_roundtrip() {
        let (storage, _temp) = test_storage();

        let record = IdempotencyRecord {
            key: "stripe_webhook_evt_1".to_string(),
            claimed_at: Utc::now(),
            processed_at: None,
        };
        storage.put_idempotency(&record).unwrap();

        let loaded = storage.get_idempotency("stripe_webhook_evt_1").unwrap();
        assert!(loaded.is_some());
        assert!(loaded.unwrap().processed_at.is_none());

        assert_eq!(storage.list_idempotency().unwrap().len(), 1);

        storage.delete_idempotency("stripe_webhook_evt_1").unwrap();
        assert!(storage.get_idempotency("stripe_webhook_evt_1").unwrap().is_none());
    }
}
