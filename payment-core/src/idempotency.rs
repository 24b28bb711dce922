//! Exactly-once webhook ingestion
//!
//! Every external event claims an idempotency key before any handler
//! runs. The claim is atomic: exactly one of two concurrent deliveries
//! of the same event wins, the other sees [`Claim::Duplicate`]. Claims
//! are written through to storage so redeliveries after a restart are
//! still deduplicated.

use crate::error::Result;
use crate::storage::Storage;
use crate::types::IdempotencyRecord;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::Arc;

/// Keys are retained at least this long after processing
pub const MIN_RETENTION_DAYS: i64 = 90;

/// Outcome of a claim attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Claim {
    /// First time this key was seen; the caller owns processing
    Fresh,
    /// Key already claimed, skip processing
    Duplicate,
}

/// Idempotency key registry backed by storage
pub struct IdempotencyStore {
    storage: Arc<Storage>,
    keys: DashMap<String, IdempotencyRecord>,
}

impl IdempotencyStore {
    /// Load all persisted keys into the in-memory map
    pub fn open(storage: Arc<Storage>) -> Result<Self> {
        let keys = DashMap::new();
        for record in storage.list_idempotency()? {
            keys.insert(record.key.clone(), record);
        }

        tracing::info!(keys = keys.len(), "Idempotency store loaded");

        Ok(Self { storage, keys })
    }

    /// Canonical key for a gateway webhook event
    pub fn webhook_key(provider: &str, external_event_id: &str) -> String {
        format!("{provider}_webhook_{external_event_id}")
    }

    /// Atomically claim a key. Exactly one caller per key gets
    /// [`Claim::Fresh`]; everyone else gets [`Claim::Duplicate`].
    pub fn claim(&self, key: &str, now: DateTime<Utc>) -> Result<Claim> {
        match self.keys.entry(key.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Ok(Claim::Duplicate),
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                let record = IdempotencyRecord {
                    key: key.to_string(),
                    claimed_at: now,
                    processed_at: None,
                };
                // Persist while holding the shard lock so a concurrent
                // claim cannot slip in between map insert and write.
                self.storage.put_idempotency(&record)?;
                vacant.insert(record);
                Ok(Claim::Fresh)
            }
        }
    }

    /// Mark a claimed key as fully processed
    pub fn mark_processed(&self, key: &str, now: DateTime<Utc>) -> Result<()> {
        if let Some(mut entry) = self.keys.get_mut(key) {
            entry.processed_at = Some(now);
            self.storage.put_idempotency(&entry)?;
        }
        Ok(())
    }

    /// Whether a key has been claimed
    pub fn is_claimed(&self, key: &str) -> bool {
        self.keys.contains_key(key)
    }

    /// Number of tracked keys
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Remove keys processed longer than the retention window ago.
    /// Unprocessed claims are never purged.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let cutoff = now - Duration::days(MIN_RETENTION_DAYS);

        let expired: Vec<String> = self
            .keys
            .iter()
            .filter(|entry| matches!(entry.processed_at, Some(at) if at < cutoff))
            .map(|entry| entry.key.clone())
            .collect();

        for key in &expired {
            self.storage.delete_idempotency(key)?;
            self.keys.remove(key);
        }

        if !expired.is_empty() {
            tracing::info!(purged = expired.len(), "Purged expired idempotency keys");
        }

        Ok(expired.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Config;
    use tempfile::TempDir;

    fn test_store() -> (IdempotencyStore, Arc<Storage>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        let storage = Arc::new(Storage::open(&config).unwrap());
        let store = IdempotencyStore::open(storage.clone()).unwrap();
        (store, storage, temp_dir)
    }

    #[test]
    fn test_first_claim_wins() {
        let (store, _storage, _temp) = test_store();
        let key = IdempotencyStore::webhook_key("stripe", "evt_1");
        assert_eq!(key, "stripe_webhook_evt_1");

        assert_eq!(store.claim(&key, Utc::now()).unwrap(), Claim::Fresh);
        assert_eq!(store.claim(&key, Utc::now()).unwrap(), Claim::Duplicate);
        assert_eq!(store.claim(&key, Utc::now()).unwrap(), Claim::Duplicate);
    }

    #[test]
    fn test_claims_survive_restart() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();

        {
            let storage = Arc::new(Storage::open(&config).unwrap());
            let store = IdempotencyStore::open(storage).unwrap();
            assert_eq!(store.claim("stripe_webhook_evt_9", Utc::now()).unwrap(), Claim::Fresh);
        }

        let storage = Arc::new(Storage::open(&config).unwrap());
        let store = IdempotencyStore::open(storage).unwrap();
        assert_eq!(
            store.claim("stripe_webhook_evt_9", Utc::now()).unwrap(),
            Claim::Duplicate
        );
    }

    #[test]
    fn test_concurrent_claims_single_winner() {
        let (store, _storage, _temp) = test_store();
        let store = Arc::new(store);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || store.claim("stripe_webhook_evt_race", Utc::now()).unwrap())
            })
            .collect();

        let fresh = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|claim| *claim == Claim::Fresh)
            .count();

        assert_eq!(fresh, 1);
    }

    #[test]
    fn test_purge_respects_retention() {
        let (store, _storage, _temp) = test_store();
        let now = Utc::now();

        store.claim("old_processed", now - Duration::days(200)).unwrap();
        store
            .mark_processed("old_processed", now - Duration::days(180))
            .unwrap();

        store.claim("recent_processed", now - Duration::days(5)).unwrap();
        store.mark_processed("recent_processed", now - Duration::days(4)).unwrap();

        store.claim("unprocessed", now - Duration::days(200)).unwrap();

        let purged = store.purge_expired(now).unwrap();
        assert_eq!(purged, 1);
        assert!(!store.is_claimed("old_processed"));
        assert!(store.is_claimed("recent_processed"));
        // claims without processed_at are kept regardless of age
        assert!(store.is_claimed("unprocessed"));
    }
}
