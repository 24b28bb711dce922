//! Dispute gate collaborator
//!
//! Release eligibility asks an external dispute service whether a
//! booking has an open dispute. The manager wraps every query in a
//! timeout and fails closed: an unreachable gate blocks the release.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashSet;
use uuid::Uuid;

/// Answers "does this booking have an open dispute?"
#[async_trait]
pub trait DisputeGate: Send + Sync {
    /// Whether the booking has an open dispute
    async fn has_open_dispute(&self, booking_id: Uuid) -> anyhow::Result<bool>;

    /// Register a newly opened dispute
    async fn open(&self, booking_id: Uuid) -> anyhow::Result<()>;

    /// Resolve the booking's dispute
    async fn resolve(&self, booking_id: Uuid) -> anyhow::Result<()>;
}

/// Tracks open disputes in process
#[derive(Debug, Default)]
pub struct InMemoryDisputeGate {
    open: RwLock<HashSet<Uuid>>,
}

impl InMemoryDisputeGate {
    /// New gate with no open disputes
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DisputeGate for InMemoryDisputeGate {
    async fn has_open_dispute(&self, booking_id: Uuid) -> anyhow::Result<bool> {
        Ok(self.open.read().contains(&booking_id))
    }

    async fn open(&self, booking_id: Uuid) -> anyhow::Result<()> {
        self.open.write().insert(booking_id);
        Ok(())
    }

    async fn resolve(&self, booking_id: Uuid) -> anyhow::Result<()> {
        self.open.write().remove(&booking_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_and_resolve() {
        let gate = InMemoryDisputeGate::new();
        let booking_id = Uuid::new_v4();

        assert!(!gate.has_open_dispute(booking_id).await.unwrap());

        gate.open(booking_id).await.unwrap();
        assert!(gate.has_open_dispute(booking_id).await.unwrap());

        gate.resolve(booking_id).await.unwrap();
        assert!(!gate.has_open_dispute(booking_id).await.unwrap());
    }
}
