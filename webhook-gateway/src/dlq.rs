//! Dead-letter path for events no handler could process
//!
//! The gateway still gets a 200 for these; the payload and failure
//! metadata are parked here for manual investigation.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One dead-lettered webhook event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetter {
    /// Dead letter id
    pub id: Uuid,

    /// Gateway provider
    pub provider: String,

    /// Gateway event id, when parseable
    pub event_id: Option<String>,

    /// Why processing failed
    pub reason: String,

    /// Raw event payload
    pub payload: serde_json::Value,

    /// When it was parked
    pub received_at: DateTime<Utc>,
}

/// In-process dead-letter store with a listing for operators
#[derive(Debug, Default)]
pub struct DeadLetters {
    entries: Mutex<Vec<DeadLetter>>,
}

impl DeadLetters {
    /// New empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Park a failed event
    pub fn push(
        &self,
        provider: &str,
        event_id: Option<String>,
        reason: String,
        payload: serde_json::Value,
    ) -> Uuid {
        let letter = DeadLetter {
            id: Uuid::now_v7(),
            provider: provider.to_string(),
            event_id,
            reason,
            payload,
            received_at: Utc::now(),
        };

        tracing::error!(
            dead_letter_id = %letter.id,
            provider,
            event_id = letter.event_id.as_deref().unwrap_or("?"),
            reason = %letter.reason,
            "Webhook event dead-lettered"
        );

        let id = letter.id;
        self.entries.lock().push(letter);
        id
    }

    /// All parked events, oldest first
    pub fn list(&self) -> Vec<DeadLetter> {
        self.entries.lock().clone()
    }

    /// Number of parked events
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether nothing is parked
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_push_and_list() {
        let dlq = DeadLetters::new();
        assert!(dlq.is_empty());

        dlq.push(
            "stripe",
            Some("evt_1".to_string()),
            "handler failed".to_string(),
            json!({"id": "evt_1"}),
        );

        let letters = dlq.list();
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].provider, "stripe");
        assert_eq!(letters[0].event_id.as_deref(), Some("evt_1"));
    }
}
