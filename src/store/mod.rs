//! Durable store for idempotency markers and dead-letter records.
//!
//! The pipeline treats persistence as a narrow collaborator: a place to check
//! and record terminal outcomes per event identifier. The [`EventStore`]
//! trait defines that surface, with a PostgreSQL implementation behind the
//! `postgres` feature and an in-memory implementation used by tests and for
//! running the server without a database.

use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[cfg(feature = "postgres")]
pub mod postgres;

pub mod memory;

/// Durable marker recording that an event identifier reached a terminal
/// processed state.
///
/// At most one marker exists per event identifier; its presence is the sole
/// durable source of truth for idempotency across process restarts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedMarker {
    pub event_id: String,
    pub event_type: String,
    pub processed_at: DateTime<Utc>,
}

impl ProcessedMarker {
    pub fn new(event_id: impl Into<String>, event_type: impl Into<String>) -> Self {
        Self {
            event_id: event_id.into(),
            event_type: event_type.into(),
            processed_at: Utc::now(),
        }
    }
}

/// Durable record of a permanently-failed event, set aside for operator
/// review. Never mutated after the write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub event_id: String,
    pub event_type: String,
    /// Serialized raw payload as delivered by the provider
    pub payload: serde_json::Value,
    /// Structured failure summary
    pub reason: String,
    /// Number of retry attempts made before giving up
    pub attempts: u32,
    /// When the provider created the event
    pub event_created_at: DateTime<Utc>,
    /// When the event was dead-lettered
    pub failed_at: DateTime<Utc>,
}

/// Persistence operations required by the webhook pipeline.
///
/// Implementations must be safe to share across concurrent request tasks.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Create backing tables if they do not exist.
    async fn create_tables(&self) -> Result<()>;

    /// Whether any terminal record (processed marker or dead letter) exists
    /// for this event identifier.
    async fn is_processed(&self, event_id: &str) -> Result<bool>;

    /// Record a processed marker. Idempotent: recording the same event
    /// identifier twice leaves a single marker.
    async fn record_processed(&self, marker: ProcessedMarker) -> Result<()>;

    /// Append a dead-letter record.
    async fn append_dead_letter(&self, entry: DeadLetterEntry) -> Result<()>;

    /// List dead-letter records, newest first.
    async fn get_dead_letters(
        &self,
        limit: Option<u32>,
        offset: Option<u32>,
    ) -> Result<Vec<DeadLetterEntry>>;

    /// Total number of dead-letter records.
    async fn count_dead_letters(&self) -> Result<u64>;

    /// Delete dead-letter records older than the given time. Returns the
    /// number of records removed.
    async fn purge_dead_letters(&self, older_than: DateTime<Utc>) -> Result<u64>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_processed_marker_construction() {
        let marker = ProcessedMarker::new("evt_1", "checkout.session.completed");
        assert_eq!(marker.event_id, "evt_1");
        assert_eq!(marker.event_type, "checkout.session.completed");
    }

    #[test]
    fn test_dead_letter_entry_serializes() {
        let entry = DeadLetterEntry {
            event_id: "evt_2".to_string(),
            event_type: "invoice.payment_failed".to_string(),
            payload: json!({"id": "evt_2"}),
            reason: "handler error: downstream unavailable".to_string(),
            attempts: 3,
            event_created_at: Utc::now(),
            failed_at: Utc::now(),
        };

        let serialized = serde_json::to_string(&entry).unwrap();
        assert!(serialized.contains("evt_2"));
        assert!(serialized.contains("\"attempts\":3"));
    }
}
