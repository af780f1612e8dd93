//! In-memory implementation of the event store.
//!
//! Implements [`EventStore`] entirely in memory, making it suitable for unit
//! tests, integration tests, and running the server without a database. All
//! records are lost when the process exits, so the durable-idempotency
//! guarantee does not survive restarts with this backend.

use super::{DeadLetterEntry, EventStore, ProcessedMarker};
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::{collections::HashMap, sync::Arc};
use tokio::sync::RwLock;

/// Event store backed by process-local maps.
#[derive(Debug, Default)]
pub struct MemoryEventStore {
    processed: Arc<RwLock<HashMap<String, ProcessedMarker>>>,
    dead_letters: Arc<RwLock<Vec<DeadLetterEntry>>>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of processed markers currently recorded.
    pub async fn processed_count(&self) -> usize {
        self.processed.read().await.len()
    }
}

impl Clone for MemoryEventStore {
    fn clone(&self) -> Self {
        Self {
            processed: Arc::clone(&self.processed),
            dead_letters: Arc::clone(&self.dead_letters),
        }
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn create_tables(&self) -> Result<()> {
        Ok(())
    }

    async fn is_processed(&self, event_id: &str) -> Result<bool> {
        if self.processed.read().await.contains_key(event_id) {
            return Ok(true);
        }
        let dead_letters = self.dead_letters.read().await;
        Ok(dead_letters.iter().any(|e| e.event_id == event_id))
    }

    async fn record_processed(&self, marker: ProcessedMarker) -> Result<()> {
        let mut processed = self.processed.write().await;
        processed.entry(marker.event_id.clone()).or_insert(marker);
        Ok(())
    }

    async fn append_dead_letter(&self, entry: DeadLetterEntry) -> Result<()> {
        self.dead_letters.write().await.push(entry);
        Ok(())
    }

    async fn get_dead_letters(
        &self,
        limit: Option<u32>,
        offset: Option<u32>,
    ) -> Result<Vec<DeadLetterEntry>> {
        let dead_letters = self.dead_letters.read().await;
        let mut entries: Vec<DeadLetterEntry> = dead_letters.clone();
        entries.sort_by(|a, b| b.failed_at.cmp(&a.failed_at));

        let offset = offset.unwrap_or(0) as usize;
        let limit = limit.unwrap_or(100) as usize;
        Ok(entries.into_iter().skip(offset).take(limit).collect())
    }

    async fn count_dead_letters(&self) -> Result<u64> {
        Ok(self.dead_letters.read().await.len() as u64)
    }

    async fn purge_dead_letters(&self, older_than: DateTime<Utc>) -> Result<u64> {
        let mut dead_letters = self.dead_letters.write().await;
        let original = dead_letters.len();
        dead_letters.retain(|e| e.failed_at >= older_than);
        Ok((original - dead_letters.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(event_id: &str) -> DeadLetterEntry {
        DeadLetterEntry {
            event_id: event_id.to_string(),
            event_type: "charge.failed".to_string(),
            payload: json!({"id": event_id}),
            reason: "always fails".to_string(),
            attempts: 3,
            event_created_at: Utc::now(),
            failed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_processed_marker_roundtrip() {
        let store = MemoryEventStore::new();
        assert!(!store.is_processed("evt_1").await.unwrap());

        store
            .record_processed(ProcessedMarker::new("evt_1", "charge.succeeded"))
            .await
            .unwrap();
        assert!(store.is_processed("evt_1").await.unwrap());
        assert!(!store.is_processed("evt_2").await.unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_markers_collapse() {
        let store = MemoryEventStore::new();
        store
            .record_processed(ProcessedMarker::new("evt_1", "charge.succeeded"))
            .await
            .unwrap();
        store
            .record_processed(ProcessedMarker::new("evt_1", "charge.succeeded"))
            .await
            .unwrap();
        assert_eq!(store.processed_count().await, 1);
    }

    #[tokio::test]
    async fn test_dead_letter_counts_as_terminal() {
        let store = MemoryEventStore::new();
        store.append_dead_letter(entry("evt_9")).await.unwrap();

        assert!(store.is_processed("evt_9").await.unwrap());
        assert_eq!(store.count_dead_letters().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_dead_letter_pagination() {
        let store = MemoryEventStore::new();
        for i in 0..5 {
            store
                .append_dead_letter(entry(&format!("evt_{}", i)))
                .await
                .unwrap();
        }

        let page = store.get_dead_letters(Some(2), Some(1)).await.unwrap();
        assert_eq!(page.len(), 2);

        let all = store.get_dead_letters(None, None).await.unwrap();
        assert_eq!(all.len(), 5);
    }

    #[tokio::test]
    async fn test_purge_old_dead_letters() {
        let store = MemoryEventStore::new();
        let mut old = entry("evt_old");
        old.failed_at = Utc::now() - chrono::Duration::days(30);
        store.append_dead_letter(old).await.unwrap();
        store.append_dead_letter(entry("evt_new")).await.unwrap();

        let purged = store
            .purge_dead_letters(Utc::now() - chrono::Duration::days(7))
            .await
            .unwrap();
        assert_eq!(purged, 1);
        assert_eq!(store.count_dead_letters().await.unwrap(), 1);
    }
}
