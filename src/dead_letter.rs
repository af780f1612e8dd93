//! Dead-letter capture for permanently-failed events.
//!
//! Events that exhaust their retries or fail fatally are recorded durably
//! for operator review and eventual replay tooling. A failed dead-letter
//! write is itself logged and swallowed: losing the record is preferred over
//! failing the request path or cascading the failure.

use crate::{
    event::InboundEvent,
    stats::{MetricsCollector, PipelineEvent, PipelineEventType},
    store::{DeadLetterEntry, EventStore},
};
use chrono::Utc;
use std::sync::Arc;
use tracing::{error, warn};

/// Log target for dead-letter records, distinct from ordinary processing
/// logs so operators can filter on it.
pub const DEAD_LETTER_LOG_TARGET: &str = "hookwire::dead_letter";

/// Writes durable records for events that could not be processed.
pub struct DeadLetterSink {
    store: Arc<dyn EventStore>,
    metrics: Arc<dyn MetricsCollector>,
}

impl DeadLetterSink {
    pub fn new(store: Arc<dyn EventStore>, metrics: Arc<dyn MetricsCollector>) -> Self {
        Self { store, metrics }
    }

    /// Record a permanently-failed event.
    ///
    /// Best-effort: a store failure is logged under
    /// [`DEAD_LETTER_LOG_TARGET`] and not propagated.
    pub async fn send(&self, event: &InboundEvent, reason: &str, attempts: u32) {
        let entry = DeadLetterEntry {
            event_id: event.id.clone(),
            event_type: event.event_type.clone(),
            payload: serde_json::to_value(event).unwrap_or_default(),
            reason: reason.to_string(),
            attempts,
            event_created_at: event.created_at(),
            failed_at: Utc::now(),
        };

        error!(
            target: DEAD_LETTER_LOG_TARGET,
            event_id = %event.id,
            event_type = %event.event_type,
            attempts,
            reason,
            "event dead-lettered"
        );

        if let Err(e) = self.store.append_dead_letter(entry).await {
            error!(
                target: DEAD_LETTER_LOG_TARGET,
                event_id = %event.id,
                "failed to persist dead-letter record: {}",
                e
            );
        }

        let record = PipelineEvent::new(&event.id, &event.event_type, PipelineEventType::DeadLettered)
            .with_error(reason)
            .with_attempt(attempts);
        if let Err(e) = self.metrics.record_event(record).await {
            warn!("Failed to record metrics event: {}", e);
        }
    }
}
