//! Event dispatch: handler registry, timeout race, and outcome
//! classification.
//!
//! The processor looks up a handler by event type and races it against a
//! fixed timeout. Outcomes map onto the error taxonomy: an unknown type is
//! fatal, a timeout is retryable, and anything else a handler raises is
//! retryable unless the error itself says otherwise. Every terminal path
//! records duration and outcome to the metrics collector before returning.

use crate::{
    HookwireError, Result,
    event::{InboundEvent, ProcessingContext, ProcessingResult},
    stats::{MetricsCollector, PipelineEvent, PipelineEventType},
};
use futures_util::future::BoxFuture;
use serde_json::json;
use std::{collections::HashMap, sync::Arc, time::Duration};
use tracing::{debug, warn};

/// Handler invoked for a specific event type.
///
/// Handlers perform the actual business mutation (order fulfillment, ledger
/// entry, ...) and are external collaborators from the pipeline's view.
pub type EventHandler = Arc<
    dyn Fn(InboundEvent) -> BoxFuture<'static, Result<()>> + Send + Sync,
>;

/// Open registry of event-type tags to handlers, populated at startup.
///
/// Unknown tags are a first-class outcome ([`HookwireError::EventNotSupported`]),
/// not a crash: a different deployed version may support them.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, EventHandler>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for an event type, replacing any existing one.
    pub fn register(&mut self, event_type: impl Into<String>, handler: EventHandler) {
        self.handlers.insert(event_type.into(), handler);
    }

    pub fn get(&self, event_type: &str) -> Option<EventHandler> {
        self.handlers.get(event_type).cloned()
    }

    pub fn supported_types(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Default ceiling for a single handler execution.
pub const DEFAULT_PROCESSING_TIMEOUT: Duration = Duration::from_secs(30);

/// Dispatches verified events to type-specific handlers under a timeout.
pub struct EventProcessor {
    registry: Arc<HandlerRegistry>,
    timeout: Duration,
    metrics: Arc<dyn MetricsCollector>,
}

impl EventProcessor {
    pub fn new(registry: Arc<HandlerRegistry>, metrics: Arc<dyn MetricsCollector>) -> Self {
        Self {
            registry,
            timeout: DEFAULT_PROCESSING_TIMEOUT,
            metrics,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Execute one processing attempt for the event.
    ///
    /// Never returns an error: every failure mode is folded into the
    /// [`ProcessingResult`] so callers decide on retry without unwinding.
    pub async fn process(
        &self,
        event: &InboundEvent,
        context: &ProcessingContext,
    ) -> ProcessingResult {
        let start = std::time::Instant::now();

        let Some(handler) = self.registry.get(&event.event_type) else {
            let error = HookwireError::EventNotSupported {
                event_type: event.event_type.clone(),
            };
            warn!(
                event_id = %event.id,
                event_type = %event.event_type,
                "no handler registered for event type"
            );
            let duration_ms = start.elapsed().as_millis() as u64;
            self.record(
                PipelineEvent::new(&event.id, &event.event_type, PipelineEventType::Failed)
                    .with_duration(duration_ms)
                    .with_error(error.to_string())
                    .with_attempt(context.attempt),
            )
            .await;
            return ProcessingResult::failure(error.to_string(), false, duration_ms)
                .with_metadata(json!({"kind": "unsupported"}));
        };

        debug!(
            event_id = %event.id,
            event_type = %event.event_type,
            attempt = context.attempt,
            trace_id = %context.trace_id,
            "dispatching event to handler"
        );

        let outcome = tokio::time::timeout(self.timeout, handler(event.clone())).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match outcome {
            Ok(Ok(())) => {
                self.record(
                    PipelineEvent::new(&event.id, &event.event_type, PipelineEventType::Processed)
                        .with_duration(duration_ms)
                        .with_attempt(context.attempt),
                )
                .await;
                ProcessingResult::success(duration_ms)
            }
            Ok(Err(err)) => {
                let retryable = err.is_retryable();
                warn!(
                    event_id = %event.id,
                    attempt = context.attempt,
                    retryable,
                    "handler failed: {}",
                    err
                );
                self.record(
                    PipelineEvent::new(&event.id, &event.event_type, PipelineEventType::Failed)
                        .with_duration(duration_ms)
                        .with_error(err.to_string())
                        .with_attempt(context.attempt),
                )
                .await;
                ProcessingResult::failure(err.to_string(), retryable, duration_ms)
            }
            Err(_elapsed) => {
                let error = HookwireError::ProcessingTimeout {
                    timeout_ms: self.timeout.as_millis() as u64,
                };
                warn!(
                    event_id = %event.id,
                    attempt = context.attempt,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "handler timed out"
                );
                self.record(
                    PipelineEvent::new(&event.id, &event.event_type, PipelineEventType::TimedOut)
                        .with_duration(duration_ms)
                        .with_error(error.to_string())
                        .with_attempt(context.attempt),
                )
                .await;
                ProcessingResult::failure(error.to_string(), true, duration_ms)
            }
        }
    }

    async fn record(&self, event: PipelineEvent) {
        if let Err(e) = self.metrics.record_event(event).await {
            warn!("Failed to record metrics event: {}", e);
        }
    }
}
