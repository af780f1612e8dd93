//! Retry scheduling with a fixed backoff schedule and dead-letter
//! escalation.
//!
//! When a processing attempt fails retryably, the retry manager re-invokes
//! the processor after a scheduled delay, up to a fixed attempt ceiling.
//! Attempts past the configured schedule reuse its last delay. Exhausting
//! the ceiling forwards the event to the dead letter sink and yields a final
//! non-retryable result.
//!
//! The backoff sleep suspends only the request's own task; other deliveries
//! keep flowing. Attempt counters are process-local and lost on restart.

use crate::{
    dead_letter::DeadLetterSink,
    event::{InboundEvent, ProcessingContext, ProcessingResult},
    processor::EventProcessor,
    stats::{MetricsCollector, PipelineEvent, PipelineEventType},
};
use serde_json::json;
use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::{sync::Mutex, time::sleep};
use tracing::{info, warn};

/// Backoff policy for retryable failures.
///
/// # Examples
///
/// ```rust
/// use hookwire::retry::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::default();
///
/// // Schedule: 1s before attempt 1, 5s before attempt 2, 10s before attempt 3.
/// assert_eq!(policy.calculate_delay(1), Duration::from_millis(1000));
/// assert_eq!(policy.calculate_delay(2), Duration::from_millis(5000));
/// assert_eq!(policy.calculate_delay(3), Duration::from_millis(10000));
///
/// // Attempts past the schedule reuse the last configured delay.
/// assert_eq!(policy.calculate_delay(7), Duration::from_millis(10000));
/// ```
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts (not counting the initial attempt)
    pub max_attempts: u32,
    /// Delay before each retry attempt, indexed by attempt number
    pub delays: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delays: vec![
                Duration::from_millis(1000),
                Duration::from_millis(5000),
                Duration::from_millis(10000),
            ],
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delays: Vec<Duration>) -> Self {
        Self {
            max_attempts,
            delays,
        }
    }

    /// Delay before the given retry attempt (1-based).
    ///
    /// Attempts beyond the configured schedule fall back to the last delay;
    /// an empty schedule means no delay.
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        if self.delays.is_empty() {
            return Duration::ZERO;
        }
        let index = (attempt.max(1) as usize - 1).min(self.delays.len() - 1);
        self.delays[index]
    }
}

/// Re-invokes the processor for retryable failures, escalating to the dead
/// letter sink when the ceiling is reached.
pub struct RetryManager {
    policy: RetryPolicy,
    processor: Arc<EventProcessor>,
    dead_letter: Arc<DeadLetterSink>,
    metrics: Arc<dyn MetricsCollector>,
    /// Attempts made so far per event identifier, with last-touched time for
    /// TTL eviction
    counters: Arc<Mutex<HashMap<String, (u32, Instant)>>>,
    counter_ttl: Duration,
}

impl RetryManager {
    pub fn new(
        policy: RetryPolicy,
        processor: Arc<EventProcessor>,
        dead_letter: Arc<DeadLetterSink>,
        metrics: Arc<dyn MetricsCollector>,
    ) -> Self {
        Self {
            policy,
            processor,
            dead_letter,
            metrics,
            counters: Arc::new(Mutex::new(HashMap::new())),
            counter_ttl: Duration::from_secs(3600),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Drive retries for an event whose initial attempt failed retryably.
    ///
    /// Returns the final result: the first successful attempt, the first
    /// non-retryable failure, or a terminal failure after the ceiling was
    /// reached and the event dead-lettered.
    pub async fn retry(
        &self,
        event: &InboundEvent,
        context: &ProcessingContext,
        initial_failure: ProcessingResult,
    ) -> ProcessingResult {
        let mut last_failure = initial_failure;

        loop {
            let attempt = self.next_attempt(&event.id).await;

            if attempt > self.policy.max_attempts {
                let reason = last_failure
                    .error
                    .clone()
                    .unwrap_or_else(|| "unknown processing failure".to_string());
                warn!(
                    event_id = %event.id,
                    attempts = self.policy.max_attempts,
                    "retries exhausted, dead-lettering event"
                );

                self.dead_letter
                    .send(event, &reason, self.policy.max_attempts)
                    .await;
                self.clear(&event.id).await;

                return ProcessingResult::failure(
                    format!(
                        "retries exhausted after {} attempts: {}",
                        self.policy.max_attempts, reason
                    ),
                    false,
                    last_failure.duration_ms,
                )
                .with_metadata(json!({"kind": "exhausted"}));
            }

            let delay = self.policy.calculate_delay(attempt);
            info!(
                event_id = %event.id,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "scheduling retry"
            );
            self.record(
                PipelineEvent::new(&event.id, &event.event_type, PipelineEventType::Retried)
                    .with_attempt(attempt)
                    .with_error(
                        last_failure
                            .error
                            .clone()
                            .unwrap_or_else(|| "unknown".to_string()),
                    ),
            )
            .await;

            sleep(delay).await;

            let retry_ctx = context.next_attempt(attempt);
            let result = self.processor.process(event, &retry_ctx).await;

            if result.success {
                self.clear(&event.id).await;
                return result;
            }
            if !result.retryable {
                self.clear(&event.id).await;
                return result;
            }

            last_failure = result;
        }
    }

    /// Increment and return the attempt counter for an event identifier.
    async fn next_attempt(&self, event_id: &str) -> u32 {
        let mut counters = self.counters.lock().await;
        let entry = counters
            .entry(event_id.to_string())
            .or_insert((0, Instant::now()));
        entry.0 += 1;
        entry.1 = Instant::now();
        entry.0
    }

    async fn clear(&self, event_id: &str) {
        self.counters.lock().await.remove(event_id);
    }

    /// Current attempt count for an event identifier, if any.
    pub async fn attempts(&self, event_id: &str) -> Option<u32> {
        self.counters.lock().await.get(event_id).map(|(n, _)| *n)
    }

    /// Evict counters untouched for longer than the TTL. Returns the number
    /// evicted.
    pub async fn sweep_counters(&self) -> usize {
        let mut counters = self.counters.lock().await;
        let original = counters.len();
        let ttl = self.counter_ttl;
        counters.retain(|_, (_, touched)| touched.elapsed() < ttl);
        original - counters.len()
    }

    async fn record(&self, event: PipelineEvent) {
        if let Err(e) = self.metrics.record_event(event).await {
            warn!("Failed to record metrics event: {}", e);
        }
    }
}
