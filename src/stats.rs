//! In-memory pipeline metrics with time-windowed aggregation.
//!
//! Every terminal point of the pipeline records a [`PipelineEvent`]; the
//! collector aggregates them into counts, durations, and success rates over a
//! trailing window. State lives in process memory and resets each process
//! lifetime.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, sync::Arc, time::Duration};

/// Terminal outcomes recorded by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineEventType {
    /// Delivery accepted for processing
    Received,
    /// Handler completed successfully
    Processed,
    /// Attempt failed (retryable or not)
    Failed,
    /// Attempt scheduled for retry
    Retried,
    /// Handler lost the timeout race
    TimedOut,
    /// Event exhausted retries and was dead-lettered
    DeadLettered,
    /// Delivery short-circuited as already processed
    Duplicate,
    /// Delivery acknowledged but skipped by the rate limiter
    RateLimited,
    /// Delivery rejected before processing (signature, size, allowlist)
    Rejected,
}

/// One recorded pipeline occurrence.
#[derive(Debug, Clone)]
pub struct PipelineEvent {
    pub event_id: String,
    pub event_type: String,
    pub outcome: PipelineEventType,
    pub duration_ms: Option<u64>,
    pub error_message: Option<String>,
    pub attempt: u32,
    pub timestamp: DateTime<Utc>,
}

impl PipelineEvent {
    pub fn new(
        event_id: impl Into<String>,
        event_type: impl Into<String>,
        outcome: PipelineEventType,
    ) -> Self {
        Self {
            event_id: event_id.into(),
            event_type: event_type.into(),
            outcome,
            duration_ms: None,
            error_message: None,
            attempt: 0,
            timestamp: Utc::now(),
        }
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error_message = Some(error.into());
        self
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }
}

/// Aggregate statistics over a time window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineStatistics {
    pub total_received: u64,
    pub processed: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub dead_lettered: u64,
    pub duplicates: u64,
    pub rate_limited: u64,
    pub rejected: u64,
    pub avg_processing_time_ms: f64,
    pub min_processing_time_ms: u64,
    pub max_processing_time_ms: u64,
    /// processed / (processed + failed terminal outcomes)
    pub success_rate: f64,
    /// Processed counts broken down by event type
    pub processed_by_type: HashMap<String, u64>,
    pub time_window: Duration,
    pub calculated_at: DateTime<Utc>,
}

impl Default for PipelineStatistics {
    fn default() -> Self {
        Self {
            total_received: 0,
            processed: 0,
            failed: 0,
            timed_out: 0,
            dead_lettered: 0,
            duplicates: 0,
            rate_limited: 0,
            rejected: 0,
            avg_processing_time_ms: 0.0,
            min_processing_time_ms: 0,
            max_processing_time_ms: 0,
            success_rate: 0.0,
            processed_by_type: HashMap::new(),
            time_window: Duration::from_secs(3600),
            calculated_at: Utc::now(),
        }
    }
}

/// Trait for collecting and querying pipeline metrics.
#[async_trait::async_trait]
pub trait MetricsCollector: Send + Sync {
    /// Record a pipeline occurrence.
    async fn record_event(&self, event: PipelineEvent) -> crate::Result<()>;

    /// Aggregate statistics over a trailing window.
    async fn get_statistics(&self, window: Duration) -> crate::Result<PipelineStatistics>;

    /// Drop events older than the given age. Returns the number removed.
    async fn cleanup_old_events(&self, older_than: Duration) -> crate::Result<u64>;
}

/// Configuration for the in-memory collector.
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// Maximum number of events to keep in memory
    pub max_events: usize,
    /// Maximum age of events to keep (in seconds)
    pub max_event_age_secs: u64,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            max_events: 100_000,
            max_event_age_secs: 3600,
        }
    }
}

/// In-memory metrics collector with time-windowed data.
pub struct InMemoryMetricsCollector {
    events: Arc<std::sync::RwLock<Vec<PipelineEvent>>>,
    config: CollectorConfig,
}

impl InMemoryMetricsCollector {
    pub fn new(config: CollectorConfig) -> Self {
        Self {
            events: Arc::new(std::sync::RwLock::new(Vec::new())),
            config,
        }
    }

    pub fn new_default() -> Self {
        Self::new(CollectorConfig::default())
    }

    fn filter_events_by_window(&self, window: Duration) -> Vec<PipelineEvent> {
        let cutoff = Utc::now() - chrono::Duration::from_std(window).unwrap();
        let events = self.events.read().unwrap();
        events
            .iter()
            .filter(|event| event.timestamp >= cutoff)
            .cloned()
            .collect()
    }

    fn calculate_statistics(&self, events: &[PipelineEvent], window: Duration) -> PipelineStatistics {
        if events.is_empty() {
            return PipelineStatistics {
                time_window: window,
                calculated_at: Utc::now(),
                ..Default::default()
            };
        }

        let count_of = |outcome: PipelineEventType| {
            events.iter().filter(|e| e.outcome == outcome).count() as u64
        };

        let total_received = count_of(PipelineEventType::Received);
        let processed = count_of(PipelineEventType::Processed);
        let failed = count_of(PipelineEventType::Failed);
        let timed_out = count_of(PipelineEventType::TimedOut);
        let dead_lettered = count_of(PipelineEventType::DeadLettered);
        let duplicates = count_of(PipelineEventType::Duplicate);
        let rate_limited = count_of(PipelineEventType::RateLimited);
        let rejected = count_of(PipelineEventType::Rejected);

        let processing_times: Vec<u64> = events
            .iter()
            .filter(|e| e.outcome == PipelineEventType::Processed)
            .filter_map(|e| e.duration_ms)
            .collect();

        let (avg_processing_time_ms, min_processing_time_ms, max_processing_time_ms) =
            if processing_times.is_empty() {
                (0.0, 0, 0)
            } else {
                let sum: u64 = processing_times.iter().sum();
                let avg = sum as f64 / processing_times.len() as f64;
                let min = *processing_times.iter().min().unwrap();
                let max = *processing_times.iter().max().unwrap();
                (avg, min, max)
            };

        let terminal = processed + dead_lettered;
        let success_rate = if terminal > 0 {
            processed as f64 / terminal as f64
        } else {
            0.0
        };

        let mut processed_by_type: HashMap<String, u64> = HashMap::new();
        for event in events
            .iter()
            .filter(|e| e.outcome == PipelineEventType::Processed)
        {
            *processed_by_type.entry(event.event_type.clone()).or_insert(0) += 1;
        }

        PipelineStatistics {
            total_received,
            processed,
            failed,
            timed_out,
            dead_lettered,
            duplicates,
            rate_limited,
            rejected,
            avg_processing_time_ms,
            min_processing_time_ms,
            max_processing_time_ms,
            success_rate,
            processed_by_type,
            time_window: window,
            calculated_at: Utc::now(),
        }
    }
}

#[async_trait::async_trait]
impl MetricsCollector for InMemoryMetricsCollector {
    async fn record_event(&self, event: PipelineEvent) -> crate::Result<()> {
        let mut events = self.events.write().unwrap();
        events.push(event);

        // Periodic cleanup to prevent memory growth
        if events.len() > self.config.max_events {
            let excess = events.len() - self.config.max_events;
            events.drain(0..excess);
        }

        Ok(())
    }

    async fn get_statistics(&self, window: Duration) -> crate::Result<PipelineStatistics> {
        let events = self.filter_events_by_window(window);
        Ok(self.calculate_statistics(&events, window))
    }

    async fn cleanup_old_events(&self, older_than: Duration) -> crate::Result<u64> {
        let cutoff = Utc::now() - chrono::Duration::from_std(older_than).unwrap();
        let mut events = self.events.write().unwrap();
        let original_len = events.len();
        events.retain(|event| event.timestamp >= cutoff);
        Ok((original_len - events.len()) as u64)
    }
}
