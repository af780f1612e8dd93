//! Idempotency tracking: durable checks, a short-term processed cache, and
//! in-flight coordination of concurrent duplicate deliveries.
//!
//! Two layered responsibilities:
//!
//! - **Durable check**: has this event identifier already reached a terminal
//!   state? Answered from an in-process cache of recently processed ids
//!   (bounded by a TTL) and, on a cache miss, from the event store.
//! - **Concurrency coordination**: at most one processing attempt per event
//!   identifier runs in this process at a time. Concurrent duplicate
//!   deliveries join the in-flight attempt and receive a clone of its result
//!   instead of starting a second execution.
//!
//! The cache and in-flight map are process-local. Across replicas only the
//! durable store deduplicates; within one process this manager makes the
//! common duplicate-delivery case cheap and race-free.

use crate::{Result, event::ProcessingResult, store::EventStore};
use chrono::{DateTime, Utc};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use std::{collections::HashMap, future::Future, sync::Arc, time::Duration};
use tokio::sync::Mutex;
use tracing::debug;

/// Default lifetime of a processed-cache entry.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(3600);

type SharedAttempt = Shared<BoxFuture<'static, ProcessingResult>>;

/// Tracks processed event identifiers and coordinates in-flight attempts.
pub struct IdempotencyManager {
    store: Arc<dyn EventStore>,
    /// Recently processed ids; read-path optimization over the durable store
    processed_cache: Arc<Mutex<HashMap<String, DateTime<Utc>>>>,
    /// One in-flight attempt per event identifier
    in_flight: Arc<Mutex<HashMap<String, SharedAttempt>>>,
    cache_ttl: Duration,
}

impl IdempotencyManager {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self {
            store,
            processed_cache: Arc::new(Mutex::new(HashMap::new())),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            cache_ttl: DEFAULT_CACHE_TTL,
        }
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Whether this event identifier has already been durably processed.
    ///
    /// Consults the short-term cache first; a durable hit back-fills the
    /// cache so repeated redeliveries stop touching the store.
    pub async fn is_processed(&self, event_id: &str) -> Result<bool> {
        {
            let cache = self.processed_cache.lock().await;
            if let Some(cached_at) = cache.get(event_id) {
                let age = Utc::now().signed_duration_since(*cached_at);
                if age.to_std().unwrap_or_default() < self.cache_ttl {
                    return Ok(true);
                }
            }
        }

        if self.store.is_processed(event_id).await? {
            self.mark_processed(event_id).await;
            return Ok(true);
        }

        Ok(false)
    }

    /// Record an event identifier in the short-term cache.
    ///
    /// Cache only: the durable trace of the event is written by the pipeline
    /// (processed marker) or the dead letter sink, not here.
    pub async fn mark_processed(&self, event_id: &str) {
        let mut cache = self.processed_cache.lock().await;
        cache.insert(event_id.to_string(), Utc::now());
    }

    /// Run `attempt` with at most one concurrent execution per event
    /// identifier.
    ///
    /// If an attempt for this identifier is already in flight, the caller
    /// awaits that attempt's shared result instead of starting a second one.
    /// The attempt runs on its own task, so it settles (and its in-flight
    /// registration is removed) even if every waiting caller goes away.
    pub async fn process<F>(&self, event_id: &str, attempt: F) -> ProcessingResult
    where
        F: Future<Output = ProcessingResult> + Send + 'static,
    {
        let shared = {
            let mut in_flight = self.in_flight.lock().await;
            if let Some(existing) = in_flight.get(event_id) {
                debug!(event_id, "joining in-flight processing attempt");
                existing.clone()
            } else {
                let handle = tokio::spawn(attempt);
                let shared: SharedAttempt = async move {
                    match handle.await {
                        Ok(result) => result,
                        Err(join_err) => ProcessingResult::failure(
                            format!("processing task failed: {}", join_err),
                            false,
                            0,
                        ),
                    }
                }
                .boxed()
                .shared();

                in_flight.insert(event_id.to_string(), shared.clone());

                // Settlement removes the registration regardless of outcome
                // and regardless of whether any caller is still waiting.
                let in_flight_map = Arc::clone(&self.in_flight);
                let id = event_id.to_string();
                let settled = shared.clone();
                tokio::spawn(async move {
                    let _ = settled.await;
                    in_flight_map.lock().await.remove(&id);
                });

                shared
            }
        };

        shared.await
    }

    /// Number of attempts currently in flight.
    pub async fn in_flight_count(&self) -> usize {
        self.in_flight.lock().await.len()
    }

    /// Evict cache entries older than the TTL. Returns the number evicted.
    pub async fn sweep_cache(&self) -> usize {
        let mut cache = self.processed_cache.lock().await;
        let original = cache.len();
        let ttl = chrono::Duration::from_std(self.cache_ttl).unwrap_or(chrono::Duration::hours(1));
        let cutoff = Utc::now() - ttl;
        cache.retain(|_, cached_at| *cached_at >= cutoff);
        original - cache.len()
    }
}
