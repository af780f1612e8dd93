//! The webhook delivery state machine.
//!
//! [`WebhookPipeline`] orchestrates every component in sequence: rate limit,
//! IP allowlist, payload-size ceiling, signature verification, idempotency
//! short-circuit, coordinated processing with internal retries, and the
//! response policy. It is framework-free: the HTTP layer hands it a
//! [`Delivery`] and maps the returned [`DeliveryResponse`] onto the wire.
//!
//! Response policy: the provider should almost never be told to redeliver.
//! Retryable-looking failures and exhausted retries are acknowledged with
//! 200 so the provider does not mount a redelivery storm against an already
//! struggling system; only clearly fatal conditions (bad signature, payload
//! too large, unsupported type, disallowed IP) surface non-200 codes for
//! operator visibility.

use crate::{
    config::PipelineConfig,
    dead_letter::DeadLetterSink,
    event::{InboundEvent, ProcessingContext, ProcessingResult},
    idempotency::IdempotencyManager,
    processor::{EventProcessor, HandlerRegistry},
    rate_limit::{RateLimit, SlidingWindowLimiter},
    retry::{RetryManager, RetryPolicy},
    signature::SignatureVerifier,
    stats::{InMemoryMetricsCollector, MetricsCollector, PipelineEvent, PipelineEventType},
    store::{EventStore, ProcessedMarker},
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// One inbound HTTP delivery, as extracted by the server layer.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Raw request body bytes
    pub body: Vec<u8>,
    /// Signature header value, if present
    pub signature: Option<String>,
    /// Declared content length, if present
    pub content_length: Option<u64>,
    /// Client IP from forwarding headers, if present
    pub client_ip: Option<String>,
}

/// JSON body returned to the provider.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseBody {
    pub received: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duplicate: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Complete response for one delivery: HTTP status, JSON body, and the
/// values for the trace-id and processing-time headers.
#[derive(Debug, Clone)]
pub struct DeliveryResponse {
    pub status: u16,
    pub body: ResponseBody,
    pub trace_id: Option<String>,
    pub processing_time_ms: Option<u64>,
}

impl DeliveryResponse {
    fn rejected(status: u16, error: impl Into<String>) -> Self {
        Self {
            status,
            body: ResponseBody {
                received: false,
                error: Some(error.into()),
                ..Default::default()
            },
            trace_id: None,
            processing_time_ms: None,
        }
    }
}

/// Orchestrates the full webhook ingestion pipeline.
///
/// All shared state (limiter window, in-flight map, retry counters, metrics)
/// is owned here and injected into the components at construction. One
/// pipeline is built per process and shared behind an `Arc` by every
/// request-handling task.
pub struct WebhookPipeline {
    config: PipelineConfig,
    verifier: SignatureVerifier,
    limiter: SlidingWindowLimiter,
    idempotency: Arc<IdempotencyManager>,
    processor: Arc<EventProcessor>,
    retry: Arc<RetryManager>,
    dead_letter: Arc<DeadLetterSink>,
    store: Arc<dyn EventStore>,
    metrics: Arc<dyn MetricsCollector>,
}

impl WebhookPipeline {
    /// Build a pipeline with the default in-memory metrics collector.
    pub fn new(
        config: PipelineConfig,
        store: Arc<dyn EventStore>,
        registry: Arc<HandlerRegistry>,
    ) -> Self {
        let metrics: Arc<dyn MetricsCollector> = Arc::new(InMemoryMetricsCollector::new_default());
        Self::with_metrics(config, store, registry, metrics)
    }

    /// Build a pipeline with an explicit metrics collector.
    pub fn with_metrics(
        config: PipelineConfig,
        store: Arc<dyn EventStore>,
        registry: Arc<HandlerRegistry>,
        metrics: Arc<dyn MetricsCollector>,
    ) -> Self {
        let verifier = SignatureVerifier::new(config.signature_secret.clone())
            .with_tolerance(config.signature_tolerance());
        let limiter =
            SlidingWindowLimiter::new(RateLimit::per_minute(config.rate_limit_per_minute));
        let idempotency = Arc::new(IdempotencyManager::new(store.clone()));
        let processor = Arc::new(
            EventProcessor::new(registry, metrics.clone())
                .with_timeout(config.processing_timeout()),
        );
        let dead_letter = Arc::new(DeadLetterSink::new(store.clone(), metrics.clone()));
        let retry = Arc::new(RetryManager::new(
            RetryPolicy::new(config.max_retry_attempts, config.retry_delays()),
            processor.clone(),
            dead_letter.clone(),
            metrics.clone(),
        ));

        Self {
            config,
            verifier,
            limiter,
            idempotency,
            processor,
            retry,
            dead_letter,
            store,
            metrics,
        }
    }

    /// Run one delivery through the full state machine.
    ///
    /// Terminal on every path: always produces a response, never propagates
    /// an error to the caller.
    pub async fn handle(&self, delivery: Delivery) -> DeliveryResponse {
        // 1. Rate limit: acknowledge but skip processing, so the provider
        //    does not pile redeliveries onto a stressed system.
        if !self.limiter.check() {
            warn!("delivery rejected by rate limiter");
            self.record(PipelineEvent::new("", "", PipelineEventType::RateLimited))
                .await;
            return DeliveryResponse {
                status: 200,
                body: ResponseBody {
                    received: true,
                    warning: Some("rate limit exceeded, delivery ignored".to_string()),
                    ..Default::default()
                },
                trace_id: None,
                processing_time_ms: None,
            };
        }

        // 2. IP allowlist, when configured.
        if !self.config.allowed_ips.is_empty() {
            let allowed = delivery
                .client_ip
                .as_deref()
                .map(|ip| self.config.allowed_ips.iter().any(|a| a == ip))
                .unwrap_or(false);
            if !allowed {
                let ip = delivery.client_ip.as_deref().unwrap_or("unknown");
                warn!(client_ip = ip, "delivery from disallowed IP");
                self.record(PipelineEvent::new("", "", PipelineEventType::Rejected))
                    .await;
                return DeliveryResponse::rejected(403, format!("IP address not allowed: {}", ip));
            }
        }

        // 3. Declared payload size, before the body is parsed.
        let declared = delivery.content_length.unwrap_or(delivery.body.len() as u64);
        if declared > self.config.max_payload_bytes {
            warn!(
                declared,
                limit = self.config.max_payload_bytes,
                "payload exceeds size ceiling"
            );
            self.record(PipelineEvent::new("", "", PipelineEventType::Rejected))
                .await;
            return DeliveryResponse::rejected(
                413,
                format!(
                    "payload too large: {} bytes exceeds limit of {} bytes",
                    declared, self.config.max_payload_bytes
                ),
            );
        }

        // 4. Signature. A missing header is rejected without attempting
        //    verification at all.
        let Some(signature) = delivery.signature.as_deref() else {
            self.record(PipelineEvent::new("", "", PipelineEventType::Rejected))
                .await;
            return DeliveryResponse::rejected(401, "missing signature header");
        };
        let event = match self.verifier.verify(&delivery.body, signature) {
            Ok(event) => event,
            Err(err) => {
                warn!("signature verification failed: {}", err);
                self.record(PipelineEvent::new("", "", PipelineEventType::Rejected))
                    .await;
                return DeliveryResponse::rejected(401, err.to_string());
            }
        };

        let mut context = ProcessingContext::new(&event);
        if let Some(ip) = &delivery.client_ip {
            context = context.with_metadata("client_ip", ip.clone());
        }
        let truncated_sig: String = signature.chars().take(24).collect();
        context = context.with_metadata("signature", truncated_sig);
        let trace_id = context.trace_id;

        self.record(
            PipelineEvent::new(&event.id, &event.event_type, PipelineEventType::Received),
        )
        .await;

        // 5. Idempotency short-circuit.
        match self.idempotency.is_processed(&event.id).await {
            Ok(true) => {
                info!(event_id = %event.id, "duplicate delivery short-circuited");
                self.record(
                    PipelineEvent::new(&event.id, &event.event_type, PipelineEventType::Duplicate),
                )
                .await;
                return DeliveryResponse {
                    status: 200,
                    body: ResponseBody {
                        received: true,
                        event_id: Some(event.id.clone()),
                        duplicate: Some(true),
                        ..Default::default()
                    },
                    trace_id: Some(trace_id.to_string()),
                    processing_time_ms: None,
                };
            }
            Ok(false) => {}
            Err(err) => {
                // Availability over strictness: process anyway and rely on
                // the in-flight map for in-process dedup.
                warn!(event_id = %event.id, "idempotency lookup failed: {}", err);
            }
        }

        // 6. Coordinated processing with internal retries. Concurrent
        //    duplicates of the same event id join this attempt.
        let started = std::time::Instant::now();
        let event_id = event.id.clone();
        let result = {
            let processor = self.processor.clone();
            let retry = self.retry.clone();
            let event = event.clone();
            let ctx = context.clone();
            self.idempotency
                .process(&event_id, async move {
                    let result = processor.process(&event, &ctx).await;
                    if !result.success && result.retryable {
                        retry.retry(&event, &ctx, result).await
                    } else {
                        result
                    }
                })
                .await
        };
        let processing_time_ms = started.elapsed().as_millis() as u64;

        // 7. Terminal bookkeeping.
        self.finish(&event, &result).await;

        // 8. Response policy.
        self.respond(&event, result, trace_id, processing_time_ms)
    }

    /// Record terminal state: durable markers, cache entries, and fatal
    /// handler failures that skipped the retry path.
    async fn finish(&self, event: &InboundEvent, result: &ProcessingResult) {
        if result.success {
            if let Err(err) = self
                .store
                .record_processed(ProcessedMarker::new(&event.id, &event.event_type))
                .await
            {
                warn!(event_id = %event.id, "failed to persist processed marker: {}", err);
            }
            self.idempotency.mark_processed(&event.id).await;
            return;
        }

        if result.has_failure_kind("exhausted") {
            // Already dead-lettered by the retry manager; the durable record
            // is the dead letter itself.
            self.idempotency.mark_processed(&event.id).await;
            return;
        }

        if !result.retryable && !result.has_failure_kind("unsupported") {
            // Fatal handler failure that never entered the retry loop. An
            // unsupported type is deliberately not dead-lettered: a later
            // deployment may register a handler for it.
            let reason = result
                .error
                .clone()
                .unwrap_or_else(|| "unknown fatal failure".to_string());
            self.dead_letter.send(event, &reason, 0).await;
            self.idempotency.mark_processed(&event.id).await;
        }
    }

    fn respond(
        &self,
        event: &InboundEvent,
        result: ProcessingResult,
        trace_id: Uuid,
        processing_time_ms: u64,
    ) -> DeliveryResponse {
        if result.success {
            return DeliveryResponse {
                status: 200,
                body: ResponseBody {
                    received: true,
                    event_id: Some(event.id.clone()),
                    success: Some(true),
                    trace_id: Some(trace_id.to_string()),
                    ..Default::default()
                },
                trace_id: Some(trace_id.to_string()),
                processing_time_ms: Some(processing_time_ms),
            };
        }

        // An unsupported event type is the one processing failure surfaced
        // with a non-200 status.
        let status = if result.has_failure_kind("unsupported") {
            400
        } else {
            200
        };

        DeliveryResponse {
            status,
            body: ResponseBody {
                received: true,
                event_id: Some(event.id.clone()),
                success: Some(false),
                trace_id: Some(trace_id.to_string()),
                error: result.error,
                ..Default::default()
            },
            trace_id: Some(trace_id.to_string()),
            processing_time_ms: Some(processing_time_ms),
        }
    }

    async fn record(&self, event: PipelineEvent) {
        if let Err(e) = self.metrics.record_event(event).await {
            warn!("Failed to record metrics event: {}", e);
        }
    }

    pub fn metrics(&self) -> Arc<dyn MetricsCollector> {
        self.metrics.clone()
    }

    pub fn store(&self) -> Arc<dyn EventStore> {
        self.store.clone()
    }

    pub fn idempotency(&self) -> Arc<IdempotencyManager> {
        self.idempotency.clone()
    }

    pub fn retry_manager(&self) -> Arc<RetryManager> {
        self.retry.clone()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }
}
