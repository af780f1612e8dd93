//! # Hookwire
//!
//! A reliability engine for inbound provider webhooks (Stripe-style), built on Tokio.
//!
//! ## Features
//!
//! - **Signature verification**: HMAC-SHA256 over `{timestamp}.{body}` with constant-time
//!   comparison and configurable replay tolerance
//! - **Sliding-window rate limiting**: per-minute delivery ceiling that acknowledges but
//!   skips excess deliveries
//! - **Idempotent processing**: durable processed markers plus an in-process cache, with
//!   concurrent duplicate deliveries joined onto a single in-flight attempt
//! - **Retry with backoff**: fixed delay schedule, attempt ceiling, and per-event counters
//! - **Dead-letter capture**: durable records for permanently-failed events
//! - **Monitoring**: in-memory statistics and optional Prometheus exposition (enabled by default)
//! - **Async/await**: built on Tokio for high concurrency
//! - **Type-safe**: leverages Rust's type system for reliability
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use hookwire::{
//!     HandlerRegistry, WebhookPipeline, WebhookServer,
//!     config::HookwireConfig, store::memory::MemoryEventStore,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
//!     let config = HookwireConfig::from_env()?;
//!
//!     // Register a handler per event type
//!     let mut registry = HandlerRegistry::new();
//!     registry.register(
//!         "checkout.session.completed",
//!         Arc::new(|event| {
//!             Box::pin(async move {
//!                 println!("fulfilling order for {}", event.id);
//!                 // Your business logic here
//!                 Ok(())
//!             })
//!         }),
//!     );
//!
//!     // Wire the pipeline to a store
//!     let store = Arc::new(MemoryEventStore::new());
//!     let pipeline = Arc::new(WebhookPipeline::new(
//!         config.pipeline.clone(),
//!         store,
//!         Arc::new(registry),
//!     ));
//!
//!     // Serve POST /webhooks/stripe
//!     let server = WebhookServer::new(config.server.clone(), pipeline);
//!     Ok(server.start().await?)
//! }
//! ```
//!
//! ## Core Concepts
//!
//! ### Events
//!
//! An [`InboundEvent`] is one verified webhook delivery: a provider-assigned
//! identifier, an event type tag, a creation timestamp, and an opaque payload.
//! The identifier is the key for every idempotency and retry decision.
//!
//! ### The pipeline
//!
//! [`WebhookPipeline`] runs each delivery through rate limiting, an IP
//! allowlist, a payload-size ceiling, signature verification, an idempotency
//! short-circuit, and coordinated processing with internal retries. It always
//! responds; retryable-looking failures are acknowledged with 200 so the
//! provider does not mount a redelivery storm.
//!
//! ### The store
//!
//! The pipeline treats persistence as a narrow collaborator through the
//! [`EventStore`](store::EventStore) trait: processed markers for durable
//! idempotency and dead-letter records for operator review. PostgreSQL and
//! in-memory implementations are provided.
//!
//! ## Feature Flags
//!
//! - `postgres` - Enable the PostgreSQL event store
//! - `metrics` - Enable Prometheus metrics collection (default)

pub mod config;
pub mod dead_letter;
pub mod error;
pub mod event;
pub mod idempotency;
pub mod pipeline;
pub mod processor;
pub mod rate_limit;
pub mod retry;
pub mod server;
pub mod signature;
pub mod stats;
pub mod store;

#[cfg(feature = "metrics")]
pub mod metrics;

pub use config::{HookwireConfig, PipelineConfig, ServerConfig};
pub use dead_letter::DeadLetterSink;
pub use error::HookwireError;
pub use event::{InboundEvent, ProcessingContext, ProcessingResult};
pub use idempotency::IdempotencyManager;
pub use pipeline::{Delivery, DeliveryResponse, WebhookPipeline};
pub use processor::{EventHandler, EventProcessor, HandlerRegistry};
pub use rate_limit::{RateLimit, SlidingWindowLimiter};
pub use retry::{RetryManager, RetryPolicy};
pub use server::WebhookServer;
pub use signature::SignatureVerifier;
pub use stats::{InMemoryMetricsCollector, MetricsCollector, PipelineStatistics};
pub use store::{DeadLetterEntry, EventStore, ProcessedMarker};

#[cfg(feature = "metrics")]
pub use metrics::{MetricsConfig, PrometheusMetricsCollector};

/// Convenient type alias for Results with [`HookwireError`] as the error type.
///
/// This is used throughout the crate for consistent error handling.
pub type Result<T> = std::result::Result<T, HookwireError>;
