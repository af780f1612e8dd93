//! Event envelope and per-attempt processing metadata.
//!
//! An [`InboundEvent`] is the verified representation of one provider webhook
//! delivery. It is constructed by the signature verifier and treated as
//! immutable by everything downstream. [`ProcessingContext`] and
//! [`ProcessingResult`] carry the per-attempt bookkeeping: who is processing
//! what, on which attempt, and how it went.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// A verified webhook event as delivered by the provider.
///
/// The `id` is the provider-assigned identifier, globally unique per delivery,
/// and is the key for all idempotency and retry bookkeeping. The `payload` is
/// opaque to the pipeline; only the type-specific handler interprets it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundEvent {
    /// Provider-assigned unique event identifier (e.g. `evt_1NG...`)
    pub id: String,
    /// Event type tag selecting a handler (e.g. `checkout.session.completed`)
    #[serde(rename = "type")]
    pub event_type: String,
    /// Event creation time as reported by the provider (unix seconds)
    pub created: i64,
    /// Opaque event payload, specific to the event type
    #[serde(default)]
    pub data: serde_json::Value,
}

impl InboundEvent {
    pub fn new(id: impl Into<String>, event_type: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            event_type: event_type.into(),
            created: Utc::now().timestamp(),
            data,
        }
    }

    /// Event creation time as a UTC timestamp.
    pub fn created_at(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.created, 0)
            .single()
            .unwrap_or_else(Utc::now)
    }
}

/// Ephemeral metadata for a single processing attempt.
///
/// Owned by the request's execution and discarded when the request completes.
/// The trace identifier is generated once per HTTP request and is shared by
/// every attempt made for that delivery.
#[derive(Debug, Clone)]
pub struct ProcessingContext {
    pub event_id: String,
    pub event_type: String,
    /// Attempt number; 0 is the initial attempt, retries count up from 1.
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    pub trace_id: Uuid,
    pub metadata: HashMap<String, String>,
}

impl ProcessingContext {
    pub fn new(event: &InboundEvent) -> Self {
        Self {
            event_id: event.id.clone(),
            event_type: event.event_type.clone(),
            attempt: 0,
            started_at: Utc::now(),
            trace_id: Uuid::new_v4(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Copy of this context for the next retry attempt.
    pub fn next_attempt(&self, attempt: u32) -> Self {
        let mut ctx = self.clone();
        ctx.attempt = attempt;
        ctx.started_at = Utc::now();
        ctx
    }
}

/// Outcome of one processing attempt (or of a full retry sequence).
///
/// `retryable` is meaningful only when `success` is false. Results must be
/// cheaply cloneable: concurrent duplicate deliveries of the same event all
/// receive a clone of the single in-flight attempt's result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingResult {
    pub success: bool,
    pub error: Option<String>,
    pub duration_ms: u64,
    pub retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl ProcessingResult {
    pub fn success(duration_ms: u64) -> Self {
        Self {
            success: true,
            error: None,
            duration_ms,
            retryable: false,
            metadata: None,
        }
    }

    pub fn failure(error: impl Into<String>, retryable: bool, duration_ms: u64) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            duration_ms,
            retryable,
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Whether the failure was classified with the given kind marker.
    pub fn has_failure_kind(&self, kind: &str) -> bool {
        self.metadata
            .as_ref()
            .and_then(|m| m.get("kind"))
            .and_then(|k| k.as_str())
            .map(|k| k == kind)
            .unwrap_or(false)
    }
}
