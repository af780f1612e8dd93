//! Webhook signature verification.
//!
//! Inbound deliveries carry a signature header of the form
//! `t=<unix-seconds>,v1=<hex hmac>[,v1=<hex hmac>...]`. The signed message is
//! `{timestamp}.{raw body}`, HMAC-SHA256 under the endpoint's shared secret.
//! Multiple `v1` components are accepted so the provider can rotate secrets;
//! a delivery verifies if any component matches.
//!
//! Verification failure is always fatal: it means a misconfigured secret or a
//! tampered/foreign request, and retrying cannot change either.

use crate::{HookwireError, Result, event::InboundEvent};
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::Duration;

type HmacSha256 = Hmac<Sha256>;

/// Default tolerance between the signed timestamp and the receiving clock.
pub const DEFAULT_TIMESTAMP_TOLERANCE: Duration = Duration::from_secs(300);

/// Verifies webhook payload authenticity against a shared secret.
///
/// Pure over its inputs: no side effects, no shared state. One verifier is
/// constructed at startup and shared by reference across requests.
#[derive(Debug, Clone)]
pub struct SignatureVerifier {
    secret: String,
    tolerance: Duration,
}

/// Parsed components of a signature header.
#[derive(Debug)]
struct SignatureHeader {
    timestamp: i64,
    signatures: Vec<String>,
}

impl SignatureVerifier {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            tolerance: DEFAULT_TIMESTAMP_TOLERANCE,
        }
    }

    /// Set the timestamp tolerance for replay protection.
    pub fn with_tolerance(mut self, tolerance: Duration) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Verify a raw request body against its signature header and parse the
    /// event envelope.
    ///
    /// Fails with [`HookwireError::InvalidSignature`] when the header is
    /// malformed, the timestamp falls outside the tolerance window, or no
    /// signature component matches the computed HMAC.
    pub fn verify(&self, body: &[u8], signature_header: &str) -> Result<InboundEvent> {
        let header = Self::parse_header(signature_header)?;

        let age = (Utc::now().timestamp() - header.timestamp).unsigned_abs();
        if age > self.tolerance.as_secs() {
            return Err(HookwireError::InvalidSignature {
                message: format!(
                    "timestamp outside tolerance: {}s old, allowed {}s",
                    age,
                    self.tolerance.as_secs()
                ),
            });
        }

        let expected = compute_signature(&self.secret, header.timestamp, body);
        let matched = header
            .signatures
            .iter()
            .any(|candidate| constant_time_eq(candidate.as_bytes(), expected.as_bytes()));

        if !matched {
            return Err(HookwireError::InvalidSignature {
                message: "no signature component matched the payload".to_string(),
            });
        }

        let event: InboundEvent = serde_json::from_slice(body)?;
        Ok(event)
    }

    fn parse_header(header: &str) -> Result<SignatureHeader> {
        let mut timestamp = None;
        let mut signatures = Vec::new();

        for part in header.split(',') {
            let mut kv = part.trim().splitn(2, '=');
            match (kv.next(), kv.next()) {
                (Some("t"), Some(value)) => {
                    timestamp = value.parse::<i64>().ok();
                }
                (Some("v1"), Some(value)) => {
                    signatures.push(value.to_string());
                }
                // Unknown schemes (v0, ...) are ignored, matching provider behavior
                _ => {}
            }
        }

        let timestamp = timestamp.ok_or_else(|| HookwireError::InvalidSignature {
            message: "missing or unparseable timestamp component".to_string(),
        })?;

        if signatures.is_empty() {
            return Err(HookwireError::InvalidSignature {
                message: "missing v1 signature component".to_string(),
            });
        }

        Ok(SignatureHeader {
            timestamp,
            signatures,
        })
    }
}

/// Compute the hex-encoded HMAC-SHA256 signature over `{timestamp}.{body}`.
pub fn compute_signature(secret: &str, timestamp: i64, body: &[u8]) -> String {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time byte comparison to prevent timing attacks.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    use subtle::ConstantTimeEq;
    a.ct_eq(b).into()
}

/// Build a signature header for a payload, suitable for tests and local
/// delivery tooling.
pub fn sign_payload(secret: &str, timestamp: i64, body: &[u8]) -> String {
    format!(
        "t={},v1={}",
        timestamp,
        compute_signature(secret, timestamp, body)
    )
}
