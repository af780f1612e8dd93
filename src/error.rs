use thiserror::Error;

#[derive(Error, Debug)]
pub enum HookwireError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid signature: {message}")]
    InvalidSignature { message: String },

    #[error("Unsupported event type: {event_type}")]
    EventNotSupported { event_type: String },

    #[error("Processing timed out after {timeout_ms}ms")]
    ProcessingTimeout { timeout_ms: u64 },

    #[error("Payload too large: {size} bytes exceeds limit of {limit} bytes")]
    PayloadTooLarge { size: u64, limit: u64 },

    #[error("IP address not allowed: {ip}")]
    IpNotAllowed { ip: String },

    #[error("Rate limit error: {message}")]
    RateLimit { message: String },

    #[error("Handler error: {message}")]
    Handler { message: String },

    #[error("Store error: {message}")]
    Store { message: String },

    #[error("Metrics error: {message}")]
    Metrics { message: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl HookwireError {
    /// Whether a failed processing attempt carrying this error may be retried.
    ///
    /// Signature, validation, and dispatch errors are final: redelivering the
    /// same payload cannot change the outcome. Timeouts, handler failures, and
    /// store/IO errors may clear up once a downstream dependency recovers.
    pub fn is_retryable(&self) -> bool {
        match self {
            HookwireError::ProcessingTimeout { .. }
            | HookwireError::Handler { .. }
            | HookwireError::Database(_)
            | HookwireError::Store { .. }
            | HookwireError::Io(_) => true,
            HookwireError::InvalidSignature { .. }
            | HookwireError::EventNotSupported { .. }
            | HookwireError::PayloadTooLarge { .. }
            | HookwireError::IpNotAllowed { .. }
            | HookwireError::RateLimit { .. }
            | HookwireError::Serialization(_)
            | HookwireError::Metrics { .. }
            | HookwireError::Config(_) => false,
        }
    }
}

// Add From implementations for toml errors
impl From<toml::de::Error> for HookwireError {
    fn from(err: toml::de::Error) -> Self {
        HookwireError::Config(format!("TOML deserialization error: {}", err))
    }
}

impl From<toml::ser::Error> for HookwireError {
    fn from(err: toml::ser::Error) -> Self {
        HookwireError::Config(format!("TOML serialization error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let sig_error = HookwireError::InvalidSignature {
            message: "missing v1 component".to_string(),
        };
        assert_eq!(
            sig_error.to_string(),
            "Invalid signature: missing v1 component"
        );

        let unsupported = HookwireError::EventNotSupported {
            event_type: "invoice.created".to_string(),
        };
        assert_eq!(
            unsupported.to_string(),
            "Unsupported event type: invoice.created"
        );

        let timeout = HookwireError::ProcessingTimeout { timeout_ms: 30000 };
        assert_eq!(timeout.to_string(), "Processing timed out after 30000ms");
    }

    #[test]
    fn test_error_from_serde_json() {
        let json_error = serde_json::from_str::<serde_json::Value>("invalid json");
        assert!(json_error.is_err());

        let hookwire_error: HookwireError = json_error.unwrap_err().into();
        assert!(matches!(hookwire_error, HookwireError::Serialization(_)));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(HookwireError::ProcessingTimeout { timeout_ms: 1000 }.is_retryable());
        assert!(
            HookwireError::Handler {
                message: "fulfillment service unavailable".to_string()
            }
            .is_retryable()
        );

        assert!(
            !HookwireError::InvalidSignature {
                message: "mismatch".to_string()
            }
            .is_retryable()
        );
        assert!(
            !HookwireError::EventNotSupported {
                event_type: "unknown.type".to_string()
            }
            .is_retryable()
        );
        assert!(
            !HookwireError::PayloadTooLarge {
                size: 2_000_000,
                limit: 1_048_576
            }
            .is_retryable()
        );
    }
}
