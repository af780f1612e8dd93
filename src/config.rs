//! Configuration for the webhook pipeline and server.
//!
//! Options can come from three layers: defaults, a TOML file, and
//! `HOOKWIRE_*` environment variables. The binary applies them in that order,
//! with command-line flags last.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the webhook processing pipeline.
///
/// # Examples
///
/// ```rust
/// use hookwire::config::PipelineConfig;
///
/// let config = PipelineConfig::new()
///     .with_signature_secret("whsec_abc123")
///     .with_max_retry_attempts(5)
///     .with_rate_limit_per_minute(200);
///
/// assert_eq!(config.max_retry_attempts, 5);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Shared secret for signature verification
    pub signature_secret: String,
    /// Tolerance between the signed timestamp and the receiving clock
    pub signature_tolerance_secs: u64,
    /// Client IPs allowed to deliver webhooks; empty means allow all
    pub allowed_ips: Vec<String>,
    /// Ceiling on the declared request body size
    pub max_payload_bytes: u64,
    /// Ceiling on a single handler execution
    pub processing_timeout_ms: u64,
    /// Maximum retry attempts after the initial one
    pub max_retry_attempts: u32,
    /// Delay before each retry attempt; later attempts reuse the last entry
    pub retry_delays_ms: Vec<u64>,
    /// Accepted deliveries per sliding 60-second window
    pub rate_limit_per_minute: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            signature_secret: String::new(),
            signature_tolerance_secs: 300,
            allowed_ips: Vec::new(),
            max_payload_bytes: 1024 * 1024,
            processing_timeout_ms: 30_000,
            max_retry_attempts: 3,
            retry_delays_ms: vec![1000, 5000, 10000],
            rate_limit_per_minute: 100,
        }
    }
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_signature_secret(mut self, secret: impl Into<String>) -> Self {
        self.signature_secret = secret.into();
        self
    }

    pub fn with_signature_tolerance(mut self, tolerance: Duration) -> Self {
        self.signature_tolerance_secs = tolerance.as_secs();
        self
    }

    pub fn with_allowed_ips(mut self, ips: Vec<String>) -> Self {
        self.allowed_ips = ips;
        self
    }

    pub fn with_max_payload_bytes(mut self, bytes: u64) -> Self {
        self.max_payload_bytes = bytes;
        self
    }

    pub fn with_processing_timeout(mut self, timeout: Duration) -> Self {
        self.processing_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_max_retry_attempts(mut self, attempts: u32) -> Self {
        self.max_retry_attempts = attempts;
        self
    }

    pub fn with_retry_delays(mut self, delays: Vec<Duration>) -> Self {
        self.retry_delays_ms = delays.iter().map(|d| d.as_millis() as u64).collect();
        self
    }

    pub fn with_rate_limit_per_minute(mut self, rate: u32) -> Self {
        self.rate_limit_per_minute = rate;
        self
    }

    pub fn signature_tolerance(&self) -> Duration {
        Duration::from_secs(self.signature_tolerance_secs)
    }

    pub fn processing_timeout(&self) -> Duration {
        Duration::from_millis(self.processing_timeout_ms)
    }

    pub fn retry_delays(&self) -> Vec<Duration> {
        self.retry_delays_ms
            .iter()
            .map(|ms| Duration::from_millis(*ms))
            .collect()
    }
}

/// Configuration for the HTTP server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address for the webhook endpoint
    pub bind_address: String,
    /// Bind port
    pub port: u16,
    /// PostgreSQL connection URL; empty runs against the in-memory store
    pub database_url: String,
    /// Interval between cache/counter sweep passes
    pub sweep_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port: 8080,
            database_url: String::new(),
            sweep_interval_secs: 300,
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}

/// Top-level configuration: server plus pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct HookwireConfig {
    pub server: ServerConfig,
    pub pipeline: PipelineConfig,
}

impl HookwireConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bind_address(mut self, address: &str, port: u16) -> Self {
        self.server.bind_address = address.to_string();
        self.server.port = port;
        self
    }

    pub fn with_database_url(mut self, url: &str) -> Self {
        self.server.database_url = url.to_string();
        self
    }

    /// Load configuration from a TOML file.
    pub fn from_file(path: &str) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn save_to_file(&self, path: &str) -> crate::Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Self::default();

        if let Ok(secret) = std::env::var("HOOKWIRE_SIGNATURE_SECRET") {
            config.pipeline.signature_secret = secret;
        }
        if let Ok(tolerance) = std::env::var("HOOKWIRE_SIGNATURE_TOLERANCE_SECS") {
            config.pipeline.signature_tolerance_secs = tolerance
                .parse()
                .unwrap_or(config.pipeline.signature_tolerance_secs);
        }
        if let Ok(allowlist) = std::env::var("HOOKWIRE_ALLOWED_IPS") {
            config.pipeline.allowed_ips = allowlist
                .split(',')
                .map(|ip| ip.trim().to_string())
                .filter(|ip| !ip.is_empty())
                .collect();
        }
        if let Ok(max_bytes) = std::env::var("HOOKWIRE_MAX_PAYLOAD_BYTES") {
            config.pipeline.max_payload_bytes =
                max_bytes.parse().unwrap_or(config.pipeline.max_payload_bytes);
        }
        if let Ok(timeout) = std::env::var("HOOKWIRE_PROCESSING_TIMEOUT_MS") {
            config.pipeline.processing_timeout_ms = timeout
                .parse()
                .unwrap_or(config.pipeline.processing_timeout_ms);
        }
        if let Ok(attempts) = std::env::var("HOOKWIRE_MAX_RETRY_ATTEMPTS") {
            config.pipeline.max_retry_attempts =
                attempts.parse().unwrap_or(config.pipeline.max_retry_attempts);
        }
        if let Ok(delays) = std::env::var("HOOKWIRE_RETRY_DELAYS_MS") {
            let parsed: Vec<u64> = delays
                .split(',')
                .filter_map(|d| d.trim().parse().ok())
                .collect();
            if !parsed.is_empty() {
                config.pipeline.retry_delays_ms = parsed;
            }
        }
        if let Ok(rate) = std::env::var("HOOKWIRE_RATE_LIMIT_PER_MINUTE") {
            config.pipeline.rate_limit_per_minute =
                rate.parse().unwrap_or(config.pipeline.rate_limit_per_minute);
        }

        if let Ok(bind) = std::env::var("HOOKWIRE_BIND_ADDRESS") {
            config.server.bind_address = bind;
        }
        if let Ok(port) = std::env::var("HOOKWIRE_PORT") {
            config.server.port = port.parse().unwrap_or(config.server.port);
        }
        if let Ok(url) = std::env::var("HOOKWIRE_DATABASE_URL") {
            config.server.database_url = url;
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_contract() {
        let config = PipelineConfig::default();
        assert_eq!(config.signature_tolerance_secs, 300);
        assert_eq!(config.max_payload_bytes, 1024 * 1024);
        assert_eq!(config.processing_timeout_ms, 30_000);
        assert_eq!(config.max_retry_attempts, 3);
        assert_eq!(config.retry_delays_ms, vec![1000, 5000, 10000]);
        assert_eq!(config.rate_limit_per_minute, 100);
        assert!(config.allowed_ips.is_empty());
    }

    #[test]
    fn test_builder_methods() {
        let config = PipelineConfig::new()
            .with_signature_secret("whsec_test")
            .with_signature_tolerance(Duration::from_secs(600))
            .with_allowed_ips(vec!["10.0.0.1".to_string()])
            .with_max_payload_bytes(2048)
            .with_processing_timeout(Duration::from_secs(5))
            .with_max_retry_attempts(2)
            .with_retry_delays(vec![Duration::from_millis(100), Duration::from_millis(200)])
            .with_rate_limit_per_minute(10);

        assert_eq!(config.signature_secret, "whsec_test");
        assert_eq!(config.signature_tolerance(), Duration::from_secs(600));
        assert_eq!(config.allowed_ips, vec!["10.0.0.1"]);
        assert_eq!(config.max_payload_bytes, 2048);
        assert_eq!(config.processing_timeout(), Duration::from_secs(5));
        assert_eq!(config.max_retry_attempts, 2);
        assert_eq!(
            config.retry_delays(),
            vec![Duration::from_millis(100), Duration::from_millis(200)]
        );
        assert_eq!(config.rate_limit_per_minute, 10);
    }

    #[test]
    fn test_bind_addr_formatting() {
        let config = ServerConfig {
            bind_address: "0.0.0.0".to_string(),
            port: 9090,
            ..Default::default()
        };
        assert_eq!(config.bind_addr(), "0.0.0.0:9090");
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = HookwireConfig::new()
            .with_bind_address("0.0.0.0", 9000)
            .with_database_url("postgresql://localhost/hookwire");

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hookwire.toml");
        let path_str = path.to_str().unwrap();

        config.save_to_file(path_str).unwrap();
        let loaded = HookwireConfig::from_file(path_str).unwrap();

        assert_eq!(loaded.server.bind_address, "0.0.0.0");
        assert_eq!(loaded.server.port, 9000);
        assert_eq!(loaded.server.database_url, "postgresql://localhost/hookwire");
        assert_eq!(loaded.pipeline.max_retry_attempts, 3);
    }

    #[test]
    fn test_from_file_missing_path() {
        let result = HookwireConfig::from_file("/nonexistent/hookwire.toml");
        assert!(result.is_err());
    }
}
