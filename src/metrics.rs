//! Prometheus metrics exposition for the webhook pipeline.
//!
//! Wraps the in-memory collector: every recorded [`PipelineEvent`] both
//! feeds the windowed statistics and increments the corresponding Prometheus
//! series. An optional exposition server publishes the registry on
//! `GET /metrics`.

use crate::{
    HookwireError, Result,
    stats::{
        InMemoryMetricsCollector, MetricsCollector, PipelineEvent, PipelineEventType,
        PipelineStatistics,
    },
};
use prometheus::{CounterVec, Encoder, HistogramVec, Registry, TextEncoder};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use warp::Filter;

/// Configuration for Prometheus metrics collection.
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Prometheus registry name
    pub registry_name: String,
    /// HTTP server address for metrics exposition
    pub exposition_addr: Option<SocketAddr>,
    /// Whether to collect detailed timing histograms
    pub collect_histograms: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            registry_name: "hookwire".to_string(),
            exposition_addr: None,
            collect_histograms: true,
        }
    }
}

impl MetricsConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the Prometheus exposition address.
    pub fn with_prometheus_exporter(mut self, addr: SocketAddr) -> Self {
        self.exposition_addr = Some(addr);
        self
    }
}

/// Prometheus metrics collector for webhook pipeline metrics.
pub struct PrometheusMetricsCollector {
    config: MetricsConfig,
    registry: Registry,
    inner: InMemoryMetricsCollector,
    deliveries_total: CounterVec,
    processing_duration: HistogramVec,
    server_handle: Option<tokio::task::JoinHandle<()>>,
}

impl PrometheusMetricsCollector {
    /// Create a new Prometheus metrics collector.
    pub fn new(config: MetricsConfig) -> Result<Self> {
        let registry = Registry::new();

        let deliveries_total = CounterVec::new(
            prometheus::Opts::new(
                "hookwire_deliveries_total",
                "Total webhook deliveries by outcome",
            ),
            &["outcome", "event_type"],
        )
        .map_err(|e| HookwireError::Metrics {
            message: format!("Failed to create deliveries_total metric: {}", e),
        })?;

        let processing_duration = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "hookwire_processing_duration_seconds",
                "Handler processing duration in seconds",
            )
            .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
            &["event_type"],
        )
        .map_err(|e| HookwireError::Metrics {
            message: format!("Failed to create processing_duration metric: {}", e),
        })?;

        registry
            .register(Box::new(deliveries_total.clone()))
            .map_err(|e| HookwireError::Metrics {
                message: format!("Failed to register deliveries_total with registry: {}", e),
            })?;

        registry
            .register(Box::new(processing_duration.clone()))
            .map_err(|e| HookwireError::Metrics {
                message: format!(
                    "Failed to register processing_duration with registry: {}",
                    e
                ),
            })?;

        Ok(Self {
            config,
            registry,
            inner: InMemoryMetricsCollector::new_default(),
            deliveries_total,
            processing_duration,
            server_handle: None,
        })
    }

    /// Start the Prometheus HTTP exposition server.
    pub async fn start_exposition_server(&mut self) -> Result<()> {
        if let Some(addr) = self.config.exposition_addr {
            let registry = self.registry.clone();
            let handle = tokio::spawn(async move {
                let app = warp::path("metrics")
                    .map(move || {
                        let encoder = TextEncoder::new();
                        let metric_families = registry.gather();
                        let mut buffer = Vec::new();
                        if encoder.encode(&metric_families, &mut buffer).is_err() {
                            buffer.clear();
                        }
                        String::from_utf8(buffer).unwrap_or_default()
                    })
                    .with(warp::reply::with::header("content-type", "text/plain"));

                warp::serve(app).run(addr).await;
            });

            self.server_handle = Some(handle);
        }

        Ok(())
    }

    /// Registry name configured for this collector.
    pub fn registry_name(&self) -> &str {
        &self.config.registry_name
    }

    /// Render the current registry contents in the text exposition format.
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| HookwireError::Metrics {
                message: format!("Failed to encode metrics: {}", e),
            })?;
        String::from_utf8(buffer).map_err(|e| HookwireError::Metrics {
            message: format!("Metrics buffer is not valid UTF-8: {}", e),
        })
    }

    fn outcome_label(outcome: PipelineEventType) -> &'static str {
        match outcome {
            PipelineEventType::Received => "received",
            PipelineEventType::Processed => "processed",
            PipelineEventType::Failed => "failed",
            PipelineEventType::Retried => "retried",
            PipelineEventType::TimedOut => "timed_out",
            PipelineEventType::DeadLettered => "dead_lettered",
            PipelineEventType::Duplicate => "duplicate",
            PipelineEventType::RateLimited => "rate_limited",
            PipelineEventType::Rejected => "rejected",
        }
    }
}

#[async_trait::async_trait]
impl MetricsCollector for PrometheusMetricsCollector {
    async fn record_event(&self, event: PipelineEvent) -> Result<()> {
        let outcome = Self::outcome_label(event.outcome);
        let event_type = if event.event_type.is_empty() {
            "unknown"
        } else {
            event.event_type.as_str()
        };

        self.deliveries_total
            .with_label_values(&[outcome, event_type])
            .inc();

        if self.config.collect_histograms
            && event.outcome == PipelineEventType::Processed
        {
            if let Some(duration_ms) = event.duration_ms {
                self.processing_duration
                    .with_label_values(&[event_type])
                    .observe(duration_ms as f64 / 1000.0);
            }
        }

        self.inner.record_event(event).await
    }

    async fn get_statistics(&self, window: Duration) -> Result<PipelineStatistics> {
        self.inner.get_statistics(window).await
    }

    async fn cleanup_old_events(&self, older_than: Duration) -> Result<u64> {
        self.inner.cleanup_old_events(older_than).await
    }
}

/// Convenience constructor for the pipeline: a shared collector with default
/// configuration.
pub fn default_collector() -> Result<Arc<PrometheusMetricsCollector>> {
    Ok(Arc::new(PrometheusMetricsCollector::new(
        MetricsConfig::default(),
    )?))
}
