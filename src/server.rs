//! HTTP server for the webhook endpoint and operator API.
//!
//! Routes:
//!
//! - `POST /webhooks/stripe` — the webhook entry point; always answers, per
//!   the pipeline's response policy
//! - `GET /health` — unauthenticated liveness probe
//! - `GET /webhooks/stats` — in-memory pipeline statistics snapshot
//! - `GET /webhooks/dead-letters` — dead-letter inspection with pagination
//! - `POST /webhooks/dead-letters/{id}/replay` — reserved; answers 501
//!
//! The warp layer stays thin: it extracts headers and the raw body, hands a
//! [`Delivery`](crate::pipeline::Delivery) to the pipeline, and maps the
//! result onto the wire.

use crate::{
    HookwireError, Result,
    config::ServerConfig,
    pipeline::{Delivery, DeliveryResponse, WebhookPipeline},
};
use serde::{Deserialize, Serialize};
use std::{convert::Infallible, net::SocketAddr, sync::Arc, time::Duration};
use tracing::{debug, info, warn};
use warp::{Filter, Rejection, Reply, http::StatusCode, hyper::Body};

/// Response header carrying the per-request trace identifier.
pub const TRACE_ID_HEADER: &str = "x-hookwire-trace-id";
/// Response header carrying the processing duration in milliseconds.
pub const PROCESSING_TIME_HEADER: &str = "x-processing-time-ms";

/// Standard wrapper for operator API responses.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: chrono::Utc::now(),
        }
    }
}

/// Pagination parameters for dead-letter listing.
#[derive(Debug, Deserialize)]
pub struct DeadLetterQuery {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

/// Webhook ingestion server.
pub struct WebhookServer {
    config: ServerConfig,
    pipeline: Arc<WebhookPipeline>,
}

impl WebhookServer {
    pub fn new(config: ServerConfig, pipeline: Arc<WebhookPipeline>) -> Self {
        Self { config, pipeline }
    }

    /// Bind and serve until the process is stopped.
    pub async fn start(self) -> Result<()> {
        let bind_addr: SocketAddr = self
            .config
            .bind_addr()
            .parse()
            .map_err(|e| HookwireError::Config(format!("invalid bind address: {}", e)))?;

        // Periodic sweep of the processed cache and retry counters
        let sweep_pipeline = self.pipeline.clone();
        let sweep_interval = Duration::from_secs(self.config.sweep_interval_secs.max(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(sweep_interval);
            loop {
                interval.tick().await;
                let cache = sweep_pipeline.idempotency().sweep_cache().await;
                let counters = sweep_pipeline.retry_manager().sweep_counters().await;
                if let Err(e) = sweep_pipeline
                    .metrics()
                    .cleanup_old_events(Duration::from_secs(3600))
                    .await
                {
                    warn!("metrics cleanup failed: {}", e);
                }
                debug!(cache, counters, "sweep pass completed");
            }
        });

        info!("Starting webhook server on {}", bind_addr);
        warp::serve(routes(self.pipeline)).run(bind_addr).await;

        Ok(())
    }
}

/// Compose all routes. Exposed separately so tests can drive the filters
/// without binding a socket.
pub fn routes(
    pipeline: Arc<WebhookPipeline>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    health_route()
        .or(webhook_route(pipeline.clone()))
        .or(stats_route(pipeline.clone()))
        .or(dead_letter_route(pipeline))
        .or(replay_route())
}

fn health_route() -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path("health")
        .and(warp::path::end())
        .and(warp::get())
        .map(|| {
            warp::reply::json(&serde_json::json!({
                "status": "healthy",
                "timestamp": chrono::Utc::now().to_rfc3339(),
                "version": env!("CARGO_PKG_VERSION")
            }))
        })
}

fn webhook_route(
    pipeline: Arc<WebhookPipeline>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("webhooks" / "stripe")
        .and(warp::post())
        .and(with_pipeline(pipeline))
        .and(warp::header::optional::<String>("stripe-signature"))
        .and(warp::header::optional::<u64>("content-length"))
        .and(warp::header::optional::<String>("x-forwarded-for"))
        .and(warp::header::optional::<String>("x-real-ip"))
        .and(warp::body::bytes())
        .and_then(handle_webhook)
}

async fn handle_webhook(
    pipeline: Arc<WebhookPipeline>,
    signature: Option<String>,
    content_length: Option<u64>,
    forwarded_for: Option<String>,
    real_ip: Option<String>,
    body: warp::hyper::body::Bytes,
) -> std::result::Result<impl Reply, Infallible> {
    // First hop of x-forwarded-for wins; x-real-ip is the fallback
    let client_ip = forwarded_for
        .as_deref()
        .and_then(|v| v.split(',').next())
        .map(|ip| ip.trim().to_string())
        .filter(|ip| !ip.is_empty())
        .or(real_ip);

    let delivery = Delivery {
        body: body.to_vec(),
        signature,
        content_length,
        client_ip,
    };

    let response = pipeline.handle(delivery).await;
    Ok(into_reply(response))
}

fn into_reply(response: DeliveryResponse) -> warp::reply::Response {
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::OK);
    let body = serde_json::to_string(&response.body).unwrap_or_else(|_| "{}".to_string());

    let mut builder = warp::http::Response::builder()
        .status(status)
        .header("content-type", "application/json");
    if let Some(trace_id) = &response.trace_id {
        builder = builder.header(TRACE_ID_HEADER, trace_id.as_str());
    }
    if let Some(ms) = response.processing_time_ms {
        builder = builder.header(PROCESSING_TIME_HEADER, ms.to_string());
    }

    builder
        .body(Body::from(body))
        .unwrap_or_else(|_| warp::http::Response::new(Body::from("{}")))
}

fn stats_route(
    pipeline: Arc<WebhookPipeline>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("webhooks" / "stats")
        .and(warp::get())
        .and(with_pipeline(pipeline))
        .and_then(|pipeline: Arc<WebhookPipeline>| async move {
            let reply = match pipeline
                .metrics()
                .get_statistics(Duration::from_secs(3600))
                .await
            {
                Ok(stats) => warp::reply::with_status(
                    warp::reply::json(&ApiResponse::success(stats)),
                    StatusCode::OK,
                ),
                Err(e) => warp::reply::with_status(
                    warp::reply::json(&ApiResponse::<()>::error(e.to_string())),
                    StatusCode::INTERNAL_SERVER_ERROR,
                ),
            };
            Ok::<_, Infallible>(reply)
        })
}

fn dead_letter_route(
    pipeline: Arc<WebhookPipeline>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("webhooks" / "dead-letters")
        .and(warp::get())
        .and(with_pipeline(pipeline))
        .and(warp::query::<DeadLetterQuery>())
        .and_then(
            |pipeline: Arc<WebhookPipeline>, query: DeadLetterQuery| async move {
                let reply = match pipeline
                    .store()
                    .get_dead_letters(query.limit, query.offset)
                    .await
                {
                    Ok(entries) => warp::reply::with_status(
                        warp::reply::json(&ApiResponse::success(entries)),
                        StatusCode::OK,
                    ),
                    Err(e) => warp::reply::with_status(
                        warp::reply::json(&ApiResponse::<()>::error(e.to_string())),
                        StatusCode::INTERNAL_SERVER_ERROR,
                    ),
                };
                Ok::<_, Infallible>(reply)
            },
        )
}

fn replay_route() -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("webhooks" / "dead-letters" / String / "replay")
        .and(warp::post())
        .map(|_event_id: String| {
            warp::reply::with_status(
                warp::reply::json(&ApiResponse::<()>::error(
                    "dead-letter replay is not implemented".to_string(),
                )),
                StatusCode::NOT_IMPLEMENTED,
            )
        })
}

fn with_pipeline(
    pipeline: Arc<WebhookPipeline>,
) -> impl Filter<Extract = (Arc<WebhookPipeline>,), Error = Infallible> + Clone {
    warp::any().map(move || pipeline.clone())
}
