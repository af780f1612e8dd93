//! End-to-end pipeline behavior against the in-memory store.

use hookwire::{
    Delivery, EventStore, HandlerRegistry, HookwireError, PipelineConfig, WebhookPipeline,
    signature::sign_payload, store::memory::MemoryEventStore,
};
use serde_json::json;
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicU32, Ordering},
};
use std::time::Duration;

const SECRET: &str = "whsec_integration";

fn signed_delivery(event_id: &str, event_type: &str) -> Delivery {
    let body = serde_json::to_vec(&json!({
        "id": event_id,
        "type": event_type,
        "created": chrono::Utc::now().timestamp(),
        "data": {"object": {"amount_total": 4200}}
    }))
    .unwrap();
    let header = sign_payload(SECRET, chrono::Utc::now().timestamp(), &body);
    Delivery {
        body,
        signature: Some(header),
        content_length: None,
        client_ip: Some("127.0.0.1".to_string()),
    }
}

fn pipeline(
    config: PipelineConfig,
    registry: HandlerRegistry,
) -> (Arc<WebhookPipeline>, Arc<MemoryEventStore>) {
    let store = Arc::new(MemoryEventStore::new());
    let pipeline = Arc::new(WebhookPipeline::new(config, store.clone(), Arc::new(registry)));
    (pipeline, store)
}

#[tokio::test]
async fn happy_path_processes_once_and_counts_success() {
    let calls = Arc::new(AtomicU32::new(0));
    let mut registry = HandlerRegistry::new();
    let calls_clone = calls.clone();
    registry.register(
        "checkout.session.completed",
        Arc::new(move |_event| {
            let calls = calls_clone.clone();
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(())
            })
        }),
    );
    let config = PipelineConfig::new().with_signature_secret(SECRET);
    let (pipeline, _) = pipeline(config, registry);

    let response = pipeline
        .handle(signed_delivery("evt_1", "checkout.session.completed"))
        .await;

    assert_eq!(response.status, 200);
    assert!(response.body.received);
    assert_eq!(response.body.event_id.as_deref(), Some("evt_1"));
    assert_eq!(response.body.success, Some(true));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let stats = pipeline
        .metrics()
        .get_statistics(Duration::from_secs(60))
        .await
        .unwrap();
    assert_eq!(stats.processed, 1);
    assert_eq!(stats.total_received, 1);
}

#[tokio::test]
async fn sequential_duplicate_executes_handler_once() {
    let calls = Arc::new(AtomicU32::new(0));
    let mut registry = HandlerRegistry::new();
    let calls_clone = calls.clone();
    registry.register(
        "payment_intent.succeeded",
        Arc::new(move |_event| {
            let calls = calls_clone.clone();
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        }),
    );
    let config = PipelineConfig::new().with_signature_secret(SECRET);
    let (pipeline, _) = pipeline(config, registry);

    let first = pipeline
        .handle(signed_delivery("evt_dup", "payment_intent.succeeded"))
        .await;
    assert_eq!(first.body.success, Some(true));
    assert!(first.body.duplicate.is_none());

    let second = pipeline
        .handle(signed_delivery("evt_dup", "payment_intent.succeeded"))
        .await;
    assert_eq!(second.status, 200);
    assert!(second.body.received);
    assert_eq!(second.body.duplicate, Some(true));

    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn concurrent_duplicates_share_single_execution() {
    let calls = Arc::new(AtomicU32::new(0));
    let mut registry = HandlerRegistry::new();
    let calls_clone = calls.clone();
    registry.register(
        "payment_intent.succeeded",
        Arc::new(move |_event| {
            let calls = calls_clone.clone();
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok(())
            })
        }),
    );
    let config = PipelineConfig::new().with_signature_secret(SECRET);
    let (pipeline, _) = pipeline(config, registry);

    let p1 = pipeline.clone();
    let p2 = pipeline.clone();
    let (r1, r2) = tokio::join!(
        p1.handle(signed_delivery("evt_race", "payment_intent.succeeded")),
        p2.handle(signed_delivery("evt_race", "payment_intent.succeeded")),
    );

    // Both callers receive a result derived from the single execution
    assert_eq!(r1.status, 200);
    assert_eq!(r2.status, 200);
    assert!(r1.body.received);
    assert!(r2.body.received);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn retry_ceiling_dead_letters_exactly_once() {
    let calls = Arc::new(AtomicU32::new(0));
    let mut registry = HandlerRegistry::new();
    let calls_clone = calls.clone();
    registry.register(
        "invoice.payment_failed",
        Arc::new(move |_event| {
            let calls = calls_clone.clone();
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(HookwireError::Handler {
                    message: "fulfillment service down".to_string(),
                })
            })
        }),
    );
    let config = PipelineConfig::new().with_signature_secret(SECRET);
    let (pipeline, store) = pipeline(config, registry);

    let response = pipeline
        .handle(signed_delivery("evt_dead", "invoice.payment_failed"))
        .await;

    // Anti-storm policy: exhausted retries still acknowledged with 200
    assert_eq!(response.status, 200);
    assert_eq!(response.body.success, Some(false));
    assert!(response.body.error.unwrap().contains("retries exhausted"));

    // Initial attempt plus three retries
    assert_eq!(calls.load(Ordering::SeqCst), 4);

    let entries = store.get_dead_letters(None, None).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].event_id, "evt_dead");
    assert_eq!(entries[0].attempts, 3);
    assert!(entries[0].reason.contains("fulfillment service down"));

    // Redelivery after dead-lettering is a duplicate, not a new attempt
    let redelivery = pipeline
        .handle(signed_delivery("evt_dead", "invoice.payment_failed"))
        .await;
    assert_eq!(redelivery.body.duplicate, Some(true));
    assert_eq!(calls.load(Ordering::SeqCst), 4);
    assert_eq!(store.count_dead_letters().await.unwrap(), 1);
}

#[tokio::test(start_paused = true)]
async fn backoff_schedule_matches_configuration() {
    let call_times: Arc<Mutex<Vec<tokio::time::Instant>>> = Arc::new(Mutex::new(Vec::new()));
    let mut registry = HandlerRegistry::new();
    let times = call_times.clone();
    registry.register(
        "invoice.payment_failed",
        Arc::new(move |_event| {
            let times = times.clone();
            Box::pin(async move {
                times.lock().unwrap().push(tokio::time::Instant::now());
                Err(HookwireError::Handler {
                    message: "still down".to_string(),
                })
            })
        }),
    );
    let config = PipelineConfig::new().with_signature_secret(SECRET);
    let (pipeline, _) = pipeline(config, registry);

    pipeline
        .handle(signed_delivery("evt_backoff", "invoice.payment_failed"))
        .await;

    let times = call_times.lock().unwrap();
    assert_eq!(times.len(), 4);

    let gap1 = times[1].duration_since(times[0]);
    let gap2 = times[2].duration_since(times[1]);
    let gap3 = times[3].duration_since(times[2]);

    // Default schedule: 1s before attempt 1, 5s before attempt 2, 10s before attempt 3
    assert!(gap1 >= Duration::from_millis(1000) && gap1 < Duration::from_millis(1500));
    assert!(gap2 >= Duration::from_millis(5000) && gap2 < Duration::from_millis(5500));
    assert!(gap3 >= Duration::from_millis(10000) && gap3 < Duration::from_millis(10500));
}

#[tokio::test(start_paused = true)]
async fn retry_recovers_when_handler_starts_succeeding() {
    let calls = Arc::new(AtomicU32::new(0));
    let mut registry = HandlerRegistry::new();
    let calls_clone = calls.clone();
    registry.register(
        "charge.refunded",
        Arc::new(move |_event| {
            let calls = calls_clone.clone();
            Box::pin(async move {
                // Fail twice, then succeed
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(HookwireError::Handler {
                        message: "transient".to_string(),
                    })
                } else {
                    Ok(())
                }
            })
        }),
    );
    let config = PipelineConfig::new().with_signature_secret(SECRET);
    let (pipeline, store) = pipeline(config, registry);

    let response = pipeline
        .handle(signed_delivery("evt_recover", "charge.refunded"))
        .await;

    assert_eq!(response.status, 200);
    assert_eq!(response.body.success, Some(true));
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    // Success was durably marked; nothing dead-lettered
    assert!(store.is_processed("evt_recover").await.unwrap());
    assert_eq!(store.count_dead_letters().await.unwrap(), 0);
}

#[tokio::test]
async fn unsupported_type_never_retried_or_dead_lettered() {
    let config = PipelineConfig::new().with_signature_secret(SECRET);
    let (pipeline, store) = pipeline(config, HandlerRegistry::new());

    let response = pipeline
        .handle(signed_delivery("evt_unsup", "customer.subscription.deleted"))
        .await;

    assert_eq!(response.status, 400);
    assert_eq!(response.body.success, Some(false));

    // Zero retries happened and nothing was dead-lettered
    assert_eq!(store.count_dead_letters().await.unwrap(), 0);
    assert!(pipeline.retry_manager().attempts("evt_unsup").await.is_none());

    let stats = pipeline
        .metrics()
        .get_statistics(Duration::from_secs(60))
        .await
        .unwrap();
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.dead_lettered, 0);
}

#[tokio::test(start_paused = true)]
async fn timeout_is_retried_then_dead_lettered() {
    let calls = Arc::new(AtomicU32::new(0));
    let mut registry = HandlerRegistry::new();
    let calls_clone = calls.clone();
    registry.register(
        "payment_intent.processing",
        Arc::new(move |_event| {
            let calls = calls_clone.clone();
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(600)).await;
                Ok(())
            })
        }),
    );
    let config = PipelineConfig::new()
        .with_signature_secret(SECRET)
        .with_processing_timeout(Duration::from_millis(200))
        .with_max_retry_attempts(2)
        .with_retry_delays(vec![Duration::from_millis(10), Duration::from_millis(20)]);
    let (pipeline, store) = pipeline(config, registry);

    let response = pipeline
        .handle(signed_delivery("evt_slow", "payment_intent.processing"))
        .await;

    assert_eq!(response.status, 200);
    assert_eq!(response.body.success, Some(false));
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    let entries = store.get_dead_letters(None, None).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].attempts, 2);
    assert!(entries[0].reason.contains("timed out"));
}

#[tokio::test]
async fn rate_limited_deliveries_are_acknowledged_but_skipped() {
    let calls = Arc::new(AtomicU32::new(0));
    let mut registry = HandlerRegistry::new();
    let calls_clone = calls.clone();
    registry.register(
        "checkout.session.completed",
        Arc::new(move |_event| {
            let calls = calls_clone.clone();
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        }),
    );
    let config = PipelineConfig::new()
        .with_signature_secret(SECRET)
        .with_rate_limit_per_minute(2);
    let (pipeline, _) = pipeline(config, registry);

    for i in 0..2 {
        let response = pipeline
            .handle(signed_delivery(
                &format!("evt_rl_{}", i),
                "checkout.session.completed",
            ))
            .await;
        assert_eq!(response.body.success, Some(true));
    }

    let throttled = pipeline
        .handle(signed_delivery("evt_rl_2", "checkout.session.completed"))
        .await;
    assert_eq!(throttled.status, 200);
    assert!(throttled.body.received);
    assert!(throttled.body.warning.is_some());
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let stats = pipeline
        .metrics()
        .get_statistics(Duration::from_secs(60))
        .await
        .unwrap();
    assert_eq!(stats.rate_limited, 1);
}
