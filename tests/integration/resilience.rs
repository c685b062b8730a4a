//! Retry, fallback, circuit breaking, timeouts and cancellation over HTTP.

use super::*;
use replicate_reply::{
    CircuitBreakerConfig, ErrorClass, ReplicateClient, ReplicateError, RetryConfig,
};
use serde_json::{json, Value};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_transient_failures_fall_back_to_next_backend() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(create_path(PRIMARY)))
        .respond_with(ResponseTemplate::new(503).set_body_json(json!({"detail": "overloaded node"})))
        .expect(3)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path(create_path(FALLBACK)))
        .respond_with(ResponseTemplate::new(201).set_body_json(prediction(
            &server,
            "p2",
            "succeeded",
            json!("fallback answer"),
        )))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path(create_path(EXTRA)))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let client = client(&server, fast_resilience());
    let reply = client.generate_reply(hello()).await.unwrap();

    assert_eq!(reply.backend_used, FALLBACK);
    assert_eq!(reply.text, "fallback answer");
    assert_eq!(client.metrics().get_metrics().fallbacks, 1);
}

#[tokio::test]
async fn test_rate_limit_aborts_cascade() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(create_path(PRIMARY)))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("retry-after", "12")
                .insert_header("x-request-id", "req-rl-1")
                .set_body_json(json!({"detail": "Request was throttled."})),
        )
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path(create_path(FALLBACK)))
        .respond_with(ResponseTemplate::new(201))
        .expect(0)
        .mount(&server)
        .await;

    let err = client(&server, fast_resilience())
        .generate_reply(hello())
        .await
        .unwrap_err();

    assert_eq!(err.class(), ErrorClass::RateLimitedOrCapacity);
    assert_eq!(err.retry_after(), Some(Duration::from_secs(12)));
    assert_eq!(err.request_id(), Some("req-rl-1"));
}

#[tokio::test]
async fn test_unprocessable_continues_cascade() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(create_path(PRIMARY)))
        .respond_with(ResponseTemplate::new(422).set_body_json(json!({"detail": "image_input not supported"})))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path(create_path(FALLBACK)))
        .respond_with(ResponseTemplate::new(201).set_body_json(prediction(
            &server,
            "p2",
            "succeeded",
            json!("ok"),
        )))
        .expect(1)
        .mount(&server)
        .await;

    let reply = client(&server, fast_resilience())
        .generate_reply(hello())
        .await
        .unwrap();
    assert_eq!(reply.backend_used, FALLBACK);
}

#[tokio::test]
async fn test_circuit_opens_after_repeated_failures() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(create_path(PRIMARY)))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({"detail": "boom"})))
        .expect(3)
        .mount(&server)
        .await;

    let resilience = single_backend(RetryConfig::no_retries())
        .circuit_breaker(CircuitBreakerConfig::new().failure_threshold(3));
    let client = client(&server, resilience);

    for _ in 0..3 {
        let err = client.generate_reply(hello()).await.unwrap_err();
        assert_eq!(err.status_code(), Some(500));
    }

    let err = client.generate_reply(hello()).await.unwrap_err();
    assert!(matches!(err, ReplicateError::CircuitOpen { .. }));
    assert!(client.circuit_registry().is_open(PRIMARY));
    assert_eq!(client.metrics().get_metrics().circuit_rejections, 1);
}

#[tokio::test]
async fn test_slow_backend_times_out_and_retries() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(create_path(PRIMARY)))
        .respond_with(
            ResponseTemplate::new(201)
                .set_body_json(prediction(&server, "p1", "succeeded", json!("late")))
                .set_delay(Duration::from_millis(500)),
        )
        .expect(3)
        .mount(&server)
        .await;

    let client = ReplicateClient::builder()
        .api_token(TOKEN)
        .base_url(server.uri())
        .timeout(Duration::from_millis(100))
        .resilience(single_backend(
            RetryConfig::new().initial_delay(Duration::from_millis(5)).jitter(false),
        ))
        .build()
        .unwrap();

    let err = client.generate_reply(hello()).await.unwrap_err();
    match err {
        ReplicateError::Timeout { operation, timeout } => {
            assert_eq!(operation, "create_prediction");
            assert_eq!(timeout, Duration::from_millis(100));
        }
        other => panic!("Expected timeout, got {:?}", other),
    }
}

#[tokio::test]
async fn test_poll_budget_exhaustion_is_incomplete() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(create_path(PRIMARY)))
        .respond_with(
            ResponseTemplate::new(201)
                .set_body_json(prediction(&server, "p1", "starting", Value::Null)),
        )
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/predictions/p1"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(prediction(&server, "p1", "processing", Value::Null)),
        )
        .expect(5)
        .mount(&server)
        .await;

    let err = client(&server, single_backend(RetryConfig::default()))
        .generate_reply(hello())
        .await
        .unwrap_err();

    assert!(matches!(err, ReplicateError::PredictionIncomplete { .. }));
}

#[tokio::test]
async fn test_failed_prediction_reports_backend_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(create_path(PRIMARY)))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": "p1",
            "status": "failed",
            "output": null,
            "error": "prediction input violates policy"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let err = client(&server, single_backend(RetryConfig::default()))
        .generate_reply(hello())
        .await
        .unwrap_err();

    match err {
        ReplicateError::PredictionFailed { detail, .. } => {
            assert_eq!(detail.as_deref(), Some("prediction input violates policy"));
        }
        other => panic!("Expected failed prediction, got {:?}", other),
    }
}

#[tokio::test]
async fn test_cancellation_stops_polling() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(create_path(PRIMARY)))
        .respond_with(
            ResponseTemplate::new(201)
                .set_body_json(prediction(&server, "p1", "starting", Value::Null)),
        )
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/predictions/p1"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(prediction(&server, "p1", "processing", Value::Null)),
        )
        .mount(&server)
        .await;

    let client = ReplicateClient::builder()
        .api_token(TOKEN)
        .base_url(server.uri())
        .poll_interval(Duration::from_millis(50))
        .max_poll_attempts(1_000)
        .resilience(fast_resilience())
        .build()
        .unwrap();

    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        canceller.cancel();
    });

    let started = std::time::Instant::now();
    let err = client
        .generate_reply_with_cancellation(hello(), &token)
        .await
        .unwrap_err();

    assert!(matches!(err, ReplicateError::Cancelled));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(
        client.circuit_registry().snapshot(PRIMARY).consecutive_failures,
        0
    );
}
