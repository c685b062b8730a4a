//! Integration tests against a local mock Replicate server.

mod reply;
mod resilience;

use replicate_reply::{
    CascadeConfig, ReplicateClient, ReplyRequest, ResilienceConfig, RetryConfig,
};
use serde_json::{json, Value};
use std::time::Duration;
use wiremock::MockServer;

pub const TOKEN: &str = "r8_integration_token_0001";
pub const PRIMARY: &str = "openai/gpt-4o-mini";
pub const FALLBACK: &str = "openai/gpt-4.1-mini";
pub const EXTRA: &str = "meta/meta-llama-3-70b-instruct";

pub fn create_path(model: &str) -> String {
    format!("/models/{}/predictions", model)
}

pub fn prediction(server: &MockServer, id: &str, status: &str, output: Value) -> Value {
    json!({
        "id": id,
        "status": status,
        "output": output,
        "error": null,
        "urls": { "get": format!("{}/predictions/{}", server.uri(), id) },
        "metrics": { "input_token_count": 11, "output_token_count": 3 }
    })
}

/// Fast retries so tests finish quickly on a real clock.
pub fn fast_resilience() -> ResilienceConfig {
    ResilienceConfig::new().retry(
        RetryConfig::new()
            .initial_delay(Duration::from_millis(5))
            .max_delay(Duration::from_millis(20))
            .jitter(false),
    )
}

/// Single-backend cascade, for tests that only care about one backend.
pub fn single_backend(retry: RetryConfig) -> ResilienceConfig {
    ResilienceConfig::new()
        .retry(retry)
        .cascade(CascadeConfig::default().extra_fallbacks(Vec::<String>::new()))
}

pub fn client(server: &MockServer, resilience: ResilienceConfig) -> ReplicateClient {
    ReplicateClient::builder()
        .api_token(TOKEN)
        .base_url(server.uri())
        .timeout(Duration::from_secs(2))
        .poll_interval(Duration::from_millis(20))
        .max_poll_attempts(5)
        .resilience(resilience)
        .build()
        .expect("client should build")
}

pub fn hello() -> ReplyRequest {
    ReplyRequest::builder()
        .system("You are a test assistant.")
        .user("Say hello")
        .build()
        .expect("valid request")
}
