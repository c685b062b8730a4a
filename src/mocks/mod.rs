//! Mock implementations for testing.
//!
//! [`MockTransport`] replays queued responses in order and records every
//! request it sees, so tests can assert on exactly what went over the wire.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::transport::{HttpMethod, HttpRequest, HttpResponse, HttpTransport, TransportError};

/// A recorded request.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    /// HTTP method.
    pub method: HttpMethod,
    /// Request path or absolute URL.
    pub path: String,
    /// Request body.
    pub body: Option<Vec<u8>>,
    /// Request headers.
    pub headers: HashMap<String, String>,
}

impl RecordedRequest {
    /// Parses the body as JSON.
    pub fn json(&self) -> Option<Value> {
        self.body
            .as_deref()
            .and_then(|b| serde_json::from_slice(b).ok())
    }
}

/// A mock response.
#[derive(Debug, Clone)]
pub struct MockResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers.
    pub headers: HashMap<String, String>,
    /// Response body.
    pub body: Vec<u8>,
    /// Time to wait before answering.
    pub delay: Option<Duration>,
}

impl MockResponse {
    /// Creates a 200 JSON response.
    pub fn json<T: serde::Serialize>(value: &T) -> Self {
        let body = serde_json::to_vec(value).unwrap_or_default();
        let mut headers = HashMap::new();
        headers.insert("content-type".to_string(), "application/json".to_string());

        Self {
            status: 200,
            headers,
            body,
            delay: None,
        }
    }

    /// Creates an error response with a `{"detail": ...}` body.
    pub fn error(status: u16, detail: &str) -> Self {
        Self::json(&json!({ "detail": detail })).with_status(status)
    }

    /// Sets the status.
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    /// Adds a header.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers
            .insert(name.to_ascii_lowercase(), value.to_string());
        self
    }

    /// Delays the response.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[derive(Debug, Clone)]
enum MockOutcome {
    Respond(MockResponse),
    Fail(TransportError),
}

/// Mock HTTP transport for testing.
#[derive(Debug, Default)]
pub struct MockTransport {
    outcomes: Mutex<VecDeque<MockOutcome>>,
    requests: Mutex<Vec<RecordedRequest>>,
    default_response: Mutex<Option<MockResponse>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockTransport {
    /// Creates a new mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a response.
    pub fn queue(&self, response: MockResponse) -> &Self {
        lock(&self.outcomes).push_back(MockOutcome::Respond(response));
        self
    }

    /// Queues a JSON response.
    pub fn queue_json<T: serde::Serialize>(&self, value: &T) -> &Self {
        self.queue(MockResponse::json(value))
    }

    /// Queues an error response.
    pub fn queue_error(&self, status: u16, detail: &str) -> &Self {
        self.queue(MockResponse::error(status, detail))
    }

    /// Queues a transport-level failure.
    pub fn queue_failure(&self, error: TransportError) -> &Self {
        lock(&self.outcomes).push_back(MockOutcome::Fail(error));
        self
    }

    /// Sets the response used once the queue is empty.
    pub fn set_default(&self, response: MockResponse) {
        *lock(&self.default_response) = Some(response);
    }

    /// Gets all recorded requests.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        lock(&self.requests).clone()
    }

    /// Gets the last recorded request.
    pub fn last_request(&self) -> Option<RecordedRequest> {
        lock(&self.requests).last().cloned()
    }

    /// Returns the number of requests made.
    pub fn request_count(&self) -> usize {
        lock(&self.requests).len()
    }

    /// Returns the number of requests made with `method`.
    pub fn count_method(&self, method: HttpMethod) -> usize {
        lock(&self.requests)
            .iter()
            .filter(|r| r.method == method)
            .count()
    }

    fn next_outcome(&self) -> MockOutcome {
        if let Some(outcome) = lock(&self.outcomes).pop_front() {
            return outcome;
        }
        let fallback = lock(&self.default_response)
            .clone()
            .unwrap_or_else(|| MockResponse::error(500, "No mock response configured"));
        MockOutcome::Respond(fallback)
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        lock(&self.requests).push(RecordedRequest {
            method: request.method,
            path: request.path,
            body: request.body,
            headers: request.headers,
        });

        match self.next_outcome() {
            MockOutcome::Respond(response) => {
                if let Some(delay) = response.delay {
                    tokio::time::sleep(delay).await;
                }
                Ok(HttpResponse {
                    status: response.status,
                    headers: response.headers,
                    body: response.body,
                })
            }
            MockOutcome::Fail(error) => Err(error),
        }
    }
}

/// Canned prediction payloads.
pub mod fixtures {
    use serde_json::{json, Value};

    /// Poll URL used by fixtures for prediction `id`.
    pub fn poll_url(id: &str) -> String {
        format!("https://api.replicate.com/v1/predictions/{}", id)
    }

    /// A prediction with the given status and a poll link.
    pub fn prediction(id: &str, status: &str) -> Value {
        json!({
            "id": id,
            "status": status,
            "output": null,
            "error": null,
            "urls": { "get": poll_url(id), "cancel": format!("{}/cancel", poll_url(id)) }
        })
    }

    /// A prediction with no poll link.
    pub fn prediction_without_urls(id: &str, status: &str) -> Value {
        json!({ "id": id, "status": status, "output": null })
    }

    /// A succeeded prediction carrying `output` and token counts.
    pub fn succeeded(id: &str, output: Value) -> Value {
        json!({
            "id": id,
            "status": "succeeded",
            "output": output,
            "error": null,
            "urls": { "get": poll_url(id) },
            "metrics": { "input_token_count": 42, "output_token_count": 7, "predict_time": 0.8 }
        })
    }

    /// A failed prediction with an error message.
    pub fn failed(id: &str, error: &str) -> Value {
        json!({
            "id": id,
            "status": "failed",
            "output": null,
            "error": error,
            "urls": { "get": poll_url(id) }
        })
    }
}
