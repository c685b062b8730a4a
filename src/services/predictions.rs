//! Prediction service: creates a job and polls it until it settles.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::instrument;
use url::Url;

use crate::auth::AuthProvider;
use crate::config::ReplicateConfig;
use crate::errors::{ReplicateError, ReplicateResult};
use crate::observability::{redact, redact_truncated, MAX_DETAIL_LEN};
use crate::resilience::{sleep_or_cancel, TimeoutInvoker};
use crate::transport::{HttpRequest, HttpResponse, HttpTransport};
use crate::types::models::ModelId;
use crate::types::prediction::{CreatePredictionRequest, Prediction, PredictionInput};

const USER_AGENT: &str = concat!("replicate-reply/", env!("CARGO_PKG_VERSION"));

/// Creates predictions and waits for them to reach a terminal status.
///
/// Every network call runs under the per-call deadline. Polling never turns
/// an unfinished job into an error: when the budget runs out the last
/// observed job is returned as-is.
pub struct PredictionService {
    transport: Arc<dyn HttpTransport>,
    auth: Arc<dyn AuthProvider>,
    invoker: TimeoutInvoker,
    base_url: Option<Url>,
    poll_interval: Duration,
    max_poll_attempts: u32,
    custom_headers: Vec<(String, String)>,
}

impl PredictionService {
    /// Creates a new prediction service.
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        auth: Arc<dyn AuthProvider>,
        config: &ReplicateConfig,
    ) -> Self {
        Self {
            transport,
            auth,
            invoker: TimeoutInvoker::new(config.timeout),
            base_url: Url::parse(&config.base_url).ok(),
            poll_interval: config.poll_interval,
            max_poll_attempts: config.max_poll_attempts,
            custom_headers: config.custom_headers.clone(),
        }
    }

    /// Creates a prediction and polls it until terminal or out of budget.
    #[instrument(skip(self, input, cancel), fields(backend = %model))]
    pub async fn run(
        &self,
        model: &ModelId,
        input: &PredictionInput,
        cancel: &CancellationToken,
    ) -> ReplicateResult<Prediction> {
        let created = self.create(model, input, cancel).await?;
        self.wait(created, cancel).await
    }

    /// Submits a new prediction.
    #[instrument(skip(self, input, cancel), fields(backend = %model))]
    pub async fn create(
        &self,
        model: &ModelId,
        input: &PredictionInput,
        cancel: &CancellationToken,
    ) -> ReplicateResult<Prediction> {
        let body = serde_json::to_vec(&CreatePredictionRequest { input })?;
        let request = self
            .build_request(HttpRequest::post(model.predictions_path()))
            .with_header("Content-Type", "application/json")
            .with_body(body);

        let response = self
            .invoker
            .invoke("create_prediction", cancel, async {
                self.transport.send(request).await.map_err(ReplicateError::from)
            })
            .await?;

        let prediction = parse_prediction(&response)?;
        tracing::info!(
            prediction_id = %prediction.id,
            status = %prediction.status,
            "Prediction created"
        );
        Ok(prediction)
    }

    /// Fetches the current state of a prediction from its poll URL.
    pub async fn get(&self, poll_url: &str, cancel: &CancellationToken) -> ReplicateResult<Prediction> {
        let request = self.build_request(HttpRequest::get(poll_url));

        let response = self
            .invoker
            .invoke("poll_prediction", cancel, async {
                self.transport.send(request).await.map_err(ReplicateError::from)
            })
            .await?;

        parse_prediction(&response)
    }

    /// Polls `prediction` until it is terminal or the poll budget is spent.
    ///
    /// Returns immediately, without any request, if the job is already
    /// terminal, carries no poll URL, or points its poll URL at a different
    /// origin than the configured base URL.
    #[instrument(skip(self, prediction, cancel), fields(prediction_id = %prediction.id))]
    pub async fn wait(
        &self,
        prediction: Prediction,
        cancel: &CancellationToken,
    ) -> ReplicateResult<Prediction> {
        if prediction.status.is_terminal() {
            return Ok(prediction);
        }
        let Some(poll_url) = prediction.poll_url().map(str::to_string) else {
            tracing::debug!("No poll URL, returning initial job");
            return Ok(prediction);
        };
        if !self.is_same_origin(&poll_url) {
            tracing::warn!(
                poll_url = %redact(&poll_url),
                "Poll URL is outside the configured origin, not following it"
            );
            return Ok(prediction);
        }

        let mut current = prediction;
        for attempt in 1..=self.max_poll_attempts {
            sleep_or_cancel(self.poll_interval, cancel).await?;
            current = self.get(&poll_url, cancel).await?;

            tracing::debug!(attempt, status = %current.status, "Polled prediction");
            if current.status.is_terminal() {
                return Ok(current);
            }
        }

        tracing::warn!(
            attempts = self.max_poll_attempts,
            status = %current.status,
            "Poll budget exhausted"
        );
        Ok(current)
    }

    /// Relative poll URLs resolve against the base URL and are accepted.
    fn is_same_origin(&self, poll_url: &str) -> bool {
        match Url::parse(poll_url) {
            Ok(url) => self.base_url.as_ref().is_some_and(|base| {
                base.scheme() == url.scheme()
                    && base.host_str() == url.host_str()
                    && base.port_or_known_default() == url.port_or_known_default()
            }),
            Err(url::ParseError::RelativeUrlWithoutBase) => true,
            Err(_) => false,
        }
    }

    fn build_request(&self, request: HttpRequest) -> HttpRequest {
        let mut headers = HashMap::new();
        self.auth.apply_auth(&mut headers);
        headers.insert("User-Agent".to_string(), USER_AGENT.to_string());
        headers.insert("X-Request-Id".to_string(), uuid::Uuid::new_v4().to_string());
        for (name, value) in &self.custom_headers {
            headers.insert(name.clone(), value.clone());
        }

        let mut request = request;
        request.headers.extend(headers);
        request
    }
}

impl std::fmt::Debug for PredictionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PredictionService")
            .field("invoker", &self.invoker)
            .field("poll_interval", &self.poll_interval)
            .field("max_poll_attempts", &self.max_poll_attempts)
            .finish_non_exhaustive()
    }
}

fn parse_prediction(response: &HttpResponse) -> ReplicateResult<Prediction> {
    if !response.is_success() {
        return Err(error_from_response(response));
    }
    response.json::<Prediction>().map_err(|e| ReplicateError::Serialization {
        message: format!("Failed to parse prediction: {}", e),
    })
}

/// Builds the typed error for a non-2xx response.
pub(crate) fn error_from_response(response: &HttpResponse) -> ReplicateError {
    let request_id = response.header("x-request-id").map(str::to_string);
    let retry_after = response.header("retry-after").and_then(parse_retry_after);
    let detail = error_detail(&response.body);

    tracing::warn!(
        status = response.status,
        request_id = request_id.as_deref().unwrap_or(""),
        detail = %detail,
        "Backend returned an error status"
    );

    ReplicateError::from_status(response.status, request_id, detail, retry_after)
}

fn error_detail(body: &[u8]) -> String {
    let from_json = serde_json::from_slice::<serde_json::Value>(body)
        .ok()
        .and_then(|value| {
            ["detail", "error", "message", "title"]
                .iter()
                .find_map(|field| match value.get(*field)? {
                    serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
                    serde_json::Value::Object(inner) => inner
                        .get("message")
                        .and_then(serde_json::Value::as_str)
                        .map(str::to_string),
                    _ => None,
                })
        });

    let raw = from_json.unwrap_or_else(|| String::from_utf8_lossy(body).trim().to_string());
    if raw.is_empty() {
        "no detail".to_string()
    } else {
        redact_truncated(&raw, MAX_DETAIL_LEN)
    }
}

/// Parses `retry-after` as delta-seconds or an HTTP date.
fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<f64>() {
        return Duration::try_from_secs_f64(secs).ok();
    }
    let at = chrono::DateTime::parse_from_rfc2822(value).ok()?;
    let delta = at.with_timezone(&chrono::Utc) - chrono::Utc::now();
    delta.to_std().ok()
}
