//! Reply service: the entry point that turns a conversation into one reply.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use super::filter::ContentFilter;
use super::predictions::PredictionService;
use crate::config::ReplicateConfig;
use crate::errors::{ReplicateError, ReplicateResult};
use crate::observability::{redact, MetricsCollector, RequestTimer};
use crate::output::normalize_output;
use crate::resilience::FallbackCascade;
use crate::types::conversation::{AssistantReply, ReplyRequest, Role};
use crate::types::models::ModelId;
use crate::types::prediction::{Prediction, PredictionInput, PredictionStatus};

/// Most recent history turns included in the prompt.
pub const MAX_HISTORY_TURNS: usize = 20;

/// Renders history and the new user message as a plain-text transcript.
///
/// Blank turns are skipped and only the last [`MAX_HISTORY_TURNS`] survive.
/// The transcript ends with an `Assistant:` cue for the model to complete.
pub fn compose_prompt(request: &ReplyRequest) -> String {
    let turns: Vec<_> = request
        .history
        .iter()
        .filter(|turn| !turn.content.trim().is_empty())
        .collect();
    let skip = turns.len().saturating_sub(MAX_HISTORY_TURNS);

    let mut lines: Vec<String> = turns
        .into_iter()
        .skip(skip)
        .map(|turn| format!("{}: {}", turn.role.label(), turn.content.trim()))
        .collect();
    lines.push(format!("{}: {}", Role::User.label(), request.user_prompt.trim()));
    lines.push(format!("{}:", Role::Assistant.label()));
    lines.join("\n")
}

struct Settled {
    text: String,
    input_tokens: Option<u64>,
    output_tokens: Option<u64>,
}

/// Turns a polled job into reply text or a typed failure.
fn settle(prediction: Prediction, backend: &ModelId) -> ReplicateResult<Settled> {
    match prediction.status {
        PredictionStatus::Succeeded => {
            let text = normalize_output(&prediction.output, &backend.to_string())?;
            Ok(Settled {
                text,
                input_tokens: prediction.input_tokens(),
                output_tokens: prediction.output_tokens(),
            })
        }
        PredictionStatus::Failed | PredictionStatus::Canceled => {
            Err(ReplicateError::PredictionFailed {
                detail: prediction.error.as_deref().map(redact),
                prediction_id: prediction.id,
                status: prediction.status,
            })
        }
        PredictionStatus::Starting | PredictionStatus::Processing | PredictionStatus::Unknown => {
            Err(ReplicateError::PredictionIncomplete {
                prediction_id: prediction.id,
                status: prediction.status,
            })
        }
    }
}

/// Generates assistant replies through the fallback cascade.
pub struct ReplyService {
    config: Arc<ReplicateConfig>,
    predictions: Arc<PredictionService>,
    cascade: FallbackCascade,
    filter: Arc<dyn ContentFilter>,
    metrics: Arc<dyn MetricsCollector>,
}

impl ReplyService {
    /// Creates a new reply service.
    pub fn new(
        config: Arc<ReplicateConfig>,
        predictions: Arc<PredictionService>,
        cascade: FallbackCascade,
        filter: Arc<dyn ContentFilter>,
        metrics: Arc<dyn MetricsCollector>,
    ) -> Self {
        Self {
            config,
            predictions,
            cascade,
            filter,
            metrics,
        }
    }

    /// Generates one reply.
    pub async fn generate(&self, request: ReplyRequest) -> ReplicateResult<AssistantReply> {
        self.generate_with_cancellation(request, &CancellationToken::new())
            .await
    }

    /// Generates one reply, stopping promptly once `cancel` fires.
    #[instrument(skip_all, fields(requested = request.model.as_deref().unwrap_or("default")))]
    pub async fn generate_with_cancellation(
        &self,
        request: ReplyRequest,
        cancel: &CancellationToken,
    ) -> ReplicateResult<AssistantReply> {
        let timer = RequestTimer::start();
        let result = self.generate_inner(&request, cancel).await;

        match &result {
            Ok(reply) => {
                self.metrics.record_success(&reply.backend_used, timer.elapsed());
                tracing::info!(
                    backend = %reply.backend_used,
                    duration_ms = timer.elapsed().as_millis() as u64,
                    "Reply generated"
                );
            }
            Err(err) => {
                self.metrics.record_failure(err.kind(), timer.elapsed());
                tracing::warn!(
                    error = %err,
                    class = %err.class(),
                    duration_ms = timer.elapsed().as_millis() as u64,
                    "Reply failed"
                );
            }
        }
        result
    }

    async fn generate_inner(
        &self,
        request: &ReplyRequest,
        cancel: &CancellationToken,
    ) -> ReplicateResult<AssistantReply> {
        request.validate()?;
        self.filter.check_input(request).await?;

        let primary = match request.model.as_deref() {
            Some(requested) => ModelId::parse(requested)?,
            None => self.config.default_model_id()?,
        };
        let candidates = self
            .cascade
            .candidates(primary, self.config.fallback_model_id()?)?;

        let input = PredictionInput {
            prompt: compose_prompt(request),
            system_prompt: request.system_prompt.clone(),
            image_input: request.image_url.clone().map(|url| vec![url]),
        };

        let predictions = &self.predictions;
        let metrics = &self.metrics;
        let input = &input;
        let (backend, settled) = self
            .cascade
            .run(&candidates, cancel, move |model: ModelId| async move {
                metrics.record_attempt(&model.to_string());
                let prediction = predictions.run(&model, input, cancel).await?;
                settle(prediction, &model)
            })
            .await?;

        self.filter.check_output(&settled.text).await?;

        if settled.input_tokens.is_some() || settled.output_tokens.is_some() {
            self.metrics.record_tokens(
                settled.input_tokens.unwrap_or(0),
                settled.output_tokens.unwrap_or(0),
            );
        }

        Ok(AssistantReply {
            backend_used: backend.to_string(),
            text: settled.text,
            input_tokens: settled.input_tokens,
            output_tokens: settled.output_tokens,
        })
    }
}

impl std::fmt::Debug for ReplyService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplyService")
            .field("predictions", &self.predictions)
            .field("cascade", &self.cascade)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::ApiTokenAuth;
    use crate::mocks::{fixtures, MockResponse, MockTransport};
    use crate::observability::DefaultMetricsCollector;
    use crate::resilience::{
        CascadeConfig, CircuitBreakerConfig, InMemoryCircuitRegistry, ResilienceConfig,
        RetryConfig,
    };
    use crate::services::NoopContentFilter;
    use crate::transport::HttpMethod;
    use crate::types::conversation::ChatTurn;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::time::Duration;

    struct Harness {
        transport: Arc<MockTransport>,
        metrics: Arc<DefaultMetricsCollector>,
        service: ReplyService,
    }

    fn harness_with_filter(filter: Arc<dyn ContentFilter>) -> Harness {
        let config = Arc::new(
            ReplicateConfig::builder()
                .api_token("r8_test_token_abcd")
                .poll_interval(Duration::from_millis(100))
                .max_poll_attempts(3)
                .build()
                .unwrap(),
        );
        let transport = Arc::new(MockTransport::new());
        let metrics = Arc::new(DefaultMetricsCollector::new());
        let predictions = Arc::new(PredictionService::new(
            transport.clone(),
            Arc::new(ApiTokenAuth::from_string("r8_test_token_abcd")),
            &config,
        ));
        let resilience = ResilienceConfig::new()
            .retry(RetryConfig::new().initial_delay(Duration::from_millis(10)).jitter(false))
            .cascade(CascadeConfig::default());
        let cascade = resilience
            .build_cascade(Some(Arc::new(InMemoryCircuitRegistry::new(
                CircuitBreakerConfig::default(),
            ))))
            .with_metrics(metrics.clone());

        Harness {
            transport,
            metrics: metrics.clone(),
            service: ReplyService::new(config, predictions, cascade, filter, metrics),
        }
    }

    fn harness() -> Harness {
        harness_with_filter(Arc::new(NoopContentFilter))
    }

    fn request() -> ReplyRequest {
        ReplyRequest::builder()
            .system("You are helpful.")
            .user("What is Rust?")
            .build()
            .unwrap()
    }

    #[test]
    fn test_compose_prompt() {
        let request = ReplyRequest::builder()
            .user("  And now?  ")
            .turn(ChatTurn::user("Hi"))
            .turn(ChatTurn::assistant("   "))
            .turn(ChatTurn::assistant("Hello!"))
            .build()
            .unwrap();

        assert_eq!(
            compose_prompt(&request),
            "User: Hi\nAssistant: Hello!\nUser: And now?\nAssistant:"
        );
    }

    #[test]
    fn test_compose_prompt_caps_history() {
        let history = (0..30).map(|i| ChatTurn::user(format!("m{}", i))).collect();
        let request = ReplyRequest::builder()
            .user("last")
            .history(history)
            .build()
            .unwrap();

        let prompt = compose_prompt(&request);
        assert!(!prompt.contains("User: m9\n"));
        assert!(prompt.starts_with("User: m10\n"));
        assert_eq!(prompt.lines().count(), MAX_HISTORY_TURNS + 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reply_from_primary_backend() {
        let h = harness();
        h.transport
            .queue_json(&fixtures::prediction("p1", "starting"))
            .queue_json(&fixtures::succeeded("p1", json!(["Rust is ", {"text": "a language."}])));

        let reply = h.service.generate(request()).await.unwrap();

        assert_eq!(reply.backend_used, "openai/gpt-4o-mini");
        assert_eq!(reply.text, "Rust is a language.");
        assert_eq!(reply.input_tokens, Some(42));
        assert_eq!(reply.output_tokens, Some(7));

        let body = h.transport.requests()[0].json().unwrap();
        assert_eq!(body["input"]["prompt"], "User: What is Rust?\nAssistant:");
        assert_eq!(body["input"]["system_prompt"], "You are helpful.");

        let metrics = h.metrics.get_metrics();
        assert_eq!(metrics.successful_replies, 1);
        assert_eq!(metrics.input_tokens, 42);
    }

    #[tokio::test(start_paused = true)]
    async fn test_falls_back_after_transient_exhaustion() {
        let h = harness();
        for _ in 0..3 {
            h.transport.queue_error(503, "Service Unavailable");
        }
        h.transport
            .queue_json(&fixtures::succeeded("p2", json!("From fallback")));

        let reply = h.service.generate(request()).await.unwrap();

        assert_eq!(reply.backend_used, "openai/gpt-4.1-mini");
        assert_eq!(reply.text, "From fallback");
        let paths: Vec<String> = h.transport.requests().into_iter().map(|r| r.path).collect();
        assert_eq!(paths.len(), 4);
        assert!(paths[..3]
            .iter()
            .all(|p| p == "models/openai/gpt-4o-mini/predictions"));
        assert_eq!(paths[3], "models/openai/gpt-4.1-mini/predictions");
        assert_eq!(h.metrics.get_metrics().fallbacks, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_aborts_without_fallback() {
        let h = harness();
        h.transport.queue_error(429, "Too many requests");

        let err = h.service.generate(request()).await.unwrap_err();

        assert!(matches!(err, ReplicateError::RateLimited { .. }));
        assert_eq!(h.transport.request_count(), 1);
        assert_eq!(h.metrics.get_metrics().errors.get("rate_limited"), Some(&1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_prediction_moves_to_next_backend() {
        let h = harness();
        h.transport
            .queue_json(&fixtures::prediction("p1", "starting"))
            .queue_json(&fixtures::failed("p1", "CUDA error: device-side assert"))
            .queue_json(&fixtures::succeeded("p2", json!("second")));

        let reply = h.service.generate(request()).await.unwrap();
        assert_eq!(reply.backend_used, "openai/gpt-4.1-mini");
    }

    #[tokio::test(start_paused = true)]
    async fn test_out_of_memory_failure_moves_to_next_backend() {
        let h = harness();
        h.transport
            .queue_json(&fixtures::failed(
                "p1",
                "CUDA out of memory. Tried to allocate 20.00 MiB \
                 (GPU 0; 23.65 GiB total capacity; 22.91 GiB already allocated)",
            ))
            .queue_json(&fixtures::succeeded("p2", json!("fits in memory")));

        let reply = h.service.generate(request()).await.unwrap();
        assert_eq!(reply.backend_used, "openai/gpt-4.1-mini");
        assert_eq!(h.transport.count_method(HttpMethod::Post), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_incomplete_prediction_moves_to_next_backend() {
        let h = harness();
        h.transport.queue_json(&fixtures::prediction("p1", "starting"));
        for _ in 0..3 {
            h.transport.queue_json(&fixtures::prediction("p1", "processing"));
        }
        h.transport
            .queue_json(&fixtures::succeeded("p2", json!("eventually")));

        let reply = h.service.generate(request()).await.unwrap();
        assert_eq!(reply.backend_used, "openai/gpt-4.1-mini");
        assert_eq!(reply.text, "eventually");
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_output_everywhere_is_empty_response() {
        let h = harness();
        h.transport
            .set_default(MockResponse::json(&fixtures::succeeded("p", json!([]))));

        let err = h.service.generate(request()).await.unwrap_err();
        assert!(matches!(err, ReplicateError::EmptyResponse { .. }));
        assert_eq!(h.transport.request_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_backend_makes_no_calls() {
        let h = harness();
        let request = ReplyRequest::builder()
            .user("hi")
            .model("acme/not-allowed")
            .build()
            .unwrap();

        let err = h.service.generate(request).await.unwrap_err();
        assert!(matches!(err, ReplicateError::Configuration { .. }));
        assert_eq!(h.transport.request_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_image_is_forwarded() {
        let h = harness();
        h.transport
            .queue_json(&fixtures::succeeded("p1", json!("a cat")));
        let request = ReplyRequest::builder()
            .user("What is this?")
            .image_url("https://example.com/cat.png")
            .build()
            .unwrap();

        h.service.generate(request).await.unwrap();
        let body = h.transport.requests()[0].json().unwrap();
        assert_eq!(body["input"]["image_input"], json!(["https://example.com/cat.png"]));
    }

    struct RejectAll;

    #[async_trait]
    impl ContentFilter for RejectAll {
        async fn check_input(&self, _request: &ReplyRequest) -> ReplicateResult<()> {
            Err(ReplicateError::ContentFilter {
                message: "blocked".to_string(),
            })
        }

        async fn check_output(&self, _text: &str) -> ReplicateResult<()> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_input_filter_runs_before_network() {
        let h = harness_with_filter(Arc::new(RejectAll));
        let err = h.service.generate(request()).await.unwrap_err();

        assert!(matches!(err, ReplicateError::ContentFilter { .. }));
        assert_eq!(h.transport.count_method(HttpMethod::Post), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_reply_leaves_circuit_alone() {
        let h = harness();
        h.transport.queue_json(&fixtures::prediction("p1", "starting"));
        h.transport
            .set_default(MockResponse::json(&fixtures::prediction("p1", "processing")));
        let token = CancellationToken::new();
        token.cancel();

        let err = h
            .service
            .generate_with_cancellation(request(), &token)
            .await
            .unwrap_err();
        assert!(matches!(err, ReplicateError::Cancelled));
        assert_eq!(h.transport.request_count(), 0);
    }
}
