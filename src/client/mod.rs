//! Replicate reply client.
//!
//! Wires configuration, transport, auth, the resilience layers and the
//! services together behind one handle.

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::auth::{ApiTokenAuth, AuthProvider};
use crate::config::{ReplicateConfig, ReplicateConfigBuilder};
use crate::errors::{ReplicateError, ReplicateResult};
use crate::observability::{DefaultMetricsCollector, MetricsCollector};
use crate::resilience::{CircuitBreakerRegistry, InMemoryCircuitRegistry, ResilienceConfig};
use crate::services::{ContentFilter, NoopContentFilter, PredictionService, ReplyService};
use crate::transport::{HttpTransport, HttpTransportImpl};
use crate::types::conversation::{AssistantReply, ReplyRequest};

/// The main Replicate client.
///
/// # Example
///
/// ```rust,no_run
/// use replicate_reply::{ReplicateClient, ReplyRequest};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let client = ReplicateClient::builder()
///         .api_token("r8_your_token")
///         .build()?;
///
///     let request = ReplyRequest::builder()
///         .system("You are a concise assistant.")
///         .user("Hello!")
///         .build()?;
///
///     let reply = client.generate_reply(request).await?;
///     println!("[{}] {}", reply.backend_used, reply.text);
///     Ok(())
/// }
/// ```
pub struct ReplicateClient {
    config: Arc<ReplicateConfig>,
    predictions: Arc<PredictionService>,
    replies: ReplyService,
    registry: Arc<dyn CircuitBreakerRegistry>,
    metrics: Arc<dyn MetricsCollector>,
}

impl ReplicateClient {
    /// Creates a new client builder.
    pub fn builder() -> ReplicateClientBuilder {
        ReplicateClientBuilder::new()
    }

    /// Creates a client from environment variables.
    ///
    /// See [`ReplicateConfig::from_env`] for the variables read.
    pub fn from_env() -> ReplicateResult<Self> {
        let config = ReplicateConfig::from_env()?;
        ReplicateClientBuilder::from_config(config).build()
    }

    /// Creates a client from an API token with default settings.
    pub fn from_api_token(api_token: impl Into<String>) -> ReplicateResult<Self> {
        ReplicateClientBuilder::new().api_token(api_token).build()
    }

    /// Generates one assistant reply.
    pub async fn generate_reply(&self, request: ReplyRequest) -> ReplicateResult<AssistantReply> {
        self.replies.generate(request).await
    }

    /// Generates one assistant reply, stopping promptly once `cancel` fires.
    pub async fn generate_reply_with_cancellation(
        &self,
        request: ReplyRequest,
        cancel: &CancellationToken,
    ) -> ReplicateResult<AssistantReply> {
        self.replies.generate_with_cancellation(request, cancel).await
    }

    /// Returns the reply service.
    pub fn replies(&self) -> &ReplyService {
        &self.replies
    }

    /// Returns the prediction service.
    pub fn predictions(&self) -> &PredictionService {
        &self.predictions
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ReplicateConfig {
        &self.config
    }

    /// Returns the circuit breaker registry.
    pub fn circuit_registry(&self) -> &Arc<dyn CircuitBreakerRegistry> {
        &self.registry
    }

    /// Returns the metrics collector.
    pub fn metrics(&self) -> &Arc<dyn MetricsCollector> {
        &self.metrics
    }
}

impl std::fmt::Debug for ReplicateClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicateClient")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Builder for the Replicate client.
pub struct ReplicateClientBuilder {
    config: Option<ReplicateConfig>,
    config_builder: ReplicateConfigBuilder,
    transport: Option<Arc<dyn HttpTransport>>,
    auth: Option<Arc<dyn AuthProvider>>,
    registry: Option<Arc<dyn CircuitBreakerRegistry>>,
    resilience: ResilienceConfig,
    metrics: Option<Arc<dyn MetricsCollector>>,
    filter: Option<Arc<dyn ContentFilter>>,
}

impl ReplicateClientBuilder {
    /// Creates a new client builder.
    pub fn new() -> Self {
        Self {
            config: None,
            config_builder: ReplicateConfigBuilder::new(),
            transport: None,
            auth: None,
            registry: None,
            resilience: ResilienceConfig::default(),
            metrics: None,
            filter: None,
        }
    }

    /// Creates a builder from an existing configuration.
    ///
    /// Configuration setters on this builder are ignored afterwards.
    pub fn from_config(config: ReplicateConfig) -> Self {
        Self {
            config: Some(config),
            ..Self::new()
        }
    }

    /// Sets the API token.
    pub fn api_token(mut self, api_token: impl Into<String>) -> Self {
        self.config_builder = self.config_builder.api_token(api_token);
        self
    }

    /// Sets the base URL.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.config_builder = self.config_builder.base_url(base_url);
        self
    }

    /// Sets the per-call deadline.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config_builder = self.config_builder.timeout(timeout);
        self
    }

    /// Sets the delay between status polls.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config_builder = self.config_builder.poll_interval(interval);
        self
    }

    /// Sets the poll budget.
    pub fn max_poll_attempts(mut self, attempts: u32) -> Self {
        self.config_builder = self.config_builder.max_poll_attempts(attempts);
        self
    }

    /// Sets the default backend.
    pub fn default_model(mut self, model: impl Into<String>) -> Self {
        self.config_builder = self.config_builder.default_model(model);
        self
    }

    /// Sets the fallback backend.
    pub fn fallback_model(mut self, model: impl Into<String>) -> Self {
        self.config_builder = self.config_builder.fallback_model(model);
        self
    }

    /// Sets a custom transport.
    pub fn transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Sets a custom auth provider.
    pub fn auth(mut self, auth: Arc<dyn AuthProvider>) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Shares a circuit breaker registry, e.g. between several clients.
    pub fn circuit_registry(mut self, registry: Arc<dyn CircuitBreakerRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Sets the resilience configuration.
    pub fn resilience(mut self, config: ResilienceConfig) -> Self {
        self.resilience = config;
        self
    }

    /// Sets a custom metrics collector.
    pub fn metrics(mut self, metrics: Arc<dyn MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Sets the content filter.
    pub fn content_filter(mut self, filter: Arc<dyn ContentFilter>) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Builds the client.
    pub fn build(self) -> ReplicateResult<ReplicateClient> {
        let config = match self.config {
            Some(config) => config,
            None => self.config_builder.build()?,
        };
        let config = Arc::new(config);

        let transport: Arc<dyn HttpTransport> = match self.transport {
            Some(t) => t,
            None => Arc::new(HttpTransportImpl::new(&config.base_url).map_err(|e| {
                ReplicateError::configuration(format!("Failed to build HTTP client: {}", e))
            })?),
        };

        let auth: Arc<dyn AuthProvider> = match self.auth {
            Some(a) => a,
            None => Arc::new(ApiTokenAuth::new(config.api_token.clone())),
        };
        auth.validate()?;

        let registry: Arc<dyn CircuitBreakerRegistry> = self.registry.unwrap_or_else(|| {
            Arc::new(InMemoryCircuitRegistry::new(
                self.resilience.circuit_breaker.clone(),
            ))
        });
        let metrics: Arc<dyn MetricsCollector> = self
            .metrics
            .unwrap_or_else(|| Arc::new(DefaultMetricsCollector::new()));
        let filter: Arc<dyn ContentFilter> =
            self.filter.unwrap_or_else(|| Arc::new(NoopContentFilter));

        let predictions = Arc::new(PredictionService::new(transport, auth, &config));
        let cascade = self
            .resilience
            .build_cascade(Some(Arc::clone(&registry)))
            .with_metrics(Arc::clone(&metrics));

        let replies = ReplyService::new(
            Arc::clone(&config),
            Arc::clone(&predictions),
            cascade,
            filter,
            Arc::clone(&metrics),
        );

        Ok(ReplicateClient {
            config,
            predictions,
            replies,
            registry,
            metrics,
        })
    }
}

impl Default for ReplicateClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::{fixtures, MockTransport};
    use serde_json::json;

    #[test]
    fn test_builder_requires_api_token() {
        let result = ReplicateClientBuilder::new().build();
        assert!(matches!(result, Err(ReplicateError::Configuration { .. })));
    }

    #[test]
    fn test_builder_rejects_plain_http_remote() {
        let result = ReplicateClientBuilder::new()
            .api_token("r8_test_token_abcd")
            .base_url("http://api.example.com/v1")
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_debug_hides_token() {
        let client = ReplicateClient::from_api_token("r8_supersecret_wxyz").unwrap();
        let debug = format!("{:?}", client);
        assert!(!debug.contains("supersecret"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_generate_reply_through_client() {
        let transport = Arc::new(MockTransport::new());
        transport.queue_json(&fixtures::succeeded("p1", json!("Hi there")));

        let client = ReplicateClient::builder()
            .api_token("r8_test_token_abcd")
            .default_model("anthropic/claude-3.5-haiku")
            .transport(transport.clone())
            .build()
            .unwrap();

        let request = ReplyRequest::builder().user("Hello").build().unwrap();
        let reply = client.generate_reply(request).await.unwrap();

        assert_eq!(reply.backend_used, "anthropic/claude-3.5-haiku");
        assert_eq!(reply.text, "Hi there");
        assert_eq!(client.metrics().get_metrics().successful_replies, 1);
        assert!(!client.circuit_registry().is_open("anthropic/claude-3.5-haiku"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_bad_configured_default_fails_on_first_use() {
        let transport = Arc::new(MockTransport::new());
        let client = ReplicateClient::builder()
            .api_token("r8_test_token_abcd")
            .default_model("acme/unknown")
            .transport(transport.clone())
            .build()
            .unwrap();

        let request = ReplyRequest::builder().user("Hello").build().unwrap();
        let err = client.generate_reply(request).await.unwrap_err();

        assert!(matches!(err, ReplicateError::Configuration { .. }));
        assert_eq!(transport.request_count(), 0);
    }
}
