//! Configuration module for the Replicate client.
//!
//! Provides configuration management including the API token, base URL,
//! per-call deadlines, polling cadence, and the default/fallback backends.
//! Backend identifiers are stored as given and validated against the
//! allow-list on first use, so a bad environment value surfaces as a
//! configuration error from the first reply request rather than at startup.

use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;

use crate::auth::token_hint;
use crate::errors::{ReplicateError, ReplicateResult};
use crate::types::models::{ModelId, DEFAULT_MODEL};

/// Default base URL for the Replicate API.
pub const DEFAULT_BASE_URL: &str = "https://api.replicate.com/v1";

/// Default deadline for a single create or poll call (20 seconds).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);

/// Default delay between status polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1200);

/// Default number of status polls before giving up (about 24 seconds).
pub const DEFAULT_MAX_POLL_ATTEMPTS: u32 = 20;

/// Configuration for the Replicate client.
#[derive(Clone)]
pub struct ReplicateConfig {
    /// API token for authentication (stored securely).
    pub(crate) api_token: SecretString,
    /// Base URL for API requests.
    pub base_url: String,
    /// Deadline for each individual create/poll call.
    pub timeout: Duration,
    /// Delay between status polls.
    pub poll_interval: Duration,
    /// Maximum number of status polls.
    pub max_poll_attempts: u32,
    /// Backend used when a request names none.
    pub default_model: String,
    /// Backend tried after the requested one.
    pub fallback_model: Option<String>,
    /// Custom headers to include in requests.
    pub custom_headers: Vec<(String, String)>,
}

impl ReplicateConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> ReplicateConfigBuilder {
        ReplicateConfigBuilder::new()
    }

    /// Creates a configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `REPLICATE_API_TOKEN` (required): API token
    /// - `REPLICATE_BASE_URL` (optional): Custom base URL
    /// - `REPLICATE_MODEL` (optional): Default backend
    /// - `REPLICATE_FALLBACK_MODEL` (optional): Fallback backend
    /// - `REPLICATE_TIMEOUT` (optional): Per-call deadline in seconds
    /// - `REPLICATE_POLL_INTERVAL_MS` (optional): Delay between polls
    /// - `REPLICATE_MAX_POLL_ATTEMPTS` (optional): Poll budget
    pub fn from_env() -> ReplicateResult<Self> {
        let api_token = std::env::var("REPLICATE_API_TOKEN").map_err(|_| {
            ReplicateError::configuration("REPLICATE_API_TOKEN environment variable not set")
        })?;

        let mut builder = ReplicateConfigBuilder::new().api_token(api_token);

        if let Ok(base_url) = std::env::var("REPLICATE_BASE_URL") {
            builder = builder.base_url(base_url);
        }

        if let Ok(model) = std::env::var("REPLICATE_MODEL") {
            if !model.trim().is_empty() {
                builder = builder.default_model(model);
            }
        }

        if let Ok(model) = std::env::var("REPLICATE_FALLBACK_MODEL") {
            if !model.trim().is_empty() {
                builder = builder.fallback_model(model);
            }
        }

        if let Some(secs) = env_parse::<u64>("REPLICATE_TIMEOUT") {
            builder = builder.timeout(Duration::from_secs(secs));
        }

        if let Some(ms) = env_parse::<u64>("REPLICATE_POLL_INTERVAL_MS") {
            builder = builder.poll_interval(Duration::from_millis(ms));
        }

        if let Some(attempts) = env_parse::<u32>("REPLICATE_MAX_POLL_ATTEMPTS") {
            builder = builder.max_poll_attempts(attempts);
        }

        builder.build()
    }

    /// Returns the API token (exposing the secret).
    pub(crate) fn api_token(&self) -> &str {
        self.api_token.expose_secret()
    }

    /// Returns the token hint (last 4 characters) for debugging.
    pub fn api_token_hint(&self) -> String {
        token_hint(self.api_token.expose_secret())
    }

    /// Validates and returns the default backend.
    pub fn default_model_id(&self) -> ReplicateResult<ModelId> {
        ModelId::parse(&self.default_model)
    }

    /// Validates and returns the fallback backend, if configured.
    pub fn fallback_model_id(&self) -> ReplicateResult<Option<ModelId>> {
        self.fallback_model.as_deref().map(ModelId::parse).transpose()
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(variable = name, value = %raw, "Ignoring unparsable environment value");
            None
        }
    }
}

impl std::fmt::Debug for ReplicateConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicateConfig")
            .field("api_token", &"[REDACTED]")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .field("poll_interval", &self.poll_interval)
            .field("max_poll_attempts", &self.max_poll_attempts)
            .field("default_model", &self.default_model)
            .field("fallback_model", &self.fallback_model)
            .finish()
    }
}

/// Builder for `ReplicateConfig`.
#[derive(Default)]
pub struct ReplicateConfigBuilder {
    api_token: Option<String>,
    base_url: Option<String>,
    timeout: Option<Duration>,
    poll_interval: Option<Duration>,
    max_poll_attempts: Option<u32>,
    default_model: Option<String>,
    fallback_model: Option<String>,
    custom_headers: Vec<(String, String)>,
}

impl ReplicateConfigBuilder {
    /// Creates a new configuration builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the API token.
    pub fn api_token(mut self, api_token: impl Into<String>) -> Self {
        self.api_token = Some(api_token.into());
        self
    }

    /// Sets the base URL.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Sets the per-call deadline.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the delay between status polls.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    /// Sets the poll budget.
    pub fn max_poll_attempts(mut self, attempts: u32) -> Self {
        self.max_poll_attempts = Some(attempts);
        self
    }

    /// Sets the default backend.
    pub fn default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = Some(model.into());
        self
    }

    /// Sets the fallback backend.
    pub fn fallback_model(mut self, model: impl Into<String>) -> Self {
        self.fallback_model = Some(model.into());
        self
    }

    /// Adds a custom header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom_headers.push((name.into(), value.into()));
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> ReplicateResult<ReplicateConfig> {
        let api_token = self
            .api_token
            .ok_or_else(|| ReplicateError::configuration("API token is required"))?;

        if api_token.trim().is_empty() {
            return Err(ReplicateError::configuration("API token cannot be empty"));
        }

        let base_url = self
            .base_url
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        validate_base_url(&base_url)?;

        let timeout = self.timeout.unwrap_or(DEFAULT_TIMEOUT);
        if timeout.is_zero() {
            return Err(ReplicateError::configuration("Timeout must be greater than zero"));
        }

        Ok(ReplicateConfig {
            api_token: SecretString::new(api_token),
            base_url,
            timeout,
            poll_interval: self.poll_interval.unwrap_or(DEFAULT_POLL_INTERVAL),
            max_poll_attempts: self.max_poll_attempts.unwrap_or(DEFAULT_MAX_POLL_ATTEMPTS),
            default_model: self
                .default_model
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            fallback_model: self.fallback_model,
            custom_headers: self.custom_headers,
        })
    }
}

// HTTPS is required except for loopback hosts used by local test servers.
fn validate_base_url(base_url: &str) -> ReplicateResult<()> {
    let parsed = url::Url::parse(base_url)?;
    match parsed.scheme() {
        "https" => Ok(()),
        "http" if is_loopback(&parsed) => Ok(()),
        _ => Err(ReplicateError::configuration("Base URL must use HTTPS")),
    }
}

fn is_loopback(url: &url::Url) -> bool {
    match url.host() {
        Some(url::Host::Domain(domain)) => domain == "localhost",
        Some(url::Host::Ipv4(ip)) => ip.is_loopback(),
        Some(url::Host::Ipv6(ip)) => ip.is_loopback(),
        None => false,
    }
}
