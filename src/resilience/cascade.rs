//! Fallback cascade across an ordered list of backends.

use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use super::retry::RetryExecutor;
use crate::errors::{ErrorClass, ReplicateError, ReplicateResult};
use crate::observability::{MetricsCollector, NoopMetricsCollector};
use crate::types::models::{is_allowed, ModelId, DEFAULT_EXTRA_FALLBACKS};

/// How far a rate-limit or capacity signal reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RateLimitScope {
    /// Abort the whole cascade; capacity pressure is assumed provider-wide.
    #[default]
    Cascade,
    /// Treat it like any other backend failure and try the next candidate.
    Backend,
}

/// Cascade configuration.
#[derive(Debug, Clone)]
pub struct CascadeConfig {
    /// Backends appended after the requested and fallback ones.
    pub extra_fallbacks: Vec<String>,
    /// Reach of a rate-limit/capacity error.
    pub rate_limit_scope: RateLimitScope,
}

impl Default for CascadeConfig {
    fn default() -> Self {
        Self {
            extra_fallbacks: DEFAULT_EXTRA_FALLBACKS
                .iter()
                .map(|m| (*m).to_string())
                .collect(),
            rate_limit_scope: RateLimitScope::default(),
        }
    }
}

impl CascadeConfig {
    /// Replaces the extra fallbacks.
    pub fn extra_fallbacks<I, S>(mut self, models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra_fallbacks = models.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the rate-limit scope.
    pub fn rate_limit_scope(mut self, scope: RateLimitScope) -> Self {
        self.rate_limit_scope = scope;
        self
    }
}

/// Walks candidates through the retry executor until one succeeds.
#[derive(Clone)]
pub struct FallbackCascade {
    config: CascadeConfig,
    retry: RetryExecutor,
    metrics: Arc<dyn MetricsCollector>,
}

impl FallbackCascade {
    /// Creates a new cascade.
    pub fn new(config: CascadeConfig, retry: RetryExecutor) -> Self {
        Self {
            config,
            retry,
            metrics: Arc::new(NoopMetricsCollector),
        }
    }

    /// Reports fallbacks and circuit rejections to `metrics`.
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsCollector>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Returns the configuration.
    pub fn config(&self) -> &CascadeConfig {
        &self.config
    }

    /// Returns the retry executor.
    pub fn retry(&self) -> &RetryExecutor {
        &self.retry
    }

    /// Builds the ordered, deduplicated candidate list.
    ///
    /// `primary` and `fallback` are already allow-listed by construction.
    /// Extra fallbacks outside the allow-list are dropped.
    pub fn candidates(
        &self,
        primary: ModelId,
        fallback: Option<ModelId>,
    ) -> ReplicateResult<Vec<ModelId>> {
        let mut ordered = vec![primary];
        ordered.extend(fallback);

        for extra in &self.config.extra_fallbacks {
            if is_allowed(extra) {
                ordered.push(ModelId::parse(extra)?);
            } else {
                tracing::warn!(backend = %extra, "Dropping extra fallback outside the allow-list");
            }
        }

        let mut candidates: Vec<ModelId> = Vec::with_capacity(ordered.len());
        for id in ordered {
            if !candidates.contains(&id) {
                candidates.push(id);
            }
        }

        if candidates.is_empty() {
            return Err(ReplicateError::configuration("No allow-listed backend available"));
        }
        Ok(candidates)
    }

    /// Runs `operation` against each candidate in order.
    ///
    /// Returns the first success with the backend that produced it. Stops early
    /// on terminal errors and, under [`RateLimitScope::Cascade`], on
    /// rate-limit/capacity errors. Otherwise the last error is returned once
    /// every candidate has failed.
    #[instrument(skip_all, fields(candidates = candidates.len()))]
    pub async fn run<F, Fut, T>(
        &self,
        candidates: &[ModelId],
        cancel: &CancellationToken,
        operation: F,
    ) -> ReplicateResult<(ModelId, T)>
    where
        F: Fn(ModelId) -> Fut,
        Fut: Future<Output = ReplicateResult<T>>,
    {
        let mut last_error: Option<ReplicateError> = None;

        for (position, candidate) in candidates.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(ReplicateError::Cancelled);
            }
            if position > 0 {
                tracing::info!(backend = %candidate, position, "Falling back to next backend");
            }

            let key = candidate.to_string();
            let result = self
                .retry
                .execute(&key, cancel, || operation(candidate.clone()))
                .await;

            let err = match result {
                Ok(value) => return Ok((candidate.clone(), value)),
                Err(err) => err,
            };

            if err.is_terminal() {
                return Err(err);
            }
            if matches!(err, ReplicateError::CircuitOpen { .. }) {
                self.metrics.record_circuit_rejection(&key);
            }

            if err.class() == ErrorClass::RateLimitedOrCapacity
                && self.config.rate_limit_scope == RateLimitScope::Cascade
            {
                tracing::warn!(backend = %candidate, error = %err, "Capacity pressure, aborting cascade");
                return Err(err);
            }

            tracing::warn!(backend = %candidate, error = %err, "Backend failed, continuing cascade");
            if position + 1 < candidates.len() {
                self.metrics.record_fallback(&key);
            }
            last_error = Some(err);
        }

        Err(last_error
            .unwrap_or_else(|| ReplicateError::configuration("No allow-listed backend available")))
    }
}

impl std::fmt::Debug for FallbackCascade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackCascade")
            .field("config", &self.config)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}
