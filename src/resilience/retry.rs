//! Bounded in-place retry guarded by the circuit breaker registry.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use super::circuit_breaker::CircuitBreakerRegistry;
use super::timeout::sleep_or_cancel;
use crate::errors::{ErrorClass, ReplicateError, ReplicateResult};

/// Retry configuration.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Extra attempts after the first one, for transient failures only.
    pub max_retries: u32,
    /// Initial delay between retries.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Delay multiplier for exponential backoff.
    pub multiplier: f64,
    /// Whether to add jitter.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(4),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Creates a new retry configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum number of retries.
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Sets the initial delay.
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the multiplier.
    pub fn multiplier(mut self, mult: f64) -> Self {
        self.multiplier = mult;
        self
    }

    /// Sets whether to use jitter.
    pub fn jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Creates a configuration with no retries.
    pub fn no_retries() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }
}

/// Runs one backend operation with circuit gating and transient retry.
///
/// The circuit is consulted once, before the first attempt. The registry
/// is updated once per `execute` call, not once per attempt.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    config: RetryConfig,
    registry: Arc<dyn CircuitBreakerRegistry>,
}

impl RetryExecutor {
    /// Creates a new retry executor.
    pub fn new(config: RetryConfig, registry: Arc<dyn CircuitBreakerRegistry>) -> Self {
        Self { config, registry }
    }

    /// Returns the circuit registry.
    pub fn registry(&self) -> &Arc<dyn CircuitBreakerRegistry> {
        &self.registry
    }

    /// Executes `operation` against `backend`.
    #[instrument(skip(self, cancel, operation), fields(max_retries = self.config.max_retries))]
    pub async fn execute<F, Fut, T>(
        &self,
        backend: &str,
        cancel: &CancellationToken,
        operation: F,
    ) -> ReplicateResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = ReplicateResult<T>>,
    {
        let snapshot = self.registry.snapshot(backend);
        if let Some(retry_in) = snapshot.retry_in {
            tracing::info!(backend, retry_in_ms = retry_in.as_millis() as u64, "Circuit open, skipping backend");
            return Err(ReplicateError::CircuitOpen {
                backend: backend.to_string(),
                retry_in,
            });
        }

        let mut attempt = 0;
        loop {
            let err = match operation().await {
                Ok(value) => {
                    self.registry.record_success(backend);
                    return Ok(value);
                }
                Err(err) => err,
            };

            // Caller-initiated; says nothing about the backend's health.
            if matches!(err, ReplicateError::Cancelled) {
                return Err(err);
            }

            let class = err.class();
            if class != ErrorClass::Transient || attempt >= self.config.max_retries {
                tracing::warn!(
                    backend,
                    attempts = attempt + 1,
                    class = %class,
                    error = %err,
                    "Backend attempt failed"
                );
                self.registry.record_failure(backend);
                return Err(err);
            }

            let delay = self.calculate_delay(attempt);
            tracing::info!(
                backend,
                attempt = attempt + 1,
                max_retries = self.config.max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Retrying after transient error"
            );

            sleep_or_cancel(delay, cancel).await?;
            attempt += 1;
        }
    }

    /// Calculates the delay for a retry attempt.
    fn calculate_delay(&self, attempt: u32) -> Duration {
        let base_delay = self.config.initial_delay.as_millis() as f64
            * self.config.multiplier.powi(attempt as i32);

        let delay_ms = base_delay.min(self.config.max_delay.as_millis() as f64);

        // 0-25% random variation
        let delay_ms = if self.config.jitter {
            let jitter = rand::random::<f64>() * 0.25;
            delay_ms * (1.0 + jitter)
        } else {
            delay_ms
        };

        Duration::from_millis(delay_ms as u64)
    }
}
