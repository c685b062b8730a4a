//! Resilience layer for the Replicate reply client.
//!
//! Layers, innermost first: a per-call [`TimeoutInvoker`], a per-backend
//! [`RetryExecutor`] gated by a [`CircuitBreakerRegistry`], and the
//! [`FallbackCascade`] that walks the candidate backends in order.

mod cascade;
mod circuit_breaker;
mod retry;
mod timeout;

pub use cascade::{CascadeConfig, FallbackCascade, RateLimitScope};
pub use circuit_breaker::{
    CircuitBreakerConfig, CircuitBreakerRegistry, CircuitSnapshot, CircuitState,
    InMemoryCircuitRegistry,
};
pub use retry::{RetryConfig, RetryExecutor};
pub use timeout::{sleep_or_cancel, TimeoutInvoker};

use std::sync::Arc;

/// Configuration for the resilience layers.
#[derive(Debug, Clone, Default)]
pub struct ResilienceConfig {
    /// Retry configuration.
    pub retry: RetryConfig,
    /// Circuit breaker configuration.
    pub circuit_breaker: CircuitBreakerConfig,
    /// Cascade configuration.
    pub cascade: CascadeConfig,
}

impl ResilienceConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the retry configuration.
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the circuit breaker configuration.
    pub fn circuit_breaker(mut self, circuit_breaker: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = circuit_breaker;
        self
    }

    /// Sets the cascade configuration.
    pub fn cascade(mut self, cascade: CascadeConfig) -> Self {
        self.cascade = cascade;
        self
    }

    /// Builds the cascade, creating an in-memory registry when none is given.
    pub fn build_cascade(
        &self,
        registry: Option<Arc<dyn CircuitBreakerRegistry>>,
    ) -> FallbackCascade {
        let registry = registry.unwrap_or_else(|| {
            Arc::new(InMemoryCircuitRegistry::new(self.circuit_breaker.clone()))
        });
        FallbackCascade::new(
            self.cascade.clone(),
            RetryExecutor::new(self.retry.clone(), registry),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ReplicateError;
    use crate::types::models::ModelId;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    #[tokio::test(start_paused = true)]
    async fn test_shared_registry_trips_across_invocations() {
        let registry: Arc<dyn CircuitBreakerRegistry> = Arc::new(InMemoryCircuitRegistry::new(
            CircuitBreakerConfig::new().failure_threshold(2),
        ));
        let config = ResilienceConfig::new()
            .retry(RetryConfig::no_retries())
            .cascade(CascadeConfig::default().extra_fallbacks(Vec::<String>::new()));
        let cascade = config.build_cascade(Some(Arc::clone(&registry)));
        let candidates = vec![ModelId::parse("openai/gpt-4o-mini").unwrap()];

        for _ in 0..2 {
            let result = cascade
                .run(&candidates, &CancellationToken::new(), |_| async {
                    Err::<(), _>(ReplicateError::from_status(500, None, "boom", None))
                })
                .await;
            assert!(result.is_err());
        }

        assert!(registry.is_open("openai/gpt-4o-mini"));
        let err = cascade
            .run(&candidates, &CancellationToken::new(), |_| async { Ok::<_, ReplicateError>(()) })
            .await
            .unwrap_err();
        assert!(matches!(err, ReplicateError::CircuitOpen { .. }));

        tokio::time::advance(Duration::from_secs(60)).await;
        let result = cascade
            .run(&candidates, &CancellationToken::new(), |_| async { Ok::<_, ReplicateError>(()) })
            .await;
        assert!(result.is_ok());
    }
}
