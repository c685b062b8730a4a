//! Metrics collection for the reply client.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::Duration;

/// Metrics collector interface.
pub trait MetricsCollector: Send + Sync {
    /// Records one attempt against a backend (before retries are counted).
    fn record_attempt(&self, backend: &str);

    /// Records a completed reply.
    fn record_success(&self, backend: &str, duration: Duration);

    /// Records a failed reply by error kind.
    fn record_failure(&self, error_kind: &str, duration: Duration);

    /// Records a move to the next candidate backend.
    fn record_fallback(&self, from: &str);

    /// Records a call refused by an open circuit.
    fn record_circuit_rejection(&self, backend: &str);

    /// Records token usage.
    fn record_tokens(&self, input_tokens: u64, output_tokens: u64);

    /// Gets current metrics.
    fn get_metrics(&self) -> ReplyMetrics;

    /// Resets all metrics.
    fn reset(&self);
}

/// Metrics snapshot.
#[derive(Debug, Clone, Default)]
pub struct ReplyMetrics {
    /// Replies produced.
    pub successful_replies: u64,
    /// Replies that ended in an error.
    pub failed_replies: u64,
    /// Fallbacks taken.
    pub fallbacks: u64,
    /// Calls refused by an open circuit.
    pub circuit_rejections: u64,
    /// Total reply latency in milliseconds.
    pub total_latency_ms: u64,
    /// Total prompt tokens.
    pub input_tokens: u64,
    /// Total completion tokens.
    pub output_tokens: u64,
    /// Attempts per backend.
    pub attempts: HashMap<String, u64>,
    /// Replies per backend.
    pub backends_used: HashMap<String, u64>,
    /// Error counts by kind.
    pub errors: HashMap<String, u64>,
}

impl ReplyMetrics {
    /// Total replies, successful or not.
    pub fn total_replies(&self) -> u64 {
        self.successful_replies + self.failed_replies
    }

    /// Average latency in milliseconds.
    pub fn average_latency_ms(&self) -> f64 {
        let total = self.total_replies();
        if total == 0 {
            0.0
        } else {
            self.total_latency_ms as f64 / total as f64
        }
    }

    /// Success rate as a percentage.
    pub fn success_rate(&self) -> f64 {
        let total = self.total_replies();
        if total == 0 {
            100.0
        } else {
            (self.successful_replies as f64 / total as f64) * 100.0
        }
    }
}

/// In-memory metrics collector.
#[derive(Default)]
pub struct DefaultMetricsCollector {
    successful_replies: AtomicU64,
    failed_replies: AtomicU64,
    fallbacks: AtomicU64,
    circuit_rejections: AtomicU64,
    total_latency_ms: AtomicU64,
    input_tokens: AtomicU64,
    output_tokens: AtomicU64,
    attempts: RwLock<HashMap<String, u64>>,
    backends_used: RwLock<HashMap<String, u64>>,
    errors: RwLock<HashMap<String, u64>>,
}

impl DefaultMetricsCollector {
    /// Creates a new metrics collector.
    pub fn new() -> Self {
        Self::default()
    }
}

fn bump(map: &RwLock<HashMap<String, u64>>, key: &str) {
    if let Ok(mut map) = map.write() {
        *map.entry(key.to_string()).or_insert(0) += 1;
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl MetricsCollector for DefaultMetricsCollector {
    fn record_attempt(&self, backend: &str) {
        bump(&self.attempts, backend);
    }

    fn record_success(&self, backend: &str, duration: Duration) {
        self.successful_replies.fetch_add(1, Ordering::Relaxed);
        self.total_latency_ms
            .fetch_add(duration_ms(duration), Ordering::Relaxed);
        bump(&self.backends_used, backend);
    }

    fn record_failure(&self, error_kind: &str, duration: Duration) {
        self.failed_replies.fetch_add(1, Ordering::Relaxed);
        self.total_latency_ms
            .fetch_add(duration_ms(duration), Ordering::Relaxed);
        bump(&self.errors, error_kind);
    }

    fn record_fallback(&self, _from: &str) {
        self.fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    fn record_circuit_rejection(&self, _backend: &str) {
        self.circuit_rejections.fetch_add(1, Ordering::Relaxed);
    }

    fn record_tokens(&self, input_tokens: u64, output_tokens: u64) {
        self.input_tokens.fetch_add(input_tokens, Ordering::Relaxed);
        self.output_tokens.fetch_add(output_tokens, Ordering::Relaxed);
    }

    fn get_metrics(&self) -> ReplyMetrics {
        ReplyMetrics {
            successful_replies: self.successful_replies.load(Ordering::Relaxed),
            failed_replies: self.failed_replies.load(Ordering::Relaxed),
            fallbacks: self.fallbacks.load(Ordering::Relaxed),
            circuit_rejections: self.circuit_rejections.load(Ordering::Relaxed),
            total_latency_ms: self.total_latency_ms.load(Ordering::Relaxed),
            input_tokens: self.input_tokens.load(Ordering::Relaxed),
            output_tokens: self.output_tokens.load(Ordering::Relaxed),
            attempts: self.attempts.read().map(|m| m.clone()).unwrap_or_default(),
            backends_used: self
                .backends_used
                .read()
                .map(|m| m.clone())
                .unwrap_or_default(),
            errors: self.errors.read().map(|m| m.clone()).unwrap_or_default(),
        }
    }

    fn reset(&self) {
        for counter in [
            &self.successful_replies,
            &self.failed_replies,
            &self.fallbacks,
            &self.circuit_rejections,
            &self.total_latency_ms,
            &self.input_tokens,
            &self.output_tokens,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        for map in [&self.attempts, &self.backends_used, &self.errors] {
            if let Ok(mut map) = map.write() {
                map.clear();
            }
        }
    }
}

impl std::fmt::Debug for DefaultMetricsCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefaultMetricsCollector")
            .field(
                "successful_replies",
                &self.successful_replies.load(Ordering::Relaxed),
            )
            .field("failed_replies", &self.failed_replies.load(Ordering::Relaxed))
            .field("fallbacks", &self.fallbacks.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Collector that records nothing.
#[derive(Debug, Default)]
pub struct NoopMetricsCollector;

impl MetricsCollector for NoopMetricsCollector {
    fn record_attempt(&self, _backend: &str) {}
    fn record_success(&self, _backend: &str, _duration: Duration) {}
    fn record_failure(&self, _error_kind: &str, _duration: Duration) {}
    fn record_fallback(&self, _from: &str) {}
    fn record_circuit_rejection(&self, _backend: &str) {}
    fn record_tokens(&self, _input_tokens: u64, _output_tokens: u64) {}

    fn get_metrics(&self) -> ReplyMetrics {
        ReplyMetrics::default()
    }

    fn reset(&self) {}
}
