//! Observability for the reply client.
//!
//! Tracing spans come from `#[instrument]` on the service methods; this
//! module adds subscriber setup, token redaction, and counters.

mod logging;
mod metrics;

pub use logging::{redact, redact_truncated, LogFormat, LogLevel, LoggingConfig, MAX_DETAIL_LEN};
pub use metrics::{DefaultMetricsCollector, MetricsCollector, NoopMetricsCollector, ReplyMetrics};

use std::time::{Duration, Instant};

/// Wall-clock timer for one reply.
#[derive(Debug)]
pub struct RequestTimer {
    start: Instant,
}

impl RequestTimer {
    /// Starts a timer.
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Returns the elapsed time.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}
