//! Deadline and cancellation wrappers for single network calls.

use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::errors::{ReplicateError, ReplicateResult};

/// Runs one call under a hard deadline.
///
/// On expiry the call's future is dropped, which aborts the in-flight
/// request; nothing keeps running in the background.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutInvoker {
    deadline: Duration,
}

impl TimeoutInvoker {
    /// Creates an invoker with the given per-call deadline.
    pub fn new(deadline: Duration) -> Self {
        Self { deadline }
    }

    /// Returns the per-call deadline.
    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Runs `call`, labelling a timeout with `operation`.
    ///
    /// Returns [`ReplicateError::Cancelled`] if `cancel` fires first. Errors
    /// produced by the call itself pass through unchanged.
    pub async fn invoke<F, T>(
        &self,
        operation: &'static str,
        cancel: &CancellationToken,
        call: F,
    ) -> ReplicateResult<T>
    where
        F: Future<Output = ReplicateResult<T>>,
    {
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(ReplicateError::Cancelled),
            outcome = tokio::time::timeout(self.deadline, call) => match outcome {
                Ok(result) => result,
                Err(_) => {
                    tracing::warn!(
                        operation,
                        deadline_ms = self.deadline.as_millis() as u64,
                        "Call exceeded deadline"
                    );
                    Err(ReplicateError::timeout(operation, self.deadline))
                }
            },
        }
    }
}

/// Sleeps for `duration` unless `cancel` fires first.
pub async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> ReplicateResult<()> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(ReplicateError::Cancelled),
        () = tokio::time::sleep(duration) => Ok(()),
    }
}
