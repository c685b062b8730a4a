//! Error types for the Replicate reply client.
//!
//! Every failure the client can surface is a variant of [`ReplicateError`].
//! Each variant maps onto one [`ErrorClass`], and that class alone drives the
//! retry and fallback decisions in the resilience layer.

mod classify;

pub use classify::{classify_message, classify_status, ErrorClass};

use std::time::Duration;
use thiserror::Error;

use crate::transport::TransportError;
use crate::types::prediction::PredictionStatus;

/// Result type alias for Replicate operations.
pub type ReplicateResult<T> = Result<T, ReplicateError>;

/// Comprehensive error type for Replicate client operations.
#[derive(Debug, Clone, Error)]
pub enum ReplicateError {
    /// Configuration error (unknown backend, missing token, bad base URL).
    #[error("Configuration error: {message}")]
    Configuration {
        /// Error message describing the configuration issue.
        message: String,
    },

    /// A single network call exceeded its deadline.
    #[error("Timeout in {operation} after {timeout:?}")]
    Timeout {
        /// Label of the call that timed out (`create_prediction`, `poll_prediction`).
        operation: String,
        /// The deadline that elapsed.
        timeout: Duration,
    },

    /// Upstream reported a temporary failure (502/503).
    #[error("Transient backend error{}: {detail}", fmt_status(.status_code))]
    Transient {
        /// HTTP status code, when the failure came from a response.
        status_code: Option<u16>,
        /// Upstream request-correlation id.
        request_id: Option<String>,
        /// Human-readable detail.
        detail: String,
    },

    /// Upstream is rate limiting or out of capacity.
    #[error("Rate limited or at capacity{}: {detail}", fmt_status(.status_code))]
    RateLimited {
        /// HTTP status code, when the failure came from a response.
        status_code: Option<u16>,
        /// Upstream request-correlation id.
        request_id: Option<String>,
        /// Human-readable detail.
        detail: String,
        /// Suggested wait from the `retry-after` header.
        retry_after: Option<Duration>,
    },

    /// The circuit for this backend is open; no call was made.
    #[error("Circuit open for backend {backend}: retry in {retry_in:?}")]
    CircuitOpen {
        /// Backend whose circuit is open.
        backend: String,
        /// Remaining cooldown.
        retry_in: Duration,
    },

    /// Upstream rejected the request as unprocessable (422), or local validation failed.
    #[error("Invalid request{}: {detail}", fmt_status(.status_code))]
    InvalidRequest {
        /// HTTP status code; `None` for local validation failures.
        status_code: Option<u16>,
        /// Upstream request-correlation id.
        request_id: Option<String>,
        /// Human-readable detail.
        detail: String,
    },

    /// Any other non-success HTTP status.
    #[error("API error (HTTP {status_code}): {detail}")]
    Api {
        /// HTTP status code.
        status_code: u16,
        /// Upstream request-correlation id.
        request_id: Option<String>,
        /// Human-readable detail.
        detail: String,
    },

    /// Network/connection error that did not produce a response.
    #[error("Network error: {message}")]
    Network {
        /// Error message.
        message: String,
    },

    /// The prediction reached a terminal non-success status.
    #[error("Prediction {prediction_id} {status}: {}", .detail.as_deref().unwrap_or("no detail"))]
    PredictionFailed {
        /// Prediction identifier.
        prediction_id: String,
        /// Terminal status (`failed` or `canceled`).
        status: PredictionStatus,
        /// Error text reported by the backend.
        detail: Option<String>,
    },

    /// Polling budget ran out before the prediction finished.
    #[error("Prediction {prediction_id} still {status} after polling budget was exhausted")]
    PredictionIncomplete {
        /// Prediction identifier.
        prediction_id: String,
        /// Last observed status.
        status: PredictionStatus,
    },

    /// The prediction succeeded but carried no extractable text.
    #[error("Empty response from backend {backend}")]
    EmptyResponse {
        /// Backend that produced the empty output.
        backend: String,
    },

    /// A content filter rejected the input or output.
    #[error("Content filter triggered: {message}")]
    ContentFilter {
        /// Reason given by the filter.
        message: String,
    },

    /// Serialization/deserialization error.
    #[error("Serialization error: {message}")]
    Serialization {
        /// Error message.
        message: String,
    },

    /// The caller cancelled the operation.
    #[error("Operation cancelled")]
    Cancelled,
}

fn fmt_status(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {})", s)).unwrap_or_default()
}

impl ReplicateError {
    /// Classifies this error for retry and fallback decisions.
    ///
    /// Structured variants match directly. Variants that only carry text
    /// from across a process boundary fall back to [`classify_message`].
    pub fn class(&self) -> ErrorClass {
        match self {
            ReplicateError::Timeout { .. } | ReplicateError::Transient { .. } => {
                ErrorClass::Transient
            }
            ReplicateError::RateLimited { .. } | ReplicateError::CircuitOpen { .. } => {
                ErrorClass::RateLimitedOrCapacity
            }
            ReplicateError::InvalidRequest { .. } | ReplicateError::ContentFilter { .. } => {
                ErrorClass::Invalid
            }
            ReplicateError::Api { status_code, .. } => classify_status(*status_code),
            ReplicateError::Network { message } => classify_message(message),
            ReplicateError::PredictionFailed { detail, .. } => detail
                .as_deref()
                .map_or(ErrorClass::Fatal, classify_message),
            ReplicateError::Configuration { .. }
            | ReplicateError::PredictionIncomplete { .. }
            | ReplicateError::EmptyResponse { .. }
            | ReplicateError::Serialization { .. }
            | ReplicateError::Cancelled => ErrorClass::Fatal,
        }
    }

    /// Returns true if the same backend may be retried in place.
    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Transient
    }

    /// Returns true if the error must end the whole invocation, regardless of policy.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ReplicateError::Configuration { .. } | ReplicateError::Cancelled
        )
    }

    /// Returns the upstream HTTP status code, if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            ReplicateError::Transient { status_code, .. }
            | ReplicateError::RateLimited { status_code, .. }
            | ReplicateError::InvalidRequest { status_code, .. } => *status_code,
            ReplicateError::Api { status_code, .. } => Some(*status_code),
            _ => None,
        }
    }

    /// Returns the upstream request-correlation id, if any.
    pub fn request_id(&self) -> Option<&str> {
        match self {
            ReplicateError::Transient { request_id, .. }
            | ReplicateError::RateLimited { request_id, .. }
            | ReplicateError::InvalidRequest { request_id, .. }
            | ReplicateError::Api { request_id, .. } => request_id.as_deref(),
            _ => None,
        }
    }

    /// Returns the retry-after duration if available.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ReplicateError::RateLimited { retry_after, .. } => *retry_after,
            ReplicateError::CircuitOpen { retry_in, .. } => Some(*retry_in),
            _ => None,
        }
    }

    /// Short, stable name used for metrics labels.
    pub fn kind(&self) -> &'static str {
        match self {
            ReplicateError::Configuration { .. } => "configuration",
            ReplicateError::Timeout { .. } => "timeout",
            ReplicateError::Transient { .. } => "transient",
            ReplicateError::RateLimited { .. } => "rate_limited",
            ReplicateError::CircuitOpen { .. } => "circuit_open",
            ReplicateError::InvalidRequest { .. } => "invalid_request",
            ReplicateError::Api { .. } => "api",
            ReplicateError::Network { .. } => "network",
            ReplicateError::PredictionFailed { .. } => "prediction_failed",
            ReplicateError::PredictionIncomplete { .. } => "prediction_incomplete",
            ReplicateError::EmptyResponse { .. } => "empty_response",
            ReplicateError::ContentFilter { .. } => "content_filter",
            ReplicateError::Serialization { .. } => "serialization",
            ReplicateError::Cancelled => "cancelled",
        }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        ReplicateError::Configuration {
            message: message.into(),
        }
    }

    /// Creates a local validation error.
    pub fn invalid(detail: impl Into<String>) -> Self {
        ReplicateError::InvalidRequest {
            status_code: None,
            request_id: None,
            detail: detail.into(),
        }
    }

    /// Creates a timeout error for the labelled operation.
    pub fn timeout(operation: impl Into<String>, timeout: Duration) -> Self {
        ReplicateError::Timeout {
            operation: operation.into(),
            timeout,
        }
    }

    /// Builds the typed error for a non-2xx response.
    pub fn from_status(
        status_code: u16,
        request_id: Option<String>,
        detail: impl Into<String>,
        retry_after: Option<Duration>,
    ) -> Self {
        let detail = detail.into();
        match classify_status(status_code) {
            ErrorClass::Transient => ReplicateError::Transient {
                status_code: Some(status_code),
                request_id,
                detail,
            },
            ErrorClass::RateLimitedOrCapacity => ReplicateError::RateLimited {
                status_code: Some(status_code),
                request_id,
                detail,
                retry_after,
            },
            ErrorClass::Invalid => ReplicateError::InvalidRequest {
                status_code: Some(status_code),
                request_id,
                detail,
            },
            ErrorClass::Fatal => ReplicateError::Api {
                status_code,
                request_id,
                detail,
            },
        }
    }
}

impl From<TransportError> for ReplicateError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Timeout { timeout } => ReplicateError::Timeout {
                operation: "http_request".to_string(),
                timeout,
            },
            other => ReplicateError::Network {
                message: other.to_string(),
            },
        }
    }
}

impl From<serde_json::Error> for ReplicateError {
    fn from(err: serde_json::Error) -> Self {
        ReplicateError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<url::ParseError> for ReplicateError {
    fn from(err: url::ParseError) -> Self {
        ReplicateError::Configuration {
            message: format!("Invalid URL: {}", err),
        }
    }
}
