//! Error classification rules.

use http::StatusCode;

/// Retry/fallback category of an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Expected to clear on a prompt retry of the same backend.
    Transient,
    /// Backend is rate limiting or out of capacity, or its circuit is open.
    RateLimitedOrCapacity,
    /// Request rejected as unprocessable; not retried, next backend may still work.
    Invalid,
    /// Anything else.
    Fatal,
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorClass::Transient => "transient",
            ErrorClass::RateLimitedOrCapacity => "rate_limited_or_capacity",
            ErrorClass::Invalid => "invalid",
            ErrorClass::Fatal => "fatal",
        };
        f.write_str(name)
    }
}

/// Classifies an HTTP status code.
pub fn classify_status(status: u16) -> ErrorClass {
    match StatusCode::from_u16(status) {
        Ok(StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE) => ErrorClass::Transient,
        Ok(StatusCode::TOO_MANY_REQUESTS) => ErrorClass::RateLimitedOrCapacity,
        Ok(StatusCode::UNPROCESSABLE_ENTITY) => ErrorClass::Invalid,
        _ => ErrorClass::Fatal,
    }
}

const CAPACITY_MARKERS: &[&str] = &[
    "429",
    "rate limit",
    "ratelimit",
    "too many requests",
    "at capacity",
    "out of capacity",
    "capacity exceeded",
    "insufficient capacity",
    "throttl",
    "circuit open",
];

const TRANSIENT_MARKERS: &[&str] = &[
    "502",
    "503",
    "bad gateway",
    "service unavailable",
    "temporarily unavailable",
    "timed out",
    "timeout",
    "connection reset",
    "econnreset",
    "connection closed",
];

const INVALID_MARKERS: &[&str] = &["422", "unprocessable", "invalid input"];

/// Classifies free-form error text.
///
/// Only used when an error reached the client as plain text, such as the
/// `error` field of a failed prediction or a transport message. Capacity
/// markers take precedence over transient markers.
pub fn classify_message(message: &str) -> ErrorClass {
    let lowered = message.to_ascii_lowercase();
    let has = |markers: &[&str]| markers.iter().any(|m| lowered.contains(m));

    if has(CAPACITY_MARKERS) {
        ErrorClass::RateLimitedOrCapacity
    } else if has(TRANSIENT_MARKERS) {
        ErrorClass::Transient
    } else if has(INVALID_MARKERS) {
        ErrorClass::Invalid
    } else {
        ErrorClass::Fatal
    }
}
