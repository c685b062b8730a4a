//! Replicate Reply Client
//!
//! A resilient Rust client that generates conversational assistant replies
//! through Replicate-style asynchronous prediction backends. Backends are
//! slow, sometimes overloaded, and occasionally down; this crate keeps the
//! calling application stable through all of that.
//!
//! # Features
//!
//! - **Job polling**: create a prediction, then poll it under a per-call deadline
//! - **Retry**: bounded in-place retry for transient failures only
//! - **Circuit breaking**: per-backend breaker behind an injectable registry
//! - **Fallback cascade**: ordered, allow-listed backends tried until one answers
//! - **Output normalization**: one clean string from any output shape
//! - **Cancellation**: a caller token stops polling promptly
//! - **Observability**: tracing spans, token redaction, in-memory metrics
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use replicate_reply::{ChatTurn, ReplicateClient, ReplyRequest};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = ReplicateClient::from_env()?;
//!
//!     let request = ReplyRequest::builder()
//!         .system("You are a friendly tutor.")
//!         .turn(ChatTurn::user("What is ownership?"))
//!         .turn(ChatTurn::assistant("Every value has a single owner."))
//!         .user("And borrowing?")
//!         .build()?;
//!
//!     let reply = client.generate_reply(request).await?;
//!     println!("{}", reply.text);
//!     Ok(())
//! }
//! ```
//!
//! # Cancellation
//!
//! ```rust,no_run
//! use replicate_reply::{ReplicateClient, ReplyRequest};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = ReplicateClient::from_env()?;
//!     let token = CancellationToken::new();
//!
//!     let request = ReplyRequest::builder().user("Write a long poem").build()?;
//!     let pending = client.generate_reply_with_cancellation(request, &token);
//!
//!     token.cancel();
//!     assert!(pending.await.is_err());
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod auth;
pub mod client;
pub mod config;
pub mod errors;
pub mod observability;
pub mod output;
pub mod resilience;
pub mod services;
pub mod transport;
pub mod types;

// Re-exports for convenience
pub use client::{ReplicateClient, ReplicateClientBuilder};
pub use config::{ReplicateConfig, ReplicateConfigBuilder};
pub use errors::{ErrorClass, ReplicateError, ReplicateResult};

pub use resilience::{
    CascadeConfig, CircuitBreakerConfig, CircuitBreakerRegistry, InMemoryCircuitRegistry,
    RateLimitScope, ResilienceConfig, RetryConfig,
};
pub use services::{ContentFilter, NoopContentFilter};
pub use types::conversation::{AssistantReply, ChatTurn, ReplyRequest, Role};
pub use types::models::{ModelId, ALLOWED_MODELS};
pub use types::prediction::{Prediction, PredictionStatus};

/// Mock implementations for testing.
#[cfg(any(test, feature = "mocks"))]
pub mod mocks;
