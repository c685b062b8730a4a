//! Type definitions for the Replicate reply client.
//!
//! Covers backend identifiers, the prediction (job) wire format, and the
//! conversation request/reply exchanged with callers.

pub mod conversation;
pub mod models;
pub mod prediction;
