//! Prediction (job) types for the create and poll endpoints.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Lifecycle status of a prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PredictionStatus {
    /// Queued or booting.
    Starting,
    /// Running.
    Processing,
    /// Finished with output.
    Succeeded,
    /// Finished with an error.
    Failed,
    /// Cancelled upstream.
    Canceled,
    /// Any status string this client does not know; treated as non-terminal.
    #[serde(other)]
    Unknown,
}

impl PredictionStatus {
    /// Returns true once polling should stop.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PredictionStatus::Succeeded | PredictionStatus::Failed | PredictionStatus::Canceled
        )
    }
}

impl fmt::Display for PredictionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PredictionStatus::Starting => "starting",
            PredictionStatus::Processing => "processing",
            PredictionStatus::Succeeded => "succeeded",
            PredictionStatus::Failed => "failed",
            PredictionStatus::Canceled => "canceled",
            PredictionStatus::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Input block sent to the create endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionInput {
    /// Rendered conversation prompt.
    pub prompt: String,
    /// System prompt.
    pub system_prompt: String,
    /// Optional image URLs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_input: Option<Vec<String>>,
}

/// Create request body.
#[derive(Debug, Clone, Serialize)]
pub struct CreatePredictionRequest<'a> {
    /// Model input.
    pub input: &'a PredictionInput,
}

/// Links returned with a prediction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PredictionUrls {
    /// Status-polling URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub get: Option<String>,
    /// Cancel URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancel: Option<String>,
}

/// Token accounting reported by the backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PredictionMetrics {
    /// Prompt token count.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_token_count: Option<u64>,
    /// Generated token count.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_token_count: Option<u64>,
    /// Backend-side run time in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predict_time: Option<f64>,
}

/// A prediction job as returned by the create and poll endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// Prediction identifier.
    pub id: String,
    /// Current status.
    pub status: PredictionStatus,
    /// Backend-defined output; shape varies by model.
    #[serde(default)]
    pub output: Value,
    /// Error text on failure.
    #[serde(default, deserialize_with = "deserialize_error")]
    pub error: Option<String>,
    /// Follow-up links.
    #[serde(default)]
    pub urls: PredictionUrls,
    /// Token accounting.
    #[serde(default)]
    pub metrics: Option<PredictionMetrics>,
}

impl Prediction {
    /// Returns the status-polling URL, if any.
    pub fn poll_url(&self) -> Option<&str> {
        self.urls.get.as_deref().filter(|u| !u.is_empty())
    }

    /// Prompt tokens, if reported.
    pub fn input_tokens(&self) -> Option<u64> {
        self.metrics.as_ref().and_then(|m| m.input_token_count)
    }

    /// Completion tokens, if reported.
    pub fn output_tokens(&self) -> Option<u64> {
        self.metrics.as_ref().and_then(|m| m.output_token_count)
    }
}

// Backends report `error` as a string, an object, or null.
fn deserialize_error<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) if s.is_empty() => None,
        Some(Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}
