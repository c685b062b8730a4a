//! Backend model identifiers and the allow-list.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::{ReplicateError, ReplicateResult};

/// Backends this client is permitted to call.
pub const ALLOWED_MODELS: [&str; 4] = [
    "openai/gpt-4o-mini",
    "openai/gpt-4.1-mini",
    "meta/meta-llama-3-70b-instruct",
    "anthropic/claude-3.5-haiku",
];

/// Backend used when nothing else is configured.
pub const DEFAULT_MODEL: &str = "openai/gpt-4o-mini";

/// Known-good backends appended to every candidate list.
pub const DEFAULT_EXTRA_FALLBACKS: [&str; 2] =
    ["openai/gpt-4.1-mini", "meta/meta-llama-3-70b-instruct"];

/// Validated `owner/name` backend identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ModelId {
    owner: String,
    name: String,
}

impl ModelId {
    /// Parses and allow-list-checks a backend identifier.
    pub fn parse(raw: &str) -> ReplicateResult<Self> {
        let trimmed = raw.trim();
        if !is_allowed(trimmed) {
            return Err(ReplicateError::configuration(format!(
                "Backend '{}' is not in the allow-list ({})",
                trimmed,
                ALLOWED_MODELS.join(", ")
            )));
        }

        let (owner, name) = trimmed.split_once('/').ok_or_else(|| {
            ReplicateError::configuration(format!("Backend '{}' must be owner/name", trimmed))
        })?;

        Ok(Self {
            owner: owner.to_string(),
            name: name.to_string(),
        })
    }

    /// Returns the owner segment.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Returns the model name segment.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Path of the create-prediction endpoint, relative to the base URL.
    pub fn predictions_path(&self) -> String {
        format!("models/{}/{}/predictions", self.owner, self.name)
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

impl TryFrom<String> for ModelId {
    type Error = ReplicateError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ModelId> for String {
    fn from(id: ModelId) -> Self {
        id.to_string()
    }
}

/// Returns true if the identifier is allow-listed.
pub fn is_allowed(raw: &str) -> bool {
    ALLOWED_MODELS.contains(&raw.trim())
}
