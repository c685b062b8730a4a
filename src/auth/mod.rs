//! Authentication for the Replicate client.
//!
//! Replicate uses bearer tokens. The token is held as a [`SecretString`] and
//! only exposed when a request header is written.

use secrecy::{ExposeSecret, SecretString};
use std::collections::HashMap;

use crate::errors::ReplicateError;

/// Expected prefix of Replicate API tokens.
pub const TOKEN_PREFIX: &str = "r8_";

/// Authentication provider trait.
pub trait AuthProvider: Send + Sync {
    /// Apply authentication to request headers.
    fn apply_auth(&self, headers: &mut HashMap<String, String>);

    /// Get the authentication scheme name.
    fn scheme(&self) -> &str;

    /// Validate the credentials.
    fn validate(&self) -> Result<(), ReplicateError>;
}

/// Bearer-token authentication provider.
pub struct ApiTokenAuth {
    token: SecretString,
}

impl ApiTokenAuth {
    /// Creates a new token provider.
    pub fn new(token: SecretString) -> Self {
        Self { token }
    }

    /// Creates from a plain string token.
    pub fn from_string(token: impl Into<String>) -> Self {
        Self {
            token: SecretString::new(token.into()),
        }
    }

    /// Gets a hint of the token for debugging (last 4 characters).
    pub fn token_hint(&self) -> String {
        token_hint(self.token.expose_secret())
    }
}

/// Returns the last four characters of a secret, or `****` for short ones.
pub(crate) fn token_hint(secret: &str) -> String {
    let count = secret.chars().count();
    if count > 4 {
        let tail: String = secret.chars().skip(count - 4).collect();
        format!("...{}", tail)
    } else {
        "****".to_string()
    }
}

impl AuthProvider for ApiTokenAuth {
    fn apply_auth(&self, headers: &mut HashMap<String, String>) {
        headers.insert(
            "Authorization".to_string(),
            format!("Bearer {}", self.token.expose_secret()),
        );
    }

    fn scheme(&self) -> &str {
        "Bearer"
    }

    fn validate(&self) -> Result<(), ReplicateError> {
        let token = self.token.expose_secret();

        if token.trim().is_empty() {
            return Err(ReplicateError::configuration("API token cannot be empty"));
        }

        if !token.starts_with(TOKEN_PREFIX) {
            tracing::warn!(
                token_hint = %self.token_hint(),
                "API token does not match expected Replicate format (r8_*)"
            );
        }

        Ok(())
    }
}

impl std::fmt::Debug for ApiTokenAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiTokenAuth")
            .field("token", &"[REDACTED]")
            .field("token_hint", &self.token_hint())
            .finish()
    }
}
