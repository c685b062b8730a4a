//! Conversation types: the inbound reply request and the outbound reply.

use serde::{Deserialize, Serialize};

use crate::errors::{ReplicateError, ReplicateResult};

/// Speaker of a history turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The end user.
    User,
    /// The assistant.
    Assistant,
}

impl Role {
    /// Label used when rendering the prompt.
    pub fn label(self) -> &'static str {
        match self {
            Role::User => "User",
            Role::Assistant => "Assistant",
        }
    }
}

/// One prior turn of the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    /// Speaker.
    pub role: Role,
    /// Message text.
    pub content: String,
}

impl ChatTurn {
    /// Creates a user turn.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Creates an assistant turn.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Request for one assistant reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyRequest {
    /// Persona/system instructions.
    pub system_prompt: String,
    /// The new user message.
    pub user_prompt: String,
    /// Prior turns, oldest first.
    #[serde(default)]
    pub history: Vec<ChatTurn>,
    /// Optional image attached to the user message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    /// Requested backend; the configured default is used when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl ReplyRequest {
    /// Creates a new request builder.
    pub fn builder() -> ReplyRequestBuilder {
        ReplyRequestBuilder::default()
    }

    /// Validates the request before any network activity.
    pub fn validate(&self) -> ReplicateResult<()> {
        if self.user_prompt.trim().is_empty() {
            return Err(ReplicateError::invalid("user_prompt must not be empty"));
        }

        if let Some(url) = &self.image_url {
            let parsed = url::Url::parse(url)
                .map_err(|e| ReplicateError::invalid(format!("image_url is not a URL: {}", e)))?;
            if !matches!(parsed.scheme(), "http" | "https" | "data") {
                return Err(ReplicateError::invalid(format!(
                    "image_url scheme '{}' is not supported",
                    parsed.scheme()
                )));
            }
        }

        Ok(())
    }
}

/// Builder for [`ReplyRequest`].
#[derive(Debug, Default)]
pub struct ReplyRequestBuilder {
    system_prompt: String,
    user_prompt: String,
    history: Vec<ChatTurn>,
    image_url: Option<String>,
    model: Option<String>,
}

impl ReplyRequestBuilder {
    /// Sets the system prompt.
    pub fn system(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Sets the user prompt.
    pub fn user(mut self, prompt: impl Into<String>) -> Self {
        self.user_prompt = prompt.into();
        self
    }

    /// Sets the full history.
    pub fn history(mut self, history: Vec<ChatTurn>) -> Self {
        self.history = history;
        self
    }

    /// Appends one history turn.
    pub fn turn(mut self, turn: ChatTurn) -> Self {
        self.history.push(turn);
        self
    }

    /// Attaches an image.
    pub fn image_url(mut self, url: impl Into<String>) -> Self {
        self.image_url = Some(url.into());
        self
    }

    /// Requests a specific backend.
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Builds and validates the request.
    pub fn build(self) -> ReplicateResult<ReplyRequest> {
        let request = ReplyRequest {
            system_prompt: self.system_prompt,
            user_prompt: self.user_prompt,
            history: self.history,
            image_url: self.image_url,
            model: self.model,
        };
        request.validate()?;
        Ok(request)
    }
}

/// The only success value returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssistantReply {
    /// Backend that produced the reply.
    pub backend_used: String,
    /// Normalized reply text.
    pub text: String,
    /// Prompt tokens, when reported.
    pub input_tokens: Option<u64>,
    /// Completion tokens, when reported.
    pub output_tokens: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_success() {
        let request = ReplyRequest::builder()
            .system("You are terse.")
            .user("Hello")
            .turn(ChatTurn::user("Hi"))
            .turn(ChatTurn::assistant("Hey"))
            .model("openai/gpt-4o-mini")
            .build()
            .unwrap();

        assert_eq!(request.history.len(), 2);
        assert_eq!(request.model.as_deref(), Some("openai/gpt-4o-mini"));
    }

    #[test]
    fn test_empty_user_prompt_rejected() {
        let err = ReplyRequest::builder().user("   ").build().unwrap_err();
        assert!(matches!(err, ReplicateError::InvalidRequest { status_code: None, .. }));
    }

    #[test]
    fn test_bad_image_url_rejected() {
        assert!(ReplyRequest::builder()
            .user("look")
            .image_url("not a url")
            .build()
            .is_err());
        assert!(ReplyRequest::builder()
            .user("look")
            .image_url("ftp://example.com/cat.png")
            .build()
            .is_err());
        assert!(ReplyRequest::builder()
            .user("look")
            .image_url("https://example.com/cat.png")
            .build()
            .is_ok());
    }

    #[test]
    fn test_deserialize_inbound_contract() {
        let request: ReplyRequest = serde_json::from_str(
            r#"{"system_prompt":"s","user_prompt":"u","history":[{"role":"assistant","content":"a"}]}"#,
        )
        .unwrap();
        assert_eq!(request.history[0].role, Role::Assistant);
        assert!(request.model.is_none());
    }
}
