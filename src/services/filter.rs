//! Content filter boundary around a reply.

use async_trait::async_trait;

use crate::errors::ReplicateResult;
use crate::types::conversation::ReplyRequest;

/// Moderation hook called before and after a reply is generated.
///
/// Rejections should be returned as [`crate::ReplicateError::ContentFilter`].
/// Input checks run before any network activity.
#[async_trait]
pub trait ContentFilter: Send + Sync {
    /// Checks the incoming request.
    async fn check_input(&self, request: &ReplyRequest) -> ReplicateResult<()>;

    /// Checks the normalized reply text.
    async fn check_output(&self, text: &str) -> ReplicateResult<()>;
}

/// Filter that accepts everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopContentFilter;

#[async_trait]
impl ContentFilter for NoopContentFilter {
    async fn check_input(&self, _request: &ReplyRequest) -> ReplicateResult<()> {
        Ok(())
    }

    async fn check_output(&self, _text: &str) -> ReplicateResult<()> {
        Ok(())
    }
}
