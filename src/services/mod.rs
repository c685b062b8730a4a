//! Service implementations.
//!
//! [`PredictionService`] talks to the prediction endpoints; [`ReplyService`]
//! drives it through the fallback cascade to produce one reply.

mod filter;
mod predictions;
mod reply;

pub use filter::{ContentFilter, NoopContentFilter};
pub use predictions::PredictionService;
pub use reply::{compose_prompt, ReplyService, MAX_HISTORY_TURNS};
