//! Agent turn sources
//!
//! The agent itself (reasoning, tools, retrieval) lives elsewhere. Cadence
//! only needs a stream of reply text for one turn of one conversation.

mod chat;

use async_trait::async_trait;
use futures::stream::BoxStream;

pub use chat::{ChatCompletionsSource, ChatMessage, SseEvent, parse_sse_line};

use crate::Result;

/// One item from an agent's streamed reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnChunk {
    /// Full reply text so far
    Snapshot(String),
    /// Text appended since the previous chunk
    Delta(String),
}

/// Reply stream for a single turn; ends when the agent is done
pub type TurnStream = BoxStream<'static, Result<TurnChunk>>;

/// A source of streamed agent replies keyed by conversation
#[async_trait]
pub trait TurnSource: Send + Sync {
    /// Start a turn and return its reply stream
    ///
    /// # Errors
    ///
    /// Returns error if the turn cannot be started
    async fn stream_turn(&self, conversation_id: &str, user_text: &str) -> Result<TurnStream>;
}
