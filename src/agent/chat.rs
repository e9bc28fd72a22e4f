//! OpenAI-compatible chat completions streamed over SSE

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, mpsc};
use tokio_stream::wrappers::UnboundedReceiverStream;

use super::{TurnChunk, TurnSource, TurnStream};
use crate::config::AgentConfig;
use crate::{Error, Result};

/// A message in a conversation's history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    #[must_use]
    pub fn system(content: &str) -> Self {
        Self::with_role("system", content)
    }

    #[must_use]
    pub fn user(content: &str) -> Self {
        Self::with_role("user", content)
    }

    #[must_use]
    pub fn assistant(content: &str) -> Self {
        Self::with_role("assistant", content)
    }

    fn with_role(role: &str, content: &str) -> Self {
        Self {
            role: role.to_string(),
            content: content.to_string(),
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
}

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Option<StreamDelta>,
}

#[derive(Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

/// One parsed line of a server-sent event stream
#[derive(Debug, PartialEq, Eq)]
pub enum SseEvent {
    /// Reply text carried by a `data:` line
    Delta(String),
    /// The `[DONE]` sentinel
    Done,
    /// Comments, keep-alives, blank lines and content-free chunks
    Skip,
}

/// Parse a single SSE line from a chat completions stream
///
/// # Errors
///
/// Returns error if a `data:` payload is not valid JSON or carries an
/// error object
pub fn parse_sse_line(line: &str) -> Result<SseEvent> {
    let Some(data) = line.trim().strip_prefix("data:") else {
        return Ok(SseEvent::Skip);
    };

    let data = data.trim();
    if data.is_empty() {
        return Ok(SseEvent::Skip);
    }
    if data == "[DONE]" {
        return Ok(SseEvent::Done);
    }

    let chunk: StreamChunk = serde_json::from_str(data)?;
    if let Some(error) = chunk.error {
        let message = error
            .get("message")
            .and_then(serde_json::Value::as_str)
            .map_or_else(|| error.to_string(), ToString::to_string);
        return Err(Error::Stream(message));
    }

    let text: String = chunk
        .choices
        .into_iter()
        .filter_map(|c| c.delta.and_then(|d| d.content))
        .collect();

    if text.is_empty() {
        Ok(SseEvent::Skip)
    } else {
        Ok(SseEvent::Delta(text))
    }
}

/// Streams replies from an OpenAI-compatible `/chat/completions` endpoint
///
/// Keeps a short in-memory history per conversation so follow-up turns
/// carry context. Nothing is persisted.
pub struct ChatCompletionsSource {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    system_prompt: String,
    max_history: usize,
    history: Arc<Mutex<HashMap<String, Vec<ChatMessage>>>>,
}

impl ChatCompletionsSource {
    /// Create a source from agent configuration
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn new(config: &AgentConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()?;

        tracing::debug!(
            base_url = %config.base_url,
            model = %config.model,
            "chat completions source initialized"
        );

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            system_prompt: config.system_prompt.clone(),
            max_history: config.max_history,
            history: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Messages remembered for a conversation
    pub async fn history(&self, conversation_id: &str) -> Vec<ChatMessage> {
        self.history
            .lock()
            .await
            .get(conversation_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Forget a conversation's history
    pub async fn clear_history(&self, conversation_id: &str) {
        self.history.lock().await.remove(conversation_id);
    }

    fn turn_memory(&self, conversation_id: &str, user_text: &str) -> TurnMemory {
        TurnMemory {
            history: Arc::clone(&self.history),
            conversation_id: conversation_id.to_string(),
            user_message: ChatMessage::user(user_text),
            max_history: self.max_history,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl TurnSource for ChatCompletionsSource {
    async fn stream_turn(&self, conversation_id: &str, user_text: &str) -> Result<TurnStream> {
        let mut messages = Vec::new();
        if !self.system_prompt.is_empty() {
            messages.push(ChatMessage::system(&self.system_prompt));
        }
        messages.extend(self.history(conversation_id).await);
        messages.push(ChatMessage::user(user_text));

        let request = ChatRequest {
            model: &self.model,
            messages: &messages,
            stream: true,
        };

        let mut builder = self.client.post(self.endpoint()).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| {
            tracing::error!(error = %e, "chat completions request failed");
            Error::Agent(e.to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "chat completions API error");
            return Err(Error::Agent(format!(
                "chat completions error {status}: {body}"
            )));
        }

        tracing::debug!(conversation_id, history = messages.len(), "reply stream opened");

        let (tx, rx) = mpsc::unbounded_channel();
        let memory = self.turn_memory(conversation_id, user_text);
        tokio::spawn(async move {
            memory.relay(Box::pin(response.bytes_stream()), &tx).await;
        });

        Ok(UnboundedReceiverStream::new(rx).boxed())
    }
}

/// What a turn needs to be written back into history once it completes
struct TurnMemory {
    history: Arc<Mutex<HashMap<String, Vec<ChatMessage>>>>,
    conversation_id: String,
    user_message: ChatMessage,
    max_history: usize,
}

impl TurnMemory {
    /// Forward the reply body to `tx`, then remember the exchange
    ///
    /// Failed or empty replies leave history untouched.
    async fn relay<S, B, E>(self, body: S, tx: &mpsc::UnboundedSender<Result<TurnChunk>>)
    where
        S: Stream<Item = std::result::Result<B, E>> + Unpin,
        B: AsRef<[u8]>,
        E: std::fmt::Display,
    {
        let Some(reply) = pump_events(body, tx).await else {
            return;
        };
        if reply.is_empty() {
            return;
        }

        let mut history = self.history.lock().await;
        let entry = history.entry(self.conversation_id).or_default();
        entry.push(self.user_message);
        entry.push(ChatMessage::assistant(&reply));
        trim_history(entry, self.max_history);
    }
}

/// Forward SSE deltas until `[DONE]`, returning the full reply
///
/// Returns `None` if the stream failed or the receiver went away.
async fn pump_events<S, B, E>(
    mut body: S,
    tx: &mpsc::UnboundedSender<Result<TurnChunk>>,
) -> Option<String>
where
    S: Stream<Item = std::result::Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let mut buffer: Vec<u8> = Vec::new();
    let mut reply = String::new();

    while let Some(chunk) = body.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                let _ = tx.send(Err(Error::Stream(e.to_string())));
                return None;
            }
        };
        buffer.extend_from_slice(chunk.as_ref());

        // Split on raw bytes so multi-byte characters never straddle a decode
        while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = buffer.drain(..=pos).collect();
            match forward_line(&String::from_utf8_lossy(&line), &mut reply, tx) {
                LineOutcome::Continue => {}
                LineOutcome::Finished => return Some(reply),
                LineOutcome::Aborted => return None,
            }
        }
    }

    match forward_line(&String::from_utf8_lossy(&buffer), &mut reply, tx) {
        LineOutcome::Aborted => None,
        LineOutcome::Continue | LineOutcome::Finished => Some(reply),
    }
}

enum LineOutcome {
    Continue,
    Finished,
    Aborted,
}

fn forward_line(
    line: &str,
    reply: &mut String,
    tx: &mpsc::UnboundedSender<Result<TurnChunk>>,
) -> LineOutcome {
    match parse_sse_line(line) {
        Ok(SseEvent::Delta(text)) => {
            reply.push_str(&text);
            if tx.send(Ok(TurnChunk::Delta(text))).is_err() {
                tracing::debug!("reply stream dropped by consumer");
                return LineOutcome::Aborted;
            }
            LineOutcome::Continue
        }
        Ok(SseEvent::Done) => LineOutcome::Finished,
        Ok(SseEvent::Skip) => LineOutcome::Continue,
        Err(e) => {
            tracing::error!(error = %e, line, "bad chunk in reply stream");
            let _ = tx.send(Err(Error::Stream(e.to_string())));
            LineOutcome::Aborted
        }
    }
}

/// Keep only the most recent `max` messages
fn trim_history(messages: &mut Vec<ChatMessage>, max: usize) {
    if messages.len() > max {
        let excess = messages.len() - max;
        messages.drain(..excess);
    }
}
