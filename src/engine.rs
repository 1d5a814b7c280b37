//! The generation engine boundary.
//!
//! The engine is an opaque upstream service: it takes a conversation history
//! plus a fixed system instruction and returns an ordered stream of text
//! chunks. [`HttpEngine`] talks to an OpenAI-shaped SSE endpoint; generation
//! is bounded by a fixed deadline and exceeding it surfaces as
//! [`ChatError::UpstreamTimeout`], never a silent hang.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;
use futures::channel::mpsc;
use futures::stream::StreamExt;
use serde::{Deserialize, Serialize};

use crate::error::ChatError;
use crate::types::{ChatMessage, Role};

pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<String, ChatError>> + Send>>;

#[async_trait]
pub trait GenerationEngine: Send + Sync {
    async fn generate(
        &self,
        history: &[ChatMessage],
        system_instruction: &str,
    ) -> Result<ChunkStream, ChatError>;
}

pub struct HttpEngine {
    client: reqwest::Client,
    endpoint: String,
    model: Option<String>,
    api_key: Option<String>,
    deadline: Duration,
}

impl HttpEngine {
    pub fn new(endpoint: String, deadline: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
            model: None,
            api_key: None,
            deadline,
        }
    }

    /// Endpoint and credentials from `LLM_ENDPOINT` / `LLM_MODEL` /
    /// `LLM_API_KEY`.
    pub fn from_env(deadline: Duration) -> Result<Self, ChatError> {
        let endpoint = std::env::var("LLM_ENDPOINT")
            .map_err(|_| ChatError::Upstream("LLM_ENDPOINT is not set".to_string()))?;
        let mut engine = Self::new(endpoint, deadline);
        engine.model = std::env::var("LLM_MODEL").ok();
        engine.api_key = std::env::var("LLM_API_KEY").ok();
        Ok(engine)
    }
}

#[derive(Serialize)]
struct UpstreamRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    messages: Vec<ChatMessage>,
    stream: bool,
}

#[derive(Deserialize)]
struct Delta {
    content: Option<String>,
}

#[derive(Deserialize)]
struct Choice {
    #[serde(default)]
    delta: Option<Delta>,
    message: Option<DeltaMessage>,
}

#[derive(Deserialize)]
struct DeltaMessage {
    content: String,
}

#[derive(Deserialize)]
struct OpenAiShape {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct ContentOnlyShape {
    content: String,
}

/// Decode one SSE `data:` payload into `(piece, done)`.
pub fn parse_sse_data(data: &str) -> Option<(String, bool)> {
    let trimmed = data.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed == "[DONE]" {
        return Some((String::new(), true));
    }

    if let Ok(parsed) = serde_json::from_str::<OpenAiShape>(trimmed) {
        if let Some(first) = parsed.choices.into_iter().next() {
            if let Some(delta) = first.delta {
                if let Some(piece) = delta.content {
                    return Some((piece, false));
                }
            }
            if let Some(msg) = first.message {
                return Some((msg.content, false));
            }
        }
        return Some((String::new(), false));
    }

    if let Ok(parsed) = serde_json::from_str::<ContentOnlyShape>(trimmed) {
        return Some((parsed.content, false));
    }

    None
}

#[async_trait]
impl GenerationEngine for HttpEngine {
    async fn generate(
        &self,
        history: &[ChatMessage],
        system_instruction: &str,
    ) -> Result<ChunkStream, ChatError> {
        // The upstream takes the instruction as the leading message.
        let mut messages = Vec::with_capacity(history.len() + 1);
        messages.push(ChatMessage {
            role: Role::User,
            content: system_instruction.to_string(),
        });
        messages.extend_from_slice(history);

        let mut request = self
            .client
            .post(&self.endpoint)
            .header("accept", "text/event-stream")
            .json(&UpstreamRequest {
                model: self.model.as_deref(),
                messages,
                stream: true,
            });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let deadline = tokio::time::Instant::now() + self.deadline;
        let response = tokio::time::timeout_at(deadline, request.send())
            .await
            .map_err(|_| ChatError::UpstreamTimeout)??;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChatError::Upstream(format!("upstream {status}: {body}")));
        }

        let (tx, rx) = mpsc::unbounded();
        tokio::spawn(async move {
            if let Err(err) = pump_sse(response, deadline, &tx).await {
                let _ = tx.unbounded_send(Err(err));
            }
        });
        Ok(Box::pin(rx))
    }
}

/// Read the SSE body line by line, forwarding decoded pieces until `[DONE]`,
/// end of stream, or the deadline.
async fn pump_sse(
    response: reqwest::Response,
    deadline: tokio::time::Instant,
    tx: &mpsc::UnboundedSender<Result<String, ChatError>>,
) -> Result<(), ChatError> {
    let mut buffer = String::new();
    let mut data_acc: Option<String> = None;
    let mut stream = response.bytes_stream();

    loop {
        let item = tokio::time::timeout_at(deadline, stream.next())
            .await
            .map_err(|_| ChatError::UpstreamTimeout)?;
        let Some(item) = item else {
            return Ok(());
        };
        let bytes = item.map_err(ChatError::from)?;
        buffer.push_str(&String::from_utf8_lossy(&bytes));

        while let Some(pos) = buffer.find('\n') {
            let mut line = buffer[..pos].to_string();
            if line.ends_with('\r') {
                line.pop();
            }
            buffer = buffer[pos + 1..].to_string();

            if line.is_empty() {
                if let Some(data) = data_acc.take() {
                    if let Some((piece, done)) = parse_sse_data(&data) {
                        if !piece.is_empty() && tx.unbounded_send(Ok(piece)).is_err() {
                            // Receiver dropped: the session was cancelled.
                            return Ok(());
                        }
                        if done {
                            return Ok(());
                        }
                    }
                }
                continue;
            }

            if let Some(rest) = line.strip_prefix("data:") {
                let fragment = rest.trim_start();
                match &mut data_acc {
                    Some(existing) => existing.push_str(fragment),
                    None => data_acc = Some(fragment.to_string()),
                }
            }
        }
    }
}
