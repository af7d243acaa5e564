//! Client for the external generation server.
//!
//! Generation is only used to rephrase follow-up questions and to answer
//! with the assembled context. Streaming runs as a spawned producer task
//! that sends [`StreamEvent`]s over a bounded channel and stops when the
//! consumer cancels or goes away.

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{RagError, Result};

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Instructions.
    System,
    /// The person asking.
    User,
    /// The model.
    Assistant,
}

/// One conversation turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Author.
    pub role: Role,

    /// Text.
    pub content: String,
}

impl ChatMessage {
    /// A system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    /// A user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// An assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// An item of a streamed answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// A piece of generated text.
    Token(String),

    /// The stream failed; no further events follow.
    Error(String),

    /// The answer is complete; no further events follow.
    Done,
}

/// Receiving end of a streamed answer.
///
/// Dropping the stream cancels the producer. After a terminal event
/// ([`StreamEvent::Done`] or [`StreamEvent::Error`]) every call to
/// [`TokenStream::next`] returns `None`.
pub struct TokenStream {
    events: mpsc::Receiver<StreamEvent>,
    cancel: CancellationToken,
    finished: bool,
}

impl TokenStream {
    /// Create a bounded channel pair for a producer task.
    pub fn channel(capacity: usize) -> (mpsc::Sender<StreamEvent>, CancellationToken, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        let cancel = CancellationToken::new();
        let stream = Self {
            events: rx,
            cancel: cancel.clone(),
            finished: false,
        };
        (tx, cancel, stream)
    }

    /// Next event. A producer that disappears without a terminal event is
    /// reported as an error.
    pub async fn next(&mut self) -> Option<StreamEvent> {
        if self.finished {
            return None;
        }

        let event = match self.events.recv().await {
            Some(event) => event,
            None if self.cancel.is_cancelled() => {
                self.finished = true;
                return None;
            }
            None => {
                self.cancel.cancel();
                StreamEvent::Error("stream ended without completion".to_string())
            }
        };

        if !matches!(event, StreamEvent::Token(_)) {
            self.finished = true;
        }
        Some(event)
    }

    /// Stop the producer.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Drain the stream into a single string.
    pub async fn collect_text(mut self) -> Result<String> {
        let mut text = String::new();
        while let Some(event) = self.next().await {
            match event {
                StreamEvent::Token(token) => text.push_str(&token),
                StreamEvent::Error(e) => return Err(RagError::Generation(e)),
                StreamEvent::Done => break,
            }
        }
        Ok(text)
    }
}

impl Drop for TokenStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Trait for generation backends.
#[async_trait]
pub trait GenerationService: Send + Sync {
    /// Generate a complete answer.
    async fn complete(&self, messages: Vec<ChatMessage>) -> Result<String>;

    /// Generate an answer token by token.
    ///
    /// The default implementation emits the complete answer as one token.
    async fn stream(&self, messages: Vec<ChatMessage>) -> Result<TokenStream> {
        let text = self.complete(messages).await?;
        let (tx, _cancel, stream) = TokenStream::channel(2);
        let _ = tx.send(StreamEvent::Token(text)).await;
        let _ = tx.send(StreamEvent::Done).await;
        Ok(stream)
    }
}

/// Generation service for OpenAI-compatible `/chat/completions` endpoints.
pub struct HttpGenerationService {
    /// API base URL.
    base_url: String,

    /// HTTP client.
    client: reqwest::Client,

    /// Model name.
    model: String,

    /// Sampling temperature.
    temperature: f32,

    /// API key, sent as a bearer token when present.
    api_key: Option<String>,
}

impl HttpGenerationService {
    /// Create a new service.
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
            model: model.into(),
            temperature: 0.2,
            api_key: None,
        }
    }

    /// Set the temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set the API key.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Use a preconfigured HTTP client.
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    async fn send(&self, messages: &[ChatMessage], stream: bool) -> Result<reqwest::Response> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": self.temperature,
            "stream": stream,
        });

        let mut request = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&body);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| RagError::Generation(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(RagError::Generation(format!("{status}: {error_text}")));
        }

        Ok(response)
    }
}

#[async_trait]
impl GenerationService for HttpGenerationService {
    async fn complete(&self, messages: Vec<ChatMessage>) -> Result<String> {
        debug!("Requesting completion for {} messages", messages.len());

        let response: CompletionResponse = self
            .send(&messages, false)
            .await?
            .json()
            .await
            .map_err(|e| RagError::Generation(e.to_string()))?;

        response
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| RagError::Generation("response has no choices".to_string()))
    }

    async fn stream(&self, messages: Vec<ChatMessage>) -> Result<TokenStream> {
        debug!("Requesting streamed completion for {} messages", messages.len());

        let response = self.send(&messages, true).await?;
        let (tx, cancel, stream) = TokenStream::channel(64);

        tokio::spawn(async move {
            let mut events = std::pin::pin!(response.bytes_stream().eventsource());
            loop {
                let next = tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Generation stream cancelled");
                        return;
                    }
                    next = events.next() => next,
                };

                let event = match next {
                    Some(Ok(event)) => event,
                    Some(Err(e)) => {
                        let _ = tx.send(StreamEvent::Error(e.to_string())).await;
                        return;
                    }
                    None => {
                        let _ = tx.send(StreamEvent::Done).await;
                        return;
                    }
                };

                if event.data.trim() == "[DONE]" {
                    let _ = tx.send(StreamEvent::Done).await;
                    return;
                }

                let chunk = match serde_json::from_str::<CompletionChunk>(&event.data) {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        warn!("Skipping malformed stream chunk: {e}");
                        continue;
                    }
                };

                for token in chunk.choices.into_iter().filter_map(|c| c.delta.content) {
                    if token.is_empty() {
                        continue;
                    }
                    if tx.send(StreamEvent::Token(token)).await.is_err() {
                        return;
                    }
                }
            }
        });

        Ok(stream)
    }
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    content: Option<String>,
}
