// Generation module
// Streaming relay to the Ollama chat endpoint


use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::Config;
use crate::{RagError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    #[inline]
    pub fn system<S: Into<String>>(content: S) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    #[inline]
    pub fn user<S: Into<String>>(content: S) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    #[inline]
    pub fn assistant<S: Into<String>>(content: S) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Sampling options forwarded to the model
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationOptions {
    pub temperature: f32,
    pub top_p: f32,
    pub num_ctx: u32,
}

#[derive(Debug, Serialize)]
struct ChatRequestBody<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    options: &'a GenerationOptions,
}

/// One line of the newline-delimited response
#[derive(Debug, Deserialize)]
struct ChatFrame {
    #[serde(default)]
    message: Option<FrameMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FrameMessage {
    #[serde(default)]
    content: String,
}

/// Event relayed to the consumer of a completion
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    /// Incremental text, in arrival order
    Message(String),
    /// The model finished normally
    Done,
    /// The upstream request failed; no further events follow
    Error(String),
}

impl RelayEvent {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Message(_))
    }
}

/// Client for `POST /api/chat`
#[derive(Debug, Clone)]
pub struct OllamaChat {
    client: reqwest::Client,
    url: Url,
    model: String,
    options: GenerationOptions,
    idle_timeout: Duration,
    channel_capacity: usize,
}

impl OllamaChat {
    #[inline]
    pub fn new(config: &Config) -> Result<Self> {
        let url = config
            .ollama_url()
            .map_err(|e| RagError::Config(e.to_string()))?
            .join("/api/chat")
            .map_err(|e| RagError::Config(format!("Failed to build chat URL: {}", e)))?;

        let client = reqwest::Client::builder()
            .timeout(config.generation.request_timeout())
            .build()
            .map_err(|e| RagError::Generation(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url,
            model: config.ollama.chat_model.clone(),
            options: GenerationOptions {
                temperature: config.generation.temperature,
                top_p: config.generation.top_p,
                num_ctx: config.generation.num_ctx,
            },
            idle_timeout: config.generation.idle_timeout(),
            channel_capacity: config.generation.channel_capacity.max(1),
        })
    }

    #[inline]
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    #[inline]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Start a streaming completion
    ///
    /// The request runs in a background task that feeds a bounded channel, so
    /// a slow consumer applies backpressure to the upstream read. Dropping or
    /// cancelling the returned stream aborts the task and the connection.
    #[inline]
    pub fn stream_chat(&self, messages: Vec<ChatMessage>) -> CompletionStream {
        info!(
            "Starting completion with {} ({} messages)",
            self.model,
            messages.len()
        );

        let request = self.client.post(self.url.clone()).json(&ChatRequestBody {
            model: &self.model,
            messages: &messages,
            stream: true,
            options: &self.options,
        });

        let (tx, rx) = mpsc::channel(self.channel_capacity);
        let idle_timeout = self.idle_timeout;

        let producer = tokio::spawn(async move {
            tokio::select! {
                () = tx.closed() => {
                    debug!("Completion consumer went away, aborting upstream request");
                }
                () = relay(request, idle_timeout, &tx) => {}
            }
        });

        CompletionStream {
            events: rx,
            producer: Some(producer),
            pending: None,
            finished: false,
            cancelled: false,
        }
    }

    /// Run a completion without streaming and return the full answer
    #[inline]
    pub async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let response = self
            .client
            .post(self.url.clone())
            .json(&ChatRequestBody {
                model: &self.model,
                messages,
                stream: false,
                options: &self.options,
            })
            .send()
            .await
            .map_err(|e| {
                RagError::Generation(format!("Failed to reach generation service: {}", e))
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| RagError::Generation(format!("Failed to read response: {}", e)))?;
        if !status.is_success() {
            return Err(RagError::Generation(format!(
                "Generation service returned HTTP {}: {}",
                status,
                body.trim()
            )));
        }

        let frame: ChatFrame = serde_json::from_str(&body)
            .map_err(|e| RagError::Generation(format!("Malformed response: {}", e)))?;
        if let Some(error) = frame.error {
            return Err(RagError::Generation(error));
        }
        Ok(frame.message.map(|m| m.content).unwrap_or_default())
    }
}

/// Drive the upstream request and always finish with one terminal event
async fn relay(
    request: reqwest::RequestBuilder,
    idle_timeout: Duration,
    tx: &mpsc::Sender<RelayEvent>,
) {
    let terminal = match pump(request, idle_timeout, tx).await {
        Ok(()) => RelayEvent::Done,
        Err(message) => {
            warn!("Completion failed: {}", message);
            RelayEvent::Error(message)
        }
    };

    if tx.send(terminal).await.is_err() {
        debug!("Completion consumer closed before the terminal event");
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Done,
    Closed,
}

async fn pump(
    request: reqwest::RequestBuilder,
    idle_timeout: Duration,
    tx: &mpsc::Sender<RelayEvent>,
) -> std::result::Result<(), String> {
    let response = tokio::time::timeout(idle_timeout, request.send())
        .await
        .map_err(|_| stalled(idle_timeout))?
        .map_err(|e| format!("Failed to reach generation service: {}", e))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(format!(
            "Generation service returned HTTP {}: {}",
            status,
            body.trim()
        ));
    }

    let mut stream = Box::pin(response.bytes_stream());
    let mut buffer: Vec<u8> = Vec::new();

    loop {
        let next = tokio::time::timeout(idle_timeout, stream.next())
            .await
            .map_err(|_| stalled(idle_timeout))?;
        let Some(chunk) = next else {
            break;
        };
        let chunk = chunk.map_err(|e| format!("Generation stream failed: {}", e))?;
        buffer.extend_from_slice(&chunk);

        while let Some(newline) = buffer.iter().position(|byte| *byte == b'\n') {
            let line: Vec<u8> = buffer.drain(..=newline).collect();
            match handle_line(&line, tx).await? {
                Flow::Continue => {}
                Flow::Done | Flow::Closed => return Ok(()),
            }
        }
    }

    // Last frame may lack a trailing newline
    match handle_line(&buffer, tx).await? {
        Flow::Done | Flow::Closed => Ok(()),
        Flow::Continue => Err("Generation stream ended before completion".to_string()),
    }
}

fn stalled(idle_timeout: Duration) -> String {
    format!("Generation stalled: no data for {:?}", idle_timeout)
}

async fn handle_line(
    line: &[u8],
    tx: &mpsc::Sender<RelayEvent>,
) -> std::result::Result<Flow, String> {
    let text = std::str::from_utf8(line)
        .map_err(|e| format!("Malformed frame from generation service: {}", e))?
        .trim();
    if text.is_empty() {
        return Ok(Flow::Continue);
    }

    let frame: ChatFrame = serde_json::from_str(text)
        .map_err(|e| format!("Malformed frame from generation service: {}", e))?;

    if let Some(error) = frame.error {
        return Err(error);
    }

    if let Some(message) = frame.message {
        if !message.content.is_empty()
            && tx
                .send(RelayEvent::Message(message.content))
                .await
                .is_err()
        {
            return Ok(Flow::Closed);
        }
    }

    Ok(if frame.done { Flow::Done } else { Flow::Continue })
}

/// Live sequence of relay events for one completion
///
/// Ends after the first terminal event. A producer that disappears without
/// one surfaces as an `Error`, never as a silent end of stream.
pub struct CompletionStream {
    events: mpsc::Receiver<RelayEvent>,
    producer: Option<JoinHandle<()>>,
    pending: Option<RelayEvent>,
    finished: bool,
    cancelled: bool,
}

impl CompletionStream {
    /// A stream that yields a single `Error` event
    #[inline]
    pub fn failed<S: Into<String>>(message: S) -> Self {
        let (_, rx) = mpsc::channel(1);
        Self {
            events: rx,
            producer: None,
            pending: Some(RelayEvent::Error(message.into())),
            finished: false,
            cancelled: false,
        }
    }

    /// Next event, or `None` once the stream has ended or was cancelled
    #[inline]
    pub async fn next_event(&mut self) -> Option<RelayEvent> {
        std::future::poll_fn(|cx| self.poll_event(cx)).await
    }

    /// Stop relaying and abort the upstream request
    #[inline]
    pub fn cancel(&mut self) {
        if self.finished && self.producer.is_none() {
            return;
        }
        info!("Completion cancelled by caller");
        self.cancelled = true;
        self.finished = true;
        self.pending = None;
        self.events.close();
        if let Some(producer) = self.producer.take() {
            producer.abort();
        }
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Concatenate all message fragments until the stream completes
    #[inline]
    pub async fn collect_text(mut self) -> Result<String> {
        let mut text = String::new();
        while let Some(event) = self.next_event().await {
            match event {
                RelayEvent::Message(fragment) => text.push_str(&fragment),
                RelayEvent::Done => return Ok(text),
                RelayEvent::Error(message) => return Err(RagError::Generation(message)),
            }
        }
        Err(RagError::Generation("Completion was cancelled".to_string()))
    }

    fn poll_event(&mut self, cx: &mut Context<'_>) -> Poll<Option<RelayEvent>> {
        if self.finished {
            return Poll::Ready(None);
        }
        if let Some(event) = self.pending.take() {
            self.finished = event.is_terminal();
            return Poll::Ready(Some(event));
        }

        match self.events.poll_recv(cx) {
            Poll::Ready(Some(event)) => {
                self.finished = event.is_terminal();
                Poll::Ready(Some(event))
            }
            Poll::Ready(None) => {
                self.finished = true;
                Poll::Ready(Some(RelayEvent::Error(
                    "Generation stream closed unexpectedly".to_string(),
                )))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Stream for CompletionStream {
    type Item = RelayEvent;

    #[inline]
    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().poll_event(cx)
    }
}

impl Drop for CompletionStream {
    #[inline]
    fn drop(&mut self) {
        if let Some(producer) = self.producer.take() {
            producer.abort();
        }
    }
}
