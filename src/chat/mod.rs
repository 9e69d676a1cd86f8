// Chat module
// Grounds a conversation in retrieved context and relays the answer as events


use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use crate::config::PromptConfig;
use crate::generation::{ChatMessage, CompletionStream, OllamaChat, RelayEvent, Role};
use crate::retrieval::Retriever;

/// Conversation history ending in the user's latest message
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
}

impl ChatRequest {
    #[inline]
    pub fn latest_user_message(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|message| message.role == Role::User)
            .map(|message| message.content.as_str())
    }
}

/// Server-push event delivered to chat clients
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    Message { content: String },
    Done,
    Error { error: String },
}

impl ChatEvent {
    #[inline]
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Message { .. } => "message",
            Self::Done => "done",
            Self::Error { .. } => "error",
        }
    }

    #[inline]
    pub fn data(&self) -> serde_json::Value {
        match self {
            Self::Message { content } => json!({ "content": content }),
            Self::Done => json!({}),
            Self::Error { error } => json!({ "error": error }),
        }
    }

    /// Render as a text/event-stream record
    #[inline]
    pub fn to_sse(&self) -> String {
        format!("event: {}\ndata: {}\n\n", self.event_name(), self.data())
    }
}

impl From<RelayEvent> for ChatEvent {
    #[inline]
    fn from(event: RelayEvent) -> Self {
        match event {
            RelayEvent::Message(content) => Self::Message { content },
            RelayEvent::Done => Self::Done,
            RelayEvent::Error(error) => Self::Error { error },
        }
    }
}

pub struct ChatService {
    retriever: Arc<Retriever>,
    generator: Arc<OllamaChat>,
    prompt: PromptConfig,
}

impl ChatService {
    #[inline]
    pub fn new(
        retriever: Arc<Retriever>,
        generator: Arc<OllamaChat>,
        prompt: PromptConfig,
    ) -> Self {
        Self {
            retriever,
            generator,
            prompt,
        }
    }

    /// Answer the latest user message of `request` as a live event stream
    ///
    /// Failures before generation starts arrive as the stream's terminal error.
    #[inline]
    pub async fn respond(&self, request: &ChatRequest) -> CompletionStream {
        let Some(query) = request.latest_user_message() else {
            return CompletionStream::failed("Request contains no user message");
        };

        let context = match self.retriever.get_context(query, None).await {
            Ok(context) => context,
            Err(e) => {
                warn!("Retrieval failed: {}", e);
                return CompletionStream::failed(format!("Retrieval failed: {}", e));
            }
        };

        if context.is_empty() {
            debug!("No relevant context found, answering ungrounded");
        }

        self.generator
            .stream_chat(build_messages(&self.prompt, &context, &request.messages))
    }
}

/// System prompt (and optional acknowledgement) followed by the history
#[inline]
pub fn build_messages(
    prompt: &PromptConfig,
    context: &str,
    history: &[ChatMessage],
) -> Vec<ChatMessage> {
    let context = if context.is_empty() {
        prompt.no_context_message.as_str()
    } else {
        context
    };

    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(ChatMessage::system(prompt.render_system_prompt(context)));
    if let Some(acknowledgement) = &prompt.acknowledgement {
        messages.push(ChatMessage::assistant(acknowledgement.clone()));
    }
    messages.extend_from_slice(history);
    messages
}
