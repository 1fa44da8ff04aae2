//! LLM provider port.
//!
//! Operators build a [`ChatRequest`] from a prompt template; the `llm` crate
//! supplies the HTTP transport. The message shape follows the OpenAI chat
//! completions format (text and image-URL content parts).

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{LlmError, TokenCount};

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    /// Instructions.
    System,
    /// The request.
    User,
    /// A model reply.
    Assistant,
}

/// One piece of message content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    /// Plain text.
    Text {
        /// The text.
        text: String,
    },
    /// An image referenced by URL (usually a `data:` URL).
    ImageUrl {
        /// The image URL.
        url: String,
    },
}

/// A chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Author.
    pub role: ChatRole,
    /// Content parts in order.
    pub content: Vec<ContentPart>,
}

impl ChatMessage {
    /// A system message with a single text part.
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: vec![ContentPart::Text { text: text.into() }],
        }
    }

    /// A user message with a single text part.
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: vec![ContentPart::Text { text: text.into() }],
        }
    }

    /// Appends an image part.
    #[must_use]
    pub fn with_image_url(mut self, url: impl Into<String>) -> Self {
        self.content.push(ContentPart::ImageUrl { url: url.into() });
        self
    }

    /// Concatenated text parts.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text { text } => Some(text.as_str()),
                ContentPart::ImageUrl { .. } => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Requested reply format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFormat {
    /// Free-form text.
    #[default]
    Text,
    /// A JSON object.
    JsonObject,
}

/// A chat completion request. The provider chooses the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    /// Conversation.
    pub messages: Vec<ChatMessage>,
    /// Sampling temperature.
    pub temperature: f32,
    /// Reply format.
    pub response_format: ResponseFormat,
    /// Per-call timeout.
    pub timeout: Duration,
}

/// Token usage reported by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Prompt tokens.
    pub prompt: TokenCount,
    /// Completion tokens.
    pub completion: TokenCount,
}

impl TokenUsage {
    /// Prompt plus completion tokens.
    pub fn total(self) -> TokenCount {
        self.prompt + self.completion
    }
}

/// A chat completion reply.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatResponse {
    /// Text of the first choice.
    pub content: String,
    /// Model that produced the reply.
    pub model: String,
    /// Token usage, if reported.
    pub usage: Option<TokenUsage>,
}

/// A chat-completion backend.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Model name used for requests.
    fn model(&self) -> &str;

    /// Sends `request` and returns the first choice.
    ///
    /// Implementations retry transient failures themselves.
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, LlmError>;
}
