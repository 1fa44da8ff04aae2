//! OpenAI-compatible chat completions provider.

use std::time::Duration;

use async_trait::async_trait;
use pipeline::{
    ChatMessage, ChatRequest, ChatResponse, ChatRole, ContentPart, LlmError, LlmProvider,
    ResponseFormat, TokenCount, TokenUsage,
};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::retry::Backoff;

/// Error bodies are cut to this many characters.
const MAX_ERROR_BODY: usize = 500;

/// Connection settings for an OpenAI-compatible server.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenAiConfig {
    /// API root, e.g. `https://api.openai.com/v1`.
    pub base_url: String,
    /// Bearer token. Local servers usually need none.
    pub api_key: Option<String>,
    /// Model name sent with every request.
    pub model: String,
    /// Replaces the temperature chosen by the operator.
    pub temperature: Option<f32>,
    /// Replaces the per-call timeout chosen by the operator.
    pub timeout: Option<Duration>,
    /// Retry schedule for 429 and 5xx answers.
    pub backoff: Backoff,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            temperature: None,
            timeout: None,
            backoff: Backoff::default(),
        }
    }
}

/// [`LlmProvider`] speaking the `/chat/completions` protocol.
#[derive(Debug, Clone)]
pub struct OpenAiProvider {
    client: reqwest::Client,
    config: OpenAiConfig,
}

impl OpenAiProvider {
    /// Creates a provider.
    ///
    /// # Errors
    ///
    /// [`LlmError::NotConfigured`] if the base URL or model is empty, or the
    /// HTTP client cannot be built.
    pub fn new(config: OpenAiConfig) -> Result<Self, LlmError> {
        if config.base_url.trim().is_empty() {
            return Err(LlmError::NotConfigured("base URL is empty".to_string()));
        }
        if config.model.trim().is_empty() {
            return Err(LlmError::NotConfigured("model is empty".to_string()));
        }
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| LlmError::NotConfigured(format!("HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }

    async fn send_once(
        &self,
        body: &WireRequest<'_>,
        timeout: Duration,
    ) -> Result<ChatResponse, LlmError> {
        let mut request = self.client.post(self.endpoint()).json(body).timeout(timeout);
        if let Some(key) = self.config.api_key.as_deref().filter(|k| !k.is_empty()) {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| LlmError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = retry_after(response.headers());
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status {
                status: status.as_u16(),
                body: body.chars().take(MAX_ERROR_BODY).collect(),
                retry_after,
            });
        }

        let reply: WireResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(format!("Failed to parse response: {e}")))?;

        let choice = reply
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::InvalidResponse("No choices in response".to_string()))?;

        Ok(ChatResponse {
            content: choice.message.content.unwrap_or_default(),
            model: reply.model.unwrap_or_else(|| self.config.model.clone()),
            usage: reply.usage.map(|u| TokenUsage {
                prompt: TokenCount::new(u.prompt_tokens),
                completion: TokenCount::new(u.completion_tokens),
            }),
        })
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn model(&self) -> &str {
        &self.config.model
    }

    async fn complete(&self, mut request: ChatRequest) -> Result<ChatResponse, LlmError> {
        if let Some(temperature) = self.config.temperature {
            request.temperature = temperature;
        }
        let timeout = self.config.timeout.unwrap_or(request.timeout);
        let body = WireRequest::new(&self.config.model, &request);
        let backoff = self.config.backoff;
        let mut attempt = 1;
        loop {
            match self.send_once(&body, timeout).await {
                Ok(response) => {
                    debug!(
                        model = %response.model,
                        attempt,
                        tokens = response.usage.map(|u| u.total().as_u64()),
                        "Chat completion succeeded"
                    );
                    return Ok(response);
                }
                Err(err) => match backoff.wait_for(attempt, &err) {
                    Some(delay) => {
                        warn!(
                            model = %self.config.model,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %err,
                            "Chat completion failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    None => return Err(err),
                },
            }
        }
    }
}

/// Seconds form of `Retry-After`. HTTP-date values are ignored.
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<WireResponseFormat>,
}

impl<'a> WireRequest<'a> {
    fn new(model: &'a str, request: &'a ChatRequest) -> Self {
        Self {
            model,
            messages: request.messages.iter().map(WireMessage::from).collect(),
            temperature: request.temperature,
            response_format: match request.response_format {
                ResponseFormat::Text => None,
                ResponseFormat::JsonObject => Some(WireResponseFormat {
                    kind: "json_object",
                }),
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: WireContent<'a>,
}

impl<'a> From<&'a ChatMessage> for WireMessage<'a> {
    fn from(message: &'a ChatMessage) -> Self {
        let role = match message.role {
            ChatRole::System => "system",
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
        };
        // A lone text part goes out as a plain string; some servers reject
        // part arrays for system messages.
        let content = match message.content.as_slice() {
            [ContentPart::Text { text }] => WireContent::Text(text),
            parts => WireContent::Parts(parts.iter().map(WirePart::from).collect()),
        };
        Self { role, content }
    }
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum WireContent<'a> {
    Text(&'a str),
    Parts(Vec<WirePart<'a>>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WirePart<'a> {
    Text { text: &'a str },
    ImageUrl { image_url: WireImageUrl<'a> },
}

impl<'a> From<&'a ContentPart> for WirePart<'a> {
    fn from(part: &'a ContentPart) -> Self {
        match part {
            ContentPart::Text { text } => WirePart::Text { text },
            ContentPart::ImageUrl { url } => WirePart::ImageUrl {
                image_url: WireImageUrl { url },
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct WireImageUrl<'a> {
    url: &'a str,
}

#[derive(Debug, Serialize)]
struct WireResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireReplyMessage,
}

#[derive(Debug, Deserialize)]
struct WireReplyMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}
