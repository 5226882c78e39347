//! Anthropic Messages API backend.
//!
//! Supports prompt caching (every `SystemBlock::cache` block is sent with an
//! ephemeral `cache_control`), extended thinking and SSE streaming.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tp_protocol::{ContentBlock, ConversationTurn, TokenUsage};

use super::sse::{SseDecoder, SseFrame};
use super::{
    BlockKind, Capabilities, EventStream, ModelProvider, ModelRequest, ModelResponse, StopReason,
    StreamEvent, StreamingProvider, ToolChoice,
};
use crate::error::ModelError;

const API_VERSION: &str = "2023-06-01";

/// Connection settings for the Anthropic API.
#[derive(Debug, Clone, Deserialize)]
pub struct AnthropicConfig {
    /// Usually supplied through `ANTHROPIC_API_KEY` rather than the file.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Whole-request timeout, streaming bodies included.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_model() -> String {
    "claude-3-5-sonnet-20241022".into()
}
fn default_base_url() -> String {
    "https://api.anthropic.com".into()
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_timeout_secs() -> u64 {
    300
}

impl Default for AnthropicConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: default_model(),
            base_url: default_base_url(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

// ── Wire types (request) ──────────────────────────────────────

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    system: Vec<WireSystem<'a>>,
    messages: &'a [ConversationTurn],
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<TypeTag>,
    #[serde(skip_serializing_if = "Option::is_none")]
    thinking: Option<WireThinking>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Serialize)]
struct WireSystem<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    cache_control: Option<TypeTag>,
}

#[derive(Serialize)]
struct TypeTag {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Serialize)]
struct WireTool<'a> {
    name: &'a str,
    description: &'a str,
    input_schema: &'a Value,
}

#[derive(Serialize)]
struct WireThinking {
    #[serde(rename = "type")]
    kind: &'static str,
    budget_tokens: u32,
}

// ── Wire types (response) ─────────────────────────────────────

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<Value>,
    stop_reason: Option<String>,
    #[serde(default)]
    usage: WireUsage,
}

#[derive(Debug, Default, Deserialize)]
struct WireUsage {
    #[serde(default)]
    input_tokens: Option<u64>,
    #[serde(default)]
    output_tokens: Option<u64>,
    #[serde(default)]
    cache_creation_input_tokens: Option<u64>,
    #[serde(default)]
    cache_read_input_tokens: Option<u64>,
}

impl From<WireUsage> for TokenUsage {
    fn from(u: WireUsage) -> Self {
        TokenUsage::new(
            u.input_tokens.unwrap_or(0),
            u.output_tokens.unwrap_or(0),
            u.cache_creation_input_tokens.unwrap_or(0),
            u.cache_read_input_tokens.unwrap_or(0),
        )
    }
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireEvent {
    MessageStart {
        message: WireMessageStart,
    },
    ContentBlockStart {
        index: usize,
        content_block: Value,
    },
    ContentBlockDelta {
        index: usize,
        delta: WireDelta,
    },
    ContentBlockStop {
        index: usize,
    },
    MessageDelta {
        delta: WireMessageDelta,
        #[serde(default)]
        usage: WireUsage,
    },
    MessageStop,
    Ping,
    Error {
        error: ErrorBody,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Deserialize)]
struct WireMessageStart {
    #[serde(default)]
    usage: WireUsage,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireDelta {
    TextDelta { text: String },
    ThinkingDelta { thinking: String },
    SignatureDelta { signature: String },
    InputJsonDelta { partial_json: String },
    #[serde(other)]
    Unknown,
}

#[derive(Deserialize)]
struct WireMessageDelta {
    stop_reason: Option<String>,
}

// ── Provider ──────────────────────────────────────────────────

/// Client for `POST {base_url}/v1/messages`.
pub struct AnthropicProvider {
    client: reqwest::Client,
    config: AnthropicConfig,
    api_key: String,
}

impl AnthropicProvider {
    pub fn new(config: AnthropicConfig) -> Result<Self, ModelError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| ModelError::Authentication("ANTHROPIC_API_KEY is not set".into()))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            config,
            api_key,
        })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    fn body<'a>(&'a self, request: &'a ModelRequest, stream: bool) -> MessagesRequest<'a> {
        let system = request
            .system
            .iter()
            .map(|block| WireSystem {
                kind: "text",
                text: &block.text,
                cache_control: block.cache.then_some(TypeTag { kind: "ephemeral" }),
            })
            .collect();
        let tools = request
            .tools
            .iter()
            .map(|t| WireTool {
                name: &t.name,
                description: &t.description,
                input_schema: &t.input_schema,
            })
            .collect();
        let tool_choice = match request.tool_choice {
            ToolChoice::Auto => None,
            ToolChoice::None => Some(TypeTag { kind: "none" }),
        };
        MessagesRequest {
            model: &self.config.model,
            max_tokens: effective_max_tokens(request.max_tokens, request.thinking_budget),
            system,
            messages: &request.messages,
            tools,
            tool_choice,
            thinking: request.thinking_budget.map(|budget_tokens| WireThinking {
                kind: "enabled",
                budget_tokens,
            }),
            stream,
        }
    }

    async fn send(&self, body: &MessagesRequest<'_>) -> Result<reqwest::Response, ModelError> {
        let url = format!("{}/v1/messages", self.config.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorEnvelope>(&text)
            .map(|e| e.error.message)
            .unwrap_or(text);
        tracing::warn!(status = %status, message = %message, "anthropic request failed");
        Err(match status.as_u16() {
            401 | 403 => ModelError::Authentication(message),
            429 => ModelError::RateLimited(message),
            code => ModelError::Api {
                status: code,
                message,
            },
        })
    }
}

/// `max_tokens` must exceed the thinking budget, so it is raised when needed.
fn effective_max_tokens(max_tokens: u32, thinking_budget: Option<u32>) -> u32 {
    match thinking_budget {
        Some(budget) if max_tokens <= budget => budget.saturating_add(max_tokens),
        _ => max_tokens,
    }
}

fn decode_blocks(raw: Vec<Value>) -> Vec<ContentBlock> {
    raw.into_iter()
        .filter_map(|v| match serde_json::from_value::<ContentBlock>(v) {
            Ok(block) => Some(block),
            Err(e) => {
                tracing::debug!(error = %e, "skipping unsupported content block");
                None
            }
        })
        .collect()
}

fn decode_frame(frame: SseFrame) -> Option<Result<StreamEvent, ModelError>> {
    let event: WireEvent = match serde_json::from_str(&frame.data) {
        Ok(event) => event,
        Err(e) => return Some(Err(ModelError::Decode(format!("stream event: {e}")))),
    };
    let mapped = match event {
        WireEvent::MessageStart { message } => StreamEvent::MessageStart {
            usage: message.usage.into(),
        },
        WireEvent::ContentBlockStart {
            index,
            content_block,
        } => {
            let kind = match serde_json::from_value::<ContentBlock>(content_block) {
                Ok(ContentBlock::Text { .. }) => BlockKind::Text,
                Ok(ContentBlock::Thinking { .. }) => BlockKind::Thinking,
                Ok(ContentBlock::RedactedThinking { data }) => BlockKind::RedactedThinking { data },
                Ok(ContentBlock::ToolUse { id, name, .. }) => BlockKind::ToolUse { id, name },
                _ => return None,
            };
            StreamEvent::BlockStart { index, kind }
        }
        WireEvent::ContentBlockDelta { index, delta } => match delta {
            WireDelta::TextDelta { text } => StreamEvent::TextDelta { index, text },
            WireDelta::ThinkingDelta { thinking } => StreamEvent::ThinkingDelta { index, thinking },
            WireDelta::SignatureDelta { signature } => {
                StreamEvent::SignatureDelta { index, signature }
            }
            WireDelta::InputJsonDelta { partial_json } => StreamEvent::InputJsonDelta {
                index,
                partial_json,
            },
            WireDelta::Unknown => return None,
        },
        WireEvent::ContentBlockStop { index } => StreamEvent::BlockStop { index },
        WireEvent::MessageDelta { delta, usage } => StreamEvent::MessageDelta {
            stop_reason: delta.stop_reason.as_deref().map(StopReason::parse),
            usage: usage.into(),
        },
        WireEvent::MessageStop => StreamEvent::MessageStop,
        WireEvent::Ping | WireEvent::Unknown => return None,
        WireEvent::Error { error } => {
            return Some(Err(ModelError::Stream(format!(
                "{}: {}",
                error.kind, error.message
            ))));
        }
    };
    Some(Ok(mapped))
}

#[async_trait]
impl ModelProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            prompt_caching: true,
            extended_thinking: true,
        }
    }

    async fn complete(&self, request: &ModelRequest) -> Result<ModelResponse, ModelError> {
        let body = self.body(request, false);
        let response = self.send(&body).await?;
        let parsed: MessagesResponse = response.json().await?;
        Ok(ModelResponse::new(
            decode_blocks(parsed.content),
            StopReason::parse(parsed.stop_reason.as_deref().unwrap_or("end_turn")),
            parsed.usage.into(),
        ))
    }
}

#[async_trait]
impl StreamingProvider for AnthropicProvider {
    async fn stream(&self, request: &ModelRequest) -> Result<EventStream, ModelError> {
        let body = self.body(request, true);
        let response = self.send(&body).await?;
        let events = response
            .bytes_stream()
            .scan(SseDecoder::new(), |decoder, chunk| {
                let batch: Vec<Result<StreamEvent, ModelError>> = match chunk {
                    Ok(bytes) => decoder.push(&bytes).into_iter().filter_map(decode_frame).collect(),
                    Err(e) => vec![Err(ModelError::Stream(e.to_string()))],
                };
                futures::future::ready(Some(futures::stream::iter(batch)))
            })
            .flatten();
        Ok(Box::pin(events))
    }
}
