//! OpenAI-compatible chat completions backend.
//!
//! Covers the hosted OpenAI API as well as local gateways (Ollama, vLLM,
//! LM Studio) that speak the same protocol. Conversation history is kept in
//! the Messages block shape, so it is converted on every request: tool
//! results become `role: "tool"` messages and reasoning blocks are dropped.

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tp_protocol::{ContentBlock, ConversationTurn, MessageContent, Role, TokenUsage};

use super::sse::{SseDecoder, SseFrame};
use super::{
    BlockKind, Capabilities, EventStream, ModelProvider, ModelRequest, ModelResponse, StopReason,
    StreamEvent, StreamingProvider, ToolChoice,
};
use crate::error::ModelError;

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const OPENAI_MODEL: &str = "gpt-4o";
pub const LOCAL_GATEWAY_BASE_URL: &str = "http://localhost:11434/v1";
pub const LOCAL_GATEWAY_MODEL: &str = "llama3.1";

/// Connection settings for an OpenAI-compatible endpoint.
///
/// Empty `model` / `base_url` are filled in by [`OpenAiConfig::or_defaults`]
/// so one struct serves both the hosted and the local profile.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OpenAiConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub base_url: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_max_tokens() -> u32 {
    4096
}
fn default_timeout_secs() -> u64 {
    300
}

impl OpenAiConfig {
    /// Hosted OpenAI profile.
    pub fn openai() -> Self {
        Self::default().or_defaults(OPENAI_MODEL, OPENAI_BASE_URL)
    }

    /// Local gateway profile (no key required).
    pub fn local_gateway() -> Self {
        Self::default().or_defaults(LOCAL_GATEWAY_MODEL, LOCAL_GATEWAY_BASE_URL)
    }

    /// Fill unset fields.
    pub fn or_defaults(mut self, model: &str, base_url: &str) -> Self {
        if self.model.trim().is_empty() {
            self.model = model.to_string();
        }
        if self.base_url.trim().is_empty() {
            self.base_url = base_url.to_string();
        }
        if self.max_tokens == 0 {
            self.max_tokens = default_max_tokens();
        }
        if self.timeout_secs == 0 {
            self.timeout_secs = default_timeout_secs();
        }
        self
    }
}

// ── Wire types ────────────────────────────────────────────────

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<StreamOptions>,
}

#[derive(Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Debug, Serialize, PartialEq)]
struct ChatMessage {
    role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<WireToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl ChatMessage {
    fn plain(role: &'static str, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }
}

#[derive(Debug, Serialize, PartialEq)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireFunctionCall,
}

#[derive(Debug, Serialize, PartialEq)]
struct WireFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Serialize)]
struct WireTool<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireFunction<'a>,
}

#[derive(Serialize)]
struct WireFunction<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a Value,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ResponseToolCall>,
}

#[derive(Deserialize)]
struct ResponseToolCall {
    id: String,
    function: ResponseFunction,
}

#[derive(Deserialize)]
struct ResponseFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Default, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

impl From<WireUsage> for TokenUsage {
    fn from(u: WireUsage) -> Self {
        TokenUsage::new(u.prompt_tokens, u.completion_tokens, 0, 0)
    }
}

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
    finish_reason: Option<String>,
}

#[derive(Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<StreamToolCall>,
}

#[derive(Deserialize)]
struct StreamToolCall {
    #[serde(default)]
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<StreamFunction>,
}

#[derive(Default, Deserialize)]
struct StreamFunction {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

// ── History conversion ────────────────────────────────────────

fn to_chat_messages(request: &ModelRequest) -> Vec<ChatMessage> {
    let mut out = Vec::with_capacity(request.messages.len() + 1);
    let system = request
        .system
        .iter()
        .map(|b| b.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");
    if !system.is_empty() {
        out.push(ChatMessage::plain("system", system));
    }

    for turn in &request.messages {
        match (&turn.role, &turn.content) {
            (Role::User, MessageContent::Text(text)) => out.push(ChatMessage::plain("user", text)),
            (Role::Assistant, MessageContent::Text(text)) => {
                out.push(ChatMessage::plain("assistant", text))
            }
            (Role::User, MessageContent::Blocks(blocks)) => {
                let mut text = Vec::new();
                for block in blocks {
                    match block {
                        ContentBlock::ToolResult {
                            tool_use_id,
                            content,
                            ..
                        } => out.push(ChatMessage {
                            role: "tool",
                            content: Some(content.clone()),
                            tool_calls: Vec::new(),
                            tool_call_id: Some(tool_use_id.clone()),
                        }),
                        ContentBlock::Text { text: t } => text.push(t.as_str()),
                        _ => {}
                    }
                }
                if !text.is_empty() {
                    out.push(ChatMessage::plain("user", text.join("\n")));
                }
            }
            (Role::Assistant, MessageContent::Blocks(blocks)) => {
                let mut text = Vec::new();
                let mut tool_calls = Vec::new();
                for block in blocks {
                    match block {
                        ContentBlock::Text { text: t } => text.push(t.as_str()),
                        ContentBlock::ToolUse { id, name, input } => tool_calls.push(WireToolCall {
                            id: id.clone(),
                            kind: "function",
                            function: WireFunctionCall {
                                name: name.clone(),
                                arguments: input.to_string(),
                            },
                        }),
                        _ => {}
                    }
                }
                out.push(ChatMessage {
                    role: "assistant",
                    content: (!text.is_empty()).then(|| text.join("\n")),
                    tool_calls,
                    tool_call_id: None,
                });
            }
        }
    }
    out
}

/// Decoded tool arguments; blank means no arguments.
fn parse_arguments(raw: &str) -> Result<Value, serde_json::Error> {
    if raw.trim().is_empty() {
        return Ok(Value::Object(Default::default()));
    }
    serde_json::from_str(raw)
}

// ── Stream translation ────────────────────────────────────────

/// Maps chat-completion chunks onto block-indexed events: text is block 0,
/// tool call `i` is block `1 + i`.
#[derive(Default)]
struct ChunkTranslator {
    decoder: SseDecoder,
    started: bool,
    text_open: bool,
    open_tools: BTreeSet<usize>,
}

impl ChunkTranslator {
    fn close_blocks(&mut self, out: &mut Vec<StreamEvent>) {
        if std::mem::take(&mut self.text_open) {
            out.push(StreamEvent::BlockStop { index: 0 });
        }
        for tool in std::mem::take(&mut self.open_tools) {
            out.push(StreamEvent::BlockStop { index: tool + 1 });
        }
    }

    fn frame(&mut self, frame: SseFrame) -> Vec<Result<StreamEvent, ModelError>> {
        let mut out = Vec::new();
        if frame.data.trim() == "[DONE]" {
            self.close_blocks(&mut out);
            out.push(StreamEvent::MessageStop);
            return out.into_iter().map(Ok).collect();
        }
        let chunk: StreamChunk = match serde_json::from_str(&frame.data) {
            Ok(chunk) => chunk,
            Err(e) => return vec![Err(ModelError::Decode(format!("stream chunk: {e}")))],
        };
        if !self.started {
            self.started = true;
            out.push(StreamEvent::MessageStart {
                usage: TokenUsage::default(),
            });
        }
        for choice in chunk.choices {
            if let Some(text) = choice.delta.content.filter(|t| !t.is_empty()) {
                if !self.text_open {
                    self.text_open = true;
                    out.push(StreamEvent::BlockStart {
                        index: 0,
                        kind: BlockKind::Text,
                    });
                }
                out.push(StreamEvent::TextDelta { index: 0, text });
            }
            for call in choice.delta.tool_calls {
                let index = call.index + 1;
                let function = call.function.unwrap_or_default();
                if self.open_tools.insert(call.index) {
                    out.push(StreamEvent::BlockStart {
                        index,
                        kind: BlockKind::ToolUse {
                            id: call.id.unwrap_or_default(),
                            name: function.name.unwrap_or_default(),
                        },
                    });
                }
                if let Some(partial_json) = function.arguments.filter(|a| !a.is_empty()) {
                    out.push(StreamEvent::InputJsonDelta {
                        index,
                        partial_json,
                    });
                }
            }
            if let Some(reason) = choice.finish_reason {
                self.close_blocks(&mut out);
                out.push(StreamEvent::MessageDelta {
                    stop_reason: Some(StopReason::parse(&reason)),
                    usage: TokenUsage::default(),
                });
            }
        }
        if let Some(usage) = chunk.usage {
            out.push(StreamEvent::MessageDelta {
                stop_reason: None,
                usage: usage.into(),
            });
        }
        out.into_iter().map(Ok).collect()
    }

    fn push(&mut self, bytes: &[u8]) -> Vec<Result<StreamEvent, ModelError>> {
        let frames = self.decoder.push(bytes);
        frames.into_iter().flat_map(|f| self.frame(f)).collect()
    }
}

// ── Provider ──────────────────────────────────────────────────

/// Client for `POST {base_url}/chat/completions`.
pub struct OpenAiProvider {
    client: reqwest::Client,
    config: OpenAiConfig,
    label: &'static str,
}

impl OpenAiProvider {
    /// Unset model/base URL fall back to the local gateway profile.
    pub fn new(config: OpenAiConfig) -> Result<Self, ModelError> {
        let config = config.or_defaults(LOCAL_GATEWAY_MODEL, LOCAL_GATEWAY_BASE_URL);
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            config,
            label: "openai_compatible",
        })
    }

    /// Override the backend label reported by `name()`.
    pub fn with_label(mut self, label: &'static str) -> Self {
        self.label = label;
        self
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    fn body<'a>(&'a self, request: &'a ModelRequest, stream: bool) -> ChatRequest<'a> {
        let tools: Vec<WireTool<'a>> = request
            .tools
            .iter()
            .map(|t| WireTool {
                kind: "function",
                function: WireFunction {
                    name: &t.name,
                    description: &t.description,
                    parameters: &t.input_schema,
                },
            })
            .collect();
        let tool_choice = match (tools.is_empty(), request.tool_choice) {
            (false, ToolChoice::None) => Some("none"),
            _ => None,
        };
        ChatRequest {
            model: &self.config.model,
            messages: to_chat_messages(request),
            max_tokens: request.max_tokens,
            tools,
            tool_choice,
            stream,
            stream_options: stream.then_some(StreamOptions {
                include_usage: true,
            }),
        }
    }

    async fn send(&self, body: &ChatRequest<'_>) -> Result<reqwest::Response, ModelError> {
        let url = format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );
        let mut builder = self.client.post(&url).json(body);
        if let Some(key) = self.config.api_key.as_deref().filter(|k| !k.is_empty()) {
            builder = builder.bearer_auth(key);
        }
        let response = builder.send().await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        tracing::warn!(status = %status, backend = self.label, "chat completion request failed");
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

#[async_trait]
impl ModelProvider for OpenAiProvider {
    fn name(&self) -> &str {
        self.label
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }

    async fn complete(&self, request: &ModelRequest) -> Result<ModelResponse, ModelError> {
        let body = self.body(request, false);
        let response = self.send(&body).await?;
        let parsed: ChatResponse = response.json().await?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ModelError::Decode("response contained no choices".into()))?;

        let mut content = Vec::new();
        let mut malformed_inputs = HashMap::new();
        if let Some(text) = choice.message.content.filter(|t| !t.is_empty()) {
            content.push(ContentBlock::text(text));
        }
        for call in choice.message.tool_calls {
            let input = match parse_arguments(&call.function.arguments) {
                Ok(input) => input,
                Err(e) => {
                    tracing::warn!(tool = %call.function.name, error = %e, "tool arguments were not valid JSON");
                    malformed_inputs.insert(call.id.clone(), e.to_string());
                    Value::Object(Default::default())
                }
            };
            content.push(ContentBlock::ToolUse {
                id: call.id,
                name: call.function.name,
                input,
            });
        }
        let stop_reason = match choice.finish_reason.as_deref() {
            Some(reason) => StopReason::parse(reason),
            None if content.iter().any(|b| matches!(b, ContentBlock::ToolUse { .. })) => {
                StopReason::ToolUse
            }
            None => StopReason::EndTurn,
        };
        let mut response =
            ModelResponse::new(content, stop_reason, parsed.usage.map(Into::into).unwrap_or_default());
        response.malformed_inputs = malformed_inputs;
        Ok(response)
    }
}

#[async_trait]
impl StreamingProvider for OpenAiProvider {
    async fn stream(&self, request: &ModelRequest) -> Result<EventStream, ModelError> {
        let body = self.body(request, true);
        let response = self.send(&body).await?;
        let events = response
            .bytes_stream()
            .scan(ChunkTranslator::default(), |translator, chunk| {
                let batch = match chunk {
                    Ok(bytes) => translator.push(&bytes),
                    Err(e) => vec![Err(ModelError::Stream(e.to_string()))],
                };
                futures::future::ready(Some(futures::stream::iter(batch)))
            })
            .flatten();
        Ok(Box::pin(events))
    }
}
