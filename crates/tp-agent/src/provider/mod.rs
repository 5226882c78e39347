//! Model service abstraction.
//!
//! One canonical interface (`ModelProvider::complete`) plus the optional
//! `StreamingProvider` capability as a subtrait, so streaming is a static
//! bound rather than a runtime check. Backends:
//! - `anthropic`: Messages API with prompt caching, extended thinking, SSE
//! - `openai`: OpenAI-compatible chat completions (local gateways included)
//! - `mock`: scripted responses for tests

pub mod anthropic;
pub mod mock;
pub mod openai;
pub mod sse;

use std::collections::HashMap;
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde_json::Value;
use tp_protocol::{ContentBlock, ConversationTurn, TokenUsage, ToolCall};

use crate::error::ModelError;

pub use anthropic::{AnthropicConfig, AnthropicProvider};
pub use mock::ScriptedProvider;
pub use openai::{OpenAiConfig, OpenAiProvider};

// ── Request ───────────────────────────────────────────────────

/// One system-instruction block; `cache` marks it for prompt caching.
#[derive(Debug, Clone, PartialEq)]
pub struct SystemBlock {
    pub text: String,
    pub cache: bool,
}

impl SystemBlock {
    pub fn new(text: impl Into<String>, cache: bool) -> Self {
        Self {
            text: text.into(),
            cache,
        }
    }

    pub fn cached(text: impl Into<String>) -> Self {
        Self::new(text, true)
    }
}

/// A tool offered to the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ToolChoice {
    #[default]
    Auto,
    /// Tools stay declared but the model must answer in text.
    None,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelRequest {
    pub system: Vec<SystemBlock>,
    pub messages: Vec<ConversationTurn>,
    pub tools: Vec<ToolDefinition>,
    pub tool_choice: ToolChoice,
    pub max_tokens: u32,
    /// Extended reasoning budget, when enabled for this call.
    pub thinking_budget: Option<u32>,
}

// ── Response ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    StopSequence,
    Other(String),
}

impl StopReason {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "end_turn" | "stop" => Self::EndTurn,
            "tool_use" | "tool_calls" | "function_call" => Self::ToolUse,
            "max_tokens" | "length" => Self::MaxTokens,
            "stop_sequence" => Self::StopSequence,
            other => Self::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelResponse {
    pub content: Vec<ContentBlock>,
    pub stop_reason: StopReason,
    pub usage: TokenUsage,
    /// Tool call id → decode error, for calls whose arguments were not
    /// valid JSON. Their blocks carry `{}` and must not be executed.
    pub malformed_inputs: HashMap<String, String>,
}

impl ModelResponse {
    pub fn new(content: Vec<ContentBlock>, stop_reason: StopReason, usage: TokenUsage) -> Self {
        Self {
            content,
            stop_reason,
            usage,
            malformed_inputs: HashMap::new(),
        }
    }

    /// Visible text blocks joined by newlines.
    pub fn text(&self) -> String {
        text_of(&self.content)
    }

    pub fn tool_calls(&self) -> Vec<ToolCall> {
        self.content.iter().filter_map(ToolCall::from_block).collect()
    }

    /// Reasoning text, if the model produced any.
    pub fn reasoning(&self) -> Option<String> {
        reasoning_of(&self.content)
    }
}

pub(crate) fn text_of(blocks: &[ContentBlock]) -> String {
    blocks
        .iter()
        .filter_map(|b| match b {
            ContentBlock::Text { text } => Some(text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub(crate) fn reasoning_of(blocks: &[ContentBlock]) -> Option<String> {
    let parts: Vec<&str> = blocks
        .iter()
        .filter_map(|b| match b {
            ContentBlock::Thinking { thinking, .. } => Some(thinking.as_str()),
            _ => None,
        })
        .collect();
    (!parts.is_empty()).then(|| parts.join("\n"))
}

// ── Streaming events ──────────────────────────────────────────

/// Kind of a content block opened mid-stream.
#[derive(Debug, Clone, PartialEq)]
pub enum BlockKind {
    Text,
    Thinking,
    RedactedThinking { data: String },
    ToolUse { id: String, name: String },
}

/// Provider-neutral streaming event, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    MessageStart { usage: TokenUsage },
    BlockStart { index: usize, kind: BlockKind },
    TextDelta { index: usize, text: String },
    ThinkingDelta { index: usize, thinking: String },
    SignatureDelta { index: usize, signature: String },
    InputJsonDelta { index: usize, partial_json: String },
    BlockStop { index: usize },
    MessageDelta { stop_reason: Option<StopReason>, usage: TokenUsage },
    MessageStop,
}

pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, ModelError>> + Send>>;

// ── Traits ────────────────────────────────────────────────────

/// Declared feature set of a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    /// System blocks are sent marked for caching only when set.
    pub prompt_caching: bool,
    pub extended_thinking: bool,
}

#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Short backend label (e.g. "anthropic").
    fn name(&self) -> &str;

    fn capabilities(&self) -> Capabilities;

    /// Single non-streaming request.
    async fn complete(&self, request: &ModelRequest) -> Result<ModelResponse, ModelError>;
}

/// Backends that can deliver a response as incremental events.
#[async_trait]
pub trait StreamingProvider: ModelProvider {
    async fn stream(&self, request: &ModelRequest) -> Result<EventStream, ModelError>;
}

// ── Runtime selection ─────────────────────────────────────────

/// Backend chosen from configuration at startup.
pub enum AnyProvider {
    Anthropic(AnthropicProvider),
    OpenAi(OpenAiProvider),
}

impl AnyProvider {
    pub fn model(&self) -> &str {
        match self {
            Self::Anthropic(p) => p.model(),
            Self::OpenAi(p) => p.model(),
        }
    }
}

#[async_trait]
impl ModelProvider for AnyProvider {
    fn name(&self) -> &str {
        match self {
            Self::Anthropic(p) => p.name(),
            Self::OpenAi(p) => p.name(),
        }
    }

    fn capabilities(&self) -> Capabilities {
        match self {
            Self::Anthropic(p) => p.capabilities(),
            Self::OpenAi(p) => p.capabilities(),
        }
    }

    async fn complete(&self, request: &ModelRequest) -> Result<ModelResponse, ModelError> {
        match self {
            Self::Anthropic(p) => p.complete(request).await,
            Self::OpenAi(p) => p.complete(request).await,
        }
    }
}

#[async_trait]
impl StreamingProvider for AnyProvider {
    async fn stream(&self, request: &ModelRequest) -> Result<EventStream, ModelError> {
        match self {
            Self::Anthropic(p) => p.stream(request).await,
            Self::OpenAi(p) => p.stream(request).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn stop_reason_covers_both_vocabularies() {
        assert_eq!(StopReason::parse("tool_use"), StopReason::ToolUse);
        assert_eq!(StopReason::parse("tool_calls"), StopReason::ToolUse);
        assert_eq!(StopReason::parse("stop"), StopReason::EndTurn);
        assert_eq!(StopReason::parse("length"), StopReason::MaxTokens);
        assert_eq!(
            StopReason::parse("refusal"),
            StopReason::Other("refusal".into())
        );
    }

    #[test]
    fn response_helpers_split_blocks() {
        let response = ModelResponse::new(
            vec![
                ContentBlock::Thinking {
                    thinking: "check state first".into(),
                    signature: String::new(),
                },
                ContentBlock::text("Let me look."),
                ToolCall::new("t1", "get_terraform_state", json!({})).to_block(),
                ContentBlock::text("One moment."),
            ],
            StopReason::ToolUse,
            TokenUsage::default(),
        );
        assert_eq!(response.text(), "Let me look.\nOne moment.");
        assert_eq!(response.tool_calls()[0].name, "get_terraform_state");
        assert_eq!(response.reasoning().as_deref(), Some("check state first"));
    }
}
