//! Conversation turns and the tool-call protocol carried inside them.
//!
//! Blocks serialize in the Messages wire shape (`{"type": "tool_use", ...}`)
//! so a turn can be sent to the model service and written to an export file
//! without translation.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Who authored a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One block of structured turn content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    /// Extended reasoning. Kept verbatim in history, never shown as the answer.
    Thinking {
        thinking: String,
        #[serde(default)]
        signature: String,
    },
    RedactedThinking {
        data: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }
}

/// Turn content: either a bare string or a list of blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

/// A single entry in the conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: MessageContent,
}

impl ConversationTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Text(text.into()),
        }
    }

    /// Assistant turn echoing the model's blocks verbatim (thinking included).
    pub fn assistant_blocks(blocks: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Blocks(blocks),
        }
    }

    /// User turn carrying the results for a batch of tool calls.
    pub fn tool_results(results: &[ToolResult]) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Blocks(results.iter().map(ToolResult::to_block).collect()),
        }
    }

    /// Blocks view; a plain-text turn is presented as a single text block.
    pub fn blocks(&self) -> Vec<ContentBlock> {
        match &self.content {
            MessageContent::Text(text) => vec![ContentBlock::text(text.clone())],
            MessageContent::Blocks(blocks) => blocks.clone(),
        }
    }

    /// Concatenated visible text, excluding reasoning and tool blocks.
    pub fn text(&self) -> String {
        match &self.content {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join(""),
        }
    }

    /// Tool calls requested in this turn, in order.
    pub fn tool_calls(&self) -> Vec<ToolCall> {
        match &self.content {
            MessageContent::Text(_) => Vec::new(),
            MessageContent::Blocks(blocks) => blocks.iter().filter_map(ToolCall::from_block).collect(),
        }
    }

    /// Ids of the tool results carried by this turn, in order.
    pub fn tool_result_ids(&self) -> Vec<&str> {
        match &self.content {
            MessageContent::Text(_) => Vec::new(),
            MessageContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::ToolResult { tool_use_id, .. } => Some(tool_use_id.as_str()),
                    _ => None,
                })
                .collect(),
        }
    }
}

/// A request from the model to invoke a named tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Assigned by the model; echoed back unchanged on the result.
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }

    pub fn from_block(block: &ContentBlock) -> Option<Self> {
        match block {
            ContentBlock::ToolUse { id, name, input } => {
                Some(Self::new(id.clone(), name.clone(), input.clone()))
            }
            _ => None,
        }
    }

    pub fn to_block(&self) -> ContentBlock {
        ContentBlock::ToolUse {
            id: self.id.clone(),
            name: self.name.clone(),
            input: self.arguments.clone(),
        }
    }
}

/// Outcome of a tool invocation as seen by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum ToolPayload {
    Success(Value),
    /// Structured error, always an object with at least an `error` key.
    Error(Value),
}

impl ToolPayload {
    /// Structured error payload `{error: message, ..extra}`.
    pub fn error(message: impl Into<String>, extra: Value) -> Self {
        let mut body = serde_json::Map::new();
        body.insert("error".into(), Value::String(message.into()));
        if let Value::Object(fields) = extra {
            body.extend(fields);
        }
        Self::Error(Value::Object(body))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    pub fn value(&self) -> &Value {
        match self {
            Self::Success(v) | Self::Error(v) => v,
        }
    }

    pub fn into_value(self) -> Value {
        match self {
            Self::Success(v) | Self::Error(v) => v,
        }
    }
}

/// The answer to exactly one `ToolCall`, matched by id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub payload: ToolPayload,
}

impl ToolResult {
    pub fn new(tool_call_id: impl Into<String>, payload: ToolPayload) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            payload,
        }
    }

    pub fn to_block(&self) -> ContentBlock {
        ContentBlock::ToolResult {
            tool_use_id: self.tool_call_id.clone(),
            content: self.payload.value().to_string(),
            is_error: self.payload.is_error(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tool_use_block_wire_shape() {
        let block = ToolCall::new("toolu_01", "execute_terraform_plan", json!({"detailed": true}))
            .to_block();
        let value = serde_json::to_value(&block).unwrap();
        assert_eq!(value["type"], "tool_use");
        assert_eq!(value["id"], "toolu_01");
        assert_eq!(value["input"]["detailed"], true);
    }

    #[test]
    fn tool_result_omits_false_is_error() {
        let ok = ToolResult::new("toolu_01", ToolPayload::Success(json!({"count": 2})));
        let value = serde_json::to_value(ok.to_block()).unwrap();
        assert_eq!(value["type"], "tool_result");
        assert!(value.get("is_error").is_none());
        assert_eq!(value["content"], r#"{"count":2}"#);

        let err = ToolResult::new("toolu_02", ToolPayload::error("boom", json!({"tool": "x"})));
        let value = serde_json::to_value(err.to_block()).unwrap();
        assert_eq!(value["is_error"], true);
    }

    #[test]
    fn error_payload_merges_extra_fields() {
        let payload = ToolPayload::error("Unknown tool: nope", json!({"available_tools": ["a"]}));
        assert!(payload.is_error());
        assert_eq!(payload.value()["error"], "Unknown tool: nope");
        assert_eq!(payload.value()["available_tools"][0], "a");
    }

    #[test]
    fn plain_string_content_deserializes() {
        let turn: ConversationTurn =
            serde_json::from_value(json!({"role": "user", "content": "list my buckets"})).unwrap();
        assert_eq!(turn.role, Role::User);
        assert_eq!(turn.text(), "list my buckets");
        assert!(turn.tool_calls().is_empty());
    }

    #[test]
    fn block_turn_exposes_calls_and_text() {
        let turn = ConversationTurn::assistant_blocks(vec![
            ContentBlock::Thinking {
                thinking: "hmm".into(),
                signature: "sig".into(),
            },
            ContentBlock::text("Running a plan."),
            ToolCall::new("t1", "execute_terraform_plan", json!({})).to_block(),
        ]);
        assert_eq!(turn.text(), "Running a plan.");
        let calls = turn.tool_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "t1");
    }

    #[test]
    fn tool_results_turn_preserves_ids() {
        let results = vec![
            ToolResult::new("a", ToolPayload::Success(json!(1))),
            ToolResult::new("b", ToolPayload::Success(json!(2))),
        ];
        let turn = ConversationTurn::tool_results(&results);
        assert_eq!(turn.role, Role::User);
        assert_eq!(turn.tool_result_ids(), vec!["a", "b"]);
    }
}
