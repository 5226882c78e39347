//! Folds a provider event stream back into a complete response.

use std::collections::{BTreeMap, HashMap};

use serde_json::Value;
use tp_protocol::{ContentBlock, TokenUsage};

use crate::provider::{BlockKind, ModelResponse, StopReason, StreamEvent};

enum Partial {
    Text(String),
    Thinking { thinking: String, signature: String },
    Redacted(String),
    ToolUse { id: String, name: String, json: String },
}

/// Result of a fully consumed stream.
#[derive(Debug)]
pub struct StreamOutcome {
    /// Calls whose input was not valid JSON are listed in
    /// `response.malformed_inputs`.
    pub response: ModelResponse,
    /// Whether `message_stop` was seen.
    pub completed: bool,
}

/// Accumulates streaming deltas per content block.
///
/// Tool input fragments are buffered until their block closes and decoded
/// exactly once, at `BlockStop`.
#[derive(Default)]
pub struct StreamAccumulator {
    open: BTreeMap<usize, Partial>,
    closed: BTreeMap<usize, ContentBlock>,
    malformed: HashMap<String, String>,
    usage: TokenUsage,
    stop_reason: Option<StopReason>,
    completed: bool,
}

impl StreamAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one event. Returns the text fragment to forward to a
    /// subscriber, if the event carried visible text.
    pub fn apply(&mut self, event: StreamEvent) -> Option<String> {
        match event {
            StreamEvent::MessageStart { usage } | StreamEvent::MessageDelta { usage, stop_reason: None } => {
                self.merge_usage(&usage);
            }
            StreamEvent::MessageDelta {
                stop_reason: Some(reason),
                usage,
            } => {
                self.merge_usage(&usage);
                self.stop_reason = Some(reason);
            }
            StreamEvent::BlockStart { index, kind } => {
                let partial = match kind {
                    BlockKind::Text => Partial::Text(String::new()),
                    BlockKind::Thinking => Partial::Thinking {
                        thinking: String::new(),
                        signature: String::new(),
                    },
                    BlockKind::RedactedThinking { data } => Partial::Redacted(data),
                    BlockKind::ToolUse { id, name } => Partial::ToolUse {
                        id,
                        name,
                        json: String::new(),
                    },
                };
                self.open.insert(index, partial);
            }
            StreamEvent::TextDelta { index, text } => {
                if self.closed.contains_key(&index) {
                    tracing::warn!(index, "ignoring text delta for a closed block");
                    return None;
                }
                match self
                    .open
                    .entry(index)
                    .or_insert_with(|| Partial::Text(String::new()))
                {
                    Partial::Text(buf) => buf.push_str(&text),
                    _ => {
                        tracing::warn!(index, "text delta for a non-text block");
                        return None;
                    }
                }
                return Some(text);
            }
            StreamEvent::ThinkingDelta { index, thinking: delta } => {
                if let Some(Partial::Thinking { thinking, .. }) = self.open.get_mut(&index) {
                    thinking.push_str(&delta);
                }
            }
            StreamEvent::SignatureDelta { index, signature: delta } => {
                if let Some(Partial::Thinking { signature, .. }) = self.open.get_mut(&index) {
                    signature.push_str(&delta);
                }
            }
            StreamEvent::InputJsonDelta {
                index,
                partial_json,
            } => {
                if let Some(Partial::ToolUse { json, .. }) = self.open.get_mut(&index) {
                    json.push_str(&partial_json);
                }
            }
            StreamEvent::BlockStop { index } => {
                if let Some(partial) = self.open.remove(&index) {
                    let block = self.finalize(partial);
                    self.closed.insert(index, block);
                }
            }
            StreamEvent::MessageStop => self.completed = true,
        }
        None
    }

    fn merge_usage(&mut self, usage: &TokenUsage) {
        self.usage.input_tokens = self.usage.input_tokens.max(usage.input_tokens);
        self.usage.output_tokens = self.usage.output_tokens.max(usage.output_tokens);
        self.usage.cache_creation_tokens = self
            .usage
            .cache_creation_tokens
            .max(usage.cache_creation_tokens);
        self.usage.cache_read_tokens = self.usage.cache_read_tokens.max(usage.cache_read_tokens);
    }

    fn finalize(&mut self, partial: Partial) -> ContentBlock {
        match partial {
            Partial::Text(text) => ContentBlock::Text { text },
            Partial::Thinking {
                thinking,
                signature,
            } => ContentBlock::Thinking {
                thinking,
                signature,
            },
            Partial::Redacted(data) => ContentBlock::RedactedThinking { data },
            Partial::ToolUse { id, name, json } => {
                let input = if json.trim().is_empty() {
                    Value::Object(Default::default())
                } else {
                    match serde_json::from_str(&json) {
                        Ok(v) => v,
                        Err(e) => {
                            tracing::warn!(tool = %name, error = %e, "streamed tool input is not valid JSON");
                            self.malformed.insert(id.clone(), e.to_string());
                            Value::Object(Default::default())
                        }
                    }
                };
                ContentBlock::ToolUse { id, name, input }
            }
        }
    }

    /// Consume the accumulator. Blocks are returned in index order; tool
    /// calls whose block never closed are dropped.
    pub fn finish(mut self) -> StreamOutcome {
        for (index, partial) in std::mem::take(&mut self.open) {
            match partial {
                Partial::ToolUse { name, .. } => {
                    tracing::warn!(tool = %name, index, "dropping tool call from unterminated block");
                }
                other => {
                    let block = self.finalize(other);
                    self.closed.insert(index, block);
                }
            }
        }
        let content: Vec<ContentBlock> = self.closed.into_values().collect();
        let stop_reason = self.stop_reason.unwrap_or_else(|| {
            if content.iter().any(|b| matches!(b, ContentBlock::ToolUse { .. })) {
                StopReason::ToolUse
            } else {
                StopReason::EndTurn
            }
        });
        let mut response = ModelResponse::new(content, stop_reason, self.usage);
        response.malformed_inputs = self.malformed;
        StreamOutcome {
            response,
            completed: self.completed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ScriptedProvider;
    use serde_json::json;

    fn feed(events: Vec<StreamEvent>) -> (Vec<String>, StreamOutcome) {
        let mut acc = StreamAccumulator::new();
        let forwarded = events.into_iter().filter_map(|e| acc.apply(e)).collect();
        (forwarded, acc.finish())
    }

    #[test]
    fn text_deltas_forwarded_in_order() {
        let events = ScriptedProvider::text_stream(&["Hel", "lo ", "world"])
            .into_iter()
            .map(Result::unwrap)
            .collect();
        let (forwarded, outcome) = feed(events);
        assert_eq!(forwarded, vec!["Hel", "lo ", "world"]);
        assert_eq!(outcome.response.text(), "Hello world");
        assert_eq!(outcome.response.stop_reason, StopReason::EndTurn);
        assert_eq!(outcome.response.usage, TokenUsage::new(10, 5, 0, 0));
        assert!(outcome.completed);
    }

    #[test]
    fn late_delta_for_closed_block_is_ignored() {
        let mut events: Vec<StreamEvent> = ScriptedProvider::text_stream(&["Plan ", "ready."])
            .into_iter()
            .map(Result::unwrap)
            .collect();
        // after BlockStop, before MessageDelta
        events.insert(
            5,
            StreamEvent::TextDelta {
                index: 0,
                text: "stray".into(),
            },
        );
        let (forwarded, outcome) = feed(events);
        assert_eq!(forwarded, vec!["Plan ", "ready."]);
        assert_eq!(outcome.response.text(), "Plan ready.");
        assert_eq!(outcome.response.content.len(), 1);
    }

    #[test]
    fn tool_input_assembled_at_block_stop() {
        let events = ScriptedProvider::tool_stream(
            "toolu_1",
            "execute_terraform_plan",
            &["{\"deta", "iled\": ", "false}"],
        )
        .into_iter()
        .map(Result::unwrap)
        .collect();
        let (forwarded, outcome) = feed(events);
        assert!(forwarded.is_empty());
        let calls = outcome.response.tool_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].arguments, json!({"detailed": false}));
        assert!(outcome.response.malformed_inputs.is_empty());
    }

    #[test]
    fn empty_tool_input_becomes_empty_object() {
        let events = ScriptedProvider::tool_stream("t", "execute_terraform_validate", &[])
            .into_iter()
            .map(Result::unwrap)
            .collect();
        let (_, outcome) = feed(events);
        assert_eq!(outcome.response.tool_calls()[0].arguments, json!({}));
    }

    #[test]
    fn malformed_tool_input_is_flagged() {
        let events = ScriptedProvider::tool_stream("t9", "get_resources", &["{\"resource_type\": "])
            .into_iter()
            .map(Result::unwrap)
            .collect();
        let (_, outcome) = feed(events);
        assert!(outcome.response.malformed_inputs.contains_key("t9"));
        assert_eq!(outcome.response.tool_calls()[0].arguments, json!({}));
    }

    #[test]
    fn unterminated_tool_block_is_dropped() {
        let (_, outcome) = feed(vec![
            StreamEvent::BlockStart {
                index: 0,
                kind: BlockKind::Text,
            },
            StreamEvent::TextDelta {
                index: 0,
                text: "partial".into(),
            },
            StreamEvent::BlockStart {
                index: 1,
                kind: BlockKind::ToolUse {
                    id: "t1".into(),
                    name: "execute_terraform_apply".into(),
                },
            },
            StreamEvent::InputJsonDelta {
                index: 1,
                partial_json: "{".into(),
            },
        ]);
        assert!(outcome.response.tool_calls().is_empty());
        assert_eq!(outcome.response.text(), "partial");
        assert_eq!(outcome.response.stop_reason, StopReason::EndTurn);
        assert!(!outcome.completed);
    }

    #[test]
    fn thinking_and_signature_accumulate() {
        let (forwarded, outcome) = feed(vec![
            StreamEvent::BlockStart {
                index: 0,
                kind: BlockKind::Thinking,
            },
            StreamEvent::ThinkingDelta {
                index: 0,
                thinking: "weigh ".into(),
            },
            StreamEvent::ThinkingDelta {
                index: 0,
                thinking: "risks".into(),
            },
            StreamEvent::SignatureDelta {
                index: 0,
                signature: "abc".into(),
            },
            StreamEvent::BlockStop { index: 0 },
        ]);
        assert!(forwarded.is_empty());
        assert_eq!(
            outcome.response.content,
            vec![ContentBlock::Thinking {
                thinking: "weigh risks".into(),
                signature: "abc".into()
            }]
        );
    }
}
