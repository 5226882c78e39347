//! Scripted model provider for tests: no network.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use tp_protocol::{ContentBlock, TokenUsage, ToolCall};

use super::{
    BlockKind, Capabilities, EventStream, ModelProvider, ModelRequest, ModelResponse, StopReason,
    StreamEvent, StreamingProvider,
};
use crate::error::ModelError;

enum Scripted {
    Response(ModelResponse),
    Error(ModelError),
}

/// Replays queued responses in FIFO order and records every request.
///
/// When the queue is empty the `always` response is returned if set,
/// otherwise a transport error.
pub struct ScriptedProvider {
    responses: Mutex<VecDeque<Scripted>>,
    streams: Mutex<VecDeque<Vec<Result<StreamEvent, ModelError>>>>,
    always: Option<ModelResponse>,
    requests: Mutex<Vec<ModelRequest>>,
    capabilities: Capabilities,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            streams: Mutex::new(VecDeque::new()),
            always: None,
            requests: Mutex::new(Vec::new()),
            capabilities: Capabilities {
                prompt_caching: true,
                extended_thinking: true,
            },
        }
    }

    /// Provider that answers every call with the same response.
    pub fn always(response: ModelResponse) -> Self {
        Self {
            always: Some(response),
            ..Self::new()
        }
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn push_response(&self, response: ModelResponse) {
        self.responses
            .lock()
            .unwrap()
            .push_back(Scripted::Response(response));
    }

    pub fn push_error(&self, error: ModelError) {
        self.responses.lock().unwrap().push_back(Scripted::Error(error));
    }

    /// Queue the event sequence for the next `stream()` call.
    pub fn push_stream(&self, events: Vec<Result<StreamEvent, ModelError>>) {
        self.streams.lock().unwrap().push_back(events);
    }

    /// Every request seen so far, streaming ones included.
    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    // ── Response builders ──

    pub fn text(text: &str) -> ModelResponse {
        ModelResponse::new(
            vec![ContentBlock::text(text)],
            StopReason::EndTurn,
            TokenUsage::new(10, 5, 0, 0),
        )
    }

    /// Response requesting the given tool calls, optionally preceded by text.
    pub fn tool_use(text: Option<&str>, calls: &[(&str, &str, Value)]) -> ModelResponse {
        let mut content: Vec<ContentBlock> = text.map(ContentBlock::text).into_iter().collect();
        content.extend(
            calls
                .iter()
                .map(|(id, name, args)| ToolCall::new(*id, *name, args.clone()).to_block()),
        );
        ModelResponse::new(content, StopReason::ToolUse, TokenUsage::new(10, 5, 0, 0))
    }

    /// Stream events for a plain text answer split into `chunks`.
    pub fn text_stream(chunks: &[&str]) -> Vec<Result<StreamEvent, ModelError>> {
        let mut events = vec![
            StreamEvent::MessageStart {
                usage: TokenUsage::new(10, 0, 0, 0),
            },
            StreamEvent::BlockStart {
                index: 0,
                kind: BlockKind::Text,
            },
        ];
        events.extend(chunks.iter().map(|c| StreamEvent::TextDelta {
            index: 0,
            text: c.to_string(),
        }));
        events.extend([
            StreamEvent::BlockStop { index: 0 },
            StreamEvent::MessageDelta {
                stop_reason: Some(StopReason::EndTurn),
                usage: TokenUsage::new(0, 5, 0, 0),
            },
            StreamEvent::MessageStop,
        ]);
        events.into_iter().map(Ok).collect()
    }

    /// Stream events for one tool call whose input arrives in `fragments`.
    pub fn tool_stream(id: &str, name: &str, fragments: &[&str]) -> Vec<Result<StreamEvent, ModelError>> {
        let mut events = vec![
            StreamEvent::MessageStart {
                usage: TokenUsage::new(10, 0, 0, 0),
            },
            StreamEvent::BlockStart {
                index: 0,
                kind: BlockKind::ToolUse {
                    id: id.into(),
                    name: name.into(),
                },
            },
        ];
        events.extend(fragments.iter().map(|f| StreamEvent::InputJsonDelta {
            index: 0,
            partial_json: f.to_string(),
        }));
        events.extend([
            StreamEvent::BlockStop { index: 0 },
            StreamEvent::MessageDelta {
                stop_reason: Some(StopReason::ToolUse),
                usage: TokenUsage::new(0, 5, 0, 0),
            },
            StreamEvent::MessageStop,
        ]);
        events.into_iter().map(Ok).collect()
    }

    fn record(&self, request: &ModelRequest) {
        self.requests.lock().unwrap().push(request.clone());
    }
}

impl Default for ScriptedProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    async fn complete(&self, request: &ModelRequest) -> Result<ModelResponse, ModelError> {
        self.record(request);
        match self.responses.lock().unwrap().pop_front() {
            Some(Scripted::Response(r)) => Ok(r),
            Some(Scripted::Error(e)) => Err(e),
            None => self
                .always
                .clone()
                .ok_or_else(|| ModelError::Transport("no scripted response left".into())),
        }
    }
}

#[async_trait]
impl StreamingProvider for ScriptedProvider {
    async fn stream(&self, request: &ModelRequest) -> Result<EventStream, ModelError> {
        self.record(request);
        let events = self
            .streams
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ModelError::Transport("no scripted stream left".into()))?;
        Ok(Box::pin(futures::stream::iter(events)))
    }
}
