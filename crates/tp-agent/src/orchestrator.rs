//! The tool-use orchestration loop.
//!
//! One `answer` call is one conversational turn: the model is queried, any
//! tool calls it makes go through the approval gate and the registry, the
//! results are fed back, and the loop repeats until the model answers in
//! text or the tool-round limit is hit. Everything the turn adds to the
//! history is staged locally and committed only when the turn succeeds.

use std::sync::Arc;

use futures::StreamExt;
use serde_json::json;
use tp_protocol::{
    ConversationTurn, ProjectSnapshot, SessionExport, TokenUsage, ToolCall, ToolPayload,
    ToolResult, UsageStats,
};

use crate::approval::ApprovalGate;
use crate::context::{SYSTEM_PROMPT, context_block, wants_extended_thinking};
use crate::error::{AgentError, AgentResult, ModelError};
use crate::provider::{
    ModelProvider, ModelRequest, ModelResponse, StopReason, StreamingProvider, SystemBlock,
    ToolChoice,
};
use crate::registry::ToolRegistry;
use crate::stream::StreamAccumulator;

const EMPTY_ANSWER: &str = "I couldn't generate a response.";

/// Tunables for one orchestration loop.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopSettings {
    pub max_tool_rounds: usize,
    pub max_tokens: u32,
    pub extended_thinking: bool,
    pub thinking_budget: u32,
    /// Resource names listed in the context block.
    pub sample_resources: usize,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            max_tool_rounds: 8,
            max_tokens: 4096,
            extended_thinking: true,
            thinking_budget: 10_000,
            sample_resources: 10,
        }
    }
}

/// Turn-local additions, committed to the loop state on success.
struct TurnDelta {
    turns: Vec<ConversationTurn>,
    reasoning: Option<String>,
    notices: Vec<String>,
}

impl TurnDelta {
    fn new(query: &str) -> Self {
        Self {
            turns: vec![ConversationTurn::user(query)],
            reasoning: None,
            notices: Vec::new(),
        }
    }

    fn note_reasoning(&mut self, response: &ModelResponse) {
        if let Some(reasoning) = response.reasoning() {
            tracing::debug!(chars = reasoning.len(), "model produced extended reasoning");
            self.reasoning = Some(reasoning);
        }
    }
}

type Subscriber = Box<dyn FnMut(&str) + Send>;

/// Polled between steps; true means the caller wants the turn abandoned.
pub type StopCheck<'a> = &'a (dyn Fn() -> bool + Sync);

pub struct Orchestrator<P> {
    provider: Arc<P>,
    registry: Arc<ToolRegistry>,
    gate: Arc<ApprovalGate>,
    settings: LoopSettings,
    history: Vec<ConversationTurn>,
    usage: TokenUsage,
    cached_context: Option<String>,
    last_reasoning: Option<String>,
    subscriber: Option<Subscriber>,
}

impl<P: ModelProvider> Orchestrator<P> {
    pub fn new(
        provider: Arc<P>,
        registry: Arc<ToolRegistry>,
        gate: Arc<ApprovalGate>,
        settings: LoopSettings,
    ) -> Self {
        Self {
            provider,
            registry,
            gate,
            settings,
            history: Vec::new(),
            usage: TokenUsage::default(),
            cached_context: None,
            last_reasoning: None,
            subscriber: None,
        }
    }

    /// Receives streamed text deltas in arrival order.
    pub fn set_subscriber(&mut self, subscriber: impl FnMut(&str) + Send + 'static) {
        self.subscriber = Some(Box::new(subscriber));
    }

    pub fn provider(&self) -> &Arc<P> {
        &self.provider
    }

    pub fn settings(&self) -> &LoopSettings {
        &self.settings
    }

    /// Answer one query, running tools as the model requests them.
    ///
    /// Model failures are answered with an apology and leave the history
    /// untouched. Only validation problems are returned as errors.
    pub async fn answer(
        &mut self,
        query: &str,
        snapshot: Option<&ProjectSnapshot>,
    ) -> AgentResult<String> {
        self.answer_until(query, snapshot, &|| false).await
    }

    /// Like [`answer`](Self::answer), but `stop` is polled before every
    /// model round and tool call. Once it returns true the turn ends with
    /// [`AgentError::Cancelled`]; a tool already running is awaited, never
    /// abandoned, and the history is left as it was before the query.
    pub async fn answer_until(
        &mut self,
        query: &str,
        snapshot: Option<&ProjectSnapshot>,
        stop: StopCheck<'_>,
    ) -> AgentResult<String> {
        let query = validate_query(query)?;
        let system = self.system_blocks(snapshot);
        let thinking_budget = self.thinking_budget(query);
        let tools = self.registry.definitions();
        let mut delta = TurnDelta::new(query);
        let mut transcript: Vec<String> = Vec::new();
        let mut rounds = 0;

        loop {
            if rounds > 0 && stop() {
                return Err(cancelled(rounds));
            }
            let request = ModelRequest {
                system: system.clone(),
                messages: self.messages_with(&delta.turns),
                tools: tools.clone(),
                tool_choice: ToolChoice::Auto,
                max_tokens: self.settings.max_tokens,
                thinking_budget,
            };
            let response = match self.provider.complete(&request).await {
                Ok(response) => response,
                Err(e) => return Ok(self.model_failure(e)),
            };
            self.record_usage(&response.usage);
            delta.note_reasoning(&response);

            let text = response.text();
            let calls = response.tool_calls();
            if response.stop_reason != StopReason::ToolUse || calls.is_empty() {
                let answer = if text.trim().is_empty() {
                    EMPTY_ANSWER.to_string()
                } else {
                    text
                };
                return Ok(self.commit(delta, answer));
            }

            if !text.trim().is_empty() {
                transcript.push(text);
            }
            if rounds >= self.settings.max_tool_rounds {
                tracing::warn!(
                    rounds,
                    pending_calls = calls.len(),
                    "tool-round limit reached; remaining tool calls not executed"
                );
                transcript.push(format!(
                    "[Stopped after {} tool rounds; the remaining tool calls were not run.]",
                    self.settings.max_tool_rounds
                ));
                return Ok(self.commit(delta, transcript.join("\n\n")));
            }
            rounds += 1;

            tracing::info!(round = rounds, calls = calls.len(), "model requested tools");
            let Some(results) = self
                .run_calls(&response, &calls, query, &mut delta.notices, stop)
                .await
            else {
                return Err(cancelled(rounds));
            };
            delta
                .turns
                .push(ConversationTurn::assistant_blocks(response.content));
            delta.turns.push(ConversationTurn::tool_results(&results));
        }
    }

    /// Clear history, cached context and usage.
    pub fn clear(&mut self) {
        self.history.clear();
        self.cached_context = None;
        self.last_reasoning = None;
        self.usage.clear();
    }

    pub fn history(&self) -> &[ConversationTurn] {
        &self.history
    }

    pub fn usage(&self) -> TokenUsage {
        self.usage
    }

    pub fn usage_stats(&self) -> UsageStats {
        self.usage.stats()
    }

    pub fn cached_context(&self) -> Option<&str> {
        self.cached_context.as_deref()
    }

    /// Reasoning from the most recent successful turn, if any.
    pub fn last_reasoning(&self) -> Option<&str> {
        self.last_reasoning.as_deref()
    }

    pub fn export(&self) -> SessionExport {
        SessionExport {
            conversation_history: self.history.clone(),
            token_usage: self.usage,
            cached_context: self.cached_context.clone(),
        }
    }

    /// Replace the loop state wholesale.
    pub fn import(&mut self, export: SessionExport) {
        self.history = export.conversation_history;
        self.usage = export.token_usage;
        self.cached_context = export.cached_context;
        self.last_reasoning = None;
    }

    // ── Internals ─────────────────────────────────────────────

    fn system_blocks(&mut self, snapshot: Option<&ProjectSnapshot>) -> Vec<SystemBlock> {
        let cache = self.provider.capabilities().prompt_caching;
        let mut blocks = vec![SystemBlock::new(SYSTEM_PROMPT, cache)];
        if let Some(snapshot) = snapshot {
            self.cached_context = Some(context_block(snapshot, self.settings.sample_resources));
        }
        if let Some(context) = &self.cached_context {
            blocks.push(SystemBlock::new(context.clone(), cache));
        }
        blocks
    }

    fn thinking_budget(&self, query: &str) -> Option<u32> {
        let enabled = self.settings.extended_thinking
            && self.provider.capabilities().extended_thinking
            && wants_extended_thinking(query);
        enabled.then_some(self.settings.thinking_budget)
    }

    fn messages_with(&self, staged: &[ConversationTurn]) -> Vec<ConversationTurn> {
        self.history.iter().chain(staged).cloned().collect()
    }

    fn record_usage(&mut self, call: &TokenUsage) {
        self.usage.record(call);
        tracing::debug!(
            input = call.input_tokens,
            output = call.output_tokens,
            cache_read = call.cache_read_tokens,
            cache_creation = call.cache_creation_tokens,
            "model call usage"
        );
    }

    /// Run each call in order. `None` when `stop` fired before a call; the
    /// calls already started have finished by then.
    async fn run_calls(
        &self,
        response: &ModelResponse,
        calls: &[ToolCall],
        query: &str,
        notices: &mut Vec<String>,
        stop: StopCheck<'_>,
    ) -> Option<Vec<ToolResult>> {
        let mut results = Vec::with_capacity(calls.len());
        for call in calls {
            if stop() {
                tracing::info!(
                    finished = results.len(),
                    skipped = calls.len() - results.len(),
                    "stop requested; remaining tool calls not run"
                );
                return None;
            }
            let result = match response.malformed_inputs.get(&call.id) {
                Some(err) => {
                    tracing::warn!(tool = %call.name, id = %call.id, "not running tool with malformed input");
                    ToolResult::new(
                        call.id.clone(),
                        ToolPayload::error(
                            format!("Invalid tool input JSON: {err}"),
                            json!({ "tool": call.name }),
                        ),
                    )
                }
                None => self.execute(call, query, notices).await,
            };
            results.push(result);
        }
        Some(results)
    }

    /// Approval, then dispatch. Never fails: problems become error payloads.
    async fn execute(&self, call: &ToolCall, query: &str, notices: &mut Vec<String>) -> ToolResult {
        let context = format!("Requested while answering: {query}");
        let payload = match self
            .gate
            .check(&call.name, call.arguments.clone(), &context)
            .await
        {
            Ok(arguments) => {
                tracing::info!(tool = %call.name, id = %call.id, "dispatching tool");
                self.registry.dispatch(&call.name, arguments).await
            }
            Err(e) => {
                tracing::warn!(tool = %call.name, error = %e, "tool call blocked");
                notices.push(e.to_string());
                ToolPayload::error(e.to_string(), json!({ "tool": call.name }))
            }
        };
        ToolResult::new(call.id.clone(), payload)
    }

    fn commit(&mut self, mut delta: TurnDelta, answer: String) -> String {
        let answer = if delta.notices.is_empty() {
            answer
        } else {
            let notices: Vec<String> = delta.notices.iter().map(|n| format!("> {n}")).collect();
            format!("{answer}\n\n{}", notices.join("\n"))
        };
        delta.turns.push(ConversationTurn::assistant(answer.clone()));
        self.history.append(&mut delta.turns);
        self.last_reasoning = delta.reasoning;
        answer
    }

    fn model_failure(&self, error: ModelError) -> String {
        tracing::error!(provider = self.provider.name(), error = %error, "model call failed");
        format!(
            "I encountered an error processing your query: {error}\n\n\
             Please try rephrasing your question or check your API configuration."
        )
    }
}

impl<P: StreamingProvider> Orchestrator<P> {
    /// Streamed variant: text deltas go to the subscriber as they arrive.
    ///
    /// Tool calls from the streamed response are run once, then a single
    /// non-streaming follow-up (tool choice `none`) produces the answer.
    pub async fn answer_streaming(
        &mut self,
        query: &str,
        snapshot: Option<&ProjectSnapshot>,
    ) -> AgentResult<String> {
        self.answer_streaming_until(query, snapshot, &|| false).await
    }

    /// Streamed counterpart of [`answer_until`](Orchestrator::answer_until).
    pub async fn answer_streaming_until(
        &mut self,
        query: &str,
        snapshot: Option<&ProjectSnapshot>,
        stop: StopCheck<'_>,
    ) -> AgentResult<String> {
        let query = validate_query(query)?;
        let system = self.system_blocks(snapshot);
        let thinking_budget = self.thinking_budget(query);
        let tools = self.registry.definitions();
        let mut delta = TurnDelta::new(query);

        let request = ModelRequest {
            system: system.clone(),
            messages: self.messages_with(&delta.turns),
            tools: tools.clone(),
            tool_choice: ToolChoice::Auto,
            max_tokens: self.settings.max_tokens,
            thinking_budget,
        };
        let mut events = match self.provider.stream(&request).await {
            Ok(events) => events,
            Err(e) => return Ok(self.model_failure(e)),
        };

        let mut acc = StreamAccumulator::new();
        while let Some(event) = events.next().await {
            let event = match event {
                Ok(event) => event,
                Err(e) => return Ok(self.model_failure(e)),
            };
            if let Some(text) = acc.apply(event) {
                if let Some(subscriber) = self.subscriber.as_mut() {
                    subscriber(&text);
                }
            }
        }
        let outcome = acc.finish();
        if !outcome.completed {
            tracing::warn!("stream ended without message_stop");
        }
        let response = outcome.response;
        self.record_usage(&response.usage);
        delta.note_reasoning(&response);

        let calls = response.tool_calls();
        if calls.is_empty() {
            let text = response.text();
            let answer = if text.trim().is_empty() {
                EMPTY_ANSWER.to_string()
            } else {
                text
            };
            return Ok(self.commit(delta, answer));
        }

        tracing::info!(calls = calls.len(), "streamed response requested tools");
        let results = match self
            .run_calls(&response, &calls, query, &mut delta.notices, stop)
            .await
        {
            Some(results) if !stop() => results,
            _ => return Err(cancelled(1)),
        };
        delta
            .turns
            .push(ConversationTurn::assistant_blocks(response.content));
        delta.turns.push(ConversationTurn::tool_results(&results));

        let follow_up = ModelRequest {
            system,
            messages: self.messages_with(&delta.turns),
            tools,
            tool_choice: ToolChoice::None,
            max_tokens: self.settings.max_tokens,
            thinking_budget,
        };
        let response = match self.provider.complete(&follow_up).await {
            Ok(response) => response,
            Err(e) => return Ok(self.model_failure(e)),
        };
        self.record_usage(&response.usage);
        delta.note_reasoning(&response);
        let text = response.text();
        let answer = if text.trim().is_empty() {
            EMPTY_ANSWER.to_string()
        } else {
            text
        };
        Ok(self.commit(delta, answer))
    }
}

fn cancelled(rounds: usize) -> AgentError {
    tracing::info!(rounds, "query cancelled; turn discarded");
    AgentError::Cancelled
}

fn validate_query(query: &str) -> AgentResult<&str> {
    let query = query.trim();
    if query.is_empty() {
        return Err(AgentError::Validation("query must not be empty".into()));
    }
    Ok(query)
}
