//! Shared test harness for E2E integration tests.
//!
//! Wires a real `TerraformAgent` to a wiremock model server, a recording
//! `MockRunner` and a scanned `.tf` project in a temp directory.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use tp_agent::agent::{AgentParts, TerraformAgent};
use tp_agent::approval::ApprovalGate;
use tp_agent::orchestrator::LoopSettings;
use tp_agent::provider::{AnthropicConfig, AnthropicProvider, OpenAiConfig, OpenAiProvider};
use tp_terraform::{HclScanner, MockRunner};

pub const MAIN_TF: &str = r#"provider "aws" {
  region = var.region
}

variable "region" {
  type    = string
  default = "us-east-1"
}

resource "aws_instance" "web" {
  ami           = "ami-123"
  instance_type = "t3.micro"
}

resource "aws_instance" "worker" {
  ami = "ami-123"
}

resource "aws_s3_bucket" "assets" {
  bucket = "assets"
}

output "web_ip" {
  value = aws_instance.web.public_ip
}
"#;

pub struct TestHarness {
    pub server: MockServer,
    pub runner: Arc<MockRunner>,
    pub project: TempDir,
}

impl TestHarness {
    /// Project with three resources, one variable, one output, one provider.
    pub async fn new() -> Self {
        let project = tempfile::tempdir().unwrap();
        std::fs::write(project.path().join("main.tf"), MAIN_TF).unwrap();
        Self {
            server: MockServer::start().await,
            runner: Arc::new(MockRunner::in_dir(project.path())),
            project,
        }
    }

    pub fn anthropic_agent(&self, gate: ApprovalGate) -> TerraformAgent<AnthropicProvider> {
        let provider = AnthropicProvider::new(AnthropicConfig {
            api_key: Some("test-key".into()),
            base_url: self.server.uri(),
            ..Default::default()
        })
        .unwrap();
        self.agent(provider, gate, LoopSettings::default())
    }

    pub fn openai_agent(&self, gate: ApprovalGate) -> TerraformAgent<OpenAiProvider> {
        let provider = OpenAiProvider::new(OpenAiConfig {
            model: "llama3.1".into(),
            base_url: format!("{}/v1", self.server.uri()),
            ..Default::default()
        })
        .unwrap();
        self.agent(provider, gate, LoopSettings::default())
    }

    pub fn agent<P: tp_agent::provider::ModelProvider>(
        &self,
        provider: P,
        gate: ApprovalGate,
        settings: LoopSettings,
    ) -> TerraformAgent<P> {
        TerraformAgent::new(AgentParts {
            provider: Arc::new(provider),
            runner: self.runner.clone(),
            parser: Arc::new(HclScanner::new(self.project.path())),
            gate,
            settings,
            command_timeout: Duration::from_secs(30),
            snapshot_ttl: Duration::from_secs(60),
        })
    }

    /// Queue one Messages API reply; replies are served in mount order.
    pub async fn reply_anthropic(&self, body: Value) {
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .up_to_n_times(1)
            .mount(&self.server)
            .await;
    }

    /// Queue one streamed Messages API reply.
    pub async fn reply_anthropic_stream(&self, events: &[Value]) {
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(sse(events), "text/event-stream"))
            .up_to_n_times(1)
            .mount(&self.server)
            .await;
    }

    /// Queue one chat completions reply.
    pub async fn reply_openai(&self, body: Value) {
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .up_to_n_times(1)
            .mount(&self.server)
            .await;
    }

    /// Every request body the model server received, in order.
    pub async fn model_requests(&self) -> Vec<Value> {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .map(|r| serde_json::from_slice(&r.body).unwrap())
            .collect()
    }
}

// ── Anthropic bodies ──────────────────────────────────────────

pub fn anthropic_text(text: &str) -> Value {
    json!({
        "id": "msg_text",
        "type": "message",
        "role": "assistant",
        "content": [{"type": "text", "text": text}],
        "stop_reason": "end_turn",
        "usage": {"input_tokens": 100, "output_tokens": 20}
    })
}

pub fn anthropic_tool_use(calls: &[(&str, &str, Value)]) -> Value {
    let content: Vec<Value> = calls
        .iter()
        .map(|(id, name, input)| json!({"type": "tool_use", "id": id, "name": name, "input": input}))
        .collect();
    json!({
        "id": "msg_tools",
        "type": "message",
        "role": "assistant",
        "content": content,
        "stop_reason": "tool_use",
        "usage": {
            "input_tokens": 100,
            "output_tokens": 30,
            "cache_creation_input_tokens": 400,
            "cache_read_input_tokens": 0
        }
    })
}

/// SSE body with the event name taken from each payload's `type`.
pub fn sse(events: &[Value]) -> String {
    events
        .iter()
        .map(|e| format!("event: {}\ndata: {e}\n\n", e["type"].as_str().unwrap_or("message")))
        .collect()
}

/// Streamed response with one tool_use block whose input arrives in pieces.
pub fn anthropic_tool_stream(id: &str, name: &str, fragments: &[&str]) -> Vec<Value> {
    let mut events = vec![
        json!({"type": "message_start", "message": {"usage": {"input_tokens": 80, "output_tokens": 1}}}),
        json!({"type": "content_block_start", "index": 0, "content_block": {"type": "tool_use", "id": id, "name": name, "input": {}}}),
    ];
    for fragment in fragments {
        events.push(json!({
            "type": "content_block_delta",
            "index": 0,
            "delta": {"type": "input_json_delta", "partial_json": fragment}
        }));
    }
    events.extend([
        json!({"type": "content_block_stop", "index": 0}),
        json!({"type": "message_delta", "delta": {"stop_reason": "tool_use"}, "usage": {"output_tokens": 15}}),
        json!({"type": "message_stop"}),
    ]);
    events
}

/// Streamed plain-text response.
pub fn anthropic_text_stream(chunks: &[&str]) -> Vec<Value> {
    let mut events = vec![
        json!({"type": "message_start", "message": {"usage": {"input_tokens": 80, "output_tokens": 1}}}),
        json!({"type": "content_block_start", "index": 0, "content_block": {"type": "text", "text": ""}}),
        json!({"type": "ping"}),
    ];
    for chunk in chunks {
        events.push(json!({
            "type": "content_block_delta",
            "index": 0,
            "delta": {"type": "text_delta", "text": chunk}
        }));
    }
    events.extend([
        json!({"type": "content_block_stop", "index": 0}),
        json!({"type": "message_delta", "delta": {"stop_reason": "end_turn"}, "usage": {"output_tokens": 12}}),
        json!({"type": "message_stop"}),
    ]);
    events
}

// ── OpenAI-compatible bodies ──────────────────────────────────

pub fn openai_text(text: &str) -> Value {
    json!({
        "choices": [{"message": {"role": "assistant", "content": text}, "finish_reason": "stop"}],
        "usage": {"prompt_tokens": 60, "completion_tokens": 10}
    })
}

pub fn openai_tool_call(id: &str, name: &str, arguments: Value) -> Value {
    openai_raw_tool_call(id, name, &arguments.to_string())
}

/// Tool call whose `arguments` string is sent exactly as given.
pub fn openai_raw_tool_call(id: &str, name: &str, arguments: &str) -> Value {
    json!({
        "choices": [{
            "message": {
                "role": "assistant",
                "content": null,
                "tool_calls": [{
                    "id": id,
                    "type": "function",
                    "function": {"name": name, "arguments": arguments}
                }]
            },
            "finish_reason": "tool_calls"
        }],
        "usage": {"prompt_tokens": 60, "completion_tokens": 15}
    })
}
