//! E2E tests for the tool-use loop against a mock Messages API.

mod helpers;

use serde_json::{Value, json};

use helpers::{TestHarness, anthropic_text, anthropic_tool_use};
use tp_agent::approval::ApprovalGate;
use tp_agent::orchestrator::LoopSettings;
use tp_agent::provider::{AnthropicConfig, AnthropicProvider};
use tp_protocol::TaskStatus;

fn tool_result_blocks(request: &Value) -> Vec<Value> {
    request["messages"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|m| m["content"].as_array())
        .flatten()
        .filter(|b| b["type"] == "tool_result")
        .cloned()
        .collect()
}

/// Resource question answered through `get_resources` on the scanned project.
#[tokio::test]
async fn e2e_resource_question_uses_snapshot_tool() {
    let h = TestHarness::new().await;
    h.reply_anthropic(anthropic_tool_use(&[(
        "toolu_1",
        "get_resources",
        json!({"resource_type": "aws_instance"}),
    )]))
    .await;
    h.reply_anthropic(anthropic_text("You have two EC2 instances: web and worker."))
        .await;
    let mut agent = h.anthropic_agent(ApprovalGate::disabled());

    let answer = agent.ask("Which instances exist?").await.unwrap();
    assert_eq!(answer, "You have two EC2 instances: web and worker.");

    let requests = h.model_requests().await;
    assert_eq!(requests.len(), 2);

    // cached system prompt + project context
    let system = requests[0]["system"].as_array().unwrap();
    assert_eq!(system.len(), 2);
    assert_eq!(system[0]["cache_control"]["type"], "ephemeral");
    let context = system[1]["text"].as_str().unwrap();
    assert!(context.contains("**Resources**: 3 total resources defined"));
    assert!(context.contains("- aws_instance: 2"));
    assert!(context.contains("**Providers**: aws"));
    assert_eq!(requests[0]["tools"].as_array().unwrap().len(), 8);

    // the follow-up carries exactly one result for toolu_1
    let results = tool_result_blocks(&requests[1]);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["tool_use_id"], "toolu_1");
    let payload: Value = serde_json::from_str(results[0]["content"].as_str().unwrap()).unwrap();
    assert_eq!(payload["count"], 2);

    assert_eq!(h.runner.call_count(), 0);
    assert_eq!(agent.history().len(), 4);
    let usage = agent.usage();
    assert_eq!(usage.input_tokens, 200);
    assert_eq!(usage.output_tokens, 50);
    assert_eq!(usage.cache_creation_tokens, 400);
    assert_eq!(agent.tasks()[0].status, TaskStatus::Completed);
}

/// Plan runs the binary and the summary reaches the model.
#[tokio::test]
async fn e2e_plan_summary_reaches_model() {
    let h = TestHarness::new().await;
    h.runner.push_result(
        2,
        "Terraform will perform the following actions:\n\nPlan: 2 to add, 1 to change, 0 to destroy.\n",
        "",
    );
    h.reply_anthropic(anthropic_tool_use(&[(
        "toolu_plan",
        "execute_terraform_plan",
        json!({}),
    )]))
    .await;
    h.reply_anthropic(anthropic_text("The plan adds 2 resources and changes 1."))
        .await;
    let mut agent = h.anthropic_agent(ApprovalGate::disabled());

    agent.ask("What would change right now?").await.unwrap();
    assert_eq!(
        h.runner.invocations(),
        vec![vec!["plan".to_string(), "-detailed-exitcode".to_string()]]
    );

    let requests = h.model_requests().await;
    let results = tool_result_blocks(&requests[1]);
    let payload: Value = serde_json::from_str(results[0]["content"].as_str().unwrap()).unwrap();
    assert_eq!(payload["action"], "terraform_plan");
    assert_eq!(payload["success"], true);
    assert_eq!(payload["summary"], json!({"add": 2, "change": 1, "destroy": 0}));
}

/// Several calls in one turn are answered one-for-one, matched by id.
#[tokio::test]
async fn e2e_parallel_calls_get_matching_results() {
    let h = TestHarness::new().await;
    h.runner.push_success("aws_instance.web\n");
    h.reply_anthropic(anthropic_tool_use(&[
        ("toolu_a", "analyze_infrastructure", json!({"analysis_type": "summary"})),
        ("toolu_b", "get_terraform_state", json!({})),
        ("toolu_c", "execute_terraform_validate", json!({})),
    ]))
    .await;
    h.reply_anthropic(anthropic_text("Config is valid; one resource deployed."))
        .await;
    let mut agent = h.anthropic_agent(ApprovalGate::disabled());

    agent.ask("Give me an overview").await.unwrap();

    let requests = h.model_requests().await;
    let ids: Vec<Value> = tool_result_blocks(&requests[1])
        .iter()
        .map(|b| b["tool_use_id"].clone())
        .collect();
    assert_eq!(ids, vec![json!("toolu_a"), json!("toolu_b"), json!("toolu_c")]);
    assert_eq!(
        h.runner.invocations(),
        vec![
            vec!["state".to_string(), "list".to_string()],
            vec!["validate".to_string()],
        ]
    );
}

/// Unknown tool names come back as a structured error listing the catalog.
#[tokio::test]
async fn e2e_unknown_tool_lists_available_tools() {
    let h = TestHarness::new().await;
    h.reply_anthropic(anthropic_tool_use(&[("toolu_x", "delete_everything", json!({}))]))
        .await;
    h.reply_anthropic(anthropic_text("That tool does not exist.")).await;
    let mut agent = h.anthropic_agent(ApprovalGate::disabled());

    agent.ask("Wipe the account").await.unwrap();

    let requests = h.model_requests().await;
    let result = &tool_result_blocks(&requests[1])[0];
    assert_eq!(result["is_error"], true);
    let payload: Value = serde_json::from_str(result["content"].as_str().unwrap()).unwrap();
    assert_eq!(payload["error"], "Tool handler not registered: delete_everything");
    let available = payload["available_tools"].as_array().unwrap();
    assert_eq!(available.len(), 8);
    assert!(available.contains(&json!("execute_terraform_plan")));
}

/// A model that never stops asking for tools is cut off after the limit.
#[tokio::test]
async fn e2e_tool_rounds_are_bounded() {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, ResponseTemplate};

    let h = TestHarness::new().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(anthropic_tool_use(&[(
            "toolu_loop",
            "get_resources",
            json!({}),
        )])))
        .mount(&h.server)
        .await;
    let provider = AnthropicProvider::new(AnthropicConfig {
        api_key: Some("test-key".into()),
        base_url: h.server.uri(),
        ..Default::default()
    })
    .unwrap();
    let settings = LoopSettings {
        max_tool_rounds: 3,
        ..Default::default()
    };
    let mut agent = h.agent(provider, ApprovalGate::disabled(), settings);

    let answer = agent.ask("Keep looking").await.unwrap();
    assert!(answer.contains("Stopped after 3 tool rounds"));
    assert_eq!(h.model_requests().await.len(), 4);
    // the unexecuted tool request is not in the history
    let last = agent.history().last().unwrap();
    assert!(last.tool_calls().is_empty());
}

/// A failing model call yields an apology and leaves the history as it was.
#[tokio::test]
async fn e2e_model_failure_keeps_history() {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, ResponseTemplate};

    let h = TestHarness::new().await;
    h.reply_anthropic(anthropic_text("Hello!")).await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({
            "type": "error",
            "error": {"type": "api_error", "message": "Internal server error"}
        })))
        .mount(&h.server)
        .await;
    let mut agent = h.anthropic_agent(ApprovalGate::disabled());

    agent.ask("Hi").await.unwrap();
    let before = agent.history().to_vec();

    let answer = agent.ask("And now?").await.unwrap();
    assert!(answer.starts_with("I encountered an error processing your query:"));
    assert!(answer.contains("Internal server error"));
    assert_eq!(agent.history(), before.as_slice());
}
