//! E2E tests for the streamed turn: text deltas, streamed tool calls and the
//! non-streamed follow-up.

mod helpers;

use std::sync::{Arc, Mutex};

use serde_json::{Value, json};

use helpers::{TestHarness, anthropic_text, anthropic_text_stream, anthropic_tool_stream};
use tp_agent::approval::ApprovalGate;

/// Text deltas reach the subscriber in order and form the answer.
#[tokio::test]
async fn e2e_streamed_text_reaches_subscriber() {
    let h = TestHarness::new().await;
    h.reply_anthropic_stream(&anthropic_text_stream(&["Your project ", "defines ", "3 resources."]))
        .await;
    let mut agent = h.anthropic_agent(ApprovalGate::disabled());
    let seen = Arc::new(Mutex::new(Vec::<String>::new()));
    let sink = seen.clone();
    agent.set_subscriber(move |text| sink.lock().unwrap().push(text.to_string()));

    let answer = agent.ask_streaming("How big is this project?").await.unwrap();

    assert_eq!(answer, "Your project defines 3 resources.");
    assert_eq!(
        *seen.lock().unwrap(),
        vec!["Your project ", "defines ", "3 resources."]
    );
    let requests = h.model_requests().await;
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0]["stream"], true);
    assert_eq!(agent.usage().input_tokens, 80);
    assert_eq!(agent.usage().output_tokens, 12);
    assert_eq!(agent.history().len(), 2);
}

/// A tool call assembled from input fragments runs, then one non-streamed
/// follow-up with tools switched off produces the answer.
#[tokio::test]
async fn e2e_streamed_tool_call_then_follow_up() {
    let h = TestHarness::new().await;
    h.runner.push_result(2, "Plan: 1 to add, 0 to change, 0 to destroy.", "");
    h.reply_anthropic_stream(&anthropic_tool_stream(
        "toolu_s",
        "execute_terraform_plan",
        &["{\"detai", "led\": ", "true}"],
    ))
    .await;
    h.reply_anthropic(anthropic_text("One resource would be added.")).await;
    let mut agent = h.anthropic_agent(ApprovalGate::disabled());

    let answer = agent.ask_streaming("What is pending?").await.unwrap();
    assert_eq!(answer, "One resource would be added.");
    assert_eq!(
        h.runner.invocations(),
        vec![vec!["plan".to_string(), "-detailed-exitcode".to_string()]]
    );

    let requests = h.model_requests().await;
    assert_eq!(requests.len(), 2);
    let follow_up = &requests[1];
    assert!(follow_up.get("stream").is_none());
    assert_eq!(follow_up["tool_choice"], json!({"type": "none"}));

    // assistant tool_use echoed with the parsed input, then the result
    let messages = follow_up["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[1]["content"][0]["input"], json!({"detailed": true}));
    assert_eq!(messages[2]["content"][0]["tool_use_id"], "toolu_s");

    assert_eq!(agent.usage().input_tokens, 180);
    assert_eq!(agent.usage().output_tokens, 35);
    assert_eq!(agent.history().len(), 4);
}

/// Unparseable streamed input is reported back instead of being run.
#[tokio::test]
async fn e2e_malformed_streamed_input_is_not_run() {
    let h = TestHarness::new().await;
    h.reply_anthropic_stream(&anthropic_tool_stream(
        "toolu_bad",
        "execute_terraform_plan",
        &["{\"detailed\": "],
    ))
    .await;
    h.reply_anthropic(anthropic_text("I could not read that request.")).await;
    let mut agent = h.anthropic_agent(ApprovalGate::disabled());

    let answer = agent.ask_streaming("Plan it").await.unwrap();
    assert_eq!(answer, "I could not read that request.");
    assert_eq!(h.runner.call_count(), 0);

    let requests = h.model_requests().await;
    let result = &requests[1]["messages"][2]["content"][0];
    assert_eq!(result["is_error"], true);
    let payload: Value = serde_json::from_str(result["content"].as_str().unwrap()).unwrap();
    assert!(
        payload["error"]
            .as_str()
            .unwrap()
            .starts_with("Invalid tool input JSON:")
    );
}
