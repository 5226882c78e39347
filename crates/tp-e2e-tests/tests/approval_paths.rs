//! E2E tests for the human-approval gate in front of mutating commands.

mod helpers;

use std::sync::Arc;

use serde_json::{Value, json};

use helpers::{TestHarness, anthropic_text, anthropic_tool_use};
use tp_agent::approval::{ApprovalGate, AutoReject, Decision, ScriptedDecider};
use tp_protocol::{ApprovalStatus, RiskLevel};

fn first_tool_result(request: &Value) -> Value {
    request["messages"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|m| m["content"].as_array())
        .flatten()
        .find(|b| b["type"] == "tool_result")
        .cloned()
        .unwrap()
}

/// A rejected destroy never reaches the binary; the model and the user are told.
#[tokio::test]
async fn e2e_rejected_destroy_is_not_run() {
    let h = TestHarness::new().await;
    h.reply_anthropic(anthropic_tool_use(&[(
        "toolu_d",
        "execute_terraform_destroy",
        json!({"auto_approve": true}),
    )]))
    .await;
    h.reply_anthropic(anthropic_text("The destroy was not approved, nothing changed."))
        .await;
    let mut agent = h.anthropic_agent(ApprovalGate::new(true, Arc::new(AutoReject)));

    let answer = agent.ask("Tear everything down").await.unwrap();

    assert_eq!(h.runner.call_count(), 0);
    assert!(answer.starts_with("The destroy was not approved, nothing changed."));
    assert!(answer.contains(
        "> execute_terraform_destroy was rejected during approval and was not run"
    ));

    let result = first_tool_result(&h.model_requests().await[1]);
    assert_eq!(result["tool_use_id"], "toolu_d");
    assert_eq!(result["is_error"], true);
    let payload: Value = serde_json::from_str(result["content"].as_str().unwrap()).unwrap();
    assert_eq!(payload["tool"], "execute_terraform_destroy");

    let summary = agent.approvals();
    assert_eq!(summary.total_rejected, 1);
    assert_eq!(summary.high_risk_operations, 1);
    assert_eq!(summary.pending_count, 0);
}

/// An approver can swap the arguments; the command runs with the new ones.
#[tokio::test]
async fn e2e_modified_apply_runs_with_new_arguments() {
    let h = TestHarness::new().await;
    h.runner.push_success("Apply complete! Resources: 0 added, 0 changed, 0 destroyed.");
    h.reply_anthropic(anthropic_tool_use(&[(
        "toolu_a",
        "execute_terraform_apply",
        json!({"auto_approve": true}),
    )]))
    .await;
    h.reply_anthropic(anthropic_text("Applied.")).await;
    let decider = Arc::new(ScriptedDecider::new([Decision::Modify(
        json!({"auto_approve": false}),
    )]));
    let mut agent = h.anthropic_agent(ApprovalGate::new(true, decider.clone()));

    let answer = agent.ask("Apply the changes").await.unwrap();
    assert_eq!(answer, "Applied.");
    assert_eq!(h.runner.invocations(), vec![vec!["apply".to_string()]]);

    let seen = decider.seen();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].tool_name, "execute_terraform_apply");
    assert_eq!(seen[0].risk_level, RiskLevel::Medium);
    assert_eq!(seen[0].context, "Requested while answering: Apply the changes");

    let history = agent.approval_history();
    assert_eq!(history[0].status, ApprovalStatus::Modified);
    assert_eq!(history[0].effective_arguments(), &json!({"auto_approve": false}));
}

/// Arguments naming a production target need approval even for read-only tools.
#[tokio::test]
async fn e2e_production_marker_triggers_approval() {
    let h = TestHarness::new().await;
    h.reply_anthropic(anthropic_tool_use(&[(
        "toolu_r",
        "get_resources",
        json!({"search_query": "prod"}),
    )]))
    .await;
    h.reply_anthropic(anthropic_text("No production resources found.")).await;
    let decider = Arc::new(ScriptedDecider::new([Decision::Approve]));
    let mut agent = h.anthropic_agent(ApprovalGate::new(true, decider.clone()));

    agent.ask("Anything for production?").await.unwrap();

    assert_eq!(decider.seen().len(), 1);
    assert_eq!(decider.seen()[0].risk_level, RiskLevel::Low);
    let result = first_tool_result(&h.model_requests().await[1]);
    assert!(result.get("is_error").is_none());
    let payload: Value = serde_json::from_str(result["content"].as_str().unwrap()).unwrap();
    assert_eq!(payload["count"], 0);
    assert_eq!(agent.approvals().total_approved, 1);
}

/// With the gate off, destructive calls run straight through.
#[tokio::test]
async fn e2e_disabled_gate_runs_destroy() {
    let h = TestHarness::new().await;
    h.reply_anthropic(anthropic_tool_use(&[(
        "toolu_d",
        "execute_terraform_destroy",
        json!({"auto_approve": true}),
    )]))
    .await;
    h.reply_anthropic(anthropic_text("Destroyed.")).await;
    let mut agent = h.anthropic_agent(ApprovalGate::disabled());

    agent.ask("Tear everything down").await.unwrap();
    assert_eq!(
        h.runner.invocations(),
        vec![vec!["destroy".to_string(), "-auto-approve".to_string()]]
    );
    assert_eq!(agent.approvals().total_approved, 0);
}
