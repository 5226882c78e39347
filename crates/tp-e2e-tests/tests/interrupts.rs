//! E2E tests for interrupting a query while Terraform is running.

#![cfg(unix)]

mod helpers;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use helpers::{TestHarness, anthropic_tool_use};
use tp_agent::agent::{AgentParts, TerraformAgent};
use tp_agent::approval::ApprovalGate;
use tp_agent::orchestrator::LoopSettings;
use tp_agent::provider::{AnthropicConfig, AnthropicProvider};
use tp_agent::repl::drive;
use tp_protocol::TaskStatus;
use tp_terraform::{HclScanner, ProcessRunner};

/// Stands in for `terraform apply`: slow, then leaves a marker behind.
const SLOW_APPLY: &str = "sleep 1\ntouch applied.marker\necho 'Apply complete!'\n";

/// Interrupting mid-apply lets the process finish, runs nothing after it
/// and discards the turn.
#[tokio::test]
async fn e2e_interrupt_waits_for_running_apply() {
    let h = TestHarness::new().await;
    let dir = h.project.path();
    std::fs::write(dir.join("apply"), SLOW_APPLY).unwrap();
    std::fs::write(dir.join("validate"), "touch validated.marker\n").unwrap();
    h.reply_anthropic(anthropic_tool_use(&[
        ("toolu_1", "execute_terraform_apply", json!({"auto_approve": true})),
        ("toolu_2", "execute_terraform_validate", json!({})),
    ]))
    .await;

    let provider = AnthropicProvider::new(AnthropicConfig {
        api_key: Some("test-key".into()),
        base_url: h.server.uri(),
        ..Default::default()
    })
    .unwrap();
    // `sh apply -auto-approve` runs the script above
    let mut agent = TerraformAgent::new(AgentParts {
        provider: Arc::new(provider),
        runner: Arc::new(ProcessRunner::new("sh", dir)),
        parser: Arc::new(HclScanner::new(dir)),
        gate: ApprovalGate::disabled(),
        settings: LoopSettings::default(),
        command_timeout: Duration::from_secs(30),
        snapshot_ttl: Duration::from_secs(60),
    });
    let tracker = agent.tracker().clone();

    let mut interrupts = 0;
    let answer = drive(agent.ask("Apply my changes"), &tracker, || {
        interrupts += 1;
        let first = interrupts == 1;
        async move {
            if first {
                tokio::time::sleep(Duration::from_millis(300)).await;
            } else {
                std::future::pending::<()>().await;
            }
        }
    })
    .await
    .unwrap();

    assert_eq!(answer, "Request cancelled.");
    assert!(dir.join("applied.marker").exists());
    // validate was never started and the model was not asked again
    assert!(!dir.join("validated.marker").exists());
    assert_eq!(h.model_requests().await.len(), 1);
    assert!(agent.history().is_empty());
    assert_eq!(agent.tasks()[0].status, TaskStatus::Cancelled);
}
