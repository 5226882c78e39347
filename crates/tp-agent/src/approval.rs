//! Human approval gate for high-risk tool calls.
//!
//! The gate decides *whether* a call needs approval; an `ApprovalDecider`
//! decides *what* the answer is. Requests live in `pending` until resolved,
//! then move to the append-only history.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tp_protocol::{ApprovalRequest, ApprovalStatus, ApprovalSummary, RiskLevel};

use crate::console::Console;
use crate::error::{AgentError, AgentResult};

/// Tools that always need approval when the gate is enabled.
pub const CRITICAL_TOOLS: &[&str] = &[
    "execute_terraform_apply",
    "execute_terraform_destroy",
    "terraform_apply",
    "terraform_destroy",
];

/// Substrings of the serialized arguments that suggest a production target.
pub const PRODUCTION_MARKERS: &[&str] = &["prod", "production", "live", "main", "master"];

/// A decider's answer to one request.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Approve,
    Reject { reason: String },
    /// Approve, but run with these arguments instead.
    Modify(Value),
    /// No answer yet; the call must not run.
    Defer,
}

#[async_trait]
pub trait ApprovalDecider: Send + Sync {
    async fn decide(&self, request: &ApprovalRequest) -> Decision;
}

/// Approves everything.
pub struct AutoApprove;

#[async_trait]
impl ApprovalDecider for AutoApprove {
    async fn decide(&self, _request: &ApprovalRequest) -> Decision {
        Decision::Approve
    }
}

/// Rejects everything.
pub struct AutoReject;

#[async_trait]
impl ApprovalDecider for AutoReject {
    async fn decide(&self, _request: &ApprovalRequest) -> Decision {
        Decision::Reject {
            reason: "automatic rejection".into(),
        }
    }
}

/// Replays queued decisions, then falls back to rejecting.
#[derive(Default)]
pub struct ScriptedDecider {
    decisions: Mutex<std::collections::VecDeque<Decision>>,
    seen: Mutex<Vec<ApprovalRequest>>,
}

impl ScriptedDecider {
    pub fn new(decisions: impl IntoIterator<Item = Decision>) -> Self {
        Self {
            decisions: Mutex::new(decisions.into_iter().collect()),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Requests this decider was asked about.
    pub fn seen(&self) -> Vec<ApprovalRequest> {
        self.seen.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl ApprovalDecider for ScriptedDecider {
    async fn decide(&self, request: &ApprovalRequest) -> Decision {
        self.seen
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request.clone());
        self.decisions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or(Decision::Reject {
                reason: "no scripted decision".into(),
            })
    }
}

/// Interactive y / n / m prompt on the session console.
pub struct TerminalApprover {
    console: Arc<Console>,
}

impl TerminalApprover {
    pub fn new(console: Arc<Console>) -> Self {
        Self { console }
    }
}

#[async_trait]
impl ApprovalDecider for TerminalApprover {
    async fn decide(&self, request: &ApprovalRequest) -> Decision {
        println!("\nAPPROVAL REQUIRED");
        println!("Operation:  {}", request.tool_name);
        println!("Risk Level: {}", request.risk_level);
        println!("Details:    {}", request.arguments);
        if !request.context.is_empty() {
            println!("Context:    {}", request.context);
        }
        if request.risk_level == RiskLevel::High {
            println!("This operation can permanently delete infrastructure.");
        }

        loop {
            let answer = match self
                .console
                .read_line("Approve? [y]es / [n]o / [m]odify arguments: ")
                .await
            {
                Ok(Some(line)) => line.trim().to_lowercase(),
                Ok(None) => {
                    return Decision::Reject {
                        reason: "input closed".into(),
                    };
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to read approval answer");
                    return Decision::Reject {
                        reason: e.to_string(),
                    };
                }
            };
            match answer.as_str() {
                "y" | "yes" => return Decision::Approve,
                "n" | "no" => {
                    return Decision::Reject {
                        reason: "rejected by operator".into(),
                    };
                }
                "m" | "modify" => {
                    let line = match self.console.read_line("New arguments (JSON): ").await {
                        Ok(Some(line)) => line,
                        _ => {
                            return Decision::Reject {
                                reason: "input closed".into(),
                            };
                        }
                    };
                    match serde_json::from_str::<Value>(&line) {
                        Ok(args @ Value::Object(_)) => return Decision::Modify(args),
                        Ok(_) => println!("Arguments must be a JSON object."),
                        Err(e) => println!("Invalid JSON: {e}"),
                    }
                }
                _ => println!("Please answer y, n or m."),
            }
        }
    }
}

/// What the gate resolved for one call.
#[derive(Debug, Clone, PartialEq)]
pub struct ApprovalOutcome {
    pub status: ApprovalStatus,
    /// Arguments to run with (original or modified).
    pub arguments: Value,
}

impl ApprovalOutcome {
    /// Arguments if the call may proceed; rejection and pending are errors.
    pub fn into_arguments(self, tool: &str) -> AgentResult<Value> {
        match self.status {
            ApprovalStatus::Approved | ApprovalStatus::Modified => Ok(self.arguments),
            ApprovalStatus::Rejected => Err(AgentError::ApprovalRejected { tool: tool.into() }),
            ApprovalStatus::Pending => Err(AgentError::ApprovalPending { tool: tool.into() }),
        }
    }
}

pub struct ApprovalGate {
    enabled: bool,
    decider: Arc<dyn ApprovalDecider>,
    pending: Mutex<Vec<ApprovalRequest>>,
    history: Mutex<Vec<ApprovalRequest>>,
}

impl ApprovalGate {
    pub fn new(enabled: bool, decider: Arc<dyn ApprovalDecider>) -> Self {
        Self {
            enabled,
            decider,
            pending: Mutex::new(Vec::new()),
            history: Mutex::new(Vec::new()),
        }
    }

    /// Gate that lets everything through.
    pub fn disabled() -> Self {
        Self::new(false, Arc::new(AutoApprove))
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn requires_approval(&self, tool: &str, args: &Value) -> bool {
        if !self.enabled {
            return false;
        }
        if CRITICAL_TOOLS.contains(&tool) {
            return true;
        }
        let text = args.to_string().to_lowercase();
        PRODUCTION_MARKERS.iter().any(|m| text.contains(m))
    }

    /// Ask the decider. A deferred request stays pending; any other answer
    /// resolves it and moves it to history.
    pub async fn request_approval(&self, tool: &str, args: Value, context: &str) -> ApprovalOutcome {
        let request = ApprovalRequest::new(tool, args, context);
        tracing::info!(
            tool = %tool,
            risk = %request.risk_level,
            id = %request.id,
            "requesting approval"
        );
        self.lock_pending().push(request.clone());

        let (status, modified) = match self.decider.decide(&request).await {
            Decision::Defer => (ApprovalStatus::Pending, None),
            Decision::Approve => (ApprovalStatus::Approved, None),
            Decision::Modify(new_args) => (ApprovalStatus::Modified, Some(new_args)),
            Decision::Reject { reason } => {
                tracing::warn!(tool = %tool, reason = %reason, "approval rejected");
                (ApprovalStatus::Rejected, None)
            }
        };

        let mut resolved = {
            let mut pending = self.lock_pending();
            // a cleared request stays unresolved as well
            match pending.iter().position(|r| r.id == request.id) {
                Some(pos) if status != ApprovalStatus::Pending => pending.remove(pos),
                _ => {
                    return ApprovalOutcome {
                        status: ApprovalStatus::Pending,
                        arguments: request.arguments,
                    };
                }
            }
        };
        resolved.status = status;
        resolved.modified_arguments = modified;
        resolved.resolved_at = Some(Utc::now());

        let outcome = ApprovalOutcome {
            status: resolved.status,
            arguments: resolved.effective_arguments().clone(),
        };
        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(resolved);
        outcome
    }

    /// Approval check for one call: passes through when no approval is
    /// needed, otherwise returns the arguments to run with or the
    /// rejection/pending error.
    pub async fn check(&self, tool: &str, args: Value, context: &str) -> AgentResult<Value> {
        if !self.requires_approval(tool, &args) {
            return Ok(args);
        }
        self.request_approval(tool, args, context)
            .await
            .into_arguments(tool)
    }

    pub fn pending(&self) -> Vec<ApprovalRequest> {
        self.lock_pending().clone()
    }

    pub fn history(&self) -> Vec<ApprovalRequest> {
        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn summary(&self) -> ApprovalSummary {
        let history = self.history();
        let count = |status| history.iter().filter(|r| r.status == status).count();
        ApprovalSummary {
            pending_count: self.lock_pending().len(),
            total_approved: count(ApprovalStatus::Approved),
            total_rejected: count(ApprovalStatus::Rejected),
            total_modified: count(ApprovalStatus::Modified),
            high_risk_operations: history
                .iter()
                .filter(|r| r.risk_level == RiskLevel::High)
                .count(),
        }
    }

    /// Approve every pending request whose tool name contains `pattern`
    /// (case-insensitive; `None` matches all). Approved requests move to
    /// history. Returns how many were approved.
    pub fn auto_approve_pending(&self, pattern: Option<&str>) -> usize {
        let pattern = pattern.map(str::to_lowercase);
        let approved: Vec<ApprovalRequest> = {
            let mut pending = self.lock_pending();
            let (matched, kept): (Vec<_>, Vec<_>) = pending.drain(..).partition(|r| {
                pattern
                    .as_deref()
                    .is_none_or(|p| r.tool_name.to_lowercase().contains(p))
            });
            *pending = kept;
            matched
        };
        let count = approved.len();
        let now = Utc::now();
        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend(approved.into_iter().map(|mut request| {
                request.status = ApprovalStatus::Approved;
                request.resolved_at = Some(now);
                request
            }));
        tracing::info!(count, pattern = ?pattern, "auto-approved pending operations");
        count
    }

    pub fn clear_pending(&self) {
        self.lock_pending().clear();
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, Vec<ApprovalRequest>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn gate(decider: impl ApprovalDecider + 'static) -> ApprovalGate {
        ApprovalGate::new(true, Arc::new(decider))
    }

    #[test]
    fn critical_tools_and_production_markers_need_approval() {
        let gate = gate(AutoApprove);
        assert!(gate.requires_approval("execute_terraform_destroy", &json!({})));
        assert!(gate.requires_approval("terraform_apply", &json!({})));
        assert!(!gate.requires_approval("execute_terraform_plan", &json!({"detailed": true})));
        assert!(gate.requires_approval("execute_terraform_plan", &json!({"workspace": "PROD-eu"})));
        assert!(gate.requires_approval("get_resources", &json!({"search_query": "main"})));
    }

    #[test]
    fn disabled_gate_never_requires_approval() {
        let gate = ApprovalGate::disabled();
        assert!(!gate.requires_approval("execute_terraform_destroy", &json!({"env": "prod"})));
    }

    #[tokio::test]
    async fn approve_moves_request_to_history() {
        let gate = gate(AutoApprove);
        let outcome = gate
            .request_approval("execute_terraform_apply", json!({"auto_approve": true}), "apply it")
            .await;
        assert_eq!(outcome.status, ApprovalStatus::Approved);
        assert_eq!(outcome.arguments, json!({"auto_approve": true}));
        assert!(gate.pending().is_empty());
        let history = gate.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].risk_level, RiskLevel::Medium);
        assert!(history[0].resolved_at.is_some());
    }

    #[tokio::test]
    async fn modify_substitutes_arguments() {
        let gate = gate(ScriptedDecider::new([Decision::Modify(json!({"auto_approve": false}))]));
        let args = gate
            .check("execute_terraform_destroy", json!({"auto_approve": true}), "")
            .await
            .unwrap();
        assert_eq!(args, json!({"auto_approve": false}));
        let history = gate.history();
        assert_eq!(history[0].status, ApprovalStatus::Modified);
        assert_eq!(history[0].arguments, json!({"auto_approve": true}));
    }

    #[tokio::test]
    async fn reject_is_an_error() {
        let gate = gate(AutoReject);
        let err = gate
            .check("execute_terraform_destroy", json!({}), "tear it down")
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::ApprovalRejected { ref tool } if tool == "execute_terraform_destroy"));
        assert_eq!(gate.summary().total_rejected, 1);
        assert_eq!(gate.summary().high_risk_operations, 1);
    }

    #[tokio::test]
    async fn defer_stays_pending_and_blocks_the_call() {
        let gate = gate(ScriptedDecider::new([Decision::Defer]));
        let err = gate
            .check("execute_terraform_apply", json!({}), "")
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::ApprovalPending { .. }));
        assert_eq!(gate.pending().len(), 1);
        assert!(gate.history().is_empty());
        gate.clear_pending();
        assert_eq!(gate.summary().pending_count, 0);
    }

    #[tokio::test]
    async fn auto_approve_pending_matches_tool_names() {
        let gate = gate(ScriptedDecider::new([Decision::Defer, Decision::Defer, Decision::Defer]));
        for tool in ["execute_terraform_apply", "terraform_destroy", "execute_terraform_destroy"] {
            assert!(gate.check(tool, json!({}), "").await.is_err());
        }
        assert_eq!(gate.pending().len(), 3);

        assert_eq!(gate.auto_approve_pending(Some("DESTROY")), 2);
        let pending = gate.pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].tool_name, "execute_terraform_apply");
        let history = gate.history();
        assert!(history.iter().all(|r| r.status == ApprovalStatus::Approved));
        assert!(history.iter().all(|r| r.resolved_at.is_some()));
        assert_eq!(gate.summary().total_approved, 2);

        assert_eq!(gate.auto_approve_pending(None), 1);
        assert!(gate.pending().is_empty());
        assert_eq!(gate.auto_approve_pending(None), 0);
    }

    #[tokio::test]
    async fn calls_not_needing_approval_skip_the_decider() {
        let decider = Arc::new(ScriptedDecider::default());
        let gate = ApprovalGate::new(true, decider.clone());
        let args = gate
            .check("execute_terraform_validate", json!({}), "")
            .await
            .unwrap();
        assert_eq!(args, json!({}));
        assert!(decider.seen().is_empty());
    }

    #[tokio::test]
    async fn terminal_approver_reads_answers() {
        let console = Arc::new(Console::from_reader(&b"maybe\nm\n{\"auto_approve\": false}\n"[..]));
        let approver = TerminalApprover::new(console);
        let request = ApprovalRequest::new("execute_terraform_destroy", json!({}), "");
        assert_eq!(
            approver.decide(&request).await,
            Decision::Modify(json!({"auto_approve": false}))
        );
        // input exhausted
        assert!(matches!(approver.decide(&request).await, Decision::Reject { .. }));
    }
}
