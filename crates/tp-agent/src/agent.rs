//! `TerraformAgent`: wires the executor, snapshot cache, tools, approval
//! gate, task tracker and orchestration loop into one session object.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tp_protocol::{
    ApprovalRequest, ApprovalSummary, ConversationTurn, ProjectSnapshot, Task, TaskStatus,
    TokenUsage, UsageStats,
};
use tp_terraform::{
    CommandRunner, HclScanner, ProcessRunner, ProjectParser, SnapshotCache, TerraformCli,
};

use crate::approval::{ApprovalDecider, ApprovalGate};
use crate::command::TerraformCommand;
use crate::config::{AgentConfig, ProviderKind};
use crate::error::{AgentError, AgentResult, ModelError};
use crate::orchestrator::{LoopSettings, Orchestrator};
use crate::provider::{
    AnthropicProvider, AnyProvider, ModelProvider, OpenAiProvider, StreamingProvider,
};
use crate::registry::ToolRegistry;
use crate::session;
use crate::tools::register_terraform_tools;
use crate::tracker::{TaskObserver, TaskTracker};

/// Pieces an agent is assembled from.
pub struct AgentParts<P> {
    pub provider: Arc<P>,
    pub runner: Arc<dyn CommandRunner>,
    pub parser: Arc<dyn ProjectParser>,
    pub gate: ApprovalGate,
    pub settings: LoopSettings,
    pub command_timeout: Duration,
    pub snapshot_ttl: Duration,
}

/// Point-in-time view for the `status` command.
#[derive(Debug, Clone)]
pub struct AgentStatus {
    pub provider: String,
    pub working_dir: PathBuf,
    pub initialized: bool,
    pub terraform_version: Option<String>,
    pub resource_count: Option<usize>,
    pub human_in_the_loop: bool,
    pub conversation_turns: usize,
    pub snapshot_age: Option<Duration>,
}

pub struct TerraformAgent<P> {
    cli: Arc<TerraformCli>,
    cache: Arc<SnapshotCache>,
    registry: Arc<ToolRegistry>,
    gate: Arc<ApprovalGate>,
    tracker: Arc<TaskTracker>,
    orchestrator: Orchestrator<P>,
}

/// Build the configured model backend.
pub fn build_provider(config: &AgentConfig) -> Result<AnyProvider, ModelError> {
    let provider = match config.provider {
        ProviderKind::Anthropic => {
            AnyProvider::Anthropic(AnthropicProvider::new(config.anthropic.clone())?)
        }
        ProviderKind::Openai => {
            AnyProvider::OpenAi(OpenAiProvider::new(config.openai.clone())?.with_label("openai"))
        }
        ProviderKind::OpenaiCompatible => {
            AnyProvider::OpenAi(OpenAiProvider::new(config.openai_compatible.clone())?)
        }
    };
    tracing::info!(
        provider = provider.name(),
        model = provider.model(),
        "model provider ready"
    );
    Ok(provider)
}

impl TerraformAgent<AnyProvider> {
    /// Agent over the real Terraform binary and `.tf` scanner.
    pub fn from_config(
        config: &AgentConfig,
        decider: Arc<dyn ApprovalDecider>,
    ) -> AgentResult<Self> {
        let provider = Arc::new(build_provider(config)?);
        let runner = ProcessRunner::new(&config.terraform.path, &config.terraform.dir);
        Ok(Self::new(AgentParts {
            provider,
            runner: Arc::new(runner),
            parser: Arc::new(HclScanner::new(&config.terraform.dir)),
            gate: ApprovalGate::new(config.human_in_the_loop, decider),
            settings: config.loop_settings(),
            command_timeout: config.terraform.command_timeout(),
            snapshot_ttl: config.terraform.snapshot_ttl(),
        }))
    }
}

impl<P: ModelProvider> TerraformAgent<P> {
    pub fn new(parts: AgentParts<P>) -> Self {
        let cli = Arc::new(TerraformCli::new(parts.runner).with_timeout(parts.command_timeout));
        let cache = Arc::new(SnapshotCache::new(parts.parser, parts.snapshot_ttl));
        let mut registry = ToolRegistry::new();
        register_terraform_tools(&mut registry, cli.clone(), cache.clone());
        tracing::info!(tool_count = registry.len(), "tool registry initialized");

        let registry = Arc::new(registry);
        let gate = Arc::new(parts.gate);
        let orchestrator = Orchestrator::new(
            parts.provider,
            registry.clone(),
            gate.clone(),
            parts.settings,
        );
        Self {
            cli,
            cache,
            registry,
            gate,
            tracker: Arc::new(TaskTracker::new()),
            orchestrator,
        }
    }

    /// Answer a query with the non-streaming loop, tracked as a task.
    ///
    /// Cancelling the task (see [`TaskTracker::cancel_running`]) stops the
    /// loop at its next step; a Terraform command already running is
    /// allowed to finish.
    pub async fn ask(&mut self, query: &str) -> AgentResult<String> {
        let task = self.begin(query)?;
        let snapshot = self.snapshot();
        let tracker = self.tracker.clone();
        let orchestrator = &mut self.orchestrator;
        let mut failure = None;
        let slot = &mut failure;
        let done = tracker
            .dispatch(task.id, |ctx| async move {
                let answer = orchestrator
                    .answer_until(query, snapshot.as_deref(), &|| ctx.is_cancelled())
                    .await
                    .map_err(|e| keep(slot, e))?;
                ctx.set_progress(1.0);
                Ok(Value::String(answer))
            })
            .await?;
        finish(done, failure)
    }

    /// Run a command typed at the prompt, gated and tracked like a tool call.
    pub async fn run_command(&self, command: &TerraformCommand) -> AgentResult<String> {
        let task = self.tracker.create(format!("Execute terraform command: {command}"));
        let cli = self.cli.clone();
        let gate = self.gate.clone();
        let mut failure = None;
        let slot = &mut failure;
        let done = self
            .tracker
            .dispatch(task.id, |ctx| async move {
                gate.check(
                    command.gate_name(),
                    json!({ "command": command.to_string() }),
                    "Typed at the prompt",
                )
                .await
                .map_err(|e| keep(slot, e))?;
                tracing::info!(command = %command, "running terraform command");
                let text = command.run(&cli).await;
                ctx.set_progress(1.0);
                Ok(Value::String(text))
            })
            .await?;
        finish(done, failure)
    }

    /// Approve deferred requests whose tool name contains `pattern`.
    pub fn approve_pending(&self, pattern: Option<&str>) -> usize {
        self.gate.auto_approve_pending(pattern)
    }

    /// Select (or report) a Terraform workspace.
    pub async fn select_workspace(&self, name: &str) -> AgentResult<()> {
        let result = self.cli.workspace_select(name).await;
        if !result.success() {
            return Err(AgentError::Command {
                command: format!("workspace select {name}"),
                stderr: result.stderr().trim().to_string(),
            });
        }
        tracing::info!(workspace = %name, "workspace selected");
        Ok(())
    }

    pub async fn status(&self) -> AgentStatus {
        AgentStatus {
            provider: self.orchestrator.provider().name().to_string(),
            working_dir: self.cli.working_dir().to_path_buf(),
            initialized: self.cli.is_initialized(),
            terraform_version: self.cli.version().await,
            resource_count: self.snapshot().map(|s| s.resource_count()),
            human_in_the_loop: self.gate.is_enabled(),
            conversation_turns: self.orchestrator.history().len(),
            snapshot_age: self.cache.age(),
        }
    }

    /// Re-parse the project now.
    pub fn refresh(&self) -> AgentResult<Arc<ProjectSnapshot>> {
        Ok(self.cache.get(true)?)
    }

    pub fn clear(&mut self) {
        self.orchestrator.clear();
    }

    pub async fn export(&self, path: &Path) -> AgentResult<()> {
        session::save(path, &self.orchestrator.export()).await
    }

    /// Replace the conversation with the contents of an export file.
    pub async fn import(&mut self, path: &Path) -> AgentResult<()> {
        let export = session::load(path).await?;
        self.orchestrator.import(export);
        Ok(())
    }

    pub fn set_subscriber(&mut self, subscriber: impl FnMut(&str) + Send + 'static) {
        self.orchestrator.set_subscriber(subscriber);
    }

    pub fn add_task_observer(&self, observer: Arc<dyn TaskObserver>) {
        self.tracker.add_observer(observer);
    }

    pub fn tracker(&self) -> &Arc<TaskTracker> {
        &self.tracker
    }

    pub fn tasks(&self) -> Vec<Task> {
        self.tracker.all()
    }

    pub fn approvals(&self) -> ApprovalSummary {
        self.gate.summary()
    }

    pub fn approval_history(&self) -> Vec<ApprovalRequest> {
        self.gate.history()
    }

    pub fn history(&self) -> &[ConversationTurn] {
        self.orchestrator.history()
    }

    pub fn usage(&self) -> TokenUsage {
        self.orchestrator.usage()
    }

    pub fn usage_stats(&self) -> UsageStats {
        self.orchestrator.usage_stats()
    }

    pub fn last_reasoning(&self) -> Option<&str> {
        self.orchestrator.last_reasoning()
    }

    pub fn tool_names(&self) -> &[String] {
        self.registry.names()
    }

    fn begin(&self, query: &str) -> AgentResult<Task> {
        let query = query.trim();
        if query.is_empty() {
            return Err(AgentError::Validation("query must not be empty".into()));
        }
        Ok(self.tracker.create(format!("Process query: {query}")))
    }

    /// Current snapshot; a parse failure is logged and the query proceeds
    /// without project context.
    fn snapshot(&self) -> Option<Arc<ProjectSnapshot>> {
        match self.cache.get(false) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                tracing::warn!(error = %e, "project snapshot unavailable");
                None
            }
        }
    }
}

impl<P: StreamingProvider> TerraformAgent<P> {
    /// Answer with streamed text going to the subscriber, tracked as a task.
    pub async fn ask_streaming(&mut self, query: &str) -> AgentResult<String> {
        let task = self.begin(query)?;
        let snapshot = self.snapshot();
        let tracker = self.tracker.clone();
        let orchestrator = &mut self.orchestrator;
        let mut failure = None;
        let slot = &mut failure;
        let done = tracker
            .dispatch(task.id, |ctx| async move {
                let answer = orchestrator
                    .answer_streaming_until(query, snapshot.as_deref(), &|| ctx.is_cancelled())
                    .await
                    .map_err(|e| keep(slot, e))?;
                ctx.set_progress(1.0);
                Ok(Value::String(answer))
            })
            .await?;
        finish(done, failure)
    }
}

/// Stash the typed error for the caller; the task record gets its message.
fn keep(slot: &mut Option<AgentError>, error: AgentError) -> String {
    let message = error.to_string();
    *slot = Some(error);
    message
}

fn finish(task: Task, failure: Option<AgentError>) -> AgentResult<String> {
    match task.status {
        TaskStatus::Completed => match task.result {
            Some(Value::String(answer)) => Ok(answer),
            other => Ok(other.map(|v| v.to_string()).unwrap_or_default()),
        },
        TaskStatus::Cancelled => Ok("Request cancelled.".to_string()),
        _ => Err(failure.unwrap_or_else(|| {
            AgentError::TaskFailed(task.error.unwrap_or_else(|| "query failed".into()))
        })),
    }
}
