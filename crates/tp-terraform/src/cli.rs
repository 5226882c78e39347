//! Typed Terraform lifecycle operations over a `CommandRunner`.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::Regex;
use tokio::sync::OnceCell;
use tp_protocol::PlanSummary;

use crate::error::TerraformError;
use crate::plan::parse_plan_summary;
use crate::runner::{CommandResult, CommandRunner, DEFAULT_TIMEOUT};

static VERSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Terraform v(\d+\.\d+\.\d+)").unwrap());

// ── Options ───────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct PlanOptions {
    /// Exit 2 when changes are present instead of 0.
    pub detailed_exitcode: bool,
    pub out: Option<String>,
    pub var_file: Option<String>,
    pub vars: BTreeMap<String, String>,
    pub destroy: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ApplyOptions {
    /// Saved plan to apply; `auto_approve` is ignored when set.
    pub plan_file: Option<String>,
    pub auto_approve: bool,
    pub var_file: Option<String>,
    pub vars: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct DestroyOptions {
    pub auto_approve: bool,
    pub var_file: Option<String>,
    pub vars: BTreeMap<String, String>,
}

fn push_var_flags(args: &mut Vec<String>, var_file: &Option<String>, vars: &BTreeMap<String, String>) {
    if let Some(file) = var_file {
        args.push("-var-file".into());
        args.push(file.clone());
    }
    for (key, value) in vars {
        args.push("-var".into());
        args.push(format!("{key}={value}"));
    }
}

// ── Outcomes ──────────────────────────────────────────────────

/// Plan run plus the parsed change counts.
#[derive(Debug, Clone)]
pub struct PlanOutcome {
    pub result: CommandResult,
    pub summary: PlanSummary,
    detailed_exitcode: bool,
}

impl PlanOutcome {
    /// With `-detailed-exitcode`, exit 2 means "succeeded, changes present".
    pub fn succeeded(&self) -> bool {
        self.result.success() || (self.detailed_exitcode && self.result.exit_code() == 2)
    }
}

/// Decoded stdout of a `-json` command.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputValue {
    Json(serde_json::Value),
    /// stdout was not valid JSON; kept verbatim.
    Raw(String),
}

impl OutputValue {
    pub fn into_json(self) -> serde_json::Value {
        match self {
            Self::Json(v) => v,
            Self::Raw(s) => serde_json::Value::String(s),
        }
    }
}

#[derive(Debug, Clone)]
pub struct JsonOutcome {
    pub result: CommandResult,
    /// `None` when the command itself failed.
    pub output: Option<OutputValue>,
}

#[derive(Debug, Clone)]
pub struct ListOutcome {
    pub result: CommandResult,
    /// Empty when the command failed.
    pub items: Vec<String>,
}

// ── CLI ───────────────────────────────────────────────────────

/// Terraform operations bound to one working directory.
pub struct TerraformCli {
    runner: Arc<dyn CommandRunner>,
    timeout: Duration,
    version: OnceCell<Option<String>>,
}

impl TerraformCli {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            timeout: DEFAULT_TIMEOUT,
            version: OnceCell::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn working_dir(&self) -> &Path {
        self.runner.working_dir()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run an arbitrary argument list with the configured timeout.
    pub async fn run(&self, args: Vec<String>) -> CommandResult {
        self.runner.run(&args, self.timeout, None).await
    }

    /// Run with text piped to stdin.
    pub async fn run_with_input(&self, args: Vec<String>, input: &str) -> CommandResult {
        self.runner.run(&args, self.timeout, Some(input)).await
    }

    /// Installed version (`x.y.z`), `"unknown"` if unparseable, `None` if
    /// the binary failed. Resolved once per instance.
    pub async fn version(&self) -> Option<String> {
        self.version
            .get_or_init(|| async {
                let result = self.run(vec!["version".into()]).await;
                if !result.success() {
                    return None;
                }
                Some(
                    VERSION_RE
                        .captures(result.stdout())
                        .and_then(|c| c.get(1))
                        .map(|m| m.as_str().to_string())
                        .unwrap_or_else(|| "unknown".into()),
                )
            })
            .await
            .clone()
    }

    /// Whether `init` has been run (a `.terraform` directory exists).
    pub fn is_initialized(&self) -> bool {
        self.working_dir().join(".terraform").is_dir()
    }

    pub async fn init(&self, upgrade: bool) -> CommandResult {
        let mut args = vec!["init".to_string()];
        if upgrade {
            args.push("-upgrade".into());
        }
        self.run(args).await
    }

    pub async fn validate(&self) -> CommandResult {
        self.run(vec!["validate".into()]).await
    }

    pub async fn plan(&self, opts: &PlanOptions) -> PlanOutcome {
        let mut args = vec!["plan".to_string()];
        if opts.detailed_exitcode {
            args.push("-detailed-exitcode".into());
        }
        if let Some(out) = &opts.out {
            args.push("-out".into());
            args.push(out.clone());
        }
        push_var_flags(&mut args, &opts.var_file, &opts.vars);
        if opts.destroy {
            args.push("-destroy".into());
        }

        let result = self.run(args).await;
        let summary = parse_plan_summary(result.stdout());
        PlanOutcome {
            result,
            summary,
            detailed_exitcode: opts.detailed_exitcode,
        }
    }

    pub async fn apply(&self, opts: &ApplyOptions) -> CommandResult {
        let mut args = vec!["apply".to_string()];
        match &opts.plan_file {
            Some(plan) => args.push(plan.clone()),
            None if opts.auto_approve => args.push("-auto-approve".into()),
            None => {}
        }
        push_var_flags(&mut args, &opts.var_file, &opts.vars);
        self.run(args).await
    }

    pub async fn destroy(&self, opts: &DestroyOptions) -> CommandResult {
        let mut args = vec!["destroy".to_string()];
        if opts.auto_approve {
            args.push("-auto-approve".into());
        }
        push_var_flags(&mut args, &opts.var_file, &opts.vars);
        self.run(args).await
    }

    /// `show -json [plan]`: current state, or a saved plan.
    pub async fn show(&self, plan_file: Option<&str>) -> JsonOutcome {
        let mut args = vec!["show".to_string(), "-json".to_string()];
        if let Some(plan) = plan_file {
            args.push(plan.to_string());
        }
        self.run_json(args).await
    }

    /// `output -json [name]`.
    pub async fn output(&self, name: Option<&str>) -> JsonOutcome {
        let mut args = vec!["output".to_string(), "-json".to_string()];
        if let Some(name) = name {
            args.push(name.to_string());
        }
        self.run_json(args).await
    }

    /// Resource addresses tracked in state.
    pub async fn state_list(&self) -> ListOutcome {
        let result = self.run(vec!["state".into(), "list".into()]).await;
        let items = if result.success() {
            non_empty_lines(result.stdout()).map(str::to_string).collect()
        } else {
            Vec::new()
        };
        ListOutcome { result, items }
    }

    pub async fn state_show(&self, address: &str) -> CommandResult {
        self.run(vec!["state".into(), "show".into(), address.into()]).await
    }

    /// Workspaces, with the active one suffixed ` (current)`.
    pub async fn workspace_list(&self) -> ListOutcome {
        let result = self.run(vec!["workspace".into(), "list".into()]).await;
        let items = if result.success() {
            non_empty_lines(result.stdout())
                .map(|line| match line.strip_prefix("* ") {
                    Some(current) => format!("{current} (current)"),
                    None => line.to_string(),
                })
                .collect()
        } else {
            Vec::new()
        };
        ListOutcome { result, items }
    }

    pub async fn workspace_select(&self, name: &str) -> CommandResult {
        self.run(vec!["workspace".into(), "select".into(), name.into()]).await
    }

    pub async fn workspace_new(&self, name: &str) -> CommandResult {
        self.run(vec!["workspace".into(), "new".into(), name.into()]).await
    }

    pub async fn import_resource(&self, address: &str, id: &str) -> CommandResult {
        self.run(vec!["import".into(), address.into(), id.into()]).await
    }

    async fn run_json(&self, args: Vec<String>) -> JsonOutcome {
        let result = self.run(args).await;
        let output = result.success().then(|| decode_json(result.stdout()));
        JsonOutcome { result, output }
    }
}

fn non_empty_lines(text: &str) -> impl Iterator<Item = &str> {
    text.lines().map(str::trim).filter(|l| !l.is_empty())
}

/// Decode stdout as JSON, falling back to the raw text with a warning.
fn decode_json(stdout: &str) -> OutputValue {
    match serde_json::from_str(stdout) {
        Ok(value) => OutputValue::Json(value),
        Err(e) => {
            let err = TerraformError::Decode(e.to_string());
            tracing::warn!(error = %err, "command output is not JSON, returning raw text");
            OutputValue::Raw(stdout.to_string())
        }
    }
}
