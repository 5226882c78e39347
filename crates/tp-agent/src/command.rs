//! Terraform commands typed straight at the prompt.
//!
//! `terraform plan`, `run terraform apply`, `terraform state show <addr>`
//! and friends skip the model: they are recognised here, gated like the
//! model's own command tools and run against the same `TerraformCli`.

use std::fmt;

use tp_terraform::{CommandResult, OutputValue, PlanOptions, TerraformCli};

use crate::tools::truncate_output;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerraformCommand {
    Init { upgrade: bool },
    Validate,
    Plan,
    Apply,
    Destroy,
    Show,
    Output(Option<String>),
    StateList,
    StateShow(String),
    WorkspaceList,
    WorkspaceSelect(String),
    WorkspaceNew(String),
    Import { address: String, id: String },
    Version,
}

impl TerraformCommand {
    /// Recognise `[run] terraform <subcommand> [args]`. Lines with extra or
    /// unknown words are left for the model.
    pub fn detect(line: &str) -> Option<Self> {
        let words: Vec<&str> = line.split_whitespace().collect();
        let words = match words.as_slice() {
            [run, rest @ ..] if run.eq_ignore_ascii_case("run") => rest,
            all => all,
        };
        let (terraform, rest) = words.split_first()?;
        if !terraform.eq_ignore_ascii_case("terraform") {
            return None;
        }
        let (sub, args) = rest.split_first()?;
        let command = match (sub.to_lowercase().as_str(), args) {
            ("init", []) => Self::Init { upgrade: false },
            ("init", ["-upgrade"]) => Self::Init { upgrade: true },
            ("validate", []) => Self::Validate,
            ("plan", []) => Self::Plan,
            ("apply", []) => Self::Apply,
            ("destroy", []) => Self::Destroy,
            ("show", []) => Self::Show,
            ("output", []) => Self::Output(None),
            ("output", [name]) => Self::Output(Some(name.to_string())),
            ("state", [] | ["list"]) => Self::StateList,
            ("state", ["show", address]) => Self::StateShow(address.to_string()),
            ("workspace", ["list"]) => Self::WorkspaceList,
            ("workspace", ["select", name]) => Self::WorkspaceSelect(name.to_string()),
            ("workspace", ["new", name]) => Self::WorkspaceNew(name.to_string()),
            ("import", [address, id]) => Self::Import {
                address: address.to_string(),
                id: id.to_string(),
            },
            ("version", []) => Self::Version,
            _ => return None,
        };
        Some(command)
    }

    /// Name the approval gate sees; apply and destroy are critical.
    pub fn gate_name(&self) -> &'static str {
        match self {
            Self::Init { .. } => "terraform_init",
            Self::Validate => "terraform_validate",
            Self::Plan => "terraform_plan",
            Self::Apply => "terraform_apply",
            Self::Destroy => "terraform_destroy",
            Self::Show => "terraform_show",
            Self::Output(_) => "terraform_output",
            Self::StateList | Self::StateShow(_) => "terraform_state",
            Self::WorkspaceList | Self::WorkspaceSelect(_) | Self::WorkspaceNew(_) => {
                "terraform_workspace"
            }
            Self::Import { .. } => "terraform_import",
            Self::Version => "terraform_version",
        }
    }

    /// Run against `cli` and render the outcome for the console.
    pub async fn run(&self, cli: &TerraformCli) -> String {
        match self {
            Self::Init { upgrade } => render(self, &cli.init(*upgrade).await, None),
            Self::Validate => render(self, &cli.validate().await, None),
            Self::Plan => {
                let outcome = cli
                    .plan(&PlanOptions {
                        detailed_exitcode: true,
                        ..Default::default()
                    })
                    .await;
                let succeeded = outcome.succeeded();
                let s = &outcome.summary;
                let summary = succeeded.then(|| {
                    format!(
                        "Plan: {} to add, {} to change, {} to destroy.",
                        s.add, s.change, s.destroy
                    )
                });
                render_with(self, &outcome.result, succeeded, summary)
            }
            // terraform's own yes/no prompt; the gate has already passed it
            Self::Apply => {
                render(self, &cli.run_with_input(vec!["apply".into()], "yes\n").await, None)
            }
            Self::Destroy => {
                render(self, &cli.run_with_input(vec!["destroy".into()], "yes\n").await, None)
            }
            Self::Show => {
                let outcome = cli.show(None).await;
                render(self, &outcome.result, outcome.output.map(pretty))
            }
            Self::Output(name) => {
                let outcome = cli.output(name.as_deref()).await;
                render(self, &outcome.result, outcome.output.map(pretty))
            }
            Self::StateList => {
                let outcome = cli.state_list().await;
                let body = if outcome.items.is_empty() {
                    "No resources in state.".to_string()
                } else {
                    outcome.items.join("\n")
                };
                render(self, &outcome.result, Some(body))
            }
            Self::StateShow(address) => render(self, &cli.state_show(address).await, None),
            Self::WorkspaceList => {
                let outcome = cli.workspace_list().await;
                render(self, &outcome.result, Some(outcome.items.join("\n")))
            }
            Self::WorkspaceSelect(name) => render(self, &cli.workspace_select(name).await, None),
            Self::WorkspaceNew(name) => render(self, &cli.workspace_new(name).await, None),
            Self::Import { address, id } => {
                render(self, &cli.import_resource(address, id).await, None)
            }
            Self::Version => match cli.version().await {
                Some(version) => format!("Terraform {version}"),
                None => "terraform version failed: binary not available".to_string(),
            },
        }
    }
}

impl fmt::Display for TerraformCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init { upgrade: false } => write!(f, "terraform init"),
            Self::Init { upgrade: true } => write!(f, "terraform init -upgrade"),
            Self::Validate => write!(f, "terraform validate"),
            Self::Plan => write!(f, "terraform plan"),
            Self::Apply => write!(f, "terraform apply"),
            Self::Destroy => write!(f, "terraform destroy"),
            Self::Show => write!(f, "terraform show"),
            Self::Output(None) => write!(f, "terraform output"),
            Self::Output(Some(name)) => write!(f, "terraform output {name}"),
            Self::StateList => write!(f, "terraform state list"),
            Self::StateShow(address) => write!(f, "terraform state show {address}"),
            Self::WorkspaceList => write!(f, "terraform workspace list"),
            Self::WorkspaceSelect(name) => write!(f, "terraform workspace select {name}"),
            Self::WorkspaceNew(name) => write!(f, "terraform workspace new {name}"),
            Self::Import { address, id } => write!(f, "terraform import {address} {id}"),
            Self::Version => write!(f, "terraform version"),
        }
    }
}

fn pretty(value: OutputValue) -> String {
    match value {
        OutputValue::Json(json) => {
            serde_json::to_string_pretty(&json).unwrap_or_else(|_| json.to_string())
        }
        OutputValue::Raw(raw) => raw,
    }
}

fn render(command: &TerraformCommand, result: &CommandResult, body: Option<String>) -> String {
    render_with(command, result, result.success(), body)
}

/// Headline with status and duration, then `body` (or stdout). Failures
/// show the first non-blank stderr line.
fn render_with(
    command: &TerraformCommand,
    result: &CommandResult,
    success: bool,
    body: Option<String>,
) -> String {
    let seconds = result.duration().as_secs_f64();
    if !success {
        let reason = result
            .stderr()
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .unwrap_or("no error output");
        return format!("{command} failed (exit {}): {reason}", result.exit_code());
    }
    let body = body.unwrap_or_else(|| result.stdout().trim_end().to_string());
    let (body, _) = truncate_output(&body);
    if body.trim().is_empty() {
        format!("{command} succeeded in {seconds:.2}s.")
    } else {
        format!("{command} succeeded in {seconds:.2}s.\n\n{body}")
    }
}
