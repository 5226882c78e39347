//! Terraform tools exposed to the model.
//!
//! - `terraform`: command tools wrapping `TerraformCli` (plan, apply, ...)
//! - `project`: read-only tools over the cached project snapshot and state

pub mod project;
pub mod terraform;

use std::sync::Arc;

use serde_json::{Value, json};
use tp_terraform::{CommandResult, SnapshotCache, TerraformCli};

use crate::error::ToolError;
use crate::registry::ToolRegistry;

/// Command output beyond this is cut to keep tool results within context.
pub const MAX_OUTPUT_BYTES: usize = 64 * 1024;

/// Register the full catalog in its canonical order.
pub fn register_terraform_tools(
    registry: &mut ToolRegistry,
    cli: Arc<TerraformCli>,
    cache: Arc<SnapshotCache>,
) {
    registry.register("execute_terraform_plan", Arc::new(terraform::Plan::new(cli.clone())));
    registry.register("execute_terraform_apply", Arc::new(terraform::Apply::new(cli.clone())));
    registry.register(
        "execute_terraform_validate",
        Arc::new(terraform::Validate::new(cli.clone())),
    );
    registry.register("execute_terraform_init", Arc::new(terraform::Init::new(cli.clone())));
    registry.register(
        "execute_terraform_destroy",
        Arc::new(terraform::Destroy::new(cli.clone())),
    );
    registry.register("get_resources", Arc::new(project::GetResources::new(cache.clone())));
    registry.register(
        "analyze_infrastructure",
        Arc::new(project::AnalyzeInfrastructure::new(cache)),
    );
    registry.register("get_terraform_state", Arc::new(project::GetState::new(cli)));
}

/// Optional boolean argument; a value of the wrong type is rejected.
pub(crate) fn bool_arg(args: &Value, key: &str, default: bool) -> Result<bool, ToolError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(default),
        Some(Value::Bool(b)) => Ok(*b),
        Some(other) => Err(ToolError::InvalidArguments(format!(
            "'{key}' must be a boolean, got {other}"
        ))),
    }
}

/// Optional non-empty string argument.
pub(crate) fn str_arg<'a>(args: &'a Value, key: &str) -> Result<Option<&'a str>, ToolError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(other) => Err(ToolError::InvalidArguments(format!(
            "'{key}' must be a string, got {other}"
        ))),
    }
}

/// Cut at the last full line within the limit.
pub(crate) fn truncate_output(text: &str) -> (String, bool) {
    if text.len() <= MAX_OUTPUT_BYTES {
        return (text.to_string(), false);
    }
    let mut end = MAX_OUTPUT_BYTES;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    let mut out = text[..end].to_string();
    if let Some(pos) = out.rfind('\n') {
        out.truncate(pos + 1);
    }
    out.push_str("\n... [output truncated at 64KB]");
    (out, true)
}

/// `{action, success, output, error, duration}` for a finished command.
/// `error` carries stderr only when the command failed.
pub(crate) fn command_payload(action: &str, result: &CommandResult, success: bool) -> Value {
    let (output, truncated) = truncate_output(result.stdout());
    let mut payload = json!({
        "action": action,
        "success": success,
        "output": output,
        "error": if success { Value::Null } else { Value::String(result.stderr().to_string()) },
        "duration": result.duration().as_secs_f64(),
    });
    if truncated {
        payload["truncated"] = Value::Bool(true);
    }
    payload
}
