//! Command tools: each runs one Terraform subcommand and reports the
//! outcome as `{action, success, output, error, duration}`.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tp_terraform::{ApplyOptions, DestroyOptions, PlanOptions, TerraformCli};

use super::{bool_arg, command_payload};
use crate::error::ToolError;
use crate::registry::ToolHandler;

pub struct Plan {
    cli: Arc<TerraformCli>,
}

impl Plan {
    pub fn new(cli: Arc<TerraformCli>) -> Self {
        Self { cli }
    }
}

#[async_trait]
impl ToolHandler for Plan {
    fn description(&self) -> &str {
        "Execute 'terraform plan' command to show what changes Terraform will make to infrastructure. \
         Use this when the user asks about planned changes, wants to see what will happen, or asks to run a plan."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "detailed": {
                    "type": "boolean",
                    "description": "Whether to show detailed exit codes",
                    "default": true
                }
            }
        })
    }

    async fn call(&self, args: Value) -> Result<Value, ToolError> {
        let detailed = bool_arg(&args, "detailed", true)?;
        tracing::info!(detailed, "executing terraform plan");
        let outcome = self
            .cli
            .plan(&PlanOptions {
                detailed_exitcode: detailed,
                ..Default::default()
            })
            .await;
        let success = outcome.succeeded();
        let mut payload = command_payload("terraform_plan", &outcome.result, success);
        payload["summary"] = if success {
            serde_json::to_value(outcome.summary).map_err(|e| ToolError::Failed(e.to_string()))?
        } else {
            Value::Null
        };
        Ok(payload)
    }
}

pub struct Apply {
    cli: Arc<TerraformCli>,
}

impl Apply {
    pub fn new(cli: Arc<TerraformCli>) -> Self {
        Self { cli }
    }
}

#[async_trait]
impl ToolHandler for Apply {
    fn description(&self) -> &str {
        "Execute 'terraform apply' command to apply infrastructure changes. WARNING: This modifies actual \
         infrastructure. Only use when the user explicitly confirms they want to apply changes."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "auto_approve": {
                    "type": "boolean",
                    "description": "Skip interactive approval (use with caution)",
                    "default": false
                }
            }
        })
    }

    async fn call(&self, args: Value) -> Result<Value, ToolError> {
        let auto_approve = bool_arg(&args, "auto_approve", false)?;
        tracing::info!(auto_approve, "executing terraform apply");
        let result = self
            .cli
            .apply(&ApplyOptions {
                auto_approve,
                ..Default::default()
            })
            .await;
        Ok(command_payload("terraform_apply", &result, result.success()))
    }
}

pub struct Validate {
    cli: Arc<TerraformCli>,
}

impl Validate {
    pub fn new(cli: Arc<TerraformCli>) -> Self {
        Self { cli }
    }
}

#[async_trait]
impl ToolHandler for Validate {
    fn description(&self) -> &str {
        "Execute 'terraform validate' to check if the Terraform configuration is syntactically valid and \
         internally consistent. Use this when user asks about configuration validity or wants to check for errors."
    }

    fn parameters_schema(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    async fn call(&self, _args: Value) -> Result<Value, ToolError> {
        tracing::info!("executing terraform validate");
        let result = self.cli.validate().await;
        Ok(command_payload("terraform_validate", &result, result.success()))
    }
}

pub struct Init {
    cli: Arc<TerraformCli>,
}

impl Init {
    pub fn new(cli: Arc<TerraformCli>) -> Self {
        Self { cli }
    }
}

#[async_trait]
impl ToolHandler for Init {
    fn description(&self) -> &str {
        "Execute 'terraform init' to initialize the Terraform working directory, download providers, and set \
         up the backend. Use this when the user wants to initialize or re-initialize Terraform."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "upgrade": {
                    "type": "boolean",
                    "description": "Upgrade providers to latest versions",
                    "default": false
                }
            }
        })
    }

    async fn call(&self, args: Value) -> Result<Value, ToolError> {
        let upgrade = bool_arg(&args, "upgrade", false)?;
        tracing::info!(upgrade, "executing terraform init");
        let result = self.cli.init(upgrade).await;
        Ok(command_payload("terraform_init", &result, result.success()))
    }
}

pub struct Destroy {
    cli: Arc<TerraformCli>,
}

impl Destroy {
    pub fn new(cli: Arc<TerraformCli>) -> Self {
        Self { cli }
    }
}

#[async_trait]
impl ToolHandler for Destroy {
    fn description(&self) -> &str {
        "Execute 'terraform destroy' to destroy all resources managed by Terraform. EXTREME CAUTION: This \
         deletes infrastructure. Only use when user explicitly confirms destruction."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "auto_approve": {
                    "type": "boolean",
                    "description": "Skip interactive approval (use with extreme caution)",
                    "default": false
                }
            }
        })
    }

    async fn call(&self, args: Value) -> Result<Value, ToolError> {
        let auto_approve = bool_arg(&args, "auto_approve", false)?;
        tracing::warn!(auto_approve, "executing terraform destroy");
        let result = self
            .cli
            .destroy(&DestroyOptions {
                auto_approve,
                ..Default::default()
            })
            .await;
        Ok(command_payload("terraform_destroy", &result, result.success()))
    }
}
