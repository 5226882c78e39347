//! Read-only tools over the parsed project and the deployed state.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tp_terraform::{SnapshotCache, TerraformCli};

use super::{bool_arg, command_payload, str_arg};
use crate::error::ToolError;
use crate::registry::ToolHandler;

fn to_json<T: serde::Serialize>(value: &T) -> Result<Value, ToolError> {
    serde_json::to_value(value).map_err(|e| ToolError::Failed(e.to_string()))
}

/// Resource listing with optional type / name filters.
pub struct GetResources {
    cache: Arc<SnapshotCache>,
}

impl GetResources {
    pub fn new(cache: Arc<SnapshotCache>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl ToolHandler for GetResources {
    fn description(&self) -> &str {
        "Get information about Terraform resources in the configuration. Use this to answer questions \
         about what resources exist, their types, counts, or details."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "resource_type": {
                    "type": "string",
                    "description": "Filter by specific resource type (e.g., 'azurerm_virtual_machine')"
                },
                "search_query": {
                    "type": "string",
                    "description": "Search term to filter resource names"
                }
            }
        })
    }

    async fn call(&self, args: Value) -> Result<Value, ToolError> {
        let resource_type = str_arg(&args, "resource_type")?;
        let query = str_arg(&args, "search_query")?;
        let snapshot = self.cache.get(false)?;

        if resource_type.is_none() && query.is_none() {
            return to_json(&snapshot.resources);
        }
        let matches = snapshot.resources.filter(resource_type, query);
        Ok(json!({
            "count": matches.len(),
            "resources": to_json(&matches)?,
        }))
    }
}

/// Summary counts or one section of the project snapshot.
pub struct AnalyzeInfrastructure {
    cache: Arc<SnapshotCache>,
}

impl AnalyzeInfrastructure {
    pub fn new(cache: Arc<SnapshotCache>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl ToolHandler for AnalyzeInfrastructure {
    fn description(&self) -> &str {
        "Analyze the Terraform infrastructure configuration to get summary information about resources, \
         variables, outputs, or providers."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "analysis_type": {
                    "type": "string",
                    "enum": ["summary", "resources", "variables", "outputs", "providers"],
                    "description": "Type of analysis to perform"
                }
            },
            "required": ["analysis_type"]
        })
    }

    async fn call(&self, args: Value) -> Result<Value, ToolError> {
        let analysis_type = str_arg(&args, "analysis_type")?.unwrap_or("summary");
        let snapshot = self.cache.get(false)?;
        match analysis_type {
            "summary" => Ok(json!({
                "resources": snapshot.resources.count,
                "variables": snapshot.variables.count,
                "outputs": snapshot.outputs.count,
                "providers": snapshot.providers.count,
            })),
            "resources" => to_json(&snapshot.resources),
            "variables" => to_json(&snapshot.variables),
            "outputs" => to_json(&snapshot.outputs),
            "providers" => to_json(&snapshot.providers),
            other => Ok(json!({ "error": format!("Unknown analysis type: {other}") })),
        }
    }
}

/// `terraform state list`, reported like the command tools.
pub struct GetState {
    cli: Arc<TerraformCli>,
}

impl GetState {
    pub fn new(cli: Arc<TerraformCli>) -> Self {
        Self { cli }
    }
}

#[async_trait]
impl ToolHandler for GetState {
    fn description(&self) -> &str {
        "Get information about the current Terraform state to see what resources are actually deployed \
         and managed."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "list_resources": {
                    "type": "boolean",
                    "description": "List all resources in state",
                    "default": true
                }
            }
        })
    }

    async fn call(&self, args: Value) -> Result<Value, ToolError> {
        if !bool_arg(&args, "list_resources", true)? {
            return Ok(json!({
                "message": "State information requested but list_resources=False"
            }));
        }
        tracing::info!("executing terraform state list");
        let outcome = self.cli.state_list().await;
        let mut payload = command_payload(
            "terraform_state_list",
            &outcome.result,
            outcome.result.success(),
        );
        payload["resources"] = json!(outcome.items);
        Ok(payload)
    }
}
