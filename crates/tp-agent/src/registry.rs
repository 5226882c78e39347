//! Tool registry: name → handler, dispatched by the orchestration loop.
//!
//! `dispatch` never fails. Unknown names and handler errors come back as
//! structured error payloads so the model can see what went wrong.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tp_protocol::ToolPayload;

use crate::error::ToolError;
use crate::provider::ToolDefinition;

/// A tool the model can call.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Human-readable description shown to the model.
    fn description(&self) -> &str;

    /// JSON Schema describing accepted arguments.
    fn parameters_schema(&self) -> Value;

    /// Execute with the model-supplied JSON arguments.
    async fn call(&self, args: Value) -> Result<Value, ToolError>;
}

/// Handlers indexed by name, remembered in registration order.
#[derive(Default)]
pub struct ToolRegistry {
    handlers: HashMap<String, Arc<dyn ToolHandler>>,
    order: Vec<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the handler for `name`.
    pub fn register(&mut self, name: impl Into<String>, handler: Arc<dyn ToolHandler>) {
        let name = name.into();
        if self.handlers.insert(name.clone(), handler).is_none() {
            self.order.push(name.clone());
        }
        tracing::debug!(tool = %name, "registered tool handler");
    }

    pub async fn dispatch(&self, name: &str, args: Value) -> ToolPayload {
        let Some(handler) = self.handlers.get(name) else {
            tracing::warn!(tool = %name, "no handler registered");
            return ToolPayload::error(
                format!("Tool handler not registered: {name}"),
                json!({ "available_tools": self.order }),
            );
        };
        match handler.call(args).await {
            Ok(value) => ToolPayload::Success(value),
            Err(e) => {
                tracing::warn!(tool = %name, error = %e, "tool handler failed");
                ToolPayload::error(e.to_string(), json!({ "tool": name }))
            }
        }
    }

    /// Catalog offered to the model, in registration order.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.order
            .iter()
            .filter_map(|name| {
                self.handlers.get(name).map(|h| ToolDefinition {
                    name: name.clone(),
                    description: h.description().to_string(),
                    input_schema: h.parameters_schema(),
                })
            })
            .collect()
    }

    pub fn names(&self) -> &[String] {
        &self.order
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl ToolHandler for Echo {
        fn description(&self) -> &str {
            "Echo the arguments back"
        }

        fn parameters_schema(&self) -> Value {
            json!({"type": "object"})
        }

        async fn call(&self, args: Value) -> Result<Value, ToolError> {
            Ok(args)
        }
    }

    struct Broken;

    #[async_trait]
    impl ToolHandler for Broken {
        fn description(&self) -> &str {
            "Always fails"
        }

        fn parameters_schema(&self) -> Value {
            json!({"type": "object"})
        }

        async fn call(&self, _args: Value) -> Result<Value, ToolError> {
            Err(ToolError::Failed("disk on fire".into()))
        }
    }

    fn registry() -> ToolRegistry {
        let mut reg = ToolRegistry::new();
        reg.register("echo", Arc::new(Echo));
        reg.register("broken", Arc::new(Broken));
        reg
    }

    #[tokio::test]
    async fn dispatch_known_tool() {
        let payload = registry().dispatch("echo", json!({"x": 1})).await;
        assert_eq!(payload, ToolPayload::Success(json!({"x": 1})));
    }

    #[tokio::test]
    async fn unknown_tool_lists_available() {
        let payload = registry().dispatch("terraform_nuke", json!({})).await;
        assert!(payload.is_error());
        assert_eq!(
            payload.value()["error"],
            "Tool handler not registered: terraform_nuke"
        );
        assert_eq!(payload.value()["available_tools"], json!(["echo", "broken"]));
    }

    #[tokio::test]
    async fn handler_error_names_tool() {
        let payload = registry().dispatch("broken", json!({})).await;
        assert_eq!(
            payload.into_value(),
            json!({"error": "disk on fire", "tool": "broken"})
        );
    }

    #[test]
    fn definitions_follow_registration_order() {
        let mut reg = registry();
        reg.register("echo", Arc::new(Echo));
        let names: Vec<_> = reg.definitions().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["echo", "broken"]);
        assert_eq!(reg.len(), 2);
        assert!(reg.contains("broken"));
        assert!(!reg.is_empty());
    }
}
