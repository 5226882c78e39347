//! Session export files: `{conversation_history, token_usage, cached_context}`.

use std::path::Path;

use tp_protocol::SessionExport;

use crate::error::{AgentError, AgentResult};

pub const DEFAULT_EXPORT_PATH: &str = "conversation_export.json";

pub async fn save(path: &Path, export: &SessionExport) -> AgentResult<()> {
    let json = serde_json::to_string_pretty(export)
        .map_err(|e| AgentError::Session(format!("encode failed: {e}")))?;
    tokio::fs::write(path, json)
        .await
        .map_err(|e| AgentError::Session(format!("{}: {e}", path.display())))?;
    tracing::info!(
        path = %path.display(),
        turns = export.conversation_history.len(),
        "conversation exported"
    );
    Ok(())
}

pub async fn load(path: &Path) -> AgentResult<SessionExport> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| AgentError::Session(format!("{}: {e}", path.display())))?;
    let export: SessionExport = serde_json::from_str(&raw)
        .map_err(|e| AgentError::Session(format!("{}: {e}", path.display())))?;
    tracing::info!(
        path = %path.display(),
        turns = export.conversation_history.len(),
        "conversation imported"
    );
    Ok(export)
}
