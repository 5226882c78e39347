//! Human-approval records for high-risk tool calls.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Risk classification, ordered least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    /// `destroy` in the name is HIGH, `apply` is MEDIUM, anything else LOW.
    pub fn for_tool(tool_name: &str) -> Self {
        let name = tool_name.to_lowercase();
        if name.contains("destroy") {
            Self::High
        } else if name.contains("apply") {
            Self::Medium
        } else {
            Self::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Modified,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Modified => "modified",
        }
    }
}

impl std::fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A pending or resolved approval for one tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: Uuid,
    pub tool_name: String,
    pub arguments: serde_json::Value,
    /// Free-form context shown to the approver (e.g. the user's request).
    pub context: String,
    pub risk_level: RiskLevel,
    pub status: ApprovalStatus,
    pub requested_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified_arguments: Option<serde_json::Value>,
}

impl ApprovalRequest {
    pub fn new(
        tool_name: impl Into<String>,
        arguments: serde_json::Value,
        context: impl Into<String>,
    ) -> Self {
        let tool_name = tool_name.into();
        Self {
            id: Uuid::now_v7(),
            risk_level: RiskLevel::for_tool(&tool_name),
            tool_name,
            arguments,
            context: context.into(),
            status: ApprovalStatus::Pending,
            requested_at: Utc::now(),
            resolved_at: None,
            modified_arguments: None,
        }
    }

    /// Arguments to run with: the modified set if one was supplied.
    pub fn effective_arguments(&self) -> &serde_json::Value {
        self.modified_arguments.as_ref().unwrap_or(&self.arguments)
    }
}

/// Aggregate view over pending requests and the resolution history.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalSummary {
    pub pending_count: usize,
    pub total_approved: usize,
    pub total_rejected: usize,
    pub total_modified: usize,
    pub high_risk_operations: usize,
}
