//! Point-in-time summary of a Terraform project's configuration files.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// ── Details ───────────────────────────────────────────────────

/// A `resource` or `data` block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDetail {
    #[serde(rename = "type")]
    pub resource_type: String,
    pub name: String,
    pub file_path: String,
    /// 1-based line of the block header.
    pub line_number: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableDetail {
    pub name: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub var_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Raw default expression as written.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    pub file_path: String,
    pub line_number: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputDetail {
    pub name: String,
    /// Raw value expression as written.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub file_path: String,
    pub line_number: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderDetail {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    pub file_path: String,
    pub line_number: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleDetail {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub file_path: String,
    pub line_number: usize,
}

// ── Sections ──────────────────────────────────────────────────

/// A counted list of details.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section<T> {
    pub count: usize,
    pub details: Vec<T>,
}

impl<T> Section<T> {
    pub fn new(details: Vec<T>) -> Self {
        Self {
            count: details.len(),
            details,
        }
    }
}

impl<T> Default for Section<T> {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

/// Resources (or data sources) with a per-type breakdown.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSection {
    pub count: usize,
    pub by_type: BTreeMap<String, usize>,
    pub details: Vec<ResourceDetail>,
}

impl ResourceSection {
    pub fn new(details: Vec<ResourceDetail>) -> Self {
        let mut by_type = BTreeMap::new();
        for detail in &details {
            *by_type.entry(detail.resource_type.clone()).or_insert(0) += 1;
        }
        Self {
            count: details.len(),
            by_type,
            details,
        }
    }

    /// `(type, count)` pairs, most frequent first, ties by name.
    pub fn types_by_count(&self) -> Vec<(&str, usize)> {
        let mut types: Vec<_> = self.by_type.iter().map(|(t, c)| (t.as_str(), *c)).collect();
        types.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
        types
    }

    /// Case-insensitive substring filter. `resource_type` matches the type;
    /// `query` matches either the name or the type. Both must hold when given.
    pub fn filter(&self, resource_type: Option<&str>, query: Option<&str>) -> Vec<&ResourceDetail> {
        let resource_type = resource_type.map(str::to_lowercase);
        let query = query.map(str::to_lowercase);
        self.details
            .iter()
            .filter(|d| {
                let ty = d.resource_type.to_lowercase();
                let type_ok = resource_type.as_deref().is_none_or(|t| ty.contains(t));
                let query_ok = query
                    .as_deref()
                    .is_none_or(|q| ty.contains(q) || d.name.to_lowercase().contains(q));
                type_ok && query_ok
            })
            .collect()
    }
}

// ── Snapshot ──────────────────────────────────────────────────

/// Everything the parser found in a project directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectSnapshot {
    pub resources: ResourceSection,
    pub data_sources: ResourceSection,
    pub variables: Section<VariableDetail>,
    pub outputs: Section<OutputDetail>,
    pub providers: Section<ProviderDetail>,
    pub modules: Section<ModuleDetail>,
}

impl ProjectSnapshot {
    pub fn resource_count(&self) -> usize {
        self.resources.count
    }

    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.details.iter().map(|p| p.name.as_str()).collect()
    }

    /// Counts only, for summary-style analysis.
    pub fn summary(&self) -> serde_json::Value {
        serde_json::json!({
            "total_resources": self.resources.count,
            "total_variables": self.variables.count,
            "total_outputs": self.outputs.count,
            "total_providers": self.providers.count,
            "total_modules": self.modules.count,
            "total_data_sources": self.data_sources.count,
        })
    }
}
