//! System instructions and the project context block sent with every request.

use std::fmt::Write;

use tp_protocol::ProjectSnapshot;

/// Instructions sent as the first (cached) system block.
pub const SYSTEM_PROMPT: &str = r#"You are an expert Terraform infrastructure assistant. Your role is to help users:

1. **Understand Infrastructure**: Explain Terraform configurations, resources, and their relationships
2. **Execute Operations**: Run terraform commands (plan, apply, validate, init, destroy) when requested
3. **Analyze Changes**: Interpret terraform plan output and explain what changes will occur
4. **Provide Guidance**: Offer best practices, security considerations, and optimization suggestions
5. **Answer Questions**: Respond to queries about resources, variables, outputs, and state

**Important Guidelines**:
- Always explain what a terraform command will do before executing destructive operations
- For 'apply' or 'destroy' commands, confirm user intent and warn about infrastructure changes
- Provide clear, actionable responses with relevant details
- Use your tools to get real-time information rather than guessing
- Format responses with proper markdown for readability
- Be security-conscious and highlight potential risks

**Available Tools**:
You have access to tools for executing terraform commands and querying infrastructure. Use them appropriately based on user requests."#;

/// Queries containing any of these get an extended reasoning budget.
const THINKING_KEYWORDS: &[&str] = &[
    "analyze",
    "compare",
    "optimize",
    "recommend",
    "best practice",
    "should i",
    "what if",
    "impact",
    "risk",
    "security",
    "dependencies",
    "plan",
    "strategy",
    "migrate",
    "upgrade",
];

pub fn wants_extended_thinking(query: &str) -> bool {
    let query = query.to_lowercase();
    THINKING_KEYWORDS.iter().any(|k| query.contains(k))
}

/// Markdown overview of the project. `sample` caps the resource list.
pub fn context_block(snapshot: &ProjectSnapshot, sample: usize) -> String {
    let mut out = String::from("## Current Infrastructure Overview\n");
    let _ = write!(
        out,
        "\n**Resources**: {} total resources defined",
        snapshot.resources.count
    );

    let types = snapshot.resources.types_by_count();
    if !types.is_empty() {
        out.push_str("\n\n**Resource Types**:");
        for (ty, count) in types {
            let _ = write!(out, "\n- {ty}: {count}");
        }
    }

    if snapshot.variables.count > 0 {
        let _ = write!(
            out,
            "\n\n**Variables**: {} configuration variables defined",
            snapshot.variables.count
        );
    }
    if snapshot.outputs.count > 0 {
        let _ = write!(
            out,
            "\n\n**Outputs**: {} output values defined",
            snapshot.outputs.count
        );
    }
    if snapshot.providers.count > 0 {
        let mut names: Vec<&str> = Vec::new();
        for name in snapshot.provider_names() {
            if !names.contains(&name) {
                names.push(name);
            }
        }
        let _ = write!(out, "\n\n**Providers**: {}", names.join(", "));
    }

    let details = &snapshot.resources.details;
    if !details.is_empty() && sample > 0 {
        let _ = write!(out, "\n\n**Sample Resources** (first {sample}):");
        for r in details.iter().take(sample) {
            let _ = write!(out, "\n- `{}` ({})", r.name, r.resource_type);
        }
    }
    out
}
