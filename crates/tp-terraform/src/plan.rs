//! Plan output parsing.

use std::sync::LazyLock;

use regex::Regex;
use tp_protocol::{PlanSummary, ResourceChange};

static ADD_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d+) to add").unwrap());
static CHANGE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d+) to change").unwrap());
static DESTROY_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d+) to destroy").unwrap());

fn capture_count(re: &Regex, line: &str) -> u32 {
    re.captures(line)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0)
}

/// Counts from the first line containing `Plan:`. Each count is optional;
/// no `Plan:` line at all yields zeros.
pub fn parse_plan_summary(stdout: &str) -> PlanSummary {
    let Some(line) = stdout.lines().find(|l| l.contains("Plan:")) else {
        return PlanSummary::default();
    };
    PlanSummary {
        add: capture_count(&ADD_RE, line),
        change: capture_count(&CHANGE_RE, line),
        destroy: capture_count(&DESTROY_RE, line),
    }
}

/// `resource_changes` of a `show -json` plan document; missing fields default.
pub fn resource_changes(plan_json: &serde_json::Value) -> Vec<ResourceChange> {
    let Some(changes) = plan_json["resource_changes"].as_array() else {
        return Vec::new();
    };
    let text = |v: &serde_json::Value, key: &str| v[key].as_str().unwrap_or_default().to_string();
    changes
        .iter()
        .map(|c| ResourceChange {
            address: text(c, "address"),
            resource_type: text(c, "type"),
            name: text(c, "name"),
            mode: text(c, "mode"),
            change: c
                .get("change")
                .cloned()
                .unwrap_or_else(|| serde_json::json!({})),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn full_plan_line() {
        let out = "Refreshing state...\n\nPlan: 2 to add, 1 to change, 0 to destroy.\n";
        assert_eq!(
            parse_plan_summary(out),
            PlanSummary { add: 2, change: 1, destroy: 0 }
        );
    }

    #[test]
    fn partial_plan_line() {
        let out = "Plan: 3 to destroy.";
        assert_eq!(
            parse_plan_summary(out),
            PlanSummary { add: 0, change: 0, destroy: 3 }
        );
    }

    #[test]
    fn no_plan_line_is_zero() {
        let out = "No changes. Your infrastructure matches the configuration.";
        assert_eq!(parse_plan_summary(out), PlanSummary::default());
    }

    #[test]
    fn only_first_plan_line_counts() {
        let out = "Plan: 1 to add, 0 to change, 0 to destroy.\nPlan: 9 to add, 9 to change, 9 to destroy.";
        assert_eq!(parse_plan_summary(out).add, 1);
    }

    #[test]
    fn resource_changes_extracts_entries() {
        let plan = json!({
            "format_version": "1.2",
            "resource_changes": [
                {"address": "aws_s3_bucket.logs", "type": "aws_s3_bucket", "name": "logs",
                 "mode": "managed", "change": {"actions": ["create"]}},
                {"address": "aws_vpc.main"}
            ]
        });
        let changes = resource_changes(&plan);
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].actions(), vec!["create"]);
        assert_eq!(changes[1].resource_type, "");
        assert_eq!(changes[1].change, json!({}));
    }

    #[test]
    fn resource_changes_missing_key() {
        assert!(resource_changes(&json!({})).is_empty());
    }
}
