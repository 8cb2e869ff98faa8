// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Merge policies for aggregated tools.
//!
//! Each aggregated tool declares how its fan-out branches combine. The
//! default policy returns the first successful branch.

use std::collections::HashSet;

use serde_json::{json, Value};

use crate::types::{InstanceId, Role, ToolResult};

/// Cap on merged workspace-symbol entries.
const SYMBOL_CAP: usize = 100;

/// One branch of an aggregated fan-out.
#[derive(Debug, Clone)]
pub struct BranchResult {
    /// Role of the instance that served this branch.
    pub role: Role,
    /// Instance that served this branch.
    pub instance_id: InstanceId,
    /// Tool result; `None` when the branch failed at the transport level.
    pub result: Option<ToolResult>,
}

impl BranchResult {
    /// Whether this branch produced a usable result.
    pub fn succeeded(&self) -> bool {
        self.result.as_ref().is_some_and(|r| r.success)
    }

    /// The branch's successful result value, when present.
    fn value(&self) -> Option<&Value> {
        self.result
            .as_ref()
            .filter(|r| r.success)
            .and_then(|r| r.result.as_ref())
    }
}

/// Merge the successful branches of an aggregated tool call.
///
/// Callers must have already established that at least one branch
/// succeeded; with no successful branch this returns `Value::Null`.
pub fn merge(tool: &str, branches: &[BranchResult]) -> Value {
    match tool {
        "open_files" => merge_dedup_by_uri(branches),
        "workspace_symbols" => merge_dedup_capped(branches, SYMBOL_CAP),
        "file_search" => merge_lines(branches),
        "workspaces" | "instances" => merge_role_tagged(branches),
        _ => first_success(branches),
    }
}

/// Default: the first successful branch's value.
fn first_success(branches: &[BranchResult]) -> Value {
    branches
        .iter()
        .find_map(|branch| branch.value().cloned())
        .unwrap_or(Value::Null)
}

/// Flatten each branch value into entries. Arrays contribute their
/// elements; any other non-null value contributes itself.
fn entries(branches: &[BranchResult]) -> impl Iterator<Item = (&BranchResult, Value)> {
    branches.iter().flat_map(|branch| {
        let values: Vec<Value> = match branch.value() {
            Some(Value::Array(items)) => items.clone(),
            Some(Value::Null) | None => Vec::new(),
            Some(other) => vec![other.clone()],
        };
        values.into_iter().map(move |value| (branch, value))
    })
}

/// Concatenate per-file entries, deduplicated by their `uri` field
/// (entries without one dedupe by textual identity).
fn merge_dedup_by_uri(branches: &[BranchResult]) -> Value {
    let mut seen = HashSet::new();
    let mut merged = Vec::new();
    for (_, entry) in entries(branches) {
        let key = entry
            .get("uri")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| entry.to_string());
        if seen.insert(key) {
            merged.push(entry);
        }
    }
    Value::Array(merged)
}

/// Concatenate entries, deduplicated by textual identity, capped.
fn merge_dedup_capped(branches: &[BranchResult], cap: usize) -> Value {
    let mut seen = HashSet::new();
    let mut merged = Vec::new();
    for (_, entry) in entries(branches) {
        if merged.len() >= cap {
            break;
        }
        if seen.insert(entry.to_string()) {
            merged.push(entry);
        }
    }
    Value::Array(merged)
}

/// Concatenate non-empty result lines across branches.
fn merge_lines(branches: &[BranchResult]) -> Value {
    let mut lines = Vec::new();
    for (_, entry) in entries(branches) {
        match entry {
            Value::String(text) => {
                lines.extend(
                    text.lines()
                        .filter(|line| !line.trim().is_empty())
                        .map(|line| Value::String(line.to_string())),
                );
            }
            other if !other.is_null() => lines.push(other),
            _ => {}
        }
    }
    Value::Array(lines)
}

/// Concatenate entries, each tagged with its originating role and
/// instance.
fn merge_role_tagged(branches: &[BranchResult]) -> Value {
    let mut merged = Vec::new();
    for (branch, entry) in entries(branches) {
        let tagged = match entry {
            Value::Object(mut map) => {
                map.insert("origin".to_string(), json!(branch.role.to_string()));
                map.insert("originId".to_string(), json!(branch.instance_id));
                Value::Object(map)
            }
            other => json!({
                "origin": branch.role.to_string(),
                "originId": branch.instance_id,
                "value": other,
            }),
        };
        merged.push(tagged);
    }
    Value::Array(merged)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn branch(role: Role, id: &str, result: Option<ToolResult>) -> BranchResult {
        BranchResult {
            role,
            instance_id: InstanceId::from(id),
            result,
        }
    }

    fn ok_branch(role: Role, id: &str, value: Value) -> BranchResult {
        branch(role, id, Some(ToolResult::ok(value)))
    }

    #[test]
    fn test_open_files_dedupes_by_uri() {
        let branches = vec![
            ok_branch(
                Role::Worker,
                "w1",
                json!([{ "uri": "file:///a.rs" }, { "uri": "file:///b.rs" }]),
            ),
            ok_branch(
                Role::Master,
                "m",
                json!([{ "uri": "file:///b.rs" }, { "uri": "file:///c.rs" }]),
            ),
        ];
        let merged = merge("open_files", &branches);
        let items = merged.as_array().unwrap();
        assert_eq!(items.len(), 3);
    }

    #[test]
    fn test_workspace_symbols_capped_at_100() {
        let many: Vec<Value> = (0..150).map(|i| json!({ "name": format!("sym{i}") })).collect();
        let branches = vec![ok_branch(Role::Worker, "w1", Value::Array(many))];
        let merged = merge("workspace_symbols", &branches);
        assert_eq!(merged.as_array().unwrap().len(), 100);
    }

    #[test]
    fn test_workspace_symbols_dedupes_textually() {
        let branches = vec![
            ok_branch(Role::Worker, "w1", json!([{ "name": "main" }])),
            ok_branch(Role::Worker, "w2", json!([{ "name": "main" }, { "name": "lib" }])),
        ];
        let merged = merge("workspace_symbols", &branches);
        assert_eq!(merged.as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_file_search_concatenates_non_empty_lines() {
        let branches = vec![
            ok_branch(Role::Worker, "w1", json!("src/main.rs\n\nsrc/lib.rs\n")),
            ok_branch(Role::Master, "m", json!("src/router/mod.rs")),
        ];
        let merged = merge("file_search", &branches);
        let lines = merged.as_array().unwrap();
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn test_instances_are_role_tagged() {
        let branches = vec![
            ok_branch(Role::Master, "m", json!([{ "workspace": "api" }])),
            ok_branch(Role::Worker, "w1", json!([{ "workspace": "web" }])),
        ];
        let merged = merge("instances", &branches);
        let items = merged.as_array().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["origin"], "master");
        assert_eq!(items[1]["origin"], "worker");
        assert_eq!(items[1]["originId"], "w1");
    }

    #[test]
    fn test_failed_branches_contribute_nothing() {
        let branches = vec![
            branch(Role::Worker, "w1", None),
            branch(Role::Worker, "w2", Some(ToolResult::failure("boom"))),
            ok_branch(Role::Master, "m", json!([{ "uri": "file:///a.rs" }])),
        ];
        let merged = merge("open_files", &branches);
        assert_eq!(merged.as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_default_policy_first_success() {
        let branches = vec![
            branch(Role::Worker, "w1", None),
            ok_branch(Role::Worker, "w2", json!({ "answer": 42 })),
            ok_branch(Role::Master, "m", json!({ "answer": 7 })),
        ];
        let merged = merge("unknown_aggregate", &branches);
        assert_eq!(merged["answer"], 42);
    }
}
