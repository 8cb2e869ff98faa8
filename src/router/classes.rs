// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Static mapping from tool name to routing class.
//!
//! Routing is by class, declared per tool in one table rather than
//! scattered through handlers. Unknown tools route as workspace-specific,
//! whose selection cascade ends at local execution.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// How a tool invocation is dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingClass {
    /// Target exactly one worker, chosen by workspace hints.
    WorkspaceSpecific,
    /// Target the most recently active worker.
    ActiveContext,
    /// Fan out to every worker and local, then merge.
    Aggregated,
}

static ROUTING_CLASSES: Lazy<HashMap<&'static str, RoutingClass>> = Lazy::new(|| {
    use RoutingClass::*;
    HashMap::from([
        // One workspace owns the answer.
        ("diagnostics", WorkspaceSpecific),
        ("open_file", WorkspaceSpecific),
        ("read_file", WorkspaceSpecific),
        ("document_symbols", WorkspaceSpecific),
        ("find_references", WorkspaceSpecific),
        ("find_definition", WorkspaceSpecific),
        // The focused editor owns the answer.
        ("active_editor", ActiveContext),
        ("selection", ActiveContext),
        ("visible_range", ActiveContext),
        // Every instance contributes.
        ("open_files", Aggregated),
        ("workspace_symbols", Aggregated),
        ("file_search", Aggregated),
        ("workspaces", Aggregated),
        ("instances", Aggregated),
    ])
});

/// Look up the routing class for a tool name.
pub fn routing_class(tool: &str) -> RoutingClass {
    ROUTING_CLASSES
        .get(tool)
        .copied()
        .unwrap_or(RoutingClass::WorkspaceSpecific)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_classes() {
        assert_eq!(routing_class("diagnostics"), RoutingClass::WorkspaceSpecific);
        assert_eq!(routing_class("active_editor"), RoutingClass::ActiveContext);
        assert_eq!(routing_class("open_files"), RoutingClass::Aggregated);
        assert_eq!(routing_class("workspaces"), RoutingClass::Aggregated);
    }

    #[test]
    fn test_unknown_tool_defaults_to_workspace_specific() {
        assert_eq!(
            routing_class("some_future_tool"),
            RoutingClass::WorkspaceSpecific
        );
    }
}
