// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Seams to the editor integration.
//!
//! The coordination plane never talks to an editor directly. It consumes
//! two narrow traits: [`LocalToolExecutor`] executes tool calls against
//! the local editor, and [`WorkspaceAdapter`] reports workspace identity,
//! activity, and election score inputs.
//!
//! [`BuiltinToolExecutor`] is a deliberately thin implementation backed
//! only by the adapter, so the binary is runnable (and the routing paths
//! testable) without an editor attached.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::types::{ToolResult, WorkspaceInfo, WorkspaceScoreInputs, WorkerActivity};

/// Executes tool calls against the local editor instance.
///
/// The set of tool names and their params is opaque to the coordination
/// plane; routing decisions use only the declared routing class per name.
#[async_trait]
pub trait LocalToolExecutor: Send + Sync {
    /// Execute a tool by name.
    ///
    /// Tool-specific failures are reported inside the returned
    /// [`ToolResult`], not as `Err`.
    async fn execute_tool(&self, name: &str, params: serde_json::Value) -> ToolResult;

    /// The tool names this executor can serve.
    fn available_tools(&self) -> Vec<String>;
}

/// Reports workspace identity and editor activity for this instance.
pub trait WorkspaceAdapter: Send + Sync {
    /// The workspace this instance is attached to.
    fn workspace_info(&self) -> WorkspaceInfo;

    /// Raw inputs for the election workspace score.
    fn score_inputs(&self) -> WorkspaceScoreInputs;

    /// Current editor activity status.
    fn activity(&self) -> WorkerActivity;
}

// ============================================================================
// Builtin Implementations
// ============================================================================

/// Static workspace adapter configured at startup.
///
/// Reports whatever the host supplied; score inputs default to zero and
/// activity to idle when nothing was provided. Scoring code treats the
/// inputs as opaque.
#[derive(Debug, Clone)]
pub struct StaticWorkspaceAdapter {
    info: WorkspaceInfo,
    score_inputs: WorkspaceScoreInputs,
    activity: WorkerActivity,
}

impl StaticWorkspaceAdapter {
    /// Create an adapter for a workspace root.
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            info: WorkspaceInfo {
                name: name.into(),
                path: path.clone(),
                kind: "folder".to_string(),
                folders: vec![path],
            },
            score_inputs: WorkspaceScoreInputs::default(),
            activity: WorkerActivity::Idle,
        }
    }

    /// Supply score inputs.
    pub fn with_score_inputs(mut self, inputs: WorkspaceScoreInputs) -> Self {
        self.score_inputs = inputs;
        self
    }

    /// Supply an activity status.
    pub fn with_activity(mut self, activity: WorkerActivity) -> Self {
        self.activity = activity;
        self
    }
}

impl WorkspaceAdapter for StaticWorkspaceAdapter {
    fn workspace_info(&self) -> WorkspaceInfo {
        self.info.clone()
    }

    fn score_inputs(&self) -> WorkspaceScoreInputs {
        self.score_inputs
    }

    fn activity(&self) -> WorkerActivity {
        self.activity
    }
}

/// Thin tool executor backed only by a [`WorkspaceAdapter`].
///
/// Serves the coordination-introspection tools (`workspaces`,
/// `instances`); every other tool name is reported as unavailable.
pub struct BuiltinToolExecutor {
    adapter: Arc<dyn WorkspaceAdapter>,
}

impl BuiltinToolExecutor {
    /// Create a builtin executor over an adapter.
    pub fn new(adapter: Arc<dyn WorkspaceAdapter>) -> Self {
        Self { adapter }
    }
}

#[async_trait]
impl LocalToolExecutor for BuiltinToolExecutor {
    async fn execute_tool(&self, name: &str, _params: serde_json::Value) -> ToolResult {
        match name {
            "workspaces" => {
                let info = self.adapter.workspace_info();
                ToolResult::ok(json!([info]))
            }
            "instances" => {
                let info = self.adapter.workspace_info();
                ToolResult::ok(json!([{
                    "workspace": info.name,
                    "activity": self.adapter.activity(),
                }]))
            }
            other => ToolResult::failure(format!("Tool not available locally: {other}")),
        }
    }

    fn available_tools(&self) -> Vec<String> {
        vec!["workspaces".to_string(), "instances".to_string()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> Arc<dyn WorkspaceAdapter> {
        Arc::new(StaticWorkspaceAdapter::new("api", "/home/dev/api"))
    }

    #[test]
    fn test_static_adapter_reports_configured_workspace() {
        let adapter = StaticWorkspaceAdapter::new("api", "/home/dev/api")
            .with_activity(WorkerActivity::Active);
        assert_eq!(adapter.workspace_info().name, "api");
        assert_eq!(adapter.activity(), WorkerActivity::Active);
    }

    #[test]
    fn test_static_adapter_defaults_are_inert() {
        let adapter = StaticWorkspaceAdapter::new("api", "/home/dev/api");
        assert_eq!(adapter.score_inputs().score(), 0.0);
        assert_eq!(adapter.activity(), WorkerActivity::Idle);
    }

    #[tokio::test]
    async fn test_builtin_executor_serves_workspaces() {
        let executor = BuiltinToolExecutor::new(adapter());
        let result = executor.execute_tool("workspaces", json!({})).await;
        assert!(result.success);
        let value = result.result.unwrap();
        assert_eq!(value[0]["name"], "api");
    }

    #[tokio::test]
    async fn test_builtin_executor_rejects_unknown_tool() {
        let executor = BuiltinToolExecutor::new(adapter());
        let result = executor.execute_tool("diagnostics", json!({})).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("diagnostics"));
    }

    #[test]
    fn test_builtin_executor_capabilities() {
        let executor = BuiltinToolExecutor::new(adapter());
        let tools = executor.available_tools();
        assert!(tools.contains(&"workspaces".to_string()));
        assert!(tools.contains(&"instances".to_string()));
    }
}
