// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Tool-call routing.
//!
//! Picks an execution target per tool call based on the tool's routing
//! class, fans out and merges aggregated tools, and falls back to local
//! execution when a chosen remote target fails after retries.

mod classes;
mod merge;

pub use classes::{routing_class, RoutingClass};
pub use merge::{merge as merge_branches, BranchResult};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::error::RouteError;
use crate::local::LocalToolExecutor;
use crate::registry::WorkerRegistry;
use crate::remote::RemoteExecutor;
use crate::types::{InstanceId, Role, RouteTarget, ToolResult, WorkerRecord};

/// A routed tool call: the result plus where it actually ran.
#[derive(Debug, Clone)]
pub struct RoutedCall {
    /// Tool result.
    pub result: ToolResult,
    /// Where the call executed.
    pub target: RouteTarget,
}

/// Routes tool invocations to workers or local execution.
pub struct Router {
    registry: Arc<WorkerRegistry>,
    remote: RemoteExecutor,
    local: Arc<dyn LocalToolExecutor>,
    instance_id: InstanceId,
    role: Role,
}

impl Router {
    /// Create a router.
    pub fn new(
        registry: Arc<WorkerRegistry>,
        remote: RemoteExecutor,
        local: Arc<dyn LocalToolExecutor>,
        instance_id: InstanceId,
        role: Role,
    ) -> Self {
        Self {
            registry,
            remote,
            local,
            instance_id,
            role,
        }
    }

    /// Route one tool call.
    pub async fn route(&self, tool: &str, params: Value) -> Result<RoutedCall, RouteError> {
        match routing_class(tool) {
            RoutingClass::WorkspaceSpecific => {
                let target = self.select_workspace_target(&params).await;
                self.execute_single(tool, params, target).await
            }
            RoutingClass::ActiveContext => {
                let target = self.registry.most_recently_active().await;
                self.execute_single(tool, params, target).await
            }
            RoutingClass::Aggregated => self.execute_aggregated(tool, params).await,
        }
    }

    /// Selection cascade for workspace-specific tools: explicit
    /// `workspace` parameter, then `uri` prefix match, then the most
    /// recently active worker. `None` means execute locally.
    async fn select_workspace_target(&self, params: &Value) -> Option<WorkerRecord> {
        if let Some(wanted) = params.get("workspace").and_then(Value::as_str) {
            let snapshot = self.registry.snapshot().await;
            let matched = snapshot.into_iter().find(|record| {
                record.workspace_name == wanted || record.workspace_path == Path::new(wanted)
            });
            if matched.is_some() {
                return matched;
            }
        }

        if let Some(uri) = params.get("uri").and_then(Value::as_str) {
            let path = normalize_uri(uri);
            if let Some(record) = self.registry.worker_for_path(&path).await {
                return Some(record);
            }
        }

        self.registry.most_recently_active().await
    }

    /// Execute against one target, falling back to local when the remote
    /// side fails after retries.
    async fn execute_single(
        &self,
        tool: &str,
        params: Value,
        target: Option<WorkerRecord>,
    ) -> Result<RoutedCall, RouteError> {
        let worker = match target {
            Some(worker) => worker,
            None => {
                debug!(tool, "no worker target, executing locally");
                let result = self.local.execute_tool(tool, params).await;
                return Ok(RoutedCall {
                    result,
                    target: RouteTarget::Local,
                });
            }
        };

        match self.remote.call(&worker, tool, &params).await {
            Ok(result) => Ok(RoutedCall {
                result,
                target: RouteTarget::Worker {
                    instance_id: worker.instance_id,
                },
            }),
            Err(err) => {
                warn!(
                    tool,
                    worker = %worker.instance_id,
                    error = %err,
                    "remote execution failed, falling back to local"
                );
                let result = self.local.execute_tool(tool, params).await;
                Ok(RoutedCall {
                    result,
                    target: RouteTarget::LocalFallback {
                        attempted: worker.instance_id,
                    },
                })
            }
        }
    }

    /// Fan out to every worker and local, then merge.
    ///
    /// At least one successful branch is required.
    async fn execute_aggregated(
        &self,
        tool: &str,
        params: Value,
    ) -> Result<RoutedCall, RouteError> {
        let workers = self.registry.snapshot().await;
        let mut tasks: JoinSet<BranchResult> = JoinSet::new();

        for worker in workers {
            let remote = self.remote.clone();
            let tool = tool.to_string();
            let params = params.clone();
            tasks.spawn(async move {
                let result = remote.call(&worker, &tool, &params).await.ok();
                BranchResult {
                    role: Role::Worker,
                    instance_id: worker.instance_id,
                    result,
                }
            });
        }

        {
            let local = Arc::clone(&self.local);
            let tool = tool.to_string();
            let params = params.clone();
            let role = self.role;
            let instance_id = self.instance_id.clone();
            tasks.spawn(async move {
                let result = local.execute_tool(&tool, params).await;
                BranchResult {
                    role,
                    instance_id,
                    result: Some(result),
                }
            });
        }

        let mut branches = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(branch) => branches.push(branch),
                Err(err) => warn!(tool, error = %err, "aggregated branch panicked"),
            }
        }

        if !branches.iter().any(BranchResult::succeeded) {
            return Err(RouteError::AllBranchesFailed {
                tool: tool.to_string(),
            });
        }

        let merged = merge_branches(tool, &branches);
        Ok(RoutedCall {
            result: ToolResult::ok(merged),
            target: RouteTarget::Aggregated,
        })
    }
}

/// Normalize a `uri` parameter to an absolute filesystem path.
fn normalize_uri(uri: &str) -> PathBuf {
    let stripped = uri.strip_prefix("file://").unwrap_or(uri);
    PathBuf::from(stripped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::RegisterRequest;
    use crate::types::WorkerActivity;
    use async_trait::async_trait;
    use axum::{routing::post, Json, Router as AxumRouter};
    use serde_json::json;
    use std::time::Duration;

    /// Local executor that answers every tool with a fixed payload.
    struct EchoLocal(Value);

    #[async_trait]
    impl LocalToolExecutor for EchoLocal {
        async fn execute_tool(&self, _name: &str, _params: Value) -> ToolResult {
            ToolResult::ok(self.0.clone())
        }

        fn available_tools(&self) -> Vec<String> {
            vec![]
        }
    }

    /// Local executor that always fails.
    struct FailingLocal;

    #[async_trait]
    impl LocalToolExecutor for FailingLocal {
        async fn execute_tool(&self, name: &str, _params: Value) -> ToolResult {
            ToolResult::failure(format!("local cannot serve {name}"))
        }

        fn available_tools(&self) -> Vec<String> {
            vec![]
        }
    }

    async fn serve_tools(payload: Value) -> u16 {
        let router = AxumRouter::new().route(
            "/tools/:tool",
            post(move |Json(_): Json<Value>| {
                let payload = payload.clone();
                async move { Json(ToolResult::ok(payload)) }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        port
    }

    async fn register(registry: &WorkerRegistry, id: &str, port: u16, path: &str) {
        registry
            .register(RegisterRequest {
                instance_id: InstanceId::from(id),
                workspace_name: format!("ws-{id}"),
                workspace_path: PathBuf::from(path),
                port,
                capabilities: vec![],
                version: "0.4.0".to_string(),
            })
            .await
            .unwrap();
    }

    fn router(registry: Arc<WorkerRegistry>, local: Arc<dyn LocalToolExecutor>) -> Router {
        Router::new(
            registry,
            RemoteExecutor::with_policy(2, Duration::from_millis(5), Duration::from_secs(1)),
            local,
            InstanceId::from("master"),
            Role::Master,
        )
    }

    #[tokio::test]
    async fn test_uri_routes_to_owning_worker() {
        let registry = Arc::new(WorkerRegistry::new(
            InstanceId::from("master"),
            Duration::from_secs(5),
        ));
        let port = serve_tools(json!("from-worker")).await;
        register(&registry, "w1", port, "/home/dev/api").await;

        let router = router(Arc::clone(&registry), Arc::new(EchoLocal(json!("local"))));
        let routed = router
            .route(
                "diagnostics",
                json!({ "uri": "file:///home/dev/api/src/main.rs" }),
            )
            .await
            .unwrap();

        assert_eq!(
            routed.target,
            RouteTarget::Worker {
                instance_id: InstanceId::from("w1")
            }
        );
        assert_eq!(routed.result.result.unwrap(), json!("from-worker"));
    }

    #[tokio::test]
    async fn test_uri_outside_workspaces_runs_locally_when_no_workers() {
        let registry = Arc::new(WorkerRegistry::new(
            InstanceId::from("master"),
            Duration::from_secs(5),
        ));
        let router = router(registry, Arc::new(EchoLocal(json!("local"))));

        let routed = router
            .route("diagnostics", json!({ "uri": "file:///elsewhere/x.rs" }))
            .await
            .unwrap();
        assert_eq!(routed.target, RouteTarget::Local);
        assert_eq!(routed.result.result.unwrap(), json!("local"));
    }

    #[tokio::test]
    async fn test_explicit_workspace_parameter_wins() {
        let registry = Arc::new(WorkerRegistry::new(
            InstanceId::from("master"),
            Duration::from_secs(5),
        ));
        let port_a = serve_tools(json!("api-worker")).await;
        let port_b = serve_tools(json!("web-worker")).await;
        register(&registry, "w1", port_a, "/home/dev/api").await;
        register(&registry, "w2", port_b, "/home/dev/web").await;

        let router = router(registry, Arc::new(EchoLocal(json!("local"))));
        let routed = router
            .route(
                "diagnostics",
                json!({ "workspace": "ws-w2", "uri": "file:///home/dev/api/x.rs" }),
            )
            .await
            .unwrap();
        assert_eq!(
            routed.target,
            RouteTarget::Worker {
                instance_id: InstanceId::from("w2")
            }
        );
    }

    #[tokio::test]
    async fn test_remote_failure_falls_back_to_local() {
        let registry = Arc::new(WorkerRegistry::new(
            InstanceId::from("master"),
            Duration::from_secs(5),
        ));
        // Reachable during registration, gone before the call.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        register(&registry, "w1", port, "/home/dev/api").await;
        drop(listener);

        let router = router(registry, Arc::new(EchoLocal(json!("local-fallback"))));
        let routed = router
            .route("diagnostics", json!({ "uri": "file:///home/dev/api/x.rs" }))
            .await
            .unwrap();
        assert_eq!(
            routed.target,
            RouteTarget::LocalFallback {
                attempted: InstanceId::from("w1")
            }
        );
        assert_eq!(routed.result.result.unwrap(), json!("local-fallback"));
    }

    #[tokio::test]
    async fn test_aggregated_merges_workers_and_local() {
        let registry = Arc::new(WorkerRegistry::new(
            InstanceId::from("master"),
            Duration::from_secs(5),
        ));
        let port_a = serve_tools(json!([{ "workspace": "api" }])).await;
        let port_b = serve_tools(json!([{ "workspace": "web" }])).await;
        register(&registry, "w1", port_a, "/home/dev/api").await;
        register(&registry, "w2", port_b, "/home/dev/web").await;

        let router = router(
            registry,
            Arc::new(EchoLocal(json!([{ "workspace": "local" }]))),
        );
        let routed = router.route("instances", json!({})).await.unwrap();
        assert_eq!(routed.target, RouteTarget::Aggregated);

        let merged = routed.result.result.unwrap();
        let items = merged.as_array().unwrap();
        assert_eq!(items.len(), 3);
        // Master branch is tagged with its role.
        assert!(items
            .iter()
            .any(|item| item["origin"] == "master" && item["workspace"] == "local"));
        assert!(items.iter().any(|item| item["origin"] == "worker"));
    }

    #[tokio::test]
    async fn test_aggregated_survives_failed_branch() {
        let registry = Arc::new(WorkerRegistry::new(
            InstanceId::from("master"),
            Duration::from_secs(5),
        ));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        register(&registry, "w1", port, "/home/dev/api").await;
        drop(listener);

        let router = router(
            registry,
            Arc::new(EchoLocal(json!([{ "workspace": "local" }]))),
        );
        let routed = router.route("instances", json!({})).await.unwrap();
        let merged = routed.result.result.unwrap();
        assert_eq!(merged.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_aggregated_all_branches_failed() {
        let registry = Arc::new(WorkerRegistry::new(
            InstanceId::from("master"),
            Duration::from_secs(5),
        ));
        let router = router(registry, Arc::new(FailingLocal));

        let result = router.route("instances", json!({})).await;
        assert!(matches!(
            result,
            Err(RouteError::AllBranchesFailed { .. })
        ));
    }

    #[test]
    fn test_normalize_uri() {
        assert_eq!(
            normalize_uri("file:///home/dev/api/x.rs"),
            PathBuf::from("/home/dev/api/x.rs")
        );
        assert_eq!(normalize_uri("/plain/path"), PathBuf::from("/plain/path"));
    }
}
