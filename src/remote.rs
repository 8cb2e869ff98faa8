// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Master-to-worker remote tool execution.
//!
//! One tool call against one worker's HTTP surface, with bounded retries
//! and exponential backoff. Transport failures are retried; protocol
//! failures are not. The executor never mutates the registry — failures
//! bubble up to the router, which decides whether to route elsewhere.

use std::time::Duration;

use reqwest::Client;
use tracing::{debug, warn};

use crate::error::RemoteError;
use crate::types::{ToolResult, WorkerRecord};

/// Total attempts per call (initial + 3 retries).
const DEFAULT_MAX_ATTEMPTS: u32 = 4;

/// First backoff delay; doubles per retry.
const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_secs(1);

/// Per-attempt timeout.
const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Executes single tool calls against workers with retry.
#[derive(Debug, Clone)]
pub struct RemoteExecutor {
    client: Client,
    max_attempts: u32,
    initial_backoff: Duration,
}

impl RemoteExecutor {
    /// Create an executor with the default policy: 4 attempts, backoff
    /// starting at 1 s and doubling, 30 s per attempt.
    pub fn new() -> Self {
        Self::with_policy(
            DEFAULT_MAX_ATTEMPTS,
            DEFAULT_INITIAL_BACKOFF,
            DEFAULT_CALL_TIMEOUT,
        )
    }

    /// Create an executor with a custom retry policy.
    pub fn with_policy(max_attempts: u32, initial_backoff: Duration, call_timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(call_timeout)
            .build()
            .expect("Failed to build HTTP client");
        Self {
            client,
            max_attempts,
            initial_backoff,
        }
    }

    /// Invoke `tool` on `worker`.
    ///
    /// Tool-specific failures travel inside the returned [`ToolResult`];
    /// `Err` means the worker could not be spoken to at all.
    pub async fn call(
        &self,
        worker: &WorkerRecord,
        tool: &str,
        params: &serde_json::Value,
    ) -> Result<ToolResult, RemoteError> {
        let url = format!("http://127.0.0.1:{}/tools/{}", worker.port, tool);
        let mut backoff = self.initial_backoff;
        let mut last_error = String::new();

        for attempt in 1..=self.max_attempts {
            match self.client.post(&url).json(params).send().await {
                Ok(response) if response.status().is_success() => {
                    return response.json::<ToolResult>().await.map_err(|err| {
                        RemoteError::Protocol {
                            instance_id: worker.instance_id.clone(),
                            message: format!("unparseable tool response: {err}"),
                        }
                    });
                }
                Ok(response) if response.status().is_client_error() => {
                    // Schema mismatch on the worker side; retrying cannot help.
                    return Err(RemoteError::Protocol {
                        instance_id: worker.instance_id.clone(),
                        message: format!("worker rejected call: HTTP {}", response.status()),
                    });
                }
                Ok(response) => {
                    last_error = format!("HTTP {}", response.status());
                }
                Err(err) => {
                    last_error = err.to_string();
                }
            }

            debug!(
                worker = %worker.instance_id,
                tool,
                attempt,
                error = %last_error,
                "remote tool call attempt failed"
            );

            if attempt < self.max_attempts {
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }
        }

        warn!(worker = %worker.instance_id, tool, "worker unreachable, retries exhausted");
        Err(RemoteError::WorkerUnreachable {
            instance_id: worker.instance_id.clone(),
            attempts: self.max_attempts,
            last_error,
        })
    }
}

impl Default for RemoteExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{InstanceId, WorkerActivity};
    use axum::{extract::Path, routing::post, Json, Router};
    use std::path::PathBuf;

    fn worker(port: u16) -> WorkerRecord {
        WorkerRecord {
            instance_id: InstanceId::from("w1"),
            workspace_name: "api".to_string(),
            workspace_path: PathBuf::from("/home/dev/api"),
            port,
            capabilities: vec![],
            status: WorkerActivity::Active,
            registered_at: chrono::Utc::now(),
            last_seen: chrono::Utc::now(),
            version: "0.4.0".to_string(),
        }
    }

    fn fast_executor() -> RemoteExecutor {
        RemoteExecutor::with_policy(4, Duration::from_millis(5), Duration::from_secs(1))
    }

    async fn serve(router: Router) -> u16 {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        port
    }

    #[tokio::test]
    async fn test_successful_call() {
        let router = Router::new().route(
            "/tools/:tool",
            post(|Path(tool): Path<String>, Json(_): Json<serde_json::Value>| async move {
                Json(ToolResult::ok(serde_json::json!({ "tool": tool })))
            }),
        );
        let port = serve(router).await;

        let result = fast_executor()
            .call(&worker(port), "diagnostics", &serde_json::json!({}))
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.result.unwrap()["tool"], "diagnostics");
    }

    #[tokio::test]
    async fn test_tool_level_error_passes_through() {
        let router = Router::new().route(
            "/tools/:tool",
            post(|Json(_): Json<serde_json::Value>| async {
                Json(ToolResult::failure("no diagnostics available"))
            }),
        );
        let port = serve(router).await;

        let result = fast_executor()
            .call(&worker(port), "diagnostics", &serde_json::json!({}))
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("no diagnostics available"));
    }

    #[tokio::test]
    async fn test_client_error_is_protocol_not_retried() {
        // No /tools route at all: every call 404s.
        let router = Router::new();
        let port = serve(router).await;

        let result = fast_executor()
            .call(&worker(port), "diagnostics", &serde_json::json!({}))
            .await;
        assert!(matches!(result, Err(RemoteError::Protocol { .. })));
    }

    #[tokio::test]
    async fn test_unreachable_worker_exhausts_retries() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let result = fast_executor()
            .call(&worker(port), "diagnostics", &serde_json::json!({}))
            .await;
        match result {
            Err(RemoteError::WorkerUnreachable { attempts, .. }) => assert_eq!(attempts, 4),
            other => panic!("expected WorkerUnreachable, got {other:?}"),
        }
    }
}
