// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Worker HTTP surface.
//!
//! Loopback-only JSON endpoints: health, local tool execution, editor
//! context, election participation, and the master-shutdown
//! notification.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tracing::info;

use crate::election::{ElectionAck, ElectionMessage};
use crate::types::{ShutdownNotice, ToolResult, WorkerHealthReport};

use super::WorkerCore;

/// Build the worker router over a worker core.
pub fn worker_router(core: Arc<WorkerCore>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/tools/:tool", post(call_tool))
        .route("/context", get(context))
        .route("/election/candidate", get(election_candidate))
        .route("/election/message", post(election_message))
        .route("/coordination/shutdown", post(master_shutdown))
        .with_state(core)
}

async fn health(State(core): State<Arc<WorkerCore>>) -> Json<WorkerHealthReport> {
    Json(core.health_report())
}

async fn call_tool(
    State(core): State<Arc<WorkerCore>>,
    Path(tool): Path<String>,
    Json(params): Json<Value>,
) -> Json<ToolResult> {
    Json(core.local().execute_tool(&tool, params).await)
}

async fn context(State(core): State<Arc<WorkerCore>>) -> Json<Value> {
    let workspace = core.adapter().workspace_info();
    let active_editor = core
        .local()
        .execute_tool("active_editor", json!({}))
        .await
        .result;
    let open_files = core
        .local()
        .execute_tool("open_files", json!({}))
        .await
        .result
        .unwrap_or_else(|| json!([]));
    Json(json!({
        "workspace": workspace,
        "activeEditor": active_editor,
        "openFiles": open_files,
    }))
}

async fn election_candidate(State(core): State<Arc<WorkerCore>>) -> Json<Value> {
    Json(serde_json::to_value(core.self_candidate()).unwrap_or_else(|_| json!({})))
}

async fn election_message(
    State(core): State<Arc<WorkerCore>>,
    Json(message): Json<ElectionMessage>,
) -> Json<ElectionAck> {
    core.handle_election_message(message);
    Json(ElectionAck { success: true })
}

async fn master_shutdown(
    State(core): State<Arc<WorkerCore>>,
    Json(notice): Json<ShutdownNotice>,
) -> Json<Value> {
    info!(master = %notice.instance_id, "master announced shutdown");
    core.note_master_gone();
    Json(json!({ "success": true }))
}
