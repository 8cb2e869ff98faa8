// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Coordination HTTP surface hosted by the master.
//!
//! Loopback-only JSON endpoints: health, worker registration and
//! heartbeats, registry listing, tool dispatch, and a diagnostics
//! summary.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use serde_json::{json, Value};

use crate::registry::{HeartbeatRequest, RegisterRequest, RegisterResponse};
use crate::types::InstanceId;

use super::MasterCore;

/// Build the presence router served on the master's worker-range port:
/// just the role-tagged `/health` that peer scans look at.
pub fn presence_router(core: Arc<MasterCore>) -> Router {
    Router::new()
        .route("/health", get(presence_health))
        .with_state(core)
}

async fn presence_health(
    State(core): State<Arc<MasterCore>>,
) -> Json<crate::types::WorkerHealthReport> {
    Json(core.presence_report())
}

/// Build the coordination router over a master core.
pub fn coordination_router(core: Arc<MasterCore>) -> Router {
    Router::new()
        .route("/coordination/health", get(health))
        .route("/coordination/workers/register", post(register_worker))
        .route("/coordination/workers/:id", delete(deregister_worker))
        .route("/coordination/workers/:id/heartbeat", post(worker_heartbeat))
        .route("/coordination/workers", get(list_workers))
        .route("/coordination/tools/:tool", post(call_tool))
        .route("/coordination/status", get(status))
        .with_state(core)
}

async fn health(State(core): State<Arc<MasterCore>>) -> Json<Value> {
    let report = core.health_report().await;
    Json(serde_json::to_value(report).unwrap_or_else(|_| json!({"status": "healthy"})))
}

async fn register_worker(
    State(core): State<Arc<MasterCore>>,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<RegisterResponse>, (StatusCode, Json<Value>)> {
    match core.registry().register(req).await {
        Ok(response) => Ok(Json(response)),
        Err(err) => Err((
            StatusCode::BAD_REQUEST,
            Json(json!({ "success": false, "error": err.to_string() })),
        )),
    }
}

async fn deregister_worker(
    State(core): State<Arc<MasterCore>>,
    Path(id): Path<String>,
) -> Json<Value> {
    core.registry().deregister(&InstanceId::from(id)).await;
    Json(json!({ "success": true }))
}

async fn worker_heartbeat(
    State(core): State<Arc<MasterCore>>,
    Path(id): Path<String>,
    Json(req): Json<HeartbeatRequest>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    if req.instance_id != InstanceId::from(id.as_str()) {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({
                "success": false,
                "error": "path id does not match body instanceId",
            })),
        ));
    }
    let response = core.registry().heartbeat(&req).await;
    Ok(Json(
        serde_json::to_value(response).unwrap_or_else(|_| json!({ "success": true })),
    ))
}

async fn list_workers(State(core): State<Arc<MasterCore>>) -> Json<Value> {
    let workers = core.registry().snapshot().await;
    Json(json!({ "workers": workers }))
}

async fn call_tool(
    State(core): State<Arc<MasterCore>>,
    Path(tool): Path<String>,
    Json(params): Json<Value>,
) -> Json<Value> {
    let completed = core.handle_tool_call(&tool, params).await;
    Json(completed.into_response_body())
}

async fn status(State(core): State<Arc<MasterCore>>) -> Json<Value> {
    Json(core.status_report().await)
}
