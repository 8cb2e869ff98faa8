// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Inbound MCP transport, hosted by the master.
//!
//! A session-oriented HTTP surface: `POST /mcp` carries initialization
//! and subsequent JSON-RPC calls identified by a session-id header,
//! `DELETE /mcp` terminates a session, `GET /mcp` is rejected (loopback
//! clients poll; no server-initiated stream). `GET /health` returns a
//! server/coordination summary.

mod types;

pub use types::{
    rpc_error, rpc_result, JsonRpcRequest, McpContent, McpSession, McpToolResult,
    ServerCapabilities, ServerInfo, ERR_INVALID_PARAMS, ERR_METHOD_NOT_FOUND, PROTOCOL_VERSION,
    SESSION_HEADER,
};

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::master::MasterCore;

/// Shared state behind the MCP surface.
#[derive(Clone)]
pub struct McpState {
    core: Arc<MasterCore>,
    sessions: Arc<RwLock<HashMap<String, McpSession>>>,
}

/// Build the inbound MCP router over a master core.
pub fn mcp_router(core: Arc<MasterCore>) -> Router {
    let state = McpState {
        core,
        sessions: Arc::new(RwLock::new(HashMap::new())),
    };
    Router::new()
        .route(
            "/mcp",
            axum::routing::post(handle_post)
                .get(handle_get)
                .delete(handle_delete),
        )
        .route("/health", get(health))
        .with_state(state)
}

async fn health(State(state): State<McpState>) -> Json<Value> {
    let report = state.core.health_report().await;
    let sessions = state.sessions.read().await.len();
    Json(json!({
        "status": report.status,
        "instanceId": report.instance_id,
        "role": "master",
        "workerCount": report.worker_count,
        "sessions": sessions,
        "version": report.version,
    }))
}

async fn handle_get() -> Response {
    // No server-initiated notification stream on loopback.
    StatusCode::METHOD_NOT_ALLOWED.into_response()
}

async fn handle_delete(State(state): State<McpState>, headers: HeaderMap) -> Response {
    let Some(session_id) = session_id(&headers) else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    let removed = state.sessions.write().await.remove(&session_id).is_some();
    if removed {
        info!(session = %session_id, "mcp session terminated");
        Json(json!({ "success": true })).into_response()
    } else {
        StatusCode::NOT_FOUND.into_response()
    }
}

async fn handle_post(
    State(state): State<McpState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let request: JsonRpcRequest = match serde_json::from_value(body) {
        Ok(request) => request,
        Err(err) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(rpc_error(None, ERR_INVALID_PARAMS, err.to_string())),
            )
                .into_response();
        }
    };

    // Initialization creates the session; everything else needs one.
    if request.method == "initialize" {
        return initialize(&state, request).await;
    }

    let Some(session_id) = session_id(&headers) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(rpc_error(
                request.id,
                ERR_INVALID_PARAMS,
                "missing session header",
            )),
        )
            .into_response();
    };
    if !state.sessions.read().await.contains_key(&session_id) {
        return StatusCode::NOT_FOUND.into_response();
    }

    if request.is_notification() {
        debug!(method = %request.method, "mcp notification");
        return StatusCode::ACCEPTED.into_response();
    }

    let response = match request.method.as_str() {
        "ping" => rpc_result(request.id, json!({})),
        "tools/list" => rpc_result(request.id, list_tools(&state).await),
        "tools/call" => call_tool(&state, request.id, request.params).await,
        other => rpc_error(
            request.id,
            ERR_METHOD_NOT_FOUND,
            format!("unsupported method: {other}"),
        ),
    };
    Json(response).into_response()
}

async fn initialize(state: &McpState, request: JsonRpcRequest) -> Response {
    let client_info = request
        .params
        .as_ref()
        .and_then(|params| params.get("clientInfo"))
        .cloned();
    let session = McpSession::new(client_info);
    let session_id = session.id.clone();
    state
        .sessions
        .write()
        .await
        .insert(session_id.clone(), session);
    info!(session = %session_id, "mcp session initialized");

    let result = json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": { "tools": {} },
        "serverInfo": ServerInfo {
            name: "fleet".to_string(),
            version: crate::VERSION.to_string(),
        },
    });

    (
        [(SESSION_HEADER, session_id)],
        Json(rpc_result(request.id, result)),
    )
        .into_response()
}

/// Merge local capabilities with every registered worker's capability
/// set.
async fn list_tools(state: &McpState) -> Value {
    let mut names: Vec<String> = state.core.local().available_tools();
    for worker in state.core.registry().snapshot().await {
        for capability in worker.capabilities {
            if !names.contains(&capability) {
                names.push(capability);
            }
        }
    }
    names.sort();

    let tools: Vec<Value> = names
        .into_iter()
        .map(|name| {
            json!({
                "name": name,
                "inputSchema": { "type": "object" },
            })
        })
        .collect();
    json!({ "tools": tools })
}

async fn call_tool(state: &McpState, id: Option<Value>, params: Option<Value>) -> Value {
    let params = params.unwrap_or_else(|| json!({}));
    let Some(name) = params.get("name").and_then(Value::as_str) else {
        return rpc_error(id, ERR_INVALID_PARAMS, "tools/call requires a name");
    };
    let arguments = params
        .get("arguments")
        .cloned()
        .unwrap_or_else(|| json!({}));

    let completed = state.core.handle_tool_call(name, arguments).await;
    let tool_result = if completed.result.success {
        let text = completed
            .result
            .result
            .map(|value| value.to_string())
            .unwrap_or_default();
        McpToolResult::text(text)
    } else {
        McpToolResult::error(
            completed
                .result
                .error
                .unwrap_or_else(|| "tool call failed".to_string()),
        )
    };

    let mut result = serde_json::to_value(&tool_result).unwrap_or_else(|_| json!({}));
    if let (Some(routed_to), Some(map)) = (&completed.routed_to, result.as_object_mut()) {
        map.insert(
            "routedTo".to_string(),
            serde_json::to_value(routed_to).unwrap_or(Value::Null),
        );
    }
    rpc_result(id, result)
}

fn session_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(SESSION_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}
