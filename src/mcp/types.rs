// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Inbound MCP wire types.
//!
//! JSON-RPC envelopes plus the tool/content shapes the protocol expects.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Protocol revision this server speaks.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Session id header on every post-initialize request.
pub const SESSION_HEADER: &str = "Mcp-Session-Id";

// ============================================================================
// JSON-RPC Envelopes
// ============================================================================

/// An inbound JSON-RPC request.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcRequest {
    /// Protocol marker, expected to be "2.0".
    #[serde(default)]
    pub jsonrpc: String,
    /// Request id; absent for notifications.
    #[serde(default)]
    pub id: Option<Value>,
    /// Method name.
    pub method: String,
    /// Method parameters.
    #[serde(default)]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// Whether this is a notification (no response expected).
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// Build a JSON-RPC success response.
pub fn rpc_result(id: Option<Value>, result: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": result,
    })
}

/// Build a JSON-RPC error response.
pub fn rpc_error(id: Option<Value>, code: i64, message: impl Into<String>) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": code, "message": message.into() },
    })
}

/// Method not found.
pub const ERR_METHOD_NOT_FOUND: i64 = -32601;
/// Invalid params.
pub const ERR_INVALID_PARAMS: i64 = -32602;

// ============================================================================
// Server Identity
// ============================================================================

/// Server information reported during initialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    /// Server name.
    pub name: String,
    /// Server version.
    pub version: String,
}

/// Server capabilities reported during initialization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerCapabilities {
    /// Whether the server supports tools.
    #[serde(default)]
    pub tools: bool,
}

// ============================================================================
// Tool Results
// ============================================================================

/// Content blocks an MCP tool can return.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum McpContent {
    /// Plain text content.
    Text {
        /// The text content.
        text: String,
    },
}

/// Result of an MCP tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpToolResult {
    /// Result content.
    pub content: Vec<McpContent>,
    /// Whether the call failed.
    #[serde(default)]
    pub is_error: bool,
}

impl McpToolResult {
    /// Create a successful text result.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![McpContent::Text { text: text.into() }],
            is_error: false,
        }
    }

    /// Create an error result.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: vec![McpContent::Text {
                text: message.into(),
            }],
            is_error: true,
        }
    }
}

// ============================================================================
// Sessions
// ============================================================================

/// One inbound client session.
#[derive(Debug, Clone)]
pub struct McpSession {
    /// Session id, carried in the session header.
    pub id: String,
    /// When the session was initialized.
    pub created_at: DateTime<Utc>,
    /// Client-reported info from `initialize`, when present.
    pub client_info: Option<Value>,
}

impl McpSession {
    /// Create a fresh session.
    pub fn new(client_info: Option<Value>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            client_info,
        }
    }
}
