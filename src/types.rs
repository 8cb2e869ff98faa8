// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Core type definitions shared across the coordination plane.
//!
//! These types appear on the loopback wire (registration, heartbeats,
//! tool envelopes) and in the in-process state held by the master and
//! workers.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Instance Identity
// ============================================================================

/// Opaque, globally-unique identifier for one running instance.
///
/// Generated once per process start. The lexicographic ordering of ids is
/// load-bearing: it is the deterministic tie-break for split-brain
/// resolution and election scoring.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(String);

impl InstanceId {
    /// Generate a fresh instance id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Get the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for InstanceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for InstanceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ============================================================================
// Roles
// ============================================================================

/// The role an instance plays in the coordination plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Serves the inbound tool endpoint and owns the worker registry.
    Master,
    /// Registered with a master, executes tool calls routed to it.
    Worker,
    /// Serves only its own local tool calls.
    Standalone,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Master => write!(f, "master"),
            Role::Worker => write!(f, "worker"),
            Role::Standalone => write!(f, "standalone"),
        }
    }
}

// ============================================================================
// Master Health
// ============================================================================

/// Classification of a remote master produced by a health probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MasterStatus {
    /// Probe completed quickly with a parseable response.
    Healthy,
    /// Probe completed but was slow or the response was malformed.
    Degraded,
    /// Connection refused or probe timed out.
    Unreachable,
    /// Master reported it is shutting down.
    Shutdown,
}

impl MasterStatus {
    /// Whether this status counts as a live master for role detection.
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }
}

// ============================================================================
// Worker Records
// ============================================================================

/// Activity status a worker reports via heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerActivity {
    /// Editor has focused, recent activity.
    Active,
    /// No recent editor activity.
    Idle,
}

/// Registry entry for one worker, held at the master.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerRecord {
    /// Primary key; the registry never holds two records with the same id.
    pub instance_id: InstanceId,
    /// Human-readable workspace name.
    pub workspace_name: String,
    /// Absolute path of the workspace root.
    pub workspace_path: PathBuf,
    /// Loopback port of the worker's HTTP surface.
    pub port: u16,
    /// Tool names this worker can execute.
    pub capabilities: Vec<String>,
    /// Last reported activity status.
    pub status: WorkerActivity,
    /// When the worker registered.
    pub registered_at: DateTime<Utc>,
    /// Last heartbeat receipt; monotonic non-decreasing per record.
    pub last_seen: DateTime<Utc>,
    /// Worker code version.
    pub version: String,
}

impl WorkerRecord {
    /// Whether `path` falls inside this worker's workspace.
    pub fn owns_path(&self, path: &Path) -> bool {
        path.starts_with(&self.workspace_path)
    }
}

// ============================================================================
// Tool Envelopes
// ============================================================================

/// Result of a tool invocation, local or remote.
///
/// Tool-specific failures travel inside this envelope (`success = false`,
/// `error` set) and are propagated back to the inbound caller verbatim;
/// transport failures surface as errors instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Whether the tool call succeeded.
    pub success: bool,
    /// Tool output on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Error message on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    /// Create a successful result.
    pub fn ok(result: serde_json::Value) -> Self {
        Self {
            success: true,
            result: Some(result),
            error: None,
        }
    }

    /// Create a failed result.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(error.into()),
        }
    }
}

/// Where a routed tool call actually executed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "target", rename_all = "snake_case")]
pub enum RouteTarget {
    /// Executed by the local tool executor.
    Local,
    /// Executed by a registered worker.
    Worker {
        /// The worker that served the call.
        instance_id: InstanceId,
    },
    /// Remote execution failed; fell back to local.
    LocalFallback {
        /// The worker that was tried first.
        attempted: InstanceId,
    },
    /// Fanned out to every worker and local.
    Aggregated,
}

// ============================================================================
// Coordination Wire Types
// ============================================================================

/// Body of an instance's `/health` response on its worker-range port.
///
/// A scanned port counts as a peer iff this body carries a non-empty
/// instance id. The `role` field is how a competing master is detected:
/// masters advertise their presence on a worker-range port too, so a
/// scan finding `role: master` under a foreign id is a split-brain
/// signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerHealthReport {
    /// Reported status string.
    pub status: String,
    /// The instance id.
    pub instance_id: InstanceId,
    /// The role this instance believes it holds.
    pub role: Role,
    /// Workspace display name.
    pub workspace_name: String,
    /// Tool names the instance can execute.
    pub capabilities: Vec<String>,
}

/// Graceful-shutdown notification broadcast by a stopping master.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShutdownNotice {
    /// Message discriminator, always `MASTER_SHUTDOWN`.
    #[serde(rename = "type")]
    pub kind: String,
    /// The stopping master's instance id.
    pub instance_id: InstanceId,
    /// When the shutdown began.
    pub timestamp: DateTime<Utc>,
    /// Human-readable reason.
    pub message: String,
}

impl ShutdownNotice {
    /// Create a shutdown notice from the given master.
    pub fn new(instance_id: InstanceId, message: impl Into<String>) -> Self {
        Self {
            kind: "MASTER_SHUTDOWN".to_string(),
            instance_id,
            timestamp: Utc::now(),
            message: message.into(),
        }
    }
}

// ============================================================================
// Workspace Adapter Data
// ============================================================================

/// Description of the workspace an instance is attached to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceInfo {
    /// Workspace name.
    pub name: String,
    /// Workspace root path.
    pub path: PathBuf,
    /// Workspace kind (e.g. "folder", "multi-root").
    pub kind: String,
    /// Root folders in the workspace.
    pub folders: Vec<PathBuf>,
}

/// Raw inputs for the election workspace score.
///
/// Supplied by the editor adapter; the coordination plane never defaults
/// these, it only combines them.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceScoreInputs {
    /// Number of files in the workspace.
    pub file_count: u64,
    /// Number of git commits in the workspace history.
    pub git_commits: u64,
    /// Recent-activity signal, high iff the editor has focused activity.
    pub recent_activity: f64,
}

impl WorkspaceScoreInputs {
    /// Combine the inputs into the election workspace score.
    pub fn score(&self) -> f64 {
        self.file_count as f64 * 0.4 + self.git_commits as f64 * 0.3 + self.recent_activity * 0.3
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_id_ordering_is_lexicographic() {
        let a = InstanceId::from("aaa");
        let b = InstanceId::from("bbb");
        assert!(a < b);
        assert_eq!(a, InstanceId::from("aaa"));
    }

    #[test]
    fn test_instance_id_generate_unique() {
        let a = InstanceId::generate();
        let b = InstanceId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn test_role_display() {
        assert_eq!(Role::Master.to_string(), "master");
        assert_eq!(Role::Worker.to_string(), "worker");
        assert_eq!(Role::Standalone.to_string(), "standalone");
    }

    #[test]
    fn test_master_status_healthy() {
        assert!(MasterStatus::Healthy.is_healthy());
        assert!(!MasterStatus::Degraded.is_healthy());
        assert!(!MasterStatus::Unreachable.is_healthy());
        assert!(!MasterStatus::Shutdown.is_healthy());
    }

    #[test]
    fn test_worker_record_owns_path() {
        let record = WorkerRecord {
            instance_id: InstanceId::from("w1"),
            workspace_name: "api".to_string(),
            workspace_path: PathBuf::from("/home/dev/api"),
            port: 9101,
            capabilities: vec!["diagnostics".to_string()],
            status: WorkerActivity::Active,
            registered_at: Utc::now(),
            last_seen: Utc::now(),
            version: "0.4.0".to_string(),
        };
        assert!(record.owns_path(Path::new("/home/dev/api/src/main.rs")));
        assert!(!record.owns_path(Path::new("/home/dev/web/src/app.ts")));
    }

    #[test]
    fn test_tool_result_constructors() {
        let ok = ToolResult::ok(serde_json::json!(["a.rs"]));
        assert!(ok.success);
        assert!(ok.error.is_none());

        let err = ToolResult::failure("worker unreachable");
        assert!(!err.success);
        assert_eq!(err.error.as_deref(), Some("worker unreachable"));
    }

    #[test]
    fn test_workspace_score_weights() {
        let inputs = WorkspaceScoreInputs {
            file_count: 100,
            git_commits: 50,
            recent_activity: 10.0,
        };
        assert!((inputs.score() - (40.0 + 15.0 + 3.0)).abs() < f64::EPSILON);
    }

    #[test]
    fn test_route_target_serialization() {
        let target = RouteTarget::Worker {
            instance_id: InstanceId::from("w1"),
        };
        let json = serde_json::to_string(&target).unwrap();
        assert!(json.contains("\"target\":\"worker\""));

        let parsed: RouteTarget = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, target);
    }
}
