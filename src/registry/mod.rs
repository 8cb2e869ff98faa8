// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Master-side worker registry.
//!
//! Maps worker identity to its [`WorkerRecord`], maintains the
//! workspace-path routing index, and reaps workers whose heartbeats have
//! gone silent.
//!
//! # Invariants
//!
//! - A worker's instance id is the primary key; the registry never holds
//!   two records with the same id.
//! - `last_seen` is monotonic non-decreasing per record.
//! - A record's port was reachable on loopback at registration time;
//!   removal only happens via explicit deregister, heartbeat timeout, or
//!   master shutdown.
//! - Every value in the routing index is a key in the worker map, and
//!   reaping a worker removes its routing entries in the same write.
//!
//! All writes go through `&self` methods taking the single write lock;
//! readers get cloned snapshots.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::RegistryError;
use crate::probe::port::is_reachable;
use crate::types::{InstanceId, WorkerActivity, WorkerRecord};

/// Timeout for the loopback reachability check during registration.
const REGISTER_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

// ============================================================================
// Wire Types
// ============================================================================

/// Worker registration request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    /// The registering worker's instance id.
    pub instance_id: InstanceId,
    /// Workspace display name.
    pub workspace_name: String,
    /// Workspace root path.
    pub workspace_path: PathBuf,
    /// Loopback port of the worker's HTTP surface.
    pub port: u16,
    /// Tool names the worker can execute.
    pub capabilities: Vec<String>,
    /// Worker code version.
    pub version: String,
}

/// Worker registration response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResponse {
    /// Whether registration succeeded.
    pub success: bool,
    /// Echo of the worker's instance id.
    pub instance_id: InstanceId,
    /// The master's instance id.
    pub master_instance_id: InstanceId,
    /// Heartbeat cadence the worker must use, in milliseconds.
    pub heartbeat_interval: u64,
    /// Error message when `success` is false.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Heartbeat request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatRequest {
    /// The worker's instance id.
    pub instance_id: InstanceId,
    /// Current activity status.
    pub status: WorkerActivity,
    /// Worker-side send time.
    pub timestamp: DateTime<Utc>,
}

/// Heartbeat response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatResponse {
    /// Whether the heartbeat was accepted.
    pub success: bool,
    /// Master's own status, for the worker's health view.
    pub master_status: String,
    /// Set when the master does not know this worker and it should
    /// register again. Recovery, not an error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub should_reregister: Option<bool>,
}

// ============================================================================
// Registry
// ============================================================================

struct RegistryInner {
    workers: HashMap<InstanceId, WorkerRecord>,
    workspace_routing: HashMap<PathBuf, InstanceId>,
}

/// Master-side registry of live workers.
pub struct WorkerRegistry {
    master_id: InstanceId,
    heartbeat_interval: Duration,
    inner: RwLock<RegistryInner>,
}

impl WorkerRegistry {
    /// Create an empty registry.
    pub fn new(master_id: InstanceId, heartbeat_interval: Duration) -> Self {
        Self {
            master_id,
            heartbeat_interval,
            inner: RwLock::new(RegistryInner {
                workers: HashMap::new(),
                workspace_routing: HashMap::new(),
            }),
        }
    }

    /// The heartbeat cadence handed to workers.
    pub fn heartbeat_interval(&self) -> Duration {
        self.heartbeat_interval
    }

    /// Register a worker, creating or replacing the record for its id.
    ///
    /// The worker's port must be reachable on loopback at registration
    /// time; the routing index is updated in the same write.
    pub async fn register(&self, req: RegisterRequest) -> Result<RegisterResponse, RegistryError> {
        if req.instance_id.as_str().is_empty() {
            return Err(RegistryError::InvalidRegistration(
                "empty instance id".to_string(),
            ));
        }
        if req.workspace_name.is_empty() {
            return Err(RegistryError::InvalidRegistration(
                "empty workspace name".to_string(),
            ));
        }
        if req.port == 0 {
            return Err(RegistryError::InvalidRegistration(
                "port must be non-zero".to_string(),
            ));
        }

        if !is_reachable(req.port, REGISTER_PROBE_TIMEOUT).await {
            return Err(RegistryError::PortUnreachable { port: req.port });
        }

        let now = Utc::now();
        let record = WorkerRecord {
            instance_id: req.instance_id.clone(),
            workspace_name: req.workspace_name,
            workspace_path: req.workspace_path.clone(),
            port: req.port,
            capabilities: req.capabilities,
            status: WorkerActivity::Active,
            registered_at: now,
            last_seen: now,
            version: req.version,
        };

        {
            let mut inner = self.inner.write().await;
            // Replacement for the same id drops the old routing entries
            // before the new one lands.
            inner
                .workspace_routing
                .retain(|_, id| *id != req.instance_id);
            inner
                .workspace_routing
                .insert(req.workspace_path, req.instance_id.clone());
            inner.workers.insert(req.instance_id.clone(), record);
        }

        info!(worker = %req.instance_id, port = req.port, "worker registered");

        Ok(RegisterResponse {
            success: true,
            instance_id: req.instance_id,
            master_instance_id: self.master_id.clone(),
            heartbeat_interval: self.heartbeat_interval.as_millis() as u64,
            error: None,
        })
    }

    /// Remove a worker. Idempotent.
    pub async fn deregister(&self, id: &InstanceId) {
        let mut inner = self.inner.write().await;
        let removed = inner.workers.remove(id).is_some();
        inner.workspace_routing.retain(|_, routed| routed != id);
        if removed {
            info!(worker = %id, "worker deregistered");
        }
    }

    /// Apply a heartbeat.
    ///
    /// Unknown workers are told to re-register rather than treated as an
    /// error.
    pub async fn heartbeat(&self, req: &HeartbeatRequest) -> HeartbeatResponse {
        let mut inner = self.inner.write().await;
        match inner.workers.get_mut(&req.instance_id) {
            Some(record) => {
                let now = Utc::now();
                // last_seen never moves backwards.
                if now > record.last_seen {
                    record.last_seen = now;
                }
                record.status = req.status;
                HeartbeatResponse {
                    success: true,
                    master_status: "healthy".to_string(),
                    should_reregister: None,
                }
            }
            None => {
                debug!(worker = %req.instance_id, "heartbeat from unknown worker");
                HeartbeatResponse {
                    success: true,
                    master_status: "healthy".to_string(),
                    should_reregister: Some(true),
                }
            }
        }
    }

    /// Remove every worker whose last heartbeat is older than
    /// `3 x heartbeat_interval`. Returns the reaped ids.
    pub async fn reap_expired(&self) -> Vec<InstanceId> {
        let cutoff = chrono::Duration::from_std(self.heartbeat_interval * 3)
            .unwrap_or_else(|_| chrono::Duration::seconds(15));
        let now = Utc::now();

        let mut inner = self.inner.write().await;
        let expired: Vec<InstanceId> = inner
            .workers
            .iter()
            .filter(|(_, record)| now - record.last_seen > cutoff)
            .map(|(id, _)| id.clone())
            .collect();

        for id in &expired {
            inner.workers.remove(id);
            inner.workspace_routing.retain(|_, routed| routed != id);
            warn!(worker = %id, "worker reaped after heartbeat timeout");
        }

        expired
    }

    /// Snapshot of all records.
    pub async fn snapshot(&self) -> Vec<WorkerRecord> {
        let inner = self.inner.read().await;
        inner.workers.values().cloned().collect()
    }

    /// Look up one worker.
    pub async fn get(&self, id: &InstanceId) -> Option<WorkerRecord> {
        let inner = self.inner.read().await;
        inner.workers.get(id).cloned()
    }

    /// Number of registered workers.
    pub async fn len(&self) -> usize {
        self.inner.read().await.workers.len()
    }

    /// Whether the registry is empty.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Find the worker whose workspace contains `path`.
    ///
    /// When several workspaces nest, the longest matching prefix wins.
    pub async fn worker_for_path(&self, path: &Path) -> Option<WorkerRecord> {
        let inner = self.inner.read().await;
        inner
            .workers
            .values()
            .filter(|record| record.owns_path(path))
            .max_by_key(|record| record.workspace_path.as_os_str().len())
            .cloned()
    }

    /// The most recently active worker: active status first, then most
    /// recent heartbeat.
    pub async fn most_recently_active(&self) -> Option<WorkerRecord> {
        let inner = self.inner.read().await;
        inner
            .workers
            .values()
            .max_by_key(|record| (record.status == WorkerActivity::Active, record.last_seen))
            .cloned()
    }

    /// Check the routing-index invariant: every routed id has a record.
    #[cfg(test)]
    async fn routing_is_consistent(&self) -> bool {
        let inner = self.inner.read().await;
        inner
            .workspace_routing
            .values()
            .all(|id| inner.workers.contains_key(id))
    }
}
