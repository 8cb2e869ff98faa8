// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Master core.
//!
//! Owns the worker registry and call history, hosts the coordination and
//! inbound MCP surfaces, ticks the heartbeat reaper, watches for a
//! competing master, and broadcasts graceful shutdown to workers.
//!
//! # Split-brain arbitration
//!
//! Detection uses a real cross-instance signal: every master also
//! advertises its presence on a port in the worker range (a role-tagged
//! `/health`, like any worker), and a watchdog scans that range each
//! tick. A peer claiming the master role under a foreign id is a
//! split-brain. Resolution is deterministic; the instance with the
//! lexicographically higher id snapshots its registry, hands the records
//! to the winner, and steps down.

mod http;
mod state;

pub use http::{coordination_router, presence_router};
pub use state::{
    CallHistory, PerformanceMetrics, PerformanceTracker, ToolCallLog, HISTORY_CAPACITY,
};

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::CoordinationConfig;
use crate::error::TransportError;
use crate::local::{LocalToolExecutor, WorkspaceAdapter};
use crate::probe::{find_available_port, port::loopback, scan_port_range, MasterHealthReport};
use crate::registry::{RegisterRequest, WorkerRegistry};
use crate::remote::RemoteExecutor;
use crate::router::{RoutedCall, Router as ToolRouter};
use crate::types::{
    InstanceId, Role, RouteTarget, ShutdownNotice, ToolResult, WorkerHealthReport, WorkerRecord,
};

/// Bound on `stop()`, including the shutdown broadcast.
const STOP_DEADLINE: Duration = Duration::from_secs(5);

/// Per-worker timeout for shutdown notifications.
const SHUTDOWN_NOTIFY_TIMEOUT: Duration = Duration::from_secs(3);

/// Timeout for handing a preserved registry to the winning master.
const HANDOFF_TIMEOUT: Duration = Duration::from_secs(3);

/// Events the master reports to its supervisor.
#[derive(Debug)]
pub enum MasterEvent {
    /// A competing master was detected and this instance lost the
    /// tie-break; the supervisor must step it down to worker.
    SplitBrainStepDown {
        /// The surviving master.
        winner: InstanceId,
        /// Registry snapshot to hand to the winner so the routing state
        /// survives the step-down.
        preserved: Vec<WorkerRecord>,
    },
}

/// What to do about a competing master.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitBrainDecision {
    /// This instance keeps running as master.
    Continue,
    /// This instance steps down; the other wins.
    StepDown,
}

/// A completed, recorded tool call.
#[derive(Debug, Clone)]
pub struct CompletedCall {
    /// The result envelope.
    pub result: ToolResult,
    /// Where the call executed, when routing got that far.
    pub routed_to: Option<RouteTarget>,
}

impl CompletedCall {
    /// Wire body for the coordination tool endpoint.
    pub fn into_response_body(self) -> Value {
        let mut body = serde_json::to_value(&self.result).unwrap_or_else(|_| json!({}));
        if let (Some(routed_to), Some(map)) = (&self.routed_to, body.as_object_mut()) {
            map.insert(
                "routedTo".to_string(),
                serde_json::to_value(routed_to).unwrap_or(Value::Null),
            );
        }
        body
    }
}

/// The master role: registry owner and inbound endpoint.
pub struct MasterCore {
    instance_id: InstanceId,
    config: CoordinationConfig,
    registry: Arc<WorkerRegistry>,
    router: ToolRouter,
    local: Arc<dyn LocalToolExecutor>,
    adapter: Arc<dyn WorkspaceAdapter>,
    history: Mutex<CallHistory>,
    metrics: Mutex<PerformanceTracker>,
    started_at: DateTime<Utc>,
    started: Instant,
    cancel: CancellationToken,
    events: mpsc::Sender<MasterEvent>,
}

impl MasterCore {
    /// Create a master core. Nothing is bound until [`start`].
    pub fn new(
        instance_id: InstanceId,
        config: CoordinationConfig,
        adapter: Arc<dyn WorkspaceAdapter>,
        local: Arc<dyn LocalToolExecutor>,
        events: mpsc::Sender<MasterEvent>,
    ) -> Arc<Self> {
        let registry = Arc::new(WorkerRegistry::new(
            instance_id.clone(),
            config.heartbeat_interval,
        ));
        let router = ToolRouter::new(
            Arc::clone(&registry),
            RemoteExecutor::new(),
            Arc::clone(&local),
            instance_id.clone(),
            Role::Master,
        );
        Arc::new(Self {
            instance_id,
            config,
            registry,
            router,
            local,
            adapter,
            history: Mutex::new(CallHistory::new()),
            metrics: Mutex::new(PerformanceTracker::new()),
            started_at: Utc::now(),
            started: Instant::now(),
            cancel: CancellationToken::new(),
            events,
        })
    }

    /// This master's instance id.
    pub fn instance_id(&self) -> &InstanceId {
        &self.instance_id
    }

    /// The worker registry.
    pub fn registry(&self) -> &WorkerRegistry {
        &self.registry
    }

    /// The local tool executor.
    pub fn local(&self) -> &Arc<dyn LocalToolExecutor> {
        &self.local
    }

    /// Route one inbound tool call and record its completion.
    pub async fn handle_tool_call(&self, tool: &str, params: Value) -> CompletedCall {
        let started = Instant::now();
        let timestamp = Utc::now();

        let (result, routed_to) = match self.router.route(tool, params.clone()).await {
            Ok(RoutedCall { result, target }) => (result, Some(target)),
            Err(err) => (ToolResult::failure(err.to_string()), None),
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        let success = result.success;

        {
            let mut history = self.history.lock().await;
            history.push(ToolCallLog {
                id: uuid::Uuid::new_v4().to_string(),
                tool: tool.to_string(),
                params,
                result: result.result.clone(),
                error: result.error.clone(),
                timestamp,
                duration_ms,
                routed_to: routed_to.clone(),
            });
        }
        {
            let mut metrics = self.metrics.lock().await;
            metrics.record(duration_ms, success);
        }

        CompletedCall { result, routed_to }
    }

    /// Health report served at `/coordination/health`.
    pub async fn health_report(&self) -> MasterHealthReport {
        let status = if self.cancel.is_cancelled() {
            "shutdown"
        } else {
            "healthy"
        };
        MasterHealthReport {
            status: status.to_string(),
            instance_id: self.instance_id.clone(),
            uptime: self.started.elapsed().as_millis() as u64,
            worker_count: self.registry.len().await,
            version: crate::VERSION.to_string(),
            timestamp: Utc::now(),
        }
    }

    /// Diagnostics summary served at `/coordination/status`.
    pub async fn status_report(&self) -> Value {
        let metrics = self.metrics.lock().await.snapshot();
        let recent = self.history.lock().await.recent(20);
        json!({
            "instanceId": self.instance_id,
            "startedAt": self.started_at,
            "performanceMetrics": metrics,
            "recentCalls": recent,
        })
    }

    /// Decide a split-brain tie against another master.
    pub fn resolve_split_brain(&self, other: &InstanceId) -> SplitBrainDecision {
        if self.instance_id > *other {
            SplitBrainDecision::StepDown
        } else {
            SplitBrainDecision::Continue
        }
    }

    /// Snapshot the registry ahead of a step-down.
    ///
    /// The snapshot travels in the step-down event; the supervisor hands
    /// it to the winning master via [`handoff_workers`].
    pub async fn preserve_state(&self) -> Vec<WorkerRecord> {
        let snapshot = self.registry.snapshot().await;
        info!(workers = snapshot.len(), "preserving registry before step-down");
        snapshot
    }

    /// Presence report served at `/health` on the master's worker-range
    /// port. The `role: master` claim is what split-brain scans look
    /// for.
    pub fn presence_report(&self) -> WorkerHealthReport {
        WorkerHealthReport {
            status: "healthy".to_string(),
            instance_id: self.instance_id.clone(),
            role: Role::Master,
            workspace_name: self.adapter.workspace_info().name,
            capabilities: self.local.available_tools(),
        }
    }

    /// Broadcast MASTER_SHUTDOWN to every registered worker, then stop
    /// serving. Completes within the stop deadline.
    pub async fn stop(&self) {
        info!("stopping master");
        if tokio::time::timeout(STOP_DEADLINE, self.broadcast_shutdown())
            .await
            .is_err()
        {
            warn!("shutdown broadcast abandoned at deadline");
        }
        self.cancel.cancel();
    }

    async fn broadcast_shutdown(&self) {
        let workers = self.registry.snapshot().await;
        if workers.is_empty() {
            return;
        }

        let notice = ShutdownNotice::new(self.instance_id.clone(), "master shutting down");
        let client = match reqwest::Client::builder()
            .timeout(SHUTDOWN_NOTIFY_TIMEOUT)
            .build()
        {
            Ok(client) => client,
            Err(err) => {
                warn!(error = %err, "could not build shutdown client");
                return;
            }
        };

        let mut tasks: JoinSet<()> = JoinSet::new();
        for worker in workers {
            let client = client.clone();
            let notice = notice.clone();
            tasks.spawn(async move {
                let url = format!("http://127.0.0.1:{}/coordination/shutdown", worker.port);
                if let Err(err) = client.post(&url).json(&notice).send().await {
                    debug!(worker = %worker.instance_id, error = %err, "shutdown notify failed");
                }
            });
        }
        while tasks.join_next().await.is_some() {}
    }
}

/// A running master: the core plus its background tasks.
pub struct MasterHandle {
    /// The core, shared with the HTTP surfaces.
    pub core: Arc<MasterCore>,
    tasks: Vec<JoinHandle<()>>,
}

impl MasterHandle {
    /// Stop the master and its background tasks within the stop
    /// deadline.
    pub async fn stop(self) {
        self.core.stop().await;
        for task in self.tasks {
            // Deadline, not best-effort: a task that outlives it is
            // dropped detached, and every loop exits on the cancel token.
            let _ = tokio::time::timeout(Duration::from_secs(1), task).await;
        }
    }
}

/// Bind the master port and start serving, the presence advertisement,
/// the reaper, and the split-brain watchdog.
pub async fn start(core: Arc<MasterCore>) -> Result<MasterHandle, TransportError> {
    let addr = loopback(core.config.master_port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|err| TransportError::BindFailed {
            addr: addr.to_string(),
            message: err.to_string(),
        })?;
    info!(instance = %core.instance_id, %addr, "master serving");

    let app = coordination_router(Arc::clone(&core))
        .merge(crate::mcp::mcp_router(Arc::clone(&core)));

    let cancel = core.cancel.clone();
    let server = tokio::spawn(async move {
        let shutdown = async move { cancel.cancelled().await };
        if let Err(err) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
        {
            warn!(error = %err, "master server exited with error");
        }
    });

    let mut tasks = vec![server];
    if let Some(presence) = advertise_presence(&core).await {
        tasks.push(presence);
    }
    tasks.push(tokio::spawn(reap_loop(Arc::clone(&core))));
    tasks.push(tokio::spawn(split_brain_watchdog(Arc::clone(&core))));

    Ok(MasterHandle { core, tasks })
}

/// Serve the master's role-tagged `/health` on a worker-range port so
/// peer scans can see this instance claims the master role.
///
/// Failure is degraded operation, not fatal: the master still serves,
/// but a competing master cannot discover it through the range scan.
async fn advertise_presence(core: &Arc<MasterCore>) -> Option<JoinHandle<()>> {
    let port = match find_available_port(
        core.config.worker_port_start,
        core.config.worker_port_end,
    )
    .await
    {
        Ok(port) => port,
        Err(err) => {
            warn!(error = %err, "no worker-range port free, presence not advertised");
            return None;
        }
    };
    let listener = match tokio::net::TcpListener::bind(loopback(port)).await {
        Ok(listener) => listener,
        Err(err) => {
            warn!(port, error = %err, "could not bind presence port");
            return None;
        }
    };
    info!(port, "master presence advertised in worker range");

    let app = presence_router(Arc::clone(core));
    let cancel = core.cancel.clone();
    Some(tokio::spawn(async move {
        let shutdown = async move { cancel.cancelled().await };
        if let Err(err) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
        {
            warn!(error = %err, "presence server exited with error");
        }
    }))
}

/// Re-register a preserved registry with the winning master.
///
/// Best-effort: failures are logged and absorbed, since the workers also
/// heal themselves through the should-reregister heartbeat path.
pub async fn handoff_workers(master_port: u16, workers: &[WorkerRecord]) {
    if workers.is_empty() {
        return;
    }
    let client = match reqwest::Client::builder().timeout(HANDOFF_TIMEOUT).build() {
        Ok(client) => client,
        Err(err) => {
            warn!(error = %err, "could not build handoff client");
            return;
        }
    };

    let mut tasks: JoinSet<()> = JoinSet::new();
    for record in workers {
        let client = client.clone();
        let request = RegisterRequest {
            instance_id: record.instance_id.clone(),
            workspace_name: record.workspace_name.clone(),
            workspace_path: record.workspace_path.clone(),
            port: record.port,
            capabilities: record.capabilities.clone(),
            version: record.version.clone(),
        };
        tasks.spawn(async move {
            let url = format!("http://127.0.0.1:{master_port}/coordination/workers/register");
            match client.post(&url).json(&request).send().await {
                Ok(_) => debug!(worker = %request.instance_id, "worker handed to winner"),
                Err(err) => {
                    debug!(worker = %request.instance_id, error = %err, "handoff failed")
                }
            }
        });
    }
    while tasks.join_next().await.is_some() {}
}

/// Tick the registry reaper on the heartbeat cadence.
async fn reap_loop(core: Arc<MasterCore>) {
    let mut ticker = tokio::time::interval(core.config.heartbeat_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = core.cancel.cancelled() => return,
            _ = ticker.tick() => {
                let reaped = core.registry.reap_expired().await;
                if !reaped.is_empty() {
                    debug!(count = reaped.len(), "reaped expired workers");
                }
            }
        }
    }
}

/// Scan the worker range for a peer claiming the master role under a
/// foreign id.
async fn split_brain_watchdog(core: Arc<MasterCore>) {
    let mut ticker = tokio::time::interval(core.config.master_health_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = core.cancel.cancelled() => return,
            _ = ticker.tick() => {
                let peers = scan_port_range(
                    core.config.worker_port_start,
                    core.config.worker_port_end,
                    &core.instance_id,
                )
                .await;
                let Some(other) = peers.into_iter().find(|peer| peer.role == Role::Master) else {
                    continue;
                };
                warn!(other = %other.instance_id, port = other.port, "competing master detected");
                match core.resolve_split_brain(&other.instance_id) {
                    SplitBrainDecision::Continue => {
                        // The other instance loses the tie-break and will
                        // step itself down.
                    }
                    SplitBrainDecision::StepDown => {
                        let preserved = core.preserve_state().await;
                        let _ = core
                            .events
                            .send(MasterEvent::SplitBrainStepDown {
                                winner: other.instance_id,
                                preserved,
                            })
                            .await;
                        return;
                    }
                }
            }
        }
    }
}
