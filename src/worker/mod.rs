// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Worker core.
//!
//! On start the worker picks a port from the worker range, exposes its
//! HTTP surface, registers with the master (with exponential-backoff
//! retries), and runs two timer loops: heartbeat sends on the cadence
//! the master assigned, and a master-health loop that initiates an
//! election after three consecutive failed probes.
//!
//! Heartbeat send failures are tolerated; the health loop is the sole
//! authority for failure detection.

mod http;

pub use http::worker_router;

use std::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use reqwest::Client;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::CoordinationConfig;
use crate::election::{ElectionCandidate, ElectionCoordinator, ElectionMessage};
use crate::error::{ElectionError, TransportError};
use crate::local::{LocalToolExecutor, WorkspaceAdapter};
use crate::probe::{find_available_port, port::loopback, HealthProbe};
use crate::registry::{HeartbeatRequest, HeartbeatResponse, RegisterRequest, RegisterResponse};
use crate::types::{InstanceId, WorkerHealthReport};

/// Consecutive failed master probes before an election starts.
const FAILURE_THRESHOLD: u32 = 3;

/// Registration attempts before giving up and going standalone.
const MAX_REGISTRATION_ATTEMPTS: u32 = 5;

/// How long a losing candidate waits for the new master before
/// self-promoting.
const NEW_MASTER_WAIT: Duration = Duration::from_secs(30);

/// Events the worker reports to its supervisor.
#[derive(Debug, PartialEq, Eq)]
pub enum WorkerEvent {
    /// This instance must become master (election win, or last-resort
    /// self-promotion).
    ElectionWon,
    /// Registration retries are exhausted; the local tool endpoint stays
    /// up but this instance is effectively standalone.
    RegistrationExhausted,
}

/// The worker role: registered tool executor and election participant.
pub struct WorkerCore {
    instance_id: InstanceId,
    config: CoordinationConfig,
    adapter: Arc<dyn WorkspaceAdapter>,
    local: Arc<dyn LocalToolExecutor>,
    election: ElectionCoordinator,
    client: Client,
    started: Instant,
    cancel: CancellationToken,
    events: mpsc::Sender<WorkerEvent>,
    failure_count: AtomicU32,
    master_id: Mutex<Option<InstanceId>>,
    /// Base of the registration backoff; shortened in tests.
    registration_backoff: Duration,
}

impl WorkerCore {
    /// Create a worker core. Nothing is bound until [`start`].
    pub fn new(
        instance_id: InstanceId,
        config: CoordinationConfig,
        adapter: Arc<dyn WorkspaceAdapter>,
        local: Arc<dyn LocalToolExecutor>,
        events: mpsc::Sender<WorkerEvent>,
    ) -> Self {
        let client = Client::builder()
            .timeout(config.registration_timeout)
            .build()
            .expect("Failed to build HTTP client");
        let election = ElectionCoordinator::new(instance_id.clone(), config.clone());
        Self {
            instance_id,
            config,
            adapter,
            local,
            election,
            client,
            started: Instant::now(),
            cancel: CancellationToken::new(),
            events,
            failure_count: AtomicU32::new(0),
            master_id: Mutex::new(None),
            registration_backoff: Duration::from_secs(1),
        }
    }

    #[cfg(test)]
    fn with_registration_backoff(mut self, backoff: Duration) -> Self {
        self.registration_backoff = backoff;
        self
    }

    /// This worker's instance id.
    pub fn instance_id(&self) -> &InstanceId {
        &self.instance_id
    }

    /// The local tool executor.
    pub fn local(&self) -> &Arc<dyn LocalToolExecutor> {
        &self.local
    }

    /// The workspace adapter.
    pub fn adapter(&self) -> &Arc<dyn WorkspaceAdapter> {
        &self.adapter
    }

    /// Health report served at `/health`.
    pub fn health_report(&self) -> WorkerHealthReport {
        WorkerHealthReport {
            status: "healthy".to_string(),
            instance_id: self.instance_id.clone(),
            role: crate::types::Role::Worker,
            workspace_name: self.adapter.workspace_info().name,
            capabilities: self.local.available_tools(),
        }
    }

    /// This instance's election candidate descriptor.
    pub fn self_candidate(&self) -> ElectionCandidate {
        ElectionCandidate {
            instance_id: self.instance_id.clone(),
            workspace_score: self.adapter.score_inputs().score(),
            uptime: self.started.elapsed().as_millis() as u64,
            resource_usage: 0.0,
            capabilities: self.local.available_tools(),
            last_seen: Utc::now(),
            worker_info: Some(self.adapter.workspace_info()),
        }
    }

    /// Handle an inbound election message from a peer.
    pub fn handle_election_message(&self, message: ElectionMessage) {
        match message {
            ElectionMessage::MasterElected {
                new_master_id,
                from_instance_id,
                ..
            } => {
                info!(winner = %new_master_id, from = %from_instance_id, "peer announced new master");
                // The new master will answer health probes shortly.
                self.failure_count.store(0, AtomicOrdering::SeqCst);
                if self.election.is_election_in_progress() && new_master_id != self.instance_id {
                    self.election.abort();
                }
            }
            ElectionMessage::ElectionStarted { from_instance_id, .. } => {
                debug!(from = %from_instance_id, "peer started an election");
            }
        }
    }

    /// Record that the master announced shutdown: the next health tick
    /// goes straight to an election instead of waiting out three probes.
    pub fn note_master_gone(&self) {
        self.failure_count
            .store(FAILURE_THRESHOLD, AtomicOrdering::SeqCst);
    }

    /// Register with the master, retrying with exponential backoff.
    ///
    /// Returns the heartbeat cadence on success, `None` on exhaustion.
    async fn register_with_retries(&self, port: u16) -> Option<Duration> {
        for attempt in 1..=MAX_REGISTRATION_ATTEMPTS {
            match self.register_once(port).await {
                Ok(response) if response.success => {
                    *self.master_id.lock().await = Some(response.master_instance_id.clone());
                    info!(
                        master = %response.master_instance_id,
                        heartbeat_ms = response.heartbeat_interval,
                        "registered with master"
                    );
                    return Some(Duration::from_millis(response.heartbeat_interval.max(1)));
                }
                Ok(response) => {
                    warn!(attempt, error = ?response.error, "registration rejected");
                }
                Err(err) => {
                    warn!(attempt, error = %err, "registration failed");
                }
            }

            if attempt < MAX_REGISTRATION_ATTEMPTS {
                let backoff = self.registration_backoff * 2u32.pow(attempt);
                tokio::select! {
                    _ = self.cancel.cancelled() => return None,
                    _ = tokio::time::sleep(backoff) => {}
                }
            }
        }
        None
    }

    async fn register_once(&self, port: u16) -> Result<RegisterResponse, reqwest::Error> {
        let info = self.adapter.workspace_info();
        let request = RegisterRequest {
            instance_id: self.instance_id.clone(),
            workspace_name: info.name,
            workspace_path: info.path,
            port,
            capabilities: self.local.available_tools(),
            version: crate::VERSION.to_string(),
        };
        let url = format!(
            "http://127.0.0.1:{}/coordination/workers/register",
            self.config.master_port
        );
        self.client
            .post(&url)
            .json(&request)
            .send()
            .await?
            .json::<RegisterResponse>()
            .await
    }

    /// Send one heartbeat; re-register when the master asks for it.
    async fn send_heartbeat(&self, port: u16) {
        let request = HeartbeatRequest {
            instance_id: self.instance_id.clone(),
            status: self.adapter.activity(),
            timestamp: Utc::now(),
        };
        let url = format!(
            "http://127.0.0.1:{}/coordination/workers/{}/heartbeat",
            self.config.master_port, self.instance_id
        );

        let response = match self.client.post(&url).json(&request).send().await {
            Ok(response) => response,
            Err(err) => {
                // The health loop owns failure detection.
                debug!(error = %err, "heartbeat send failed");
                return;
            }
        };

        if let Ok(body) = response.json::<HeartbeatResponse>().await {
            if body.should_reregister == Some(true) {
                info!("master asked for re-registration");
                if let Ok(reply) = self.register_once(port).await {
                    if reply.success {
                        *self.master_id.lock().await = Some(reply.master_instance_id);
                    }
                }
            }
        }
    }

    /// One master-health tick. Returns `true` when the worker role is
    /// finished (an election decided this instance's fate).
    async fn health_tick(&self, probe: &HealthProbe, port: u16) -> bool {
        let outcome = probe.probe_master(self.config.master_port).await;
        if outcome.status.is_healthy() {
            self.failure_count.store(0, AtomicOrdering::SeqCst);
            if let Some(id) = outcome.instance_id {
                *self.master_id.lock().await = Some(id);
            }
            return false;
        }

        let failures = self.failure_count.fetch_add(1, AtomicOrdering::SeqCst) + 1;
        debug!(failures, status = ?outcome.status, "master probe failed");
        if failures < FAILURE_THRESHOLD || self.election.is_election_in_progress() {
            return false;
        }

        info!("master considered dead, initiating election");
        match self.election.run_election(self.self_candidate()).await {
            Ok(outcome) if outcome.winner.instance_id == self.instance_id => {
                let _ = self.events.send(WorkerEvent::ElectionWon).await;
                true
            }
            Ok(outcome) => {
                info!(winner = %outcome.winner.instance_id, "lost election, waiting for new master");
                if self.wait_for_new_master(probe).await {
                    self.failure_count.store(0, AtomicOrdering::SeqCst);
                    let _ = self.register_with_retries(port).await;
                    false
                } else {
                    warn!("new master never appeared, self-promoting");
                    let _ = self.events.send(WorkerEvent::ElectionWon).await;
                    true
                }
            }
            Err(ElectionError::AlreadyInProgress) => false,
            Err(err) => {
                // Quorum failure or abort: last-resort fallback is to
                // promote ourselves; split-brain arbitration cleans up
                // if several workers do.
                warn!(error = %err, "election failed, self-promoting");
                let _ = self.events.send(WorkerEvent::ElectionWon).await;
                true
            }
        }
    }

    /// Wait for the elected master to start answering health probes.
    async fn wait_for_new_master(&self, probe: &HealthProbe) -> bool {
        let deadline = Instant::now() + NEW_MASTER_WAIT;
        while Instant::now() < deadline {
            tokio::select! {
                _ = self.cancel.cancelled() => return true,
                _ = tokio::time::sleep(self.config.master_health_interval) => {
                    let outcome = probe.probe_master(self.config.master_port).await;
                    if outcome.status.is_healthy() {
                        return true;
                    }
                }
            }
        }
        false
    }

    /// Stop the worker's timer loops and HTTP surface.
    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

/// A running worker: the core, its bound port, and background tasks.
pub struct WorkerHandle {
    /// The core, shared with the HTTP surface.
    pub core: Arc<WorkerCore>,
    /// The worker's bound loopback port.
    pub port: u16,
    tasks: Vec<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Stop the worker within a bounded deadline.
    pub async fn stop(self) {
        self.core.stop();
        for task in self.tasks {
            let _ = tokio::time::timeout(Duration::from_secs(1), task).await;
        }
    }
}

/// Pick a port, expose the worker surface, and run the registration /
/// heartbeat / master-health lifecycle.
pub async fn start(core: Arc<WorkerCore>) -> Result<WorkerHandle, TransportError> {
    let port = serve_surface(&core).await?;

    let lifecycle_core = Arc::clone(&core);
    let lifecycle = tokio::spawn(async move {
        run_lifecycle(lifecycle_core, port).await;
    });

    let mut handle = WorkerHandle {
        core,
        port,
        tasks: Vec::new(),
    };
    handle.tasks.push(lifecycle);
    Ok(handle)
}

/// Expose the worker surface only: the standalone mode, and the first
/// half of worker startup.
pub async fn start_standalone(core: Arc<WorkerCore>) -> Result<WorkerHandle, TransportError> {
    let port = serve_surface(&core).await?;
    Ok(WorkerHandle {
        core,
        port,
        tasks: Vec::new(),
    })
}

async fn serve_surface(core: &Arc<WorkerCore>) -> Result<u16, TransportError> {
    let port = find_available_port(core.config.worker_port_start, core.config.worker_port_end)
        .await
        .map_err(|err| TransportError::BindFailed {
            addr: format!(
                "127.0.0.1:{}-{}",
                core.config.worker_port_start, core.config.worker_port_end
            ),
            message: err.to_string(),
        })?;

    let addr = loopback(port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|err| TransportError::BindFailed {
            addr: addr.to_string(),
            message: err.to_string(),
        })?;
    info!(instance = %core.instance_id, %addr, "worker serving");

    let app = worker_router(Arc::clone(core));
    let cancel = core.cancel.clone();
    tokio::spawn(async move {
        let shutdown = async move { cancel.cancelled().await };
        if let Err(err) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
        {
            warn!(error = %err, "worker server exited with error");
        }
    });

    Ok(port)
}

async fn run_lifecycle(core: Arc<WorkerCore>, port: u16) {
    let Some(heartbeat_interval) = core.register_with_retries(port).await else {
        if !core.cancel.is_cancelled() {
            warn!("registration exhausted, keeping local tool endpoint only");
            let _ = core.events.send(WorkerEvent::RegistrationExhausted).await;
        }
        return;
    };

    let heartbeat_core = Arc::clone(&core);
    let heartbeat = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(heartbeat_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick fires immediately; skip it, registration just
        // happened.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = heartbeat_core.cancel.cancelled() => return,
                _ = ticker.tick() => heartbeat_core.send_heartbeat(port).await,
            }
        }
    });

    let probe = HealthProbe::new();
    let mut ticker = tokio::time::interval(core.config.master_health_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = core.cancel.cancelled() => break,
            _ = ticker.tick() => {
                if core.health_tick(&probe, port).await {
                    break;
                }
            }
        }
    }
    heartbeat.abort();
}
