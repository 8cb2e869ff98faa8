// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Role lifecycle orchestration.
//!
//! Starts the process in its detected role and performs role
//! transitions: worker to master on an election win, master to worker on
//! a lost split-brain tie, and either to standalone when coordination is
//! impossible. Each transition constructs a fresh component; the
//! previous one is stopped, never mutated in place. A transition flag
//! short-circuits re-entry.

use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::CoordinationConfig;
use crate::error::SupervisorError;
use crate::local::{LocalToolExecutor, WorkspaceAdapter};
use crate::master::{self, MasterCore, MasterEvent};
use crate::role::RoleDetector;
use crate::types::{InstanceId, Role};
use crate::worker::{self, WorkerCore, WorkerEvent};

/// Pause between stepping down as master and starting the replacement
/// worker.
const STEP_DOWN_DELAY: Duration = Duration::from_millis(500);

/// Orchestrates which role this process runs and when it changes.
pub struct ModeSupervisor {
    instance_id: InstanceId,
    config: CoordinationConfig,
    adapter: Arc<dyn WorkspaceAdapter>,
    local: Arc<dyn LocalToolExecutor>,
    transitioning: AtomicBool,
}

impl ModeSupervisor {
    /// Create a supervisor.
    pub fn new(
        instance_id: InstanceId,
        config: CoordinationConfig,
        adapter: Arc<dyn WorkspaceAdapter>,
        local: Arc<dyn LocalToolExecutor>,
    ) -> Self {
        Self {
            instance_id,
            config,
            adapter,
            local,
            transitioning: AtomicBool::new(false),
        }
    }

    /// Detect the starting role and run until `shutdown` is cancelled.
    pub async fn run(&self, shutdown: CancellationToken) -> crate::error::Result<()> {
        let detector = RoleDetector::new(self.config.clone(), Arc::clone(&self.adapter));
        let mut role = detector.detect().await;
        info!(role = %role, instance = %self.instance_id, "starting in detected role");

        loop {
            if shutdown.is_cancelled() {
                return Ok(());
            }
            let next = match role {
                Role::Master => self.run_as_master(&shutdown).await?,
                Role::Worker => self.run_as_worker(&shutdown).await?,
                Role::Standalone => self.run_standalone(&shutdown).await?,
            };
            match next {
                Some(next_role) => {
                    info!(from = %role, to = %next_role, "role transition");
                    role = next_role;
                }
                None => return Ok(()),
            }
        }
    }

    fn begin_transition(&self) -> Result<(), SupervisorError> {
        if self
            .transitioning
            .compare_exchange(false, true, AtomicOrdering::SeqCst, AtomicOrdering::SeqCst)
            .is_err()
        {
            return Err(SupervisorError::TransitionInProgress);
        }
        Ok(())
    }

    fn end_transition(&self) {
        self.transitioning.store(false, AtomicOrdering::SeqCst);
    }

    /// Run as master until shutdown or a lost split-brain tie.
    async fn run_as_master(
        &self,
        shutdown: &CancellationToken,
    ) -> crate::error::Result<Option<Role>> {
        self.begin_transition()?;
        let (tx, mut rx) = mpsc::channel(8);
        let core = MasterCore::new(
            self.instance_id.clone(),
            self.config.clone(),
            Arc::clone(&self.adapter),
            Arc::clone(&self.local),
            tx,
        );
        let handle = match master::start(core).await {
            Ok(handle) => handle,
            Err(err) => {
                // Lost the race for the master port; someone else is
                // master now.
                warn!(error = %err, "could not bind master port, joining as worker");
                self.end_transition();
                return Ok(Some(Role::Worker));
            }
        };
        self.end_transition();

        tokio::select! {
            _ = shutdown.cancelled() => {
                handle.stop().await;
                Ok(None)
            }
            event = rx.recv() => match event {
                Some(MasterEvent::SplitBrainStepDown { winner, preserved }) => {
                    info!(winner = %winner, "stepping down after split-brain tie");
                    handle.stop().await;
                    tokio::time::sleep(STEP_DOWN_DELAY).await;
                    // Hand the preserved registry to the winner so the
                    // routing state survives the step-down.
                    master::handoff_workers(self.config.master_port, &preserved).await;
                    Ok(Some(Role::Worker))
                }
                None => {
                    // Event source gone; keep serving until shutdown.
                    shutdown.cancelled().await;
                    handle.stop().await;
                    Ok(None)
                }
            }
        }
    }

    /// Run as worker until shutdown, an election win, or registration
    /// exhaustion (which keeps the local endpoint serving, standalone in
    /// all but name).
    async fn run_as_worker(
        &self,
        shutdown: &CancellationToken,
    ) -> crate::error::Result<Option<Role>> {
        self.begin_transition()?;
        let (tx, mut rx) = mpsc::channel(8);
        let core = Arc::new(WorkerCore::new(
            self.instance_id.clone(),
            self.config.clone(),
            Arc::clone(&self.adapter),
            Arc::clone(&self.local),
            tx,
        ));
        let handle = match worker::start(core).await {
            Ok(handle) => handle,
            Err(err) => {
                warn!(error = %err, "could not start worker, falling back to standalone");
                self.end_transition();
                return Ok(Some(Role::Standalone));
            }
        };
        self.end_transition();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    handle.stop().await;
                    return Ok(None);
                }
                event = rx.recv() => match event {
                    Some(WorkerEvent::ElectionWon) => {
                        handle.stop().await;
                        return Ok(Some(Role::Master));
                    }
                    Some(WorkerEvent::RegistrationExhausted) => {
                        // The tool endpoint stays up; nothing more to
                        // coordinate until shutdown.
                        info!("continuing with local tool endpoint only");
                    }
                    None => {
                        shutdown.cancelled().await;
                        handle.stop().await;
                        return Ok(None);
                    }
                }
            }
        }
    }

    /// Run the local-only loop until shutdown.
    async fn run_standalone(
        &self,
        shutdown: &CancellationToken,
    ) -> crate::error::Result<Option<Role>> {
        self.begin_transition()?;
        let (tx, _rx) = mpsc::channel(8);
        let core = Arc::new(WorkerCore::new(
            self.instance_id.clone(),
            self.config.clone(),
            Arc::clone(&self.adapter),
            Arc::clone(&self.local),
            tx,
        ));
        // Failing to bind any port at all is the one fatal runtime
        // condition.
        let handle = worker::start_standalone(core).await?;
        self.end_transition();
        info!(port = handle.port, "standalone tool endpoint serving");

        shutdown.cancelled().await;
        handle.stop().await;
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::{BuiltinToolExecutor, StaticWorkspaceAdapter};
    use crate::probe::find_available_port;
    use crate::probe::MasterHealthReport;
    use crate::types::WorkerHealthReport;

    fn adapter() -> Arc<dyn WorkspaceAdapter> {
        Arc::new(StaticWorkspaceAdapter::new("api", "/home/dev/api"))
    }

    fn local() -> Arc<dyn LocalToolExecutor> {
        Arc::new(BuiltinToolExecutor::new(adapter()))
    }

    async fn test_config() -> CoordinationConfig {
        let master_port = find_available_port(50100, 52000).await.unwrap();
        let worker_start = find_available_port(52100, 53900).await.unwrap();
        CoordinationConfig {
            master_port,
            worker_port_start: worker_start,
            worker_port_end: worker_start + 10,
            heartbeat_interval: Duration::from_millis(200),
            master_health_interval: Duration::from_millis(100),
            registration_timeout: Duration::from_secs(2),
            election_timeout: Duration::from_secs(1),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_standalone_when_coordination_disabled() {
        let mut config = test_config().await;
        config.enabled = false;
        let worker_start = config.worker_port_start;

        let supervisor = ModeSupervisor::new(InstanceId::generate(), config, adapter(), local());
        let shutdown = CancellationToken::new();
        let run_shutdown = shutdown.clone();
        let task = tokio::spawn(async move {
            let supervisor = supervisor;
            supervisor.run(run_shutdown).await
        });

        // The standalone endpoint appears on the first worker port.
        tokio::time::sleep(Duration::from_millis(300)).await;
        let report: WorkerHealthReport =
            reqwest::get(format!("http://127.0.0.1:{worker_start}/health"))
                .await
                .unwrap()
                .json()
                .await
                .unwrap();
        assert_eq!(report.status, "healthy");

        shutdown.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_first_instance_becomes_master() {
        let config = test_config().await;
        let master_port = config.master_port;

        let supervisor = ModeSupervisor::new(InstanceId::generate(), config, adapter(), local());
        let shutdown = CancellationToken::new();
        let run_shutdown = shutdown.clone();
        let task = tokio::spawn(async move {
            let supervisor = supervisor;
            supervisor.run(run_shutdown).await
        });

        tokio::time::sleep(Duration::from_millis(500)).await;
        let report: MasterHealthReport = reqwest::get(format!(
            "http://127.0.0.1:{master_port}/coordination/health"
        ))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
        assert_eq!(report.status, "healthy");
        assert_eq!(report.worker_count, 0);

        shutdown.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_worker_takes_over_after_master_death() {
        let config = test_config().await;
        let master_port = config.master_port;

        // An externally-run master.
        let (tx, _rx) = mpsc::channel(8);
        let master_core = MasterCore::new(
            InstanceId::from("external-master"),
            config.clone(),
            adapter(),
            local(),
            tx,
        );
        let master_handle = master::start(master_core).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        // Supervisor detects the master and joins as worker.
        let supervisor = ModeSupervisor::new(InstanceId::generate(), config, adapter(), local());
        let shutdown = CancellationToken::new();
        let run_shutdown = shutdown.clone();
        let task = tokio::spawn(async move {
            let supervisor = supervisor;
            supervisor.run(run_shutdown).await
        });
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(master_handle.core.registry().len().await, 1);

        // Kill the master; the worker must win the election and serve
        // the master port itself.
        master_handle.stop().await;

        let mut promoted = false;
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(200)).await;
            if let Ok(response) = reqwest::get(format!(
                "http://127.0.0.1:{master_port}/coordination/health"
            ))
            .await
            {
                if let Ok(report) = response.json::<MasterHealthReport>().await {
                    if report.status == "healthy"
                        && report.instance_id != InstanceId::from("external-master")
                    {
                        promoted = true;
                        break;
                    }
                }
            }
        }
        assert!(promoted, "no replacement master appeared");

        shutdown.cancel();
        task.await.unwrap().unwrap();
    }
}
