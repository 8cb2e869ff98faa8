// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Initial role detection.
//!
//! Decides whether this process starts as master, worker, or standalone
//! by probing the configured master port. A degraded master is contested
//! only after repeated probes and a workspace-score check, with a
//! randomized backoff before the final probe so two contenders don't
//! promote simultaneously. The backoff is a collision-avoidance
//! mechanism, not a performance tweak.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, info};

use crate::config::CoordinationConfig;
use crate::local::WorkspaceAdapter;
use crate::probe::HealthProbe;
use crate::types::{MasterStatus, Role};

/// Number of re-probes when the first probe reports a degraded master.
const DEGRADED_PROBE_COUNT: u32 = 3;

/// Fraction of degraded probes required to contest the master (two of
/// three).
const DEGRADED_PROBE_QUORUM: u32 = 2;

/// Upper bound of the randomized pre-promotion backoff, in milliseconds.
const PROMOTION_BACKOFF_MAX_MS: u64 = 2000;

/// Detects the starting role for this process.
pub struct RoleDetector {
    config: CoordinationConfig,
    probe: HealthProbe,
    adapter: Arc<dyn WorkspaceAdapter>,
    /// Interval between degraded re-probes; shortened in tests.
    reprobe_interval: Duration,
}

impl RoleDetector {
    /// Create a detector.
    pub fn new(config: CoordinationConfig, adapter: Arc<dyn WorkspaceAdapter>) -> Self {
        Self {
            config,
            probe: HealthProbe::new(),
            adapter,
            reprobe_interval: Duration::from_secs(1),
        }
    }

    #[cfg(test)]
    fn with_reprobe_interval(mut self, interval: Duration) -> Self {
        self.reprobe_interval = interval;
        self
    }

    /// Decide the starting role.
    pub async fn detect(&self) -> Role {
        if !self.config.enabled {
            info!("coordination disabled, running standalone");
            return Role::Standalone;
        }

        if let Some(forced) = self.config.forced_role {
            info!(role = %forced, "role forced by configuration");
            return forced;
        }

        let outcome = self.probe.probe_master(self.config.master_port).await;
        debug!(status = ?outcome.status, latency_ms = outcome.latency.as_millis() as u64, "master probe");

        match outcome.status {
            MasterStatus::Healthy => Role::Worker,
            MasterStatus::Unreachable | MasterStatus::Shutdown => Role::Master,
            MasterStatus::Degraded => self.evaluate_degraded_master().await,
        }
    }

    /// A degraded master is contested only when repeated probes agree,
    /// the local workspace is substantial enough, and a final probe after
    /// a randomized backoff still fails.
    async fn evaluate_degraded_master(&self) -> Role {
        let mut unhealthy = 0u32;
        for attempt in 0..DEGRADED_PROBE_COUNT {
            if attempt > 0 {
                tokio::time::sleep(self.reprobe_interval).await;
            }
            let outcome = self.probe.probe_master(self.config.master_port).await;
            if !outcome.status.is_healthy() {
                unhealthy += 1;
            }
        }

        if unhealthy < DEGRADED_PROBE_QUORUM {
            return Role::Worker;
        }

        let score = self.adapter.score_inputs().score();
        if score < self.config.workspace_score_threshold {
            debug!(score, "workspace score below promotion threshold");
            return Role::Worker;
        }

        let backoff = {
            let mut rng = rand::thread_rng();
            Duration::from_millis(rng.gen_range(0..=PROMOTION_BACKOFF_MAX_MS))
        };
        debug!(backoff_ms = backoff.as_millis() as u64, "split-brain avoidance backoff");
        tokio::time::sleep(backoff).await;

        let outcome = self.probe.probe_master(self.config.master_port).await;
        if outcome.status.is_healthy() {
            Role::Worker
        } else {
            info!("degraded master contested, promoting to master");
            Role::Master
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::StaticWorkspaceAdapter;
    use crate::probe::MasterHealthReport;
    use crate::types::{InstanceId, WorkspaceScoreInputs};
    use axum::{routing::get, Json, Router};

    fn adapter_with_score(file_count: u64) -> Arc<dyn WorkspaceAdapter> {
        Arc::new(
            StaticWorkspaceAdapter::new("api", "/home/dev/api").with_score_inputs(
                WorkspaceScoreInputs {
                    file_count,
                    git_commits: 0,
                    recent_activity: 0.0,
                },
            ),
        )
    }

    async fn healthy_master() -> u16 {
        let router = Router::new().route(
            "/coordination/health",
            get(|| async {
                Json(MasterHealthReport {
                    status: "healthy".to_string(),
                    instance_id: InstanceId::from("m1"),
                    uptime: 1,
                    worker_count: 0,
                    version: "0.4.0".to_string(),
                    timestamp: chrono::Utc::now(),
                })
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        port
    }

    async fn free_port() -> u16 {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        port
    }

    fn config(master_port: u16) -> CoordinationConfig {
        CoordinationConfig {
            master_port,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_coordination_off_is_standalone() {
        let mut config = config(free_port().await);
        config.enabled = false;
        let detector = RoleDetector::new(config, adapter_with_score(0));
        assert_eq!(detector.detect().await, Role::Standalone);
    }

    #[tokio::test]
    async fn test_forced_role_wins() {
        let mut config = config(healthy_master().await);
        config.forced_role = Some(Role::Master);
        let detector = RoleDetector::new(config, adapter_with_score(0));
        assert_eq!(detector.detect().await, Role::Master);
    }

    #[tokio::test]
    async fn test_healthy_master_means_worker() {
        let detector = RoleDetector::new(config(healthy_master().await), adapter_with_score(0));
        assert_eq!(detector.detect().await, Role::Worker);
    }

    #[tokio::test]
    async fn test_no_master_means_master() {
        let detector = RoleDetector::new(config(free_port().await), adapter_with_score(0));
        assert_eq!(detector.detect().await, Role::Master);
    }

    #[tokio::test]
    async fn test_degraded_master_low_score_stays_worker() {
        // Malformed health body: completed but degraded on every probe.
        let router = Router::new().route(
            "/coordination/health",
            get(|| async { Json(serde_json::json!({"weird": true})) }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        let detector = RoleDetector::new(config(port), adapter_with_score(0))
            .with_reprobe_interval(Duration::from_millis(5));
        assert_eq!(detector.detect().await, Role::Worker);
    }
}
