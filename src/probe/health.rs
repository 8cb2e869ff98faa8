// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Master health probing.
//!
//! Classifies a remote master as healthy, degraded, unreachable, or
//! shutting down based on a single `GET /coordination/health` round trip.
//! Timing variance below the 2 s threshold is never interpreted as
//! degradation.

use std::time::{Duration, Instant};

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::types::{InstanceId, MasterStatus};

/// Latency above which a completed probe counts as degraded.
const DEGRADED_LATENCY: Duration = Duration::from_millis(2000);

/// Default per-probe timeout.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Body of the master's `/coordination/health` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MasterHealthReport {
    /// Reported status string ("healthy" or "shutdown").
    pub status: String,
    /// The master's instance id.
    pub instance_id: InstanceId,
    /// Milliseconds since the master started.
    pub uptime: u64,
    /// Number of registered workers.
    pub worker_count: usize,
    /// Master code version.
    pub version: String,
    /// Server-side timestamp.
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Result of one master probe.
#[derive(Debug, Clone)]
pub struct ProbeOutcome {
    /// Health classification.
    pub status: MasterStatus,
    /// Instance id reported by the master, when the body parsed.
    pub instance_id: Option<InstanceId>,
    /// Round-trip latency.
    pub latency: Duration,
}

impl ProbeOutcome {
    fn unreachable(latency: Duration) -> Self {
        Self {
            status: MasterStatus::Unreachable,
            instance_id: None,
            latency,
        }
    }
}

/// HTTP health probe for a master instance.
#[derive(Debug, Clone)]
pub struct HealthProbe {
    client: Client,
}

impl HealthProbe {
    /// Create a probe with the default timeout.
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_PROBE_TIMEOUT)
    }

    /// Create a probe with a custom per-request timeout.
    pub fn with_timeout(timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to build HTTP client");
        Self { client }
    }

    /// Probe the master on `port` and classify the outcome.
    pub async fn probe_master(&self, port: u16) -> ProbeOutcome {
        let url = format!("http://127.0.0.1:{port}/coordination/health");
        let started = Instant::now();

        let response = match self.client.get(&url).send().await {
            Ok(response) => response,
            Err(err) => {
                trace!(port, error = %err, "master probe failed");
                return ProbeOutcome::unreachable(started.elapsed());
            }
        };

        let latency = started.elapsed();

        if !response.status().is_success() {
            return ProbeOutcome {
                status: MasterStatus::Degraded,
                instance_id: None,
                latency,
            };
        }

        match response.json::<MasterHealthReport>().await {
            Ok(report) => {
                let status = if report.status == "shutdown" {
                    MasterStatus::Shutdown
                } else if latency < DEGRADED_LATENCY {
                    MasterStatus::Healthy
                } else {
                    MasterStatus::Degraded
                };
                ProbeOutcome {
                    status,
                    instance_id: Some(report.instance_id),
                    latency,
                }
            }
            // Completed but malformed.
            Err(_) => ProbeOutcome {
                status: MasterStatus::Degraded,
                instance_id: None,
                latency,
            },
        }
    }
}

impl Default for HealthProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::get, Json, Router};

    async fn serve(router: Router) -> u16 {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        port
    }

    fn health_report(status: &str) -> MasterHealthReport {
        MasterHealthReport {
            status: status.to_string(),
            instance_id: InstanceId::from("m1"),
            uptime: 1234,
            worker_count: 0,
            version: "0.4.0".to_string(),
            timestamp: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_probe_healthy_master() {
        let router = Router::new().route(
            "/coordination/health",
            get(|| async { Json(health_report("healthy")) }),
        );
        let port = serve(router).await;

        let probe = HealthProbe::with_timeout(Duration::from_secs(2));
        let outcome = probe.probe_master(port).await;
        assert_eq!(outcome.status, MasterStatus::Healthy);
        assert_eq!(outcome.instance_id, Some(InstanceId::from("m1")));
    }

    #[tokio::test]
    async fn test_probe_shutdown_master() {
        let router = Router::new().route(
            "/coordination/health",
            get(|| async { Json(health_report("shutdown")) }),
        );
        let port = serve(router).await;

        let probe = HealthProbe::with_timeout(Duration::from_secs(2));
        let outcome = probe.probe_master(port).await;
        assert_eq!(outcome.status, MasterStatus::Shutdown);
    }

    #[tokio::test]
    async fn test_probe_malformed_body_is_degraded() {
        let router = Router::new().route(
            "/coordination/health",
            get(|| async { Json(serde_json::json!({"unexpected": true})) }),
        );
        let port = serve(router).await;

        let probe = HealthProbe::with_timeout(Duration::from_secs(2));
        let outcome = probe.probe_master(port).await;
        assert_eq!(outcome.status, MasterStatus::Degraded);
        assert!(outcome.instance_id.is_none());
    }

    #[tokio::test]
    async fn test_probe_refused_is_unreachable() {
        // Bind then release so nothing is listening.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let probe = HealthProbe::with_timeout(Duration::from_secs(1));
        let outcome = probe.probe_master(port).await;
        assert_eq!(outcome.status, MasterStatus::Unreachable);
    }
}
