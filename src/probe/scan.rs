// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Worker-range scanning.
//!
//! Probes every port in the worker range for a `/health` reply carrying
//! a non-empty instance id. Used by election discovery (to find
//! surviving workers) and by the master's split-brain watchdog (to find
//! a peer claiming the master role under a foreign id).

use std::time::Duration;

use reqwest::Client;
use tokio::task::JoinSet;

use crate::types::{InstanceId, Role, WorkerHealthReport};

/// Per-port timeout during the scan.
const SCAN_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Concurrent probes per scan batch. Bounded concurrency is
/// load-bearing: it keeps the scan from throttling itself on loopback.
const SCAN_BATCH_SIZE: usize = 10;

/// Pause between scan batches.
const SCAN_BATCH_PAUSE: Duration = Duration::from_millis(100);

/// A peer found by scanning the worker port range.
#[derive(Debug, Clone)]
pub struct ScannedPeer {
    /// The peer's instance id.
    pub instance_id: InstanceId,
    /// The peer's loopback port.
    pub port: u16,
    /// The role the peer believes it holds.
    pub role: Role,
}

/// Scan `[start, end]` (inclusive) in bounded-concurrency batches.
///
/// Peers reporting `exclude`'s own id are dropped from the result.
pub async fn scan_port_range(start: u16, end: u16, exclude: &InstanceId) -> Vec<ScannedPeer> {
    let client = Client::builder()
        .timeout(SCAN_PROBE_TIMEOUT)
        .build()
        .expect("Failed to build HTTP client");

    let ports: Vec<u16> = (start..=end).collect();
    let mut found = Vec::new();

    for (index, batch) in ports.chunks(SCAN_BATCH_SIZE).enumerate() {
        if index > 0 {
            tokio::time::sleep(SCAN_BATCH_PAUSE).await;
        }

        let mut probes: JoinSet<Option<ScannedPeer>> = JoinSet::new();
        for &port in batch {
            let client = client.clone();
            probes.spawn(async move {
                let url = format!("http://127.0.0.1:{port}/health");
                let report = client
                    .get(&url)
                    .send()
                    .await
                    .ok()?
                    .json::<WorkerHealthReport>()
                    .await
                    .ok()?;
                if report.instance_id.as_str().is_empty() {
                    return None;
                }
                Some(ScannedPeer {
                    instance_id: report.instance_id,
                    port,
                    role: report.role,
                })
            });
        }

        while let Some(joined) = probes.join_next().await {
            if let Ok(Some(peer)) = joined {
                if &peer.instance_id != exclude {
                    found.push(peer);
                }
            }
        }
    }

    found
}
