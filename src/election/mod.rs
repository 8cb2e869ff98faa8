// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Leader election.
//!
//! When a worker's master-health loop gives up on the master, it runs an
//! election here: discover the surviving workers (registry listing from
//! the dying master first, port scan as fallback), collect candidate
//! descriptors, decide by a deterministic comparator, and broadcast the
//! result. Only one election can be active per process, and an election
//! in progress can be aborted.

mod types;

pub use types::{
    decide_winner, rank_candidates, ElectionAck, ElectionCandidate, ElectionMessage, ElectionPhase,
};

use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;
use reqwest::Client;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::CoordinationConfig;
use crate::error::ElectionError;
use crate::probe::scan_port_range;
use crate::types::{InstanceId, Role, WorkerRecord};

/// Timeout for election messages and candidate fetches.
const ELECTION_MESSAGE_TIMEOUT: Duration = Duration::from_secs(3);

/// A worker found during discovery.
#[derive(Debug, Clone)]
pub struct DiscoveredWorker {
    /// The worker's instance id.
    pub instance_id: InstanceId,
    /// The worker's loopback port.
    pub port: u16,
}

/// Outcome of a completed election.
#[derive(Debug, Clone)]
pub struct ElectionOutcome {
    /// The winning candidate.
    pub winner: ElectionCandidate,
    /// Every candidate that was considered.
    pub candidates: Vec<ElectionCandidate>,
}

/// Runs master elections for this instance.
pub struct ElectionCoordinator {
    self_id: InstanceId,
    config: CoordinationConfig,
    client: Client,
    in_progress: AtomicBool,
    phase: Mutex<ElectionPhase>,
    abort: Mutex<CancellationToken>,
}

impl ElectionCoordinator {
    /// Create a coordinator.
    pub fn new(self_id: InstanceId, config: CoordinationConfig) -> Self {
        let client = Client::builder()
            .timeout(ELECTION_MESSAGE_TIMEOUT)
            .build()
            .expect("Failed to build HTTP client");
        Self {
            self_id,
            config,
            client,
            in_progress: AtomicBool::new(false),
            phase: Mutex::new(ElectionPhase::Idle),
            abort: Mutex::new(CancellationToken::new()),
        }
    }

    /// Whether an election is currently running.
    pub fn is_election_in_progress(&self) -> bool {
        self.in_progress.load(AtomicOrdering::SeqCst)
    }

    /// Current phase of the state machine.
    pub fn phase(&self) -> ElectionPhase {
        *self.phase.lock().expect("phase lock poisoned")
    }

    /// Abort an in-progress election. Candidate state is cleared and the
    /// election flag reset by the running task.
    pub fn abort(&self) {
        self.abort.lock().expect("abort lock poisoned").cancel();
    }

    fn set_phase(&self, phase: ElectionPhase) {
        *self.phase.lock().expect("phase lock poisoned") = phase;
    }

    /// Run an election with `self_candidate` representing this instance.
    ///
    /// A second call while one is running is rejected.
    pub async fn run_election(
        &self,
        self_candidate: ElectionCandidate,
    ) -> Result<ElectionOutcome, ElectionError> {
        if self
            .in_progress
            .compare_exchange(false, true, AtomicOrdering::SeqCst, AtomicOrdering::SeqCst)
            .is_err()
        {
            return Err(ElectionError::AlreadyInProgress);
        }

        let token = CancellationToken::new();
        *self.abort.lock().expect("abort lock poisoned") = token.clone();

        let result = tokio::select! {
            outcome = self.run_phases(self_candidate) => outcome,
            _ = token.cancelled() => Err(ElectionError::Aborted),
        };

        self.set_phase(ElectionPhase::Idle);
        self.in_progress.store(false, AtomicOrdering::SeqCst);
        result
    }

    async fn run_phases(
        &self,
        self_candidate: ElectionCandidate,
    ) -> Result<ElectionOutcome, ElectionError> {
        self.set_phase(ElectionPhase::Discovering);
        let discovered = self.discover_workers().await;
        info!(count = discovered.len(), "election discovery complete");

        self.set_phase(ElectionPhase::CollectingCandidates);
        let (candidates, responses) = self.collect_candidates(&discovered, self_candidate).await;

        // Everyone we know about, including ourselves.
        let total = discovered.len() + 1;
        let required = total.div_ceil(2);
        if responses < required {
            warn!(responses, required, "election quorum not met");
            return Err(ElectionError::QuorumNotMet {
                responses,
                required,
            });
        }

        self.set_phase(ElectionPhase::Decided);
        let winner = decide_winner(&candidates)
            .cloned()
            .ok_or(ElectionError::NoCandidates)?;
        info!(winner = %winner.instance_id, "election decided");

        self.set_phase(ElectionPhase::Broadcasting);
        self.broadcast_result(&discovered, &winner.instance_id).await;

        Ok(ElectionOutcome { winner, candidates })
    }

    /// Find the surviving workers: ask the (possibly dying) master for
    /// its registry listing first, scan the worker port range otherwise.
    async fn discover_workers(&self) -> Vec<DiscoveredWorker> {
        if let Some(listed) = self.discover_via_registry().await {
            if !listed.is_empty() {
                return listed;
            }
        }
        self.scan_worker_range().await
    }

    async fn discover_via_registry(&self) -> Option<Vec<DiscoveredWorker>> {
        #[derive(serde::Deserialize)]
        struct Listing {
            workers: Vec<WorkerRecord>,
        }

        let url = format!(
            "http://127.0.0.1:{}/coordination/workers",
            self.config.master_port
        );
        let listing = self
            .client
            .get(&url)
            .send()
            .await
            .ok()?
            .json::<Listing>()
            .await
            .ok()?;

        Some(
            listing
                .workers
                .into_iter()
                .filter(|record| record.instance_id != self.self_id)
                .map(|record| DiscoveredWorker {
                    instance_id: record.instance_id,
                    port: record.port,
                })
                .collect(),
        )
    }

    /// Scan the worker port range for surviving workers.
    ///
    /// Peers advertising the master role are not workers (a stale master
    /// advertising its presence is not an election candidate).
    async fn scan_worker_range(&self) -> Vec<DiscoveredWorker> {
        scan_port_range(
            self.config.worker_port_start,
            self.config.worker_port_end,
            &self.self_id,
        )
        .await
        .into_iter()
        .filter(|peer| peer.role != Role::Master)
        .map(|peer| DiscoveredWorker {
            instance_id: peer.instance_id,
            port: peer.port,
        })
        .collect()
    }

    /// Fetch candidate descriptors from the discovered workers, bounded
    /// overall by the election timeout. Returns the candidate set (self
    /// included) and the number of responses received (self included).
    async fn collect_candidates(
        &self,
        discovered: &[DiscoveredWorker],
        self_candidate: ElectionCandidate,
    ) -> (Vec<ElectionCandidate>, usize) {
        let mut tasks: JoinSet<Option<ElectionCandidate>> = JoinSet::new();
        for worker in discovered {
            let client = self.client.clone();
            let port = worker.port;
            tasks.spawn(async move {
                let url = format!("http://127.0.0.1:{port}/election/candidate");
                client
                    .get(&url)
                    .send()
                    .await
                    .ok()?
                    .json::<ElectionCandidate>()
                    .await
                    .ok()
            });
        }

        let mut candidates = vec![self_candidate];
        let mut responses = 1usize;

        // On timeout, evaluate with whatever responses arrived.
        let deadline = tokio::time::sleep(self.config.election_timeout);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                joined = tasks.join_next() => match joined {
                    Some(Ok(Some(candidate))) => {
                        responses += 1;
                        candidates.push(candidate);
                    }
                    Some(Ok(None)) | Some(Err(_)) => {}
                    None => break,
                },
                _ = &mut deadline => {
                    debug!("candidate collection timed out");
                    tasks.abort_all();
                    break;
                }
            }
        }

        (candidates, responses)
    }

    /// Tell every discovered worker (except the winner) who won.
    /// Failures are logged and ignored; losers discover the new master
    /// through their own health loop.
    async fn broadcast_result(&self, discovered: &[DiscoveredWorker], winner: &InstanceId) {
        let message = ElectionMessage::MasterElected {
            from_instance_id: self.self_id.clone(),
            timestamp: Utc::now(),
            new_master_id: winner.clone(),
        };

        let mut tasks: JoinSet<()> = JoinSet::new();
        for worker in discovered {
            if &worker.instance_id == winner {
                continue;
            }
            let client = self.client.clone();
            let message = message.clone();
            let port = worker.port;
            let target = worker.instance_id.clone();
            tasks.spawn(async move {
                let url = format!("http://127.0.0.1:{port}/election/message");
                if let Err(err) = client.post(&url).json(&message).send().await {
                    warn!(worker = %target, error = %err, "election broadcast failed");
                }
            });
        }
        while tasks.join_next().await.is_some() {}
    }
}
