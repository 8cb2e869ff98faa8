// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Election wire types and the candidate comparator.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{InstanceId, WorkspaceInfo};

/// A candidate in a master election.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElectionCandidate {
    /// Candidate instance id; final tie-break, ascending.
    pub instance_id: InstanceId,
    /// Combined workspace score; higher wins.
    pub workspace_score: f64,
    /// Milliseconds since the candidate registered as a worker; higher
    /// wins.
    pub uptime: u64,
    /// Resource usage 0-100; lower wins.
    pub resource_usage: f64,
    /// Tool names the candidate can execute.
    pub capabilities: Vec<String>,
    /// When the candidate was last seen.
    pub last_seen: DateTime<Utc>,
    /// The candidate's workspace, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_info: Option<WorkspaceInfo>,
}

/// Messages exchanged between instances during an election.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum ElectionMessage {
    /// A new master has been decided.
    MasterElected {
        /// Sender instance id.
        from_instance_id: InstanceId,
        /// Send time.
        timestamp: DateTime<Utc>,
        /// The winning instance.
        new_master_id: InstanceId,
    },
    /// An election has begun; peers should not start a second one.
    ElectionStarted {
        /// Sender instance id.
        from_instance_id: InstanceId,
        /// Send time.
        timestamp: DateTime<Utc>,
    },
}

/// Acknowledgement for an election message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElectionAck {
    /// Whether the message was accepted.
    pub success: bool,
}

/// Phases of the election state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElectionPhase {
    Idle,
    Discovering,
    CollectingCandidates,
    Decided,
    Broadcasting,
}

/// Best-first candidate ordering.
///
/// Descending workspace score, then descending uptime, then ascending
/// resource usage, then ascending instance id. The instance-id leg makes
/// the comparator total, so a unique maximum always exists.
pub fn rank_candidates(a: &ElectionCandidate, b: &ElectionCandidate) -> Ordering {
    b.workspace_score
        .partial_cmp(&a.workspace_score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| b.uptime.cmp(&a.uptime))
        .then_with(|| {
            a.resource_usage
                .partial_cmp(&b.resource_usage)
                .unwrap_or(Ordering::Equal)
        })
        .then_with(|| a.instance_id.cmp(&b.instance_id))
}

/// Decide the winner among a candidate set.
pub fn decide_winner(candidates: &[ElectionCandidate]) -> Option<&ElectionCandidate> {
    candidates.iter().min_by(|a, b| rank_candidates(a, b))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(id: &str, score: f64, uptime: u64, usage: f64) -> ElectionCandidate {
        ElectionCandidate {
            instance_id: InstanceId::from(id),
            workspace_score: score,
            uptime,
            resource_usage: usage,
            capabilities: vec![],
            last_seen: Utc::now(),
            worker_info: None,
        }
    }

    #[test]
    fn test_highest_score_wins() {
        let candidates = vec![
            candidate("b", 10.0, 100, 50.0),
            candidate("a", 20.0, 1, 99.0),
        ];
        assert_eq!(
            decide_winner(&candidates).unwrap().instance_id,
            InstanceId::from("a")
        );
    }

    #[test]
    fn test_uptime_breaks_score_tie() {
        let candidates = vec![
            candidate("a", 10.0, 100, 50.0),
            candidate("b", 10.0, 200, 50.0),
        ];
        assert_eq!(
            decide_winner(&candidates).unwrap().instance_id,
            InstanceId::from("b")
        );
    }

    #[test]
    fn test_lower_resource_usage_breaks_uptime_tie() {
        let candidates = vec![
            candidate("a", 10.0, 100, 80.0),
            candidate("b", 10.0, 100, 20.0),
        ];
        assert_eq!(
            decide_winner(&candidates).unwrap().instance_id,
            InstanceId::from("b")
        );
    }

    #[test]
    fn test_instance_id_is_final_tiebreak() {
        let candidates = vec![
            candidate("zzz", 10.0, 100, 50.0),
            candidate("aaa", 10.0, 100, 50.0),
        ];
        assert_eq!(
            decide_winner(&candidates).unwrap().instance_id,
            InstanceId::from("aaa")
        );
    }

    #[test]
    fn test_winner_is_order_independent() {
        let mut candidates = vec![
            candidate("a", 5.0, 10, 10.0),
            candidate("b", 5.0, 20, 10.0),
            candidate("c", 7.0, 1, 90.0),
        ];
        let winner = decide_winner(&candidates).unwrap().instance_id.clone();
        candidates.reverse();
        assert_eq!(decide_winner(&candidates).unwrap().instance_id, winner);
        assert_eq!(winner, InstanceId::from("c"));
    }

    #[test]
    fn test_master_elected_wire_format() {
        let msg = ElectionMessage::MasterElected {
            from_instance_id: InstanceId::from("w1"),
            timestamp: Utc::now(),
            new_master_id: InstanceId::from("w2"),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"MASTER_ELECTED\""));
        assert!(json.contains("\"fromInstanceId\":\"w1\""));
        assert!(json.contains("\"newMasterId\":\"w2\""));
    }
}
