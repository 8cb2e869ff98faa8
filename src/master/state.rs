// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Master-side call history and performance tracking.
//!
//! Both are updated only by the tool-call completion path.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::RouteTarget;

/// Ring-buffer capacity for the tool-call history.
pub const HISTORY_CAPACITY: usize = 100;

/// One completed tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallLog {
    /// Unique call id.
    pub id: String,
    /// Tool name.
    pub tool: String,
    /// Call parameters.
    pub params: serde_json::Value,
    /// Result value on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Error message on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Master-observed start time; history is ordered by this.
    pub timestamp: DateTime<Utc>,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
    /// Where the call executed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub routed_to: Option<RouteTarget>,
}

/// Bounded history of recent tool calls. Inserting past capacity drops
/// the oldest entry.
#[derive(Debug)]
pub struct CallHistory {
    entries: VecDeque<ToolCallLog>,
    capacity: usize,
}

impl CallHistory {
    /// Create a history with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(HISTORY_CAPACITY)
    }

    /// Create a history with a custom capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append an entry, dropping the oldest when full.
    pub fn push(&mut self, entry: ToolCallLog) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// Number of retained entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the history is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The most recent `limit` entries, newest last.
    pub fn recent(&self, limit: usize) -> Vec<ToolCallLog> {
        let skip = self.entries.len().saturating_sub(limit);
        self.entries.iter().skip(skip).cloned().collect()
    }
}

impl Default for CallHistory {
    fn default() -> Self {
        Self::new()
    }
}

/// Rolling performance metrics over all handled tool calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceMetrics {
    /// Calls handled since this master started.
    pub total_calls: u64,
    /// Fraction of calls that completed without error.
    pub success_rate: f64,
    /// Rolling average response time in milliseconds.
    pub avg_response_ms: f64,
    /// When the metrics were last updated.
    pub updated_at: DateTime<Utc>,
}

/// Accumulates performance metrics one completion at a time.
#[derive(Debug)]
pub struct PerformanceTracker {
    total: u64,
    successes: u64,
    avg_response_ms: f64,
    updated_at: DateTime<Utc>,
}

impl PerformanceTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self {
            total: 0,
            successes: 0,
            avg_response_ms: 0.0,
            updated_at: Utc::now(),
        }
    }

    /// Record one completed call.
    pub fn record(&mut self, duration_ms: u64, success: bool) {
        self.total += 1;
        if success {
            self.successes += 1;
        }
        // Incremental rolling average.
        self.avg_response_ms += (duration_ms as f64 - self.avg_response_ms) / self.total as f64;
        self.updated_at = Utc::now();
    }

    /// Current metrics snapshot.
    pub fn snapshot(&self) -> PerformanceMetrics {
        PerformanceMetrics {
            total_calls: self.total,
            success_rate: if self.total == 0 {
                1.0
            } else {
                self.successes as f64 / self.total as f64
            },
            avg_response_ms: self.avg_response_ms,
            updated_at: self.updated_at,
        }
    }
}

impl Default for PerformanceTracker {
    fn default() -> Self {
        Self::new()
    }
}
