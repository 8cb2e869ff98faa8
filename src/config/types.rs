// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration type definitions.
//!
//! Defines the structure of the on-disk coordination config and the
//! resolved configuration used by the rest of the crate, supporting JSON
//! and YAML formats.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::Role;

/// Default master port.
pub const DEFAULT_MASTER_PORT: u16 = 9100;

/// Default worker port range (inclusive).
pub const DEFAULT_WORKER_PORT_START: u16 = 9101;
pub const DEFAULT_WORKER_PORT_END: u16 = 9199;

/// Default heartbeat cadence handed to workers.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// Default master-health probe cadence at workers.
pub const DEFAULT_MASTER_HEALTH_INTERVAL: Duration = Duration::from_secs(3);

/// Default timeout for worker registration calls.
pub const DEFAULT_REGISTRATION_TIMEOUT: Duration = Duration::from_secs(10);

/// Default bound on the election candidate-collection phase.
pub const DEFAULT_ELECTION_TIMEOUT: Duration = Duration::from_secs(5);

/// Default workspace-score threshold for degraded-master promotion.
pub const DEFAULT_SCORE_THRESHOLD: f64 = 10.0;

/// Workspace configuration file contents.
///
/// Can be defined in `.fleet.json`, `.fleet.yaml`, or `.fleet/config.json`
/// in the workspace root. Every field is optional; absent fields fall back
/// to CLI options and then defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileConfig {
    /// Whether multi-instance coordination is enabled at all.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coordination: Option<bool>,

    /// Force a specific role instead of detecting one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,

    /// Master port.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub master_port: Option<u16>,

    /// First port of the worker range (inclusive).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_port_start: Option<u16>,

    /// Last port of the worker range (inclusive).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_port_end: Option<u16>,

    /// Heartbeat interval in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heartbeat_interval_secs: Option<u64>,

    /// Master-health probe interval in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub master_health_interval_secs: Option<u64>,

    /// Registration timeout in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registration_timeout_secs: Option<u64>,

    /// Election timeout in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub election_timeout_secs: Option<u64>,

    /// Workspace-score threshold for contesting a degraded master.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_score_threshold: Option<f64>,

    /// Workspace display name override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_name: Option<String>,
}

/// Options supplied on the command line.
///
/// These take precedence over the workspace file.
#[derive(Debug, Clone, Default)]
pub struct CliOptions {
    /// Disable coordination entirely.
    pub no_coordination: bool,
    /// Force a specific role.
    pub role: Option<Role>,
    /// Master port override.
    pub master_port: Option<u16>,
    /// Worker range start override.
    pub worker_port_start: Option<u16>,
    /// Worker range end override.
    pub worker_port_end: Option<u16>,
    /// Workspace root override.
    pub workspace: Option<PathBuf>,
    /// Workspace display name override.
    pub workspace_name: Option<String>,
}

/// Fully-resolved configuration used by the coordination plane.
#[derive(Debug, Clone)]
pub struct CoordinationConfig {
    /// Whether coordination is enabled; when false the instance runs
    /// standalone regardless of anything else.
    pub enabled: bool,
    /// Forced role, when configured.
    pub forced_role: Option<Role>,
    /// Master port.
    pub master_port: u16,
    /// Worker port range, inclusive.
    pub worker_port_start: u16,
    pub worker_port_end: u16,
    /// Heartbeat cadence handed to workers at registration.
    pub heartbeat_interval: Duration,
    /// Master-health probe cadence at workers.
    pub master_health_interval: Duration,
    /// Timeout for worker registration calls.
    pub registration_timeout: Duration,
    /// Bound on the election candidate-collection phase.
    pub election_timeout: Duration,
    /// Workspace-score threshold for contesting a degraded master.
    pub workspace_score_threshold: f64,
    /// Workspace root for this instance.
    pub workspace_root: PathBuf,
    /// Workspace display name for this instance.
    pub workspace_name: String,
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            forced_role: None,
            master_port: DEFAULT_MASTER_PORT,
            worker_port_start: DEFAULT_WORKER_PORT_START,
            worker_port_end: DEFAULT_WORKER_PORT_END,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            master_health_interval: DEFAULT_MASTER_HEALTH_INTERVAL,
            registration_timeout: DEFAULT_REGISTRATION_TIMEOUT,
            election_timeout: DEFAULT_ELECTION_TIMEOUT,
            workspace_score_threshold: DEFAULT_SCORE_THRESHOLD,
            workspace_root: PathBuf::from("."),
            workspace_name: "workspace".to_string(),
        }
    }
}

impl CoordinationConfig {
    /// Validate the resolved configuration.
    ///
    /// An invalid port range is fatal at startup.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_port_start > self.worker_port_end {
            return Err(ConfigError::InvalidPortRange {
                start: self.worker_port_start,
                end: self.worker_port_end,
            });
        }
        if self.master_port >= self.worker_port_start && self.master_port <= self.worker_port_end {
            return Err(ConfigError::invalid_value(
                "masterPort",
                format!(
                    "master port {} falls inside the worker range {}..={}",
                    self.master_port, self.worker_port_start, self.worker_port_end
                ),
            ));
        }
        if self.heartbeat_interval.is_zero() {
            return Err(ConfigError::invalid_value(
                "heartbeatIntervalSecs",
                "heartbeat interval must be non-zero",
            ));
        }
        Ok(())
    }

    /// Heartbeat-timeout cutoff: a worker unseen for longer than this is
    /// reaped.
    pub fn reap_cutoff(&self) -> Duration {
        self.heartbeat_interval * 3
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = CoordinationConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.master_port, 9100);
        assert_eq!(config.worker_port_start, 9101);
        assert_eq!(config.worker_port_end, 9199);
    }

    #[test]
    fn test_inverted_port_range_rejected() {
        let config = CoordinationConfig {
            worker_port_start: 9199,
            worker_port_end: 9101,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidPortRange { .. })
        ));
    }

    #[test]
    fn test_master_port_inside_worker_range_rejected() {
        let config = CoordinationConfig {
            master_port: 9150,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_reap_cutoff_is_three_heartbeats() {
        let config = CoordinationConfig::default();
        assert_eq!(config.reap_cutoff(), Duration::from_secs(15));
    }

    #[test]
    fn test_file_config_camel_case() {
        let json = r#"{"masterPort": 9200, "workerPortStart": 9201, "workerPortEnd": 9250}"#;
        let file: FileConfig = serde_json::from_str(json).unwrap();
        assert_eq!(file.master_port, Some(9200));
        assert_eq!(file.worker_port_start, Some(9201));
        assert_eq!(file.worker_port_end, Some(9250));
    }
}
