// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration module.
//!
//! Handles loading, merging, and validation of coordination configuration
//! from multiple sources, merged with precedence
//! (CLI > workspace file > defaults).

mod loader;
mod types;

pub use loader::{load_config_file, load_workspace_config, CONFIG_FILES};
pub use types::{
    CliOptions, CoordinationConfig, FileConfig, DEFAULT_ELECTION_TIMEOUT,
    DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_MASTER_HEALTH_INTERVAL, DEFAULT_MASTER_PORT,
    DEFAULT_REGISTRATION_TIMEOUT, DEFAULT_SCORE_THRESHOLD, DEFAULT_WORKER_PORT_END,
    DEFAULT_WORKER_PORT_START,
};

use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;

/// Load, merge, and validate configuration for a workspace.
///
/// This is the main entry point for configuration loading.
pub fn load_config(
    workspace_root: &Path,
    cli: CliOptions,
) -> Result<CoordinationConfig, ConfigError> {
    let file = load_workspace_config(workspace_root)?;
    let config = merge_config(workspace_root, file, cli);
    config.validate()?;
    Ok(config)
}

/// Merge file config and CLI options over defaults.
pub fn merge_config(
    workspace_root: &Path,
    file: Option<FileConfig>,
    cli: CliOptions,
) -> CoordinationConfig {
    let file = file.unwrap_or_default();
    let defaults = CoordinationConfig::default();

    let workspace_root = cli
        .workspace
        .clone()
        .unwrap_or_else(|| workspace_root.to_path_buf());

    let workspace_name = cli
        .workspace_name
        .or(file.workspace_name)
        .unwrap_or_else(|| derive_workspace_name(&workspace_root));

    CoordinationConfig {
        enabled: if cli.no_coordination {
            false
        } else {
            file.coordination.unwrap_or(defaults.enabled)
        },
        forced_role: cli.role.or(file.role),
        master_port: cli
            .master_port
            .or(file.master_port)
            .unwrap_or(defaults.master_port),
        worker_port_start: cli
            .worker_port_start
            .or(file.worker_port_start)
            .unwrap_or(defaults.worker_port_start),
        worker_port_end: cli
            .worker_port_end
            .or(file.worker_port_end)
            .unwrap_or(defaults.worker_port_end),
        heartbeat_interval: file
            .heartbeat_interval_secs
            .map(Duration::from_secs)
            .unwrap_or(defaults.heartbeat_interval),
        master_health_interval: file
            .master_health_interval_secs
            .map(Duration::from_secs)
            .unwrap_or(defaults.master_health_interval),
        registration_timeout: file
            .registration_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(defaults.registration_timeout),
        election_timeout: file
            .election_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(defaults.election_timeout),
        workspace_score_threshold: file
            .workspace_score_threshold
            .unwrap_or(defaults.workspace_score_threshold),
        workspace_root,
        workspace_name,
    }
}

/// Derive a workspace display name from its root directory.
fn derive_workspace_name(root: &Path) -> String {
    root.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "workspace".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Role;
    use std::path::PathBuf;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_without_file_or_cli() {
        let dir = TempDir::new().unwrap();
        let config = load_config(dir.path(), CliOptions::default()).unwrap();
        assert!(config.enabled);
        assert_eq!(config.master_port, DEFAULT_MASTER_PORT);
        assert_eq!(config.heartbeat_interval, Duration::from_secs(5));
    }

    #[test]
    fn test_cli_overrides_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(".fleet.json"), r#"{"masterPort": 9300}"#).unwrap();

        let cli = CliOptions {
            master_port: Some(9500),
            ..Default::default()
        };
        let config = load_config(dir.path(), cli).unwrap();
        assert_eq!(config.master_port, 9500);
    }

    #[test]
    fn test_no_coordination_flag_wins() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(".fleet.json"), r#"{"coordination": true}"#).unwrap();

        let cli = CliOptions {
            no_coordination: true,
            ..Default::default()
        };
        let config = load_config(dir.path(), cli).unwrap();
        assert!(!config.enabled);
    }

    #[test]
    fn test_forced_role_from_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(".fleet.json"), r#"{"role": "worker"}"#).unwrap();

        let config = load_config(dir.path(), CliOptions::default()).unwrap();
        assert_eq!(config.forced_role, Some(Role::Worker));
    }

    #[test]
    fn test_invalid_range_is_fatal() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(".fleet.json"),
            r#"{"workerPortStart": 9300, "workerPortEnd": 9200}"#,
        )
        .unwrap();

        let result = load_config(dir.path(), CliOptions::default());
        assert!(matches!(result, Err(ConfigError::InvalidPortRange { .. })));
    }

    #[test]
    fn test_workspace_name_derived_from_root() {
        let config = merge_config(
            &PathBuf::from("/home/dev/api"),
            None,
            CliOptions::default(),
        );
        assert_eq!(config.workspace_name, "api");
    }
}
