// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration loading from files.
//!
//! Handles loading the workspace coordination config from JSON and YAML
//! files in the workspace root.

use std::path::Path;

use crate::error::ConfigError;

use super::types::FileConfig;

/// Config file names to search for (in order).
pub const CONFIG_FILES: &[&str] = &[".fleet.json", ".fleet.yaml", ".fleet/config.json"];

/// Load the workspace configuration from the workspace root.
///
/// Searches `CONFIG_FILES` in order; returns `None` when no file exists.
pub fn load_workspace_config(workspace_root: &Path) -> Result<Option<FileConfig>, ConfigError> {
    for filename in CONFIG_FILES {
        let path = workspace_root.join(filename);
        if path.exists() {
            return load_config_file(&path).map(Some);
        }
    }
    Ok(None)
}

/// Load a configuration file (JSON or YAML, by extension).
pub fn load_config_file(path: &Path) -> Result<FileConfig, ConfigError> {
    let content = std::fs::read_to_string(path)?;

    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");

    match extension.to_lowercase().as_str() {
        "yaml" | "yml" => serde_yaml::from_str(&content).map_err(ConfigError::from),
        _ => serde_json::from_str(&content).map_err(ConfigError::from),
    }
}
