// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Error types for the coordination plane.
//!
//! This module provides strongly-typed errors for each subsystem, using
//! `thiserror` for ergonomic error definitions and `anyhow` for error
//! propagation at the application boundary.
//!
//! Background tasks (timers, scans, broadcasts) log and absorb their
//! errors; request-path errors are surfaced to the inbound caller. The
//! only condition that is fatal at runtime is the inability to bind any
//! master or worker port.

use thiserror::Error;

use crate::types::InstanceId;

/// Errors that can occur during configuration loading and validation.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(String),

    #[error("Invalid config format: {0}")]
    InvalidFormat(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("Invalid port range: {start}..={end}")]
    InvalidPortRange { start: u16, end: u16 },

    #[error("IO error reading config: {0}")]
    IoError(String),

    #[error("YAML parsing error: {0}")]
    YamlError(String),

    #[error("JSON parsing error: {0}")]
    JsonError(String),
}

impl ConfigError {
    /// Create an invalid-value error.
    pub fn invalid_value(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(err.to_string()),
            _ => Self::IoError(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        Self::JsonError(err.to_string())
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::YamlError(err.to_string())
    }
}

/// Errors from port probing.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("No available port in range {start}..={end}")]
    NoAvailablePort { start: u16, end: u16 },

    #[error("IO error while probing: {0}")]
    IoError(String),
}

impl From<std::io::Error> for ProbeError {
    fn from(err: std::io::Error) -> Self {
        Self::IoError(err.to_string())
    }
}

/// Errors from worker registry operations.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Invalid registration: {0}")]
    InvalidRegistration(String),

    #[error("Worker port {port} is not reachable on loopback")]
    PortUnreachable { port: u16 },

    #[error("Worker not found: {0}")]
    WorkerNotFound(InstanceId),
}

/// Errors from master-to-worker remote execution.
#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("Worker {instance_id} unreachable after {attempts} attempts: {last_error}")]
    WorkerUnreachable {
        instance_id: InstanceId,
        attempts: u32,
        last_error: String,
    },

    #[error("Protocol error from worker {instance_id}: {message}")]
    Protocol {
        instance_id: InstanceId,
        message: String,
    },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Timeout after {0}ms")]
    Timeout(u64),
}

impl RemoteError {
    /// Whether another attempt could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout(_))
    }
}

/// Errors from tool routing.
#[derive(Error, Debug)]
pub enum RouteError {
    #[error("All workers and local failed for tool {tool}")]
    AllBranchesFailed { tool: String },

    #[error("No execution target for tool {tool}")]
    NoTarget { tool: String },

    #[error("Remote execution failed: {0}")]
    Remote(#[from] RemoteError),

    #[error("Local execution failed: {0}")]
    Local(String),
}

/// Errors from leader election.
#[derive(Error, Debug)]
pub enum ElectionError {
    #[error("An election is already in progress")]
    AlreadyInProgress,

    #[error("Quorum not met: {responses} responses of {required} required")]
    QuorumNotMet { responses: usize, required: usize },

    #[error("No candidates discovered")]
    NoCandidates,

    #[error("Election aborted")]
    Aborted,

    #[error("Network error during election: {0}")]
    Network(String),
}

/// Errors from the inbound transport and coordination HTTP surfaces.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Malformed request: {0}")]
    Malformed(String),

    #[error("Unknown session: {0}")]
    UnknownSession(String),

    #[error("Unsupported method: {0}")]
    UnsupportedMethod(String),

    #[error("Failed to bind {addr}: {message}")]
    BindFailed { addr: String, message: String },
}

/// Errors from role lifecycle transitions.
#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("A role transition is already in progress")]
    TransitionInProgress,

    #[error("Failed to start {role}: {message}")]
    StartFailed { role: String, message: String },
}

/// Result type alias using anyhow for flexible error handling.
pub type Result<T> = anyhow::Result<T>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_error_retryable() {
        assert!(RemoteError::Network("refused".to_string()).is_retryable());
        assert!(RemoteError::Timeout(30_000).is_retryable());
        assert!(!RemoteError::Protocol {
            instance_id: InstanceId::from("w1"),
            message: "bad schema".to_string(),
        }
        .is_retryable());
    }

    #[test]
    fn test_config_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let config_err: ConfigError = io_err.into();
        assert!(matches!(config_err, ConfigError::NotFound(_)));
    }

    #[test]
    fn test_config_error_from_json() {
        let result: std::result::Result<serde_json::Value, _> = serde_json::from_str("not json");
        let config_err: ConfigError = result.unwrap_err().into();
        assert!(matches!(config_err, ConfigError::JsonError(_)));
    }

    #[test]
    fn test_route_error_from_remote() {
        let remote = RemoteError::Timeout(30_000);
        let route: RouteError = remote.into();
        assert!(matches!(route, RouteError::Remote(_)));
    }

    #[test]
    fn test_error_display() {
        let err = ElectionError::QuorumNotMet {
            responses: 1,
            required: 2,
        };
        let display = format!("{}", err);
        assert!(display.contains("1 responses"));
        assert!(display.contains("2 required"));
    }

    #[test]
    fn test_invalid_port_range_display() {
        let err = ConfigError::InvalidPortRange {
            start: 9199,
            end: 9101,
        };
        assert!(format!("{}", err).contains("9199..=9101"));
    }
}
