// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Fleet - one endpoint, many editors.
//!
//! Fleet federates multiple concurrently-running editor instances on a
//! single host behind one inbound MCP tool endpoint. One instance runs
//! as *master*, owning the worker registry and the inbound surface;
//! the others register as *workers* and execute the tool calls routed to
//! them; an instance that cannot or should not coordinate runs
//! *standalone*.
//!
//! # Architecture
//!
//! The crate is organized into the following modules:
//!
//! - [`types`] - Core type definitions (InstanceId, Role, WorkerRecord, ...)
//! - [`error`] - Error types and result alias
//! - [`config`] - Configuration loading, merging, and validation
//! - [`telemetry`] - Tracing initialization
//! - [`probe`] - Loopback port and master-health probes
//! - [`role`] - Initial role detection
//! - [`local`] - Seams to the editor integration (tool executor, adapter)
//! - [`registry`] - Master-side worker registry with heartbeat reaping
//! - [`remote`] - Master-to-worker tool invocation with retries
//! - [`router`] - Routing classes, target selection, aggregated merges
//! - [`master`] - Master core and coordination HTTP surface
//! - [`worker`] - Worker core, its HTTP surface, and lifecycle loops
//! - [`election`] - Leader election with discovery, quorum, broadcast
//! - [`supervisor`] - Role lifecycle orchestration and transitions
//! - [`mcp`] - Inbound session-oriented MCP transport
//!
//! # Example
//!
//! ```rust,ignore
//! use fleet::config::{load_config, CliOptions};
//! use fleet::local::{BuiltinToolExecutor, StaticWorkspaceAdapter};
//! use fleet::supervisor::ModeSupervisor;
//! use fleet::types::InstanceId;
//!
//! let config = load_config(std::path::Path::new("."), CliOptions::default())?;
//! let adapter = std::sync::Arc::new(StaticWorkspaceAdapter::new(
//!     config.workspace_name.clone(),
//!     config.workspace_root.clone(),
//! ));
//! let local = std::sync::Arc::new(BuiltinToolExecutor::new(adapter.clone()));
//! let supervisor = ModeSupervisor::new(InstanceId::generate(), config, adapter, local);
//! ```

pub mod config;
pub mod election;
pub mod error;
pub mod local;
pub mod master;
pub mod mcp;
pub mod probe;
pub mod registry;
pub mod remote;
pub mod role;
pub mod router;
pub mod supervisor;
pub mod telemetry;
pub mod types;
pub mod worker;

// Re-export commonly used types at crate root
pub use error::{
    ConfigError, ElectionError, ProbeError, RegistryError, RemoteError, Result, RouteError,
    SupervisorError, TransportError,
};
pub use types::{
    InstanceId, MasterStatus, Role, RouteTarget, ToolResult, WorkerActivity, WorkerRecord,
};

/// Fleet version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_public_exports() {
        let _id = InstanceId::generate();
        let _result = ToolResult::failure("test");
    }
}
