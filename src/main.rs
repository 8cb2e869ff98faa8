// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Fleet main entry point - CLI and process lifecycle.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use fleet::config::{self, CliOptions};
use fleet::local::{BuiltinToolExecutor, StaticWorkspaceAdapter};
use fleet::supervisor::ModeSupervisor;
use fleet::telemetry::{self, TelemetryConfig};
use fleet::types::{InstanceId, Role};

/// Fleet - one endpoint, many editors.
#[derive(Parser)]
#[command(name = "fleet")]
#[command(author, version, about = "Federates editor instances behind one MCP endpoint", long_about = None)]
struct Cli {
    /// Workspace root for this instance
    #[arg(short, long, env = "FLEET_WORKSPACE")]
    workspace: Option<PathBuf>,

    /// Workspace display name
    #[arg(long, env = "FLEET_WORKSPACE_NAME")]
    workspace_name: Option<String>,

    /// Master port
    #[arg(long, env = "FLEET_MASTER_PORT")]
    master_port: Option<u16>,

    /// First port of the worker range
    #[arg(long, env = "FLEET_WORKER_PORT_START")]
    worker_port_start: Option<u16>,

    /// Last port of the worker range
    #[arg(long, env = "FLEET_WORKER_PORT_END")]
    worker_port_end: Option<u16>,

    /// Disable coordination and run standalone
    #[arg(long)]
    no_coordination: bool,

    /// Force a role instead of detecting one
    #[arg(long, value_enum)]
    role: Option<RoleArg>,

    /// Show debug output
    #[arg(long)]
    debug: bool,
}

/// Forced roles available on the command line.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum RoleArg {
    /// Serve the inbound endpoint and own the registry
    Master,
    /// Register with a master and execute routed calls
    Worker,
    /// Serve local tool calls only
    Standalone,
}

impl From<RoleArg> for Role {
    fn from(arg: RoleArg) -> Self {
        match arg {
            RoleArg::Master => Role::Master,
            RoleArg::Worker => Role::Worker,
            RoleArg::Standalone => Role::Standalone,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let telemetry_config = if cli.debug {
        TelemetryConfig::development()
    } else {
        TelemetryConfig::default()
    };
    let _ = telemetry::init(&telemetry_config);

    let workspace_root = cli
        .workspace
        .clone()
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));

    let options = CliOptions {
        no_coordination: cli.no_coordination,
        role: cli.role.map(Role::from),
        master_port: cli.master_port,
        worker_port_start: cli.worker_port_start,
        worker_port_end: cli.worker_port_end,
        workspace: Some(workspace_root.clone()),
        workspace_name: cli.workspace_name,
    };

    let config = match config::load_config(&workspace_root, options) {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "configuration is invalid");
            std::process::exit(1);
        }
    };

    let instance_id = InstanceId::generate();
    info!(instance = %instance_id, workspace = %config.workspace_name, "fleet starting");

    let adapter = Arc::new(StaticWorkspaceAdapter::new(
        config.workspace_name.clone(),
        config.workspace_root.clone(),
    ));
    let local = Arc::new(BuiltinToolExecutor::new(adapter.clone()));
    let supervisor = ModeSupervisor::new(instance_id, config, adapter, local);

    let shutdown = CancellationToken::new();
    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            signal_shutdown.cancel();
        }
    });

    if let Err(err) = supervisor.run(shutdown).await {
        error!(error = %err, "fleet exited with error");
        std::process::exit(1);
    }
}
