// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! drover-worker - runs one instance.
//!
//! Launched by droverd as `drover-worker --kind <kind> --instance-id <id>`.
//! SIGTERM or SIGINT interrupts the running task; the instance is then
//! finished as INTERRUPTED before the process exits. The handlers go in
//! first, so this also holds for a signal that arrives during startup.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use drover_core::{
    CommandTaskSource, ControlPlane, InstanceKey, InstanceStatus, SqliteControlPlane, TaskRegistry,
};
use drover_executor::lifecycle::InstanceRunner;

#[derive(Debug, Parser)]
#[command(name = "drover-worker", version, about = "Run one drover instance")]
struct Args {
    /// Task kind of the instance
    #[arg(long)]
    kind: String,

    /// Instance to run
    #[arg(long = "instance-id")]
    instance_id: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // Before anything slow: a SIGTERM during startup must still end the
    // instance as INTERRUPTED instead of killing the process outright.
    let cancel = CancellationToken::new();
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let trip = cancel.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => info!("SIGTERM received"),
            _ = sigint.recv() => info!("SIGINT received"),
        }
        trip.cancel();
    });

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "drover_executor=info,drover_core=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    let args = Args::parse();
    let config = drover_core::Config::from_env()?;
    let redirect_output = drover_core::config::parse_bool("DROVER_REDIRECT_OUTPUT", true)?;

    let control: Arc<dyn ControlPlane> =
        Arc::new(SqliteControlPlane::connect(&config.database_url).await?);

    let registry = TaskRegistry::new().with(Arc::new(CommandTaskSource::new(control.clone())));
    anyhow::ensure!(
        registry.contains(&args.kind),
        "no task source for kind '{}'",
        args.kind
    );

    let runner = InstanceRunner::new(control, registry, &config.log_dir)
        .with_log_debug(config.log_debug)
        .with_redirect_output(redirect_output)
        .with_settings(config.settings());

    let key = InstanceKey {
        kind: args.kind,
        instance_id: args.instance_id,
    };
    let status = runner.run(&key, cancel).await?;

    Ok(if status == InstanceStatus::Success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
