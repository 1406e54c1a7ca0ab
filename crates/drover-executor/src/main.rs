// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! droverd - Drover Executor Daemon
//!
//! Registers an executor for one queue and supervises worker processes until
//! the executor reaches a terminal status. Ctrl-C asks the executor to stop
//! (drain running workers); a second Ctrl-C asks it to kill them.

use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};

use drover_core::{ControlPlane, DbQueue, ExecutorStatus, Request, SqliteControlPlane};
use drover_executor::config::Config;
use drover_executor::executor::{self, Executor};
use drover_executor::pool::{Launcher, ProcessLauncher, ProcessLauncherConfig};

#[derive(Debug, Parser)]
#[command(name = "droverd", version, about = "Drover executor daemon")]
struct Args {
    /// Queue to pull instances from (overrides DROVER_QUEUE)
    #[arg(long)]
    queue: Option<String>,

    /// Maximum simultaneous workers (overrides DROVER_CONCURRENT)
    #[arg(long)]
    concurrent: Option<u32>,

    /// Tick period in milliseconds (overrides DROVER_TICK_MS)
    #[arg(long)]
    tick_ms: Option<u64>,

    /// Host name recorded on the executor
    #[arg(long)]
    host: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "drover_executor=info,drover_core=info,droverd=info".into()),
        )
        .init();

    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    let args = Args::parse();

    let mut config = Config::from_env()?;
    if let Some(queue) = args.queue {
        config.queue_name = queue;
    }
    if let Some(concurrent) = args.concurrent {
        anyhow::ensure!(concurrent > 0, "--concurrent must be at least 1");
        config.concurrent = concurrent;
    }
    if let Some(tick_ms) = args.tick_ms {
        anyhow::ensure!(tick_ms > 0, "--tick-ms must be positive");
        config.tick = std::time::Duration::from_millis(tick_ms);
    }
    let host = args.host.unwrap_or_else(drover_executor::hostname);

    info!(
        queue = %config.queue_name,
        concurrent = config.concurrent,
        tick_ms = config.tick.as_millis() as u64,
        worker = %config.worker_bin.display(),
        log_dir = %config.core.log_dir.display(),
        "Starting Drover executor"
    );

    let control: Arc<dyn ControlPlane> =
        Arc::new(SqliteControlPlane::connect(&config.core.database_url).await?);
    info!("Connected to control plane");

    let now = chrono::Utc::now();
    for other in control.list_executors(Some(&config.queue_name)).await? {
        if other.status == ExecutorStatus::Running && !other.is_alive(now, config.liveness_window) {
            warn!(
                executor = %other,
                heartbeat = ?other.heartbeat,
                "Executor on this queue is RUNNING but its heartbeat is stale"
            );
        }
    }

    let launcher = ProcessLauncher::new(
        ProcessLauncherConfig::new(&config.worker_bin)
            .env("DROVER_DATABASE_URL", &config.core.database_url)
            .env("DROVER_LOG_DIR", config.core.log_dir.display().to_string())
            .env("DROVER_REDIRECT_OUTPUT", config.redirect_output.to_string()),
    );
    info!(launcher = launcher.launcher_type(), "Launcher initialized");

    let record =
        executor::register(control.as_ref(), host, &config.queue_name, config.concurrent).await?;
    let executor_id = record.executor_id.clone();

    let executor = Executor::builder()
        .control(control.clone())
        .queue(Arc::new(DbQueue::new(&config.queue_name, control.clone())))
        .launcher(Arc::new(launcher))
        .backup(config.core.log_backup())
        .backup_concurrency(config.backup_concurrency)
        .log_dir(&config.core.log_dir)
        .tick(config.tick)
        .build(record)?;

    tokio::spawn(async move {
        for request in [Request::Stop, Request::Kill] {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            info!(request = %request, "Shutdown signal received");
            if let Err(e) = control
                .set_executor_request(&executor_id, Some(request))
                .await
            {
                error!(error = %e, "Failed to write shutdown request");
            }
        }
    });

    let status = executor.run().await?;

    info!(status = %status, "Drover executor shut down");

    Ok(())
}
