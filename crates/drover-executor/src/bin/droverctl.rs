// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! droverctl - Drover control-plane CLI
//!
//! Usage:
//!   droverctl task add --name <name> --command <cmd> [--nice N] [--timeout S]
//!   droverctl enqueue <task> [--queue <name>]
//!   droverctl executors [--queue <name>]
//!   droverctl request <executor-id> <stop|kill|pause|resume>
//!   droverctl instance <instance-id>
//!   droverctl instances [--executor <id>] [--limit N]

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use chrono::Utc;
use clap::{Parser, Subcommand};

use drover_core::{
    CommandTask, ControlPlane, DbQueue, InstanceRecord, Request, SqliteControlPlane, TaskRef,
    task::command::COMMAND_KIND,
};

#[derive(Debug, Parser)]
#[command(name = "droverctl", version, about = "Inspect and steer a drover control plane")]
struct Cli {
    /// Control-plane database
    #[arg(long, env = "DROVER_DATABASE_URL")]
    database_url: String,

    /// Heartbeat age in seconds after which an executor counts as dead
    #[arg(long, env = "DROVER_LIVENESS_SECS", default_value_t = 30)]
    liveness_secs: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Manage command tasks
    Task {
        #[command(subcommand)]
        command: TaskCommand,
    },

    /// Create an instance of a command task and put it on a queue
    Enqueue {
        /// Task id or name
        task: String,

        #[arg(long, default_value = "default")]
        queue: String,
    },

    /// List executors
    Executors {
        /// Only executors pulling from this queue
        #[arg(long)]
        queue: Option<String>,
    },

    /// Send a request to an executor
    Request {
        executor_id: String,

        /// stop, kill, pause or resume
        request: Request,
    },

    /// Show one instance
    Instance { instance_id: String },

    /// List recent instances
    Instances {
        /// Only instances run by this executor
        #[arg(long)]
        executor: Option<String>,

        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
}

#[derive(Debug, Subcommand)]
enum TaskCommand {
    /// Register a shell command task
    Add {
        #[arg(long)]
        name: String,

        /// Command template; may use $DROVER_TMP_DIR, $LOCAL{..} and $UTC{..}
        #[arg(long)]
        command: String,

        #[arg(long, default_value = "")]
        description: String,

        #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
        nice: i32,

        /// Timeout in seconds, 0 for none
        #[arg(long, default_value_t = 0)]
        timeout: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let control = SqliteControlPlane::connect(&cli.database_url)
        .await
        .context("Failed to open control plane")?;

    match cli.command {
        Command::Task {
            command:
                TaskCommand::Add {
                    name,
                    command,
                    description,
                    nice,
                    timeout,
                },
        } => {
            let task = CommandTask::new(name, command)
                .with_description(description)
                .with_nice(nice)
                .with_timeout(timeout);
            control.create_command_task(&task).await?;
            println!("{}", task.task_id);
        }

        Command::Enqueue { task, queue } => {
            let Some(task) = control.get_command_task(&task).await? else {
                bail!("No command task with id or name '{}'", task);
            };
            let instance = InstanceRecord::new(TaskRef::new(COMMAND_KIND, &task.task_id));
            control.create_instance(&instance).await?;

            let control: Arc<dyn ControlPlane> = Arc::new(control);
            DbQueue::new(&queue, control)
                .push(&instance.instance_id)
                .await?;
            println!("{}", instance.instance_id);
        }

        Command::Executors { queue } => {
            let now = Utc::now();
            let window = Duration::from_secs(cli.liveness_secs);
            println!(
                "{:<36}  {:<16}  {:<12}  {:<8}  {:<7}  {:>4}  {:<5}  HEARTBEAT",
                "EXECUTOR", "HOST", "QUEUE", "STATUS", "REQUEST", "CONC", "ALIVE"
            );
            for executor in control.list_executors(queue.as_deref()).await? {
                println!(
                    "{:<36}  {:<16}  {:<12}  {:<8}  {:<7}  {:>4}  {:<5}  {}",
                    executor.executor_id,
                    executor.host,
                    executor.queue_name,
                    executor.status,
                    executor
                        .request
                        .map(|r| r.to_string())
                        .unwrap_or_else(|| "-".to_string()),
                    executor.concurrent,
                    executor.is_alive(now, window),
                    executor
                        .heartbeat
                        .map(|h| h.to_rfc3339())
                        .unwrap_or_else(|| "-".to_string()),
                );
            }
        }

        Command::Request {
            executor_id,
            request,
        } => {
            let Some(executor) = control.get_executor(&executor_id).await? else {
                bail!("Executor '{}' not found", executor_id);
            };
            if executor.status.is_terminal() {
                bail!("Executor {} is already {}", executor_id, executor.status);
            }
            control
                .set_executor_request(&executor_id, Some(request))
                .await?;
            println!("{} requested for {}", request, executor);
        }

        Command::Instance { instance_id } => {
            let Some(instance) = control.get_instance(&instance_id).await? else {
                bail!("Instance '{}' not found", instance_id);
            };
            println!("{}", serde_json::to_string_pretty(&instance)?);
        }

        Command::Instances { executor, limit } => {
            println!(
                "{:<36}  {:<8}  {:<11}  {:<25}  END",
                "INSTANCE", "KIND", "STATUS", "START"
            );
            for instance in control.list_instances(executor.as_deref(), limit).await? {
                println!(
                    "{:<36}  {:<8}  {:<11}  {:<25}  {}",
                    instance.instance_id,
                    instance.task.kind,
                    instance.status,
                    instance
                        .start_date
                        .map(|d| d.to_rfc3339())
                        .unwrap_or_else(|| "-".to_string()),
                    instance
                        .end_date
                        .map(|d| d.to_rfc3339())
                        .unwrap_or_else(|| "-".to_string()),
                );
            }
        }
    }

    Ok(())
}
