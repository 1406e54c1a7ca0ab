// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The executor loop.
//!
//! One [`Executor`] drives one executor record from RUNNING to a terminal
//! status. Each tick:
//!
//! 1. resolve the pending request, if any (one per tick)
//! 2. while RUNNING, pop and launch instances up to `concurrent`
//! 3. while STOPPING with an empty pool, move to ENDED
//! 4. reap exited workers and queue their log backups
//! 5. touch the heartbeat
//!
//! Between ticks the loop sleeps for the tick period and then re-reads the
//! request column, so a controller's request takes effect on the next tick.
//!
//! # Request handling
//!
//! | Request | Applies from | New status |
//! |---------|--------------|------------|
//! | PAUSE   | RUNNING | PAUSED |
//! | RESUME  | PAUSED | RUNNING |
//! | STOP    | RUNNING, PAUSED | STOPPING |
//! | KILL    | RUNNING, PAUSED, STOPPING | KILLED (workers get SIGTERM) |
//!
//! A request that does not apply is logged and cleared.
//!
//! # Writing the executor record
//!
//! `request` is written by external controllers. The executor only ever
//! clears it, through [`Executor::resolve_request`], which persists the new
//! status and clears the handled request in one compare-and-clear update.
//!
//! [`Executor::safe_save`] writes the executor-owned columns and leaves
//! `request` alone, then adopts whatever request is stored. If that re-read
//! fails the in-memory value is kept until the next refresh.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use drover_core::log::instance_log_path;
use drover_core::{
    ControlPlane, ExecutorRecord, ExecutorStatus, LogBackup, NoBackup, Queue, Request,
};
use tracing::{debug, error, info, warn};

use crate::backup_pool::{BackupPool, BackupSummary, DEFAULT_BACKUP_CONCURRENCY};
use crate::error::{Error, Result};
use crate::pool::{Launcher, ProcessPool, Reaped};

/// Default sleep between two ticks.
pub const DEFAULT_TICK: Duration = Duration::from_millis(1000);

/// Register a new executor in CREATED status.
pub async fn register(
    control: &dyn ControlPlane,
    host: impl Into<String>,
    queue_name: impl Into<String>,
    concurrent: u32,
) -> Result<ExecutorRecord> {
    if concurrent == 0 {
        return Err(Error::InvalidRequest(
            "concurrent must be at least 1".to_string(),
        ));
    }
    let record = ExecutorRecord::new(host, queue_name, concurrent);
    control.create_executor(&record).await?;
    info!(
        executor_id = %record.executor_id,
        host = %record.host,
        queue = %record.queue_name,
        concurrent = record.concurrent,
        "Executor registered"
    );
    Ok(record)
}

/// Builder for creating an [`Executor`].
pub struct ExecutorBuilder {
    control: Option<Arc<dyn ControlPlane>>,
    queue: Option<Arc<dyn Queue>>,
    launcher: Option<Arc<dyn Launcher>>,
    backup: Arc<dyn LogBackup>,
    backup_concurrency: usize,
    log_dir: PathBuf,
    tick: Duration,
}

impl Default for ExecutorBuilder {
    fn default() -> Self {
        Self {
            control: None,
            queue: None,
            launcher: None,
            backup: Arc::new(NoBackup),
            backup_concurrency: DEFAULT_BACKUP_CONCURRENCY,
            log_dir: PathBuf::from(".data/logs"),
            tick: DEFAULT_TICK,
        }
    }
}

impl ExecutorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the control plane (required).
    pub fn control(mut self, control: Arc<dyn ControlPlane>) -> Self {
        self.control = Some(control);
        self
    }

    /// Set the queue to pull from (required).
    pub fn queue(mut self, queue: Arc<dyn Queue>) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Set the worker launcher (required).
    pub fn launcher(mut self, launcher: Arc<dyn Launcher>) -> Self {
        self.launcher = Some(launcher);
        self
    }

    pub fn backup(mut self, backup: Arc<dyn LogBackup>) -> Self {
        self.backup = backup;
        self
    }

    pub fn backup_concurrency(mut self, n: usize) -> Self {
        self.backup_concurrency = n;
        self
    }

    /// Root of the instance logs, used to locate logs for backup.
    pub fn log_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_dir = path.into();
        self
    }

    pub fn tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Build an executor for `record`.
    pub fn build(self, record: ExecutorRecord) -> Result<Executor> {
        let control = self.control.ok_or(Error::MissingComponent("control"))?;
        let queue = self.queue.ok_or(Error::MissingComponent("queue"))?;
        let launcher = self.launcher.ok_or(Error::MissingComponent("launcher"))?;

        Ok(Executor {
            record,
            control,
            queue,
            pool: ProcessPool::new(launcher),
            backups: BackupPool::new(self.backup, self.backup_concurrency),
            log_dir: self.log_dir,
            tick: self.tick,
        })
    }
}

/// Supervises worker processes for one executor record.
pub struct Executor {
    record: ExecutorRecord,
    control: Arc<dyn ControlPlane>,
    queue: Arc<dyn Queue>,
    pool: ProcessPool,
    backups: BackupPool,
    log_dir: PathBuf,
    tick: Duration,
}

impl Executor {
    pub fn builder() -> ExecutorBuilder {
        ExecutorBuilder::new()
    }

    /// In-memory view of the executor record.
    pub fn record(&self) -> &ExecutorRecord {
        &self.record
    }

    pub fn status(&self) -> ExecutorStatus {
        self.record.status
    }

    pub fn pool(&self) -> &ProcessPool {
        &self.pool
    }

    /// Run until the status is terminal.
    ///
    /// A fault in the loop sets the status to ERROR, persists it and is
    /// returned. Pending log backups are awaited either way.
    pub async fn run(mut self) -> Result<ExecutorStatus> {
        if self.record.status.is_terminal() {
            return Err(Error::AlreadyTerminal {
                executor_id: self.record.executor_id.clone(),
                status: self.record.status,
            });
        }

        let outcome = self.run_loop().await;

        let result = match outcome {
            Ok(()) => {
                info!(executor = %self.record, status = %self.record.status, "Executor finished");
                Ok(self.record.status)
            }
            Err(e) => {
                error!(executor = %self.record, error = %e, "Executor loop failed");
                self.record.status = ExecutorStatus::Error;
                if let Err(save_err) = self.safe_save().await {
                    error!(error = %save_err, "Failed to persist ERROR status");
                }
                Err(e)
            }
        };

        // Pick up workers that already exited so their logs get archived.
        self.reap().await;
        if !self.pool.is_empty() {
            warn!(
                remaining = self.pool.len(),
                "Leaving workers running at executor exit"
            );
        }

        let BackupSummary { succeeded, failed } = self.backups.join().await;
        debug!(succeeded, failed, "Log backups joined");

        result
    }

    /// Move a CREATED executor to RUNNING and persist it.
    ///
    /// Any other status is left as is, so a restarted loop picks up where the
    /// record says it is.
    pub async fn start(&mut self) -> Result<()> {
        match self.record.status {
            ExecutorStatus::Created => {
                self.record.status = ExecutorStatus::Running;
                self.record.heartbeat = Some(Utc::now());
                self.safe_save().await?;
                info!(
                    executor = %self.record,
                    queue = %self.queue.name(),
                    concurrent = self.record.concurrent,
                    "Executor running"
                );
            }
            status => {
                info!(executor = %self.record, status = %status, "Executor resuming loop");
            }
        }
        Ok(())
    }

    async fn run_loop(&mut self) -> Result<()> {
        self.start().await?;

        loop {
            self.tick().await?;
            if self.record.status.is_terminal() {
                return Ok(());
            }
            tokio::time::sleep(self.tick).await;
            self.refresh_request().await?;
        }
    }

    /// One pass of the loop, without the sleep and refresh.
    pub async fn tick(&mut self) -> Result<()> {
        if let Some(request) = self.record.request {
            self.resolve_request(request).await?;
        }

        if self.record.status == ExecutorStatus::Running {
            self.dispatch().await?;
        }

        if self.record.status == ExecutorStatus::Stopping && self.pool.is_empty() {
            self.record.status = ExecutorStatus::Ended;
            self.safe_save().await?;
            info!(executor = %self.record, "All workers drained, executor ended");
        }

        self.reap().await;
        self.heartbeat().await;
        Ok(())
    }

    /// Re-read `request` from the control plane, replacing the in-memory value.
    pub async fn refresh_request(&mut self) -> Result<Option<Request>> {
        let request = self
            .control
            .get_executor_request(&self.record.executor_id)
            .await?;
        if request != self.record.request {
            debug!(executor_id = %self.record.executor_id, request = ?request, "Request changed");
        }
        self.record.request = request;
        Ok(request)
    }

    /// Act on `request`, then persist the new status and clear the request.
    pub async fn resolve_request(&mut self, request: Request) -> Result<()> {
        let from = self.record.status;
        let to = match (request, from) {
            (Request::Pause, ExecutorStatus::Running) => Some(ExecutorStatus::Paused),
            (Request::Resume, ExecutorStatus::Paused) => Some(ExecutorStatus::Running),
            (Request::Stop, ExecutorStatus::Running | ExecutorStatus::Paused) => {
                Some(ExecutorStatus::Stopping)
            }
            (
                Request::Kill,
                ExecutorStatus::Running | ExecutorStatus::Paused | ExecutorStatus::Stopping,
            ) => {
                let signalled = self.pool.terminate_all();
                info!(
                    executor_id = %self.record.executor_id,
                    workers = self.pool.len(),
                    signalled,
                    "Sent termination signal to all workers"
                );
                Some(ExecutorStatus::Killed)
            }
            _ => None,
        };

        match to {
            Some(to) => {
                info!(
                    executor_id = %self.record.executor_id,
                    request = %request,
                    from = %from,
                    to = %to,
                    "Request honored"
                );
                self.record.status = to;
            }
            None => {
                warn!(
                    executor_id = %self.record.executor_id,
                    request = %request,
                    status = %from,
                    "Request does not apply in current status, clearing it"
                );
            }
        }

        let remaining = self
            .control
            .resolve_executor_request(&self.record.executor_id, self.record.status, request)
            .await?;
        if let Some(newer) = remaining {
            info!(
                executor_id = %self.record.executor_id,
                request = %newer,
                "Newer request arrived while resolving, keeping it"
            );
        }
        self.record.request = remaining;
        Ok(())
    }

    /// Persist the executor-owned fields without dropping a concurrent request.
    pub async fn safe_save(&mut self) -> Result<()> {
        self.control.save_executor(&self.record).await?;
        match self
            .control
            .get_executor_request(&self.record.executor_id)
            .await
        {
            Ok(request) => self.record.request = request,
            Err(e) => {
                warn!(
                    executor_id = %self.record.executor_id,
                    error = %e,
                    "Could not refresh request after save, keeping in-memory value"
                );
            }
        }
        Ok(())
    }

    async fn dispatch(&mut self) -> Result<()> {
        let cap = self.record.concurrent as usize;
        while self.pool.len() < cap {
            let Some(mut instance) = self.queue.pop().await? else {
                break;
            };

            self.control
                .set_instance_executor(&instance.instance_id, &self.record.executor_id)
                .await?;
            instance.executor_id = Some(self.record.executor_id.clone());

            let instance_id = instance.instance_id.clone();
            match self.pool.launch(instance).await {
                Ok(pid) => info!(
                    pid = pid,
                    instance_id = %instance_id,
                    running = self.pool.len(),
                    "Launched worker"
                ),
                Err(e) => error!(
                    instance_id = %instance_id,
                    error = %e,
                    "Failed to launch worker"
                ),
            }
        }
        Ok(())
    }

    async fn reap(&mut self) {
        for reaped in self.pool.reap() {
            self.report(&reaped).await;
            self.backups
                .submit(instance_log_path(&self.log_dir, &reaped.instance.instance_id));
        }
    }

    async fn report(&self, reaped: &Reaped) {
        let instance_id = &reaped.instance.instance_id;
        match self.control.get_instance(instance_id).await {
            Ok(Some(instance)) if instance.status.is_terminal() => info!(
                pid = reaped.pid,
                instance_id = %instance_id,
                status = %instance.status,
                exit = %reaped.exit,
                "Worker finished"
            ),
            Ok(Some(instance)) => warn!(
                pid = reaped.pid,
                instance_id = %instance_id,
                status = %instance.status,
                exit = %reaped.exit,
                "Worker exited without finishing its instance"
            ),
            Ok(None) => warn!(
                pid = reaped.pid,
                instance_id = %instance_id,
                "Worker finished but its instance is gone"
            ),
            Err(e) => warn!(
                pid = reaped.pid,
                instance_id = %instance_id,
                error = %e,
                "Worker finished, could not read instance status"
            ),
        }
    }

    async fn heartbeat(&mut self) {
        let now = Utc::now();
        self.record.heartbeat = Some(now);
        if let Err(e) = self
            .control
            .touch_heartbeat(&self.record.executor_id, now)
            .await
        {
            warn!(executor_id = %self.record.executor_id, error = %e, "Failed to write heartbeat");
        }
    }
}

