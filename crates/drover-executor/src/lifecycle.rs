// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Instance lifecycle, run inside a worker process.
//!
//! ```text
//! CREATED -> RUNNING -> SUCCESS      task returned success or no result
//!                    -> FAILURE      task returned failure
//!                    -> ERROR        task returned an error or panicked
//!                    -> TIMEDOUT     the task's timeout elapsed
//!                    -> INTERRUPTED  the cancellation token fired
//! ```
//!
//! Once the instance is RUNNING every path goes through the same
//! finalisation: stamp `end_date`, log the final status, stop output
//! redirection, persist. The task itself runs on its own tokio task so a
//! timeout or interruption can abandon it at any await point.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use drover_core::{
    ControlPlane, CoreError, InstanceKey, InstanceRecord, InstanceStatus, LogSink, TaskContext,
    TaskOutcome, TaskRegistry,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::{Error, Result};

/// How long an abandoned task gets to unwind after being aborted.
const ABORT_GRACE: Duration = Duration::from_secs(1);

/// Attempts at writing the final status before giving up.
const FINISH_ATTEMPTS: u32 = 5;

/// Delay before the first retry; doubles after each failed attempt.
const FINISH_BACKOFF: Duration = Duration::from_millis(100);

/// Runs one instance from CREATED to a terminal status.
pub struct InstanceRunner {
    control: Arc<dyn ControlPlane>,
    registry: TaskRegistry,
    log_dir: PathBuf,
    log_debug: bool,
    redirect_output: bool,
    settings: Arc<BTreeMap<String, String>>,
}

impl InstanceRunner {
    pub fn new(
        control: Arc<dyn ControlPlane>,
        registry: TaskRegistry,
        log_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            control,
            registry,
            log_dir: log_dir.into(),
            log_debug: false,
            redirect_output: false,
            settings: Arc::new(BTreeMap::new()),
        }
    }

    /// Write debug lines to the instance log.
    pub fn with_log_debug(mut self, enabled: bool) -> Self {
        self.log_debug = enabled;
        self
    }

    /// Point process stdout/stderr at the instance log while the task runs.
    pub fn with_redirect_output(mut self, enabled: bool) -> Self {
        self.redirect_output = enabled;
        self
    }

    /// Variables tasks may substitute into their definitions.
    pub fn with_settings(mut self, settings: BTreeMap<String, String>) -> Self {
        self.settings = Arc::new(settings);
        self
    }

    /// Run the instance identified by `key`.
    ///
    /// Returns the instance's status afterwards. An instance that is not
    /// CREATED is left untouched and its current status returned.
    pub async fn run(&self, key: &InstanceKey, cancel: CancellationToken) -> Result<InstanceStatus> {
        let instance = self
            .control
            .get_instance(&key.instance_id)
            .await?
            .ok_or_else(|| CoreError::InstanceNotFound {
                instance_id: key.instance_id.clone(),
            })?;

        if instance.task.kind != key.kind {
            return Err(Error::InvalidRequest(format!(
                "instance {} is of kind '{}', not '{}'",
                instance.instance_id, instance.task.kind, key.kind
            )));
        }

        let log = Arc::new(LogSink::for_instance(
            &self.log_dir,
            &instance.instance_id,
            self.log_debug,
        )?);

        if instance.status != InstanceStatus::Created {
            return Ok(self.refuse(&instance, &log, instance.status));
        }

        let start_date = Utc::now();
        if !self
            .control
            .mark_instance_running(&instance.instance_id, start_date)
            .await?
        {
            let current = self
                .control
                .get_instance(&instance.instance_id)
                .await?
                .map(|i| i.status)
                .unwrap_or(instance.status);
            return Ok(self.refuse(&instance, &log, current));
        }

        let mut instance = instance;
        instance.status = InstanceStatus::Running;
        instance.start_date = Some(start_date);

        info!(instance_id = %instance.instance_id, task = ?instance.task, "Instance started");
        log.info(&format!("Starting {}", instance));

        let redirect = if self.redirect_output {
            match log.redirect() {
                Ok(guard) => Some(guard),
                Err(e) => {
                    log.error(
                        "Could not redirect output into the log",
                        Some(&anyhow::Error::new(e)),
                    );
                    None
                }
            }
        } else {
            None
        };

        let status = self.execute(&instance, &log, cancel).await;

        log.info(&format!("Instance ended with status {}", status));
        drop(redirect);

        self.finish(&instance.instance_id, status).await?;
        Ok(status)
    }

    fn refuse(
        &self,
        instance: &InstanceRecord,
        log: &LogSink,
        status: InstanceStatus,
    ) -> InstanceStatus {
        let msg = format!("Can't start {} with status {}", instance, status);
        error!(instance_id = %instance.instance_id, status = %status, "Refusing to start instance");
        log.error(&msg, None);
        status
    }

    /// Resolve and run the task, mapping every outcome to a terminal status.
    async fn execute(
        &self,
        instance: &InstanceRecord,
        log: &Arc<LogSink>,
        cancel: CancellationToken,
    ) -> InstanceStatus {
        let task = match self.registry.resolve(&instance.task).await {
            Ok(task) => task,
            Err(e) => {
                log.error("Could not load task", Some(&anyhow::Error::new(e)));
                return InstanceStatus::Error;
            }
        };

        let timeout = task.timeout();
        let ctx = TaskContext {
            instance: instance.clone(),
            log: log.clone(),
            settings: self.settings.clone(),
        };
        let mut handle = tokio::spawn(async move { task.start(&ctx).await });

        let deadline = async {
            if timeout.is_zero() {
                std::future::pending::<()>().await
            } else {
                tokio::time::sleep(timeout).await
            }
        };

        tokio::select! {
            joined = &mut handle => match joined {
                Ok(Ok(TaskOutcome::Success | TaskOutcome::NoResult)) => InstanceStatus::Success,
                Ok(Ok(TaskOutcome::Failure)) => InstanceStatus::Failure,
                Ok(Err(e)) => {
                    log.error("Task raised an error", Some(&e));
                    InstanceStatus::Error
                }
                Err(e) => {
                    let e = anyhow::anyhow!("task panicked: {}", e);
                    log.error("Task raised an error", Some(&e));
                    InstanceStatus::Error
                }
            },
            _ = deadline => {
                log.error(&format!("Task timed out after {} seconds", timeout.as_secs()), None);
                abandon(handle).await;
                InstanceStatus::TimedOut
            }
            _ = cancel.cancelled() => {
                log.error("Interrupted by termination signal", None);
                abandon(handle).await;
                InstanceStatus::Interrupted
            }
        }
    }

    /// Persist the final status, retrying transient control-plane failures.
    ///
    /// An instance left RUNNING with no live worker is never picked up again,
    /// so a short outage must not lose the result.
    async fn finish(&self, instance_id: &str, status: InstanceStatus) -> Result<()> {
        let end_date = Utc::now();
        let mut delay = FINISH_BACKOFF;
        let mut attempt = 1;
        let applied = loop {
            match self
                .control
                .finish_instance(instance_id, status, end_date)
                .await
            {
                Ok(applied) => break applied,
                Err(e) if attempt < FINISH_ATTEMPTS => {
                    warn!(
                        instance_id = %instance_id,
                        status = %status,
                        attempt = attempt,
                        error = %e,
                        "Failed to write final status, retrying in {:?}",
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
                Err(e) => {
                    error!(
                        instance_id = %instance_id,
                        status = %status,
                        attempts = attempt,
                        error = %e,
                        "Giving up on writing final status"
                    );
                    return Err(e.into());
                }
            }
        };
        if applied {
            info!(instance_id = %instance_id, status = %status, "Instance finished");
        } else {
            warn!(
                instance_id = %instance_id,
                status = %status,
                "Instance was no longer RUNNING, final status not written"
            );
        }
        Ok(())
    }
}

async fn abandon<T>(handle: tokio::task::JoinHandle<T>) {
    handle.abort();
    if tokio::time::timeout(ABORT_GRACE, handle).await.is_err() {
        warn!("Abandoned task did not stop within grace period");
    }
}
