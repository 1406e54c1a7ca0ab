// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Process pool: the executor's private table of running workers.

pub mod launcher;
pub mod mock;

pub use launcher::{
    LaunchError, Launcher, ProcessLauncher, ProcessLauncherConfig, WorkerExit, WorkerProcess,
};
pub use mock::MockLauncher;

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use drover_core::InstanceRecord;
use tracing::{debug, warn};

/// A tracked worker: the process handle plus the instance it runs.
pub struct Worker {
    pub process: Box<dyn WorkerProcess>,
    pub instance: InstanceRecord,
    pub launched_at: DateTime<Utc>,
}

/// A worker removed from the pool because its process exited.
#[derive(Debug, Clone)]
pub struct Reaped {
    pub pid: u32,
    pub instance: InstanceRecord,
    pub exit: WorkerExit,
    pub launched_at: DateTime<Utc>,
}

/// Pid -> worker map.
pub struct ProcessPool {
    launcher: Arc<dyn Launcher>,
    workers: BTreeMap<u32, Worker>,
}

impl ProcessPool {
    pub fn new(launcher: Arc<dyn Launcher>) -> Self {
        Self {
            launcher,
            workers: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Pids currently tracked.
    pub fn pids(&self) -> Vec<u32> {
        self.workers.keys().copied().collect()
    }

    pub fn workers(&self) -> impl Iterator<Item = &Worker> {
        self.workers.values()
    }

    /// Spawn a worker for `instance` and track it.
    pub async fn launch(&mut self, instance: InstanceRecord) -> Result<u32, LaunchError> {
        let process = self.launcher.launch(&instance.key()).await?;
        let pid = process.pid();

        debug!(
            pid = pid,
            instance_id = %instance.instance_id,
            launcher = self.launcher.launcher_type(),
            "Worker launched"
        );

        self.workers.insert(
            pid,
            Worker {
                process,
                instance,
                launched_at: Utc::now(),
            },
        );
        Ok(pid)
    }

    /// Remove and return every worker whose process has exited. Never blocks.
    pub fn reap(&mut self) -> Vec<Reaped> {
        let mut exited = Vec::new();
        for (pid, worker) in self.workers.iter_mut() {
            match worker.process.try_wait() {
                Ok(Some(exit)) => exited.push((*pid, exit)),
                Ok(None) => {}
                Err(e) => {
                    warn!(pid = *pid, error = %e, "Liveness check failed, keeping worker");
                }
            }
        }

        exited
            .into_iter()
            .filter_map(|(pid, exit)| {
                self.workers.remove(&pid).map(|worker| Reaped {
                    pid,
                    instance: worker.instance,
                    exit,
                    launched_at: worker.launched_at,
                })
            })
            .collect()
    }

    /// Send a termination signal to every tracked worker without waiting.
    ///
    /// Returns the number of workers signalled successfully.
    pub fn terminate_all(&self) -> usize {
        let mut signalled = 0;
        for (pid, worker) in &self.workers {
            match worker.process.terminate() {
                Ok(()) => signalled += 1,
                Err(e) => warn!(pid = *pid, error = %e, "Failed to terminate worker"),
            }
        }
        signalled
    }
}
