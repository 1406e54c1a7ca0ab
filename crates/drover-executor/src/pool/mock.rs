// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock launcher for testing.
//!
//! Hands out fake pids and never spawns anything. Tests decide when a "worker"
//! exits through [`MockLauncher::complete`] and friends.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use drover_core::InstanceKey;

use super::launcher::{LaunchError, Launcher, WorkerExit, WorkerProcess};

/// Mock worker state.
#[derive(Debug, Clone)]
struct MockWorker {
    key: InstanceKey,
    exit: Option<WorkerExit>,
    terminated: bool,
}

type Workers = Arc<Mutex<BTreeMap<u32, MockWorker>>>;

fn lock(workers: &Workers) -> MutexGuard<'_, BTreeMap<u32, MockWorker>> {
    workers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Mock launcher for testing.
pub struct MockLauncher {
    workers: Workers,
    next_pid: AtomicU32,
    /// If true, every launch fails.
    pub fail_launch: bool,
    /// If true, a terminated worker exits with SIGTERM on its next check.
    pub exit_on_terminate: bool,
}

impl Default for MockLauncher {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLauncher {
    /// Create a mock launcher whose workers run until completed.
    pub fn new() -> Self {
        Self {
            workers: Arc::new(Mutex::new(BTreeMap::new())),
            next_pid: AtomicU32::new(10_000),
            fail_launch: false,
            exit_on_terminate: false,
        }
    }

    /// Create a mock launcher that refuses to launch anything.
    pub fn failing() -> Self {
        Self {
            fail_launch: true,
            ..Self::new()
        }
    }

    /// Make worker `pid` exit with `code`.
    pub fn complete(&self, pid: u32, code: i32) {
        if let Some(worker) = lock(&self.workers).get_mut(&pid) {
            worker.exit = Some(WorkerExit::Code(code));
        }
    }

    /// Make the worker running `instance_id` exit with `code`.
    pub fn complete_instance(&self, instance_id: &str, code: i32) {
        for worker in lock(&self.workers).values_mut() {
            if worker.key.instance_id == instance_id {
                worker.exit = Some(WorkerExit::Code(code));
            }
        }
    }

    /// Make every worker exit with `code`.
    pub fn complete_all(&self, code: i32) {
        for worker in lock(&self.workers).values_mut() {
            worker.exit.get_or_insert(WorkerExit::Code(code));
        }
    }

    /// Every instance launched so far, in launch order.
    pub fn launched(&self) -> Vec<InstanceKey> {
        lock(&self.workers).values().map(|w| w.key.clone()).collect()
    }

    /// Pids of workers that have not exited.
    pub fn running(&self) -> Vec<u32> {
        lock(&self.workers)
            .iter()
            .filter(|(_, w)| w.exit.is_none())
            .map(|(pid, _)| *pid)
            .collect()
    }

    /// Pids that received a terminate call.
    pub fn terminated(&self) -> Vec<u32> {
        lock(&self.workers)
            .iter()
            .filter(|(_, w)| w.terminated)
            .map(|(pid, _)| *pid)
            .collect()
    }
}

#[async_trait]
impl Launcher for MockLauncher {
    fn launcher_type(&self) -> &'static str {
        "mock"
    }

    async fn launch(&self, key: &InstanceKey) -> Result<Box<dyn WorkerProcess>, LaunchError> {
        if self.fail_launch {
            return Err(LaunchError::Spawn(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "mock launch failure",
            )));
        }

        // Pids only grow, so BTreeMap order is launch order.
        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        lock(&self.workers).insert(
            pid,
            MockWorker {
                key: key.clone(),
                exit: None,
                terminated: false,
            },
        );

        Ok(Box::new(MockProcess {
            pid,
            workers: self.workers.clone(),
            exit_on_terminate: self.exit_on_terminate,
        }))
    }
}

struct MockProcess {
    pid: u32,
    workers: Workers,
    exit_on_terminate: bool,
}

impl WorkerProcess for MockProcess {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn try_wait(&mut self) -> std::io::Result<Option<WorkerExit>> {
        Ok(lock(&self.workers).get(&self.pid).and_then(|w| w.exit))
    }

    fn terminate(&self) -> Result<(), LaunchError> {
        if let Some(worker) = lock(&self.workers).get_mut(&self.pid) {
            worker.terminated = true;
            if self.exit_on_terminate {
                worker.exit.get_or_insert(WorkerExit::Signal(15));
            }
        }
        Ok(())
    }
}
