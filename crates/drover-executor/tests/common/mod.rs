// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for drover-executor tests.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use drover_core::{
    CommandTask, ControlPlane, CoreError, DbQueue, ExecutorRecord, ExecutorStatus,
    InstanceRecord, InstanceStatus, Request, SqliteControlPlane, TaskRef,
};
use drover_executor::executor::{self, Executor};
use drover_executor::pool::MockLauncher;
use tempfile::TempDir;

pub const QUEUE: &str = "default";

/// File-backed control plane plus a log directory, both in a temp dir.
pub struct TestContext {
    pub control: Arc<FlakyControlPlane>,
    pub dir: TempDir,
}

impl TestContext {
    pub async fn new() -> Self {
        let dir = TempDir::new().expect("temp dir");
        let sqlite = SqliteControlPlane::from_path(dir.path().join("control.db"))
            .await
            .expect("control plane");
        Self {
            control: Arc::new(FlakyControlPlane::new(Arc::new(sqlite))),
            dir,
        }
    }

    pub fn plane(&self) -> Arc<dyn ControlPlane> {
        self.control.clone()
    }

    pub fn log_dir(&self) -> PathBuf {
        self.dir.path().join("logs")
    }

    /// Register a command task and return it.
    pub async fn command_task(&self, command: &str, timeout: u64) -> CommandTask {
        let task = CommandTask::new(format!("task-{}", uuid::Uuid::new_v4()), command)
            .with_timeout(timeout);
        self.control.create_command_task(&task).await.unwrap();
        task
    }

    /// Create a CREATED instance of `task` without queueing it.
    pub async fn instance(&self, task: TaskRef) -> InstanceRecord {
        let instance = InstanceRecord::new(task);
        self.control.create_instance(&instance).await.unwrap();
        instance
    }

    /// Create and enqueue `n` instances of a placeholder task.
    pub async fn enqueue(&self, n: usize) -> Vec<String> {
        let mut ids = Vec::new();
        for _ in 0..n {
            let instance = self.instance(TaskRef::new("command", "t-1")).await;
            self.control
                .enqueue(QUEUE, &instance.instance_id)
                .await
                .unwrap();
            ids.push(instance.instance_id);
        }
        ids
    }

    /// Register an executor and wrap it with a mock launcher.
    pub async fn executor(&self, concurrent: u32, launcher: Arc<MockLauncher>) -> Executor {
        let record = executor::register(self.control.as_ref(), "test-host", QUEUE, concurrent)
            .await
            .unwrap();
        self.build(record, launcher)
    }

    pub fn build(&self, record: ExecutorRecord, launcher: Arc<MockLauncher>) -> Executor {
        Executor::builder()
            .control(self.plane())
            .queue(Arc::new(DbQueue::new(QUEUE, self.plane())))
            .launcher(launcher)
            .log_dir(self.log_dir())
            .tick(Duration::from_millis(10))
            .build(record)
            .unwrap()
    }

    /// Register an executor and move it to RUNNING the way the loop does on entry.
    pub async fn running_executor(
        &self,
        concurrent: u32,
        launcher: Arc<MockLauncher>,
    ) -> Executor {
        let mut executor = self.executor(concurrent, launcher).await;
        executor.start().await.unwrap();
        executor
    }

    pub async fn stored(&self, executor: &Executor) -> ExecutorRecord {
        self.control
            .get_executor(&executor.record().executor_id)
            .await
            .unwrap()
            .unwrap()
    }

    pub async fn request(&self, executor: &Executor, request: Request) {
        self.control
            .set_executor_request(&executor.record().executor_id, Some(request))
            .await
            .unwrap();
    }

    pub async fn instance_status(&self, instance_id: &str) -> InstanceStatus {
        self.control
            .get_instance(instance_id)
            .await
            .unwrap()
            .unwrap()
            .status
    }
}

/// Delegating control plane with injectable faults and races.
pub struct FlakyControlPlane {
    inner: Arc<dyn ControlPlane>,
    fail_request_reads: AtomicBool,
    request_during_resolve: Mutex<Option<Request>>,
    request_during_save: Mutex<Option<Request>>,
    failing_finishes: AtomicUsize,
}

impl FlakyControlPlane {
    pub fn new(inner: Arc<dyn ControlPlane>) -> Self {
        Self {
            inner,
            fail_request_reads: AtomicBool::new(false),
            request_during_resolve: Mutex::new(None),
            request_during_save: Mutex::new(None),
            failing_finishes: AtomicUsize::new(0),
        }
    }

    /// Make `get_executor_request` fail until switched off.
    pub fn fail_request_reads(&self, fail: bool) {
        self.fail_request_reads.store(fail, Ordering::SeqCst);
    }

    /// Write `request` right before the next resolve reaches the database,
    /// as if a controller raced the executor.
    pub fn race_next_resolve(&self, request: Request) {
        *self.request_during_resolve.lock().unwrap() = Some(request);
    }

    /// Write `request` right before the next executor save reaches the database.
    pub fn race_next_save(&self, request: Request) {
        *self.request_during_save.lock().unwrap() = Some(request);
    }

    /// Make the next `n` calls to `finish_instance` fail.
    pub fn fail_next_finishes(&self, n: usize) {
        self.failing_finishes.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl ControlPlane for FlakyControlPlane {
    async fn create_executor(&self, executor: &ExecutorRecord) -> Result<(), CoreError> {
        self.inner.create_executor(executor).await
    }

    async fn get_executor(&self, executor_id: &str) -> Result<Option<ExecutorRecord>, CoreError> {
        self.inner.get_executor(executor_id).await
    }

    async fn list_executors(
        &self,
        queue_name: Option<&str>,
    ) -> Result<Vec<ExecutorRecord>, CoreError> {
        self.inner.list_executors(queue_name).await
    }

    async fn get_executor_request(&self, executor_id: &str) -> Result<Option<Request>, CoreError> {
        if self.fail_request_reads.load(Ordering::SeqCst) {
            return Err(CoreError::DatabaseError {
                operation: "get_executor_request".to_string(),
                details: "injected failure".to_string(),
            });
        }
        self.inner.get_executor_request(executor_id).await
    }

    async fn set_executor_request(
        &self,
        executor_id: &str,
        request: Option<Request>,
    ) -> Result<(), CoreError> {
        self.inner.set_executor_request(executor_id, request).await
    }

    async fn save_executor(&self, executor: &ExecutorRecord) -> Result<(), CoreError> {
        let raced = self.request_during_save.lock().unwrap().take();
        if let Some(request) = raced {
            self.inner
                .set_executor_request(&executor.executor_id, Some(request))
                .await?;
        }
        self.inner.save_executor(executor).await
    }

    async fn resolve_executor_request(
        &self,
        executor_id: &str,
        status: ExecutorStatus,
        handled: Request,
    ) -> Result<Option<Request>, CoreError> {
        let raced = self.request_during_resolve.lock().unwrap().take();
        if let Some(request) = raced {
            self.inner
                .set_executor_request(executor_id, Some(request))
                .await?;
        }
        self.inner
            .resolve_executor_request(executor_id, status, handled)
            .await
    }

    async fn touch_heartbeat(
        &self,
        executor_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        self.inner.touch_heartbeat(executor_id, at).await
    }

    async fn create_command_task(&self, task: &CommandTask) -> Result<(), CoreError> {
        self.inner.create_command_task(task).await
    }

    async fn get_command_task(&self, task_id: &str) -> Result<Option<CommandTask>, CoreError> {
        self.inner.get_command_task(task_id).await
    }

    async fn create_instance(&self, instance: &InstanceRecord) -> Result<(), CoreError> {
        self.inner.create_instance(instance).await
    }

    async fn get_instance(&self, instance_id: &str) -> Result<Option<InstanceRecord>, CoreError> {
        self.inner.get_instance(instance_id).await
    }

    async fn list_instances(
        &self,
        executor_id: Option<&str>,
        limit: i64,
    ) -> Result<Vec<InstanceRecord>, CoreError> {
        self.inner.list_instances(executor_id, limit).await
    }

    async fn set_instance_executor(
        &self,
        instance_id: &str,
        executor_id: &str,
    ) -> Result<(), CoreError> {
        self.inner
            .set_instance_executor(instance_id, executor_id)
            .await
    }

    async fn mark_instance_running(
        &self,
        instance_id: &str,
        start_date: DateTime<Utc>,
    ) -> Result<bool, CoreError> {
        self.inner
            .mark_instance_running(instance_id, start_date)
            .await
    }

    async fn finish_instance(
        &self,
        instance_id: &str,
        status: InstanceStatus,
        end_date: DateTime<Utc>,
    ) -> Result<bool, CoreError> {
        let failing = self
            .failing_finishes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(CoreError::DatabaseError {
                operation: "finish_instance".to_string(),
                details: "injected failure".to_string(),
            });
        }
        self.inner
            .finish_instance(instance_id, status, end_date)
            .await
    }

    async fn enqueue(&self, queue_name: &str, instance_id: &str) -> Result<(), CoreError> {
        self.inner.enqueue(queue_name, instance_id).await
    }

    async fn pop_queue(&self, queue_name: &str) -> Result<Option<InstanceRecord>, CoreError> {
        self.inner.pop_queue(queue_name).await
    }

    async fn queue_len(&self, queue_name: &str) -> Result<i64, CoreError> {
        self.inner.queue_len(queue_name).await
    }

    async fn health_check(&self) -> Result<bool, CoreError> {
        self.inner.health_check().await
    }
}
