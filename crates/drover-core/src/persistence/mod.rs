// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Control-plane interfaces and backends.
//!
//! The control plane is the single source of truth for executor and instance
//! state. Executors, workers and external controllers all read and write it
//! concurrently, so every status transition that has a precondition is
//! expressed as a guarded update in the backend rather than a read-modify-write.

pub mod sqlite;

pub use self::sqlite::SqliteControlPlane;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::CoreError;
use crate::model::{ExecutorRecord, ExecutorStatus, InstanceRecord, InstanceStatus, Request};
use crate::task::CommandTask;

/// Persistence trait for the control plane.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    // ------------------------------------------------------------------
    // Executors
    // ------------------------------------------------------------------

    /// Insert a new executor record.
    async fn create_executor(&self, executor: &ExecutorRecord) -> Result<(), CoreError>;

    /// Fetch an executor record.
    async fn get_executor(&self, executor_id: &str) -> Result<Option<ExecutorRecord>, CoreError>;

    /// List executors, optionally only those pulling from `queue_name`.
    async fn list_executors(
        &self,
        queue_name: Option<&str>,
    ) -> Result<Vec<ExecutorRecord>, CoreError>;

    /// Read only the request field of an executor.
    async fn get_executor_request(&self, executor_id: &str) -> Result<Option<Request>, CoreError>;

    /// Write the request field. Used by external controllers.
    async fn set_executor_request(
        &self,
        executor_id: &str,
        request: Option<Request>,
    ) -> Result<(), CoreError>;

    /// Overwrite the executor-owned fields (status, concurrent, heartbeat).
    ///
    /// `request` is never written here: controllers own it, and the executor
    /// only clears it through [`resolve_executor_request`](Self::resolve_executor_request).
    async fn save_executor(&self, executor: &ExecutorRecord) -> Result<(), CoreError>;

    /// Persist `status` and clear `handled` in a single update.
    ///
    /// The request column is only cleared if it still holds `handled`; a
    /// request written by a controller in the meantime is left in place.
    /// Returns the request stored after the update.
    async fn resolve_executor_request(
        &self,
        executor_id: &str,
        status: ExecutorStatus,
        handled: Request,
    ) -> Result<Option<Request>, CoreError>;

    /// Update only the heartbeat column.
    async fn touch_heartbeat(&self, executor_id: &str, at: DateTime<Utc>)
    -> Result<(), CoreError>;

    // ------------------------------------------------------------------
    // Tasks
    // ------------------------------------------------------------------

    /// Insert a command task definition.
    async fn create_command_task(&self, task: &CommandTask) -> Result<(), CoreError>;

    /// Fetch a command task definition.
    async fn get_command_task(&self, task_id: &str) -> Result<Option<CommandTask>, CoreError>;

    // ------------------------------------------------------------------
    // Instances
    // ------------------------------------------------------------------

    /// Insert a new instance record.
    async fn create_instance(&self, instance: &InstanceRecord) -> Result<(), CoreError>;

    /// Fetch an instance record.
    async fn get_instance(&self, instance_id: &str) -> Result<Option<InstanceRecord>, CoreError>;

    /// List instances, newest first, optionally only those run by `executor_id`.
    async fn list_instances(
        &self,
        executor_id: Option<&str>,
        limit: i64,
    ) -> Result<Vec<InstanceRecord>, CoreError>;

    /// Stamp the executor back-reference.
    async fn set_instance_executor(
        &self,
        instance_id: &str,
        executor_id: &str,
    ) -> Result<(), CoreError>;

    /// Move an instance from CREATED to RUNNING.
    ///
    /// Returns false (and changes nothing) when the instance is not CREATED.
    async fn mark_instance_running(
        &self,
        instance_id: &str,
        start_date: DateTime<Utc>,
    ) -> Result<bool, CoreError>;

    /// Move an instance from RUNNING to a terminal status.
    ///
    /// Returns false (and changes nothing) when the instance is not RUNNING,
    /// so a terminal status is never overwritten.
    async fn finish_instance(
        &self,
        instance_id: &str,
        status: InstanceStatus,
        end_date: DateTime<Utc>,
    ) -> Result<bool, CoreError>;

    // ------------------------------------------------------------------
    // Queues
    // ------------------------------------------------------------------

    /// Append an instance to a queue and stamp its enqueue date.
    async fn enqueue(&self, queue_name: &str, instance_id: &str) -> Result<(), CoreError>;

    /// Remove the oldest instance from a queue and mark it claimed.
    async fn pop_queue(&self, queue_name: &str) -> Result<Option<InstanceRecord>, CoreError>;

    /// Number of instances waiting in a queue.
    async fn queue_len(&self, queue_name: &str) -> Result<i64, CoreError>;

    /// Check the backend is reachable.
    async fn health_check(&self) -> Result<bool, CoreError>;
}
