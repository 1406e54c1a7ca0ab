// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Records shared by the executor, the workers and external controllers.
//!
//! # Executor Status State Machine
//!
//! ```text
//! CREATED ──► RUNNING ◄──resume── PAUSED
//!               │  └────pause───────►│
//!             stop                   │
//!               ▼                    │
//!           STOPPING ──drained──► ENDED
//!
//! RUNNING | PAUSED | STOPPING ──kill──► KILLED
//! any ──loop fault──► ERROR
//! ```
//!
//! # Instance Status State Machine
//!
//! ```text
//! CREATED ──► RUNNING ──► SUCCESS | FAILURE | ERROR | TIMEDOUT | INTERRUPTED
//! ```

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Status of an executor daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutorStatus {
    /// Registered by a launcher, loop not entered yet.
    Created,
    /// Pulling and running instances.
    Running,
    /// Not pulling new instances; running ones continue.
    Paused,
    /// Draining: waits for running instances, then ends.
    Stopping,
    /// Drained and exited normally.
    Ended,
    /// The loop itself faulted.
    Error,
    /// Forcefully terminated.
    Killed,
}

impl ExecutorStatus {
    /// Check if this is a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutorStatus::Ended | ExecutorStatus::Error | ExecutorStatus::Killed
        )
    }

    /// Get the status string stored in the control plane.
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutorStatus::Created => "created",
            ExecutorStatus::Running => "running",
            ExecutorStatus::Paused => "paused",
            ExecutorStatus::Stopping => "stopping",
            ExecutorStatus::Ended => "ended",
            ExecutorStatus::Error => "error",
            ExecutorStatus::Killed => "killed",
        }
    }
}

impl FromStr for ExecutorStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(ExecutorStatus::Created),
            "running" => Ok(ExecutorStatus::Running),
            "paused" => Ok(ExecutorStatus::Paused),
            "stopping" => Ok(ExecutorStatus::Stopping),
            "ended" => Ok(ExecutorStatus::Ended),
            "error" => Ok(ExecutorStatus::Error),
            "killed" => Ok(ExecutorStatus::Killed),
            other => Err(CoreError::invalid("executor status", other)),
        }
    }
}

impl fmt::Display for ExecutorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.as_str().to_uppercase())
    }
}

/// A state-change request written by an external controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Request {
    /// Stop accepting work and end once drained.
    Stop,
    /// Signal every worker and end immediately.
    Kill,
    /// Stop accepting work until resumed.
    Pause,
    /// Resume a paused executor.
    Resume,
}

impl Request {
    /// Get the request string stored in the control plane.
    pub fn as_str(&self) -> &'static str {
        match self {
            Request::Stop => "stop",
            Request::Kill => "kill",
            Request::Pause => "pause",
            Request::Resume => "resume",
        }
    }
}

impl FromStr for Request {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "stop" => Ok(Request::Stop),
            "kill" => Ok(Request::Kill),
            "pause" => Ok(Request::Pause),
            "resume" => Ok(Request::Resume),
            _ => Err(CoreError::invalid("request", s)),
        }
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.as_str().to_uppercase())
    }
}

/// Status of one instance (run) of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    /// Waiting to be run.
    Created,
    /// A worker process is executing it.
    Running,
    /// The task reported success (or no explicit result).
    Success,
    /// The task reported failure.
    Failure,
    /// A failure that was dealt with by an operator.
    Handled,
    /// The task raised an unhandled fault.
    Error,
    /// The task's timeout elapsed.
    TimedOut,
    /// The worker received a termination signal.
    Interrupted,
}

impl InstanceStatus {
    /// Check if this is a terminal status.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, InstanceStatus::Created | InstanceStatus::Running)
    }

    /// Get the status string stored in the control plane.
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceStatus::Created => "created",
            InstanceStatus::Running => "running",
            InstanceStatus::Success => "success",
            InstanceStatus::Failure => "failure",
            InstanceStatus::Handled => "handled",
            InstanceStatus::Error => "error",
            InstanceStatus::TimedOut => "timedout",
            InstanceStatus::Interrupted => "interrupted",
        }
    }
}

impl FromStr for InstanceStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(InstanceStatus::Created),
            "running" => Ok(InstanceStatus::Running),
            "success" => Ok(InstanceStatus::Success),
            "failure" => Ok(InstanceStatus::Failure),
            "handled" => Ok(InstanceStatus::Handled),
            "error" => Ok(InstanceStatus::Error),
            "timedout" => Ok(InstanceStatus::TimedOut),
            "interrupted" => Ok(InstanceStatus::Interrupted),
            other => Err(CoreError::invalid("instance status", other)),
        }
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.as_str().to_uppercase())
    }
}

/// Executor record from the control plane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorRecord {
    /// Unique identifier (UUID).
    pub executor_id: String,
    /// Host the executor runs on.
    pub host: String,
    /// Name of the queue the executor pulls from.
    pub queue_name: String,
    /// Maximum number of simultaneous worker processes.
    pub concurrent: u32,
    /// Current status.
    pub status: ExecutorStatus,
    /// Pending request, cleared by the executor once acted upon.
    pub request: Option<Request>,
    /// Last loop tick.
    pub heartbeat: Option<DateTime<Utc>>,
    /// When the record was registered.
    pub created_at: DateTime<Utc>,
}

impl ExecutorRecord {
    /// Build a fresh CREATED record.
    pub fn new(host: impl Into<String>, queue_name: impl Into<String>, concurrent: u32) -> Self {
        Self {
            executor_id: uuid::Uuid::new_v4().to_string(),
            host: host.into(),
            queue_name: queue_name.into(),
            concurrent,
            status: ExecutorStatus::Created,
            request: None,
            heartbeat: None,
            created_at: Utc::now(),
        }
    }

    /// Running with a heartbeat no older than `window`.
    pub fn is_alive(&self, now: DateTime<Utc>, window: Duration) -> bool {
        let Some(heartbeat) = self.heartbeat else {
            return false;
        };
        let Ok(window) = chrono::Duration::from_std(window) else {
            return false;
        };
        self.status == ExecutorStatus::Running && heartbeat > now - window
    }
}

impl fmt::Display for ExecutorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<Executor {} on {}>", self.executor_id, self.host)
    }
}

/// Tagged reference to a task definition: which source, which key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskRef {
    /// Task kind, resolved through the task registry.
    pub kind: String,
    /// Primary key within that kind.
    pub task_id: String,
}

impl TaskRef {
    /// Create a task reference.
    pub fn new(kind: impl Into<String>, task_id: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            task_id: task_id.into(),
        }
    }
}

/// Identifier pair handed to a worker process at launch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceKey {
    /// Task kind of the instance.
    pub kind: String,
    /// Primary key of the instance.
    pub instance_id: String,
}

impl fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.instance_id)
    }
}

/// Instance record from the control plane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceRecord {
    /// Unique identifier (UUID).
    pub instance_id: String,
    /// The task this instance executes.
    pub task: TaskRef,
    /// Current status.
    pub status: InstanceStatus,
    /// When the instance was added to a queue.
    pub enqueue_date: Option<DateTime<Utc>>,
    /// When the instance started running.
    pub start_date: Option<DateTime<Utc>>,
    /// When the instance reached a terminal status.
    pub end_date: Option<DateTime<Utc>>,
    /// Executor that ran (or is running) the instance.
    pub executor_id: Option<String>,
    /// Committed to a run by a scheduling component.
    pub claimed: bool,
}

impl InstanceRecord {
    /// Build a fresh CREATED instance of `task`.
    pub fn new(task: TaskRef) -> Self {
        Self {
            instance_id: uuid::Uuid::new_v4().to_string(),
            task,
            status: InstanceStatus::Created,
            enqueue_date: None,
            start_date: None,
            end_date: None,
            executor_id: None,
            claimed: false,
        }
    }

    /// The identifier pair a worker needs to re-resolve this instance.
    pub fn key(&self) -> InstanceKey {
        InstanceKey {
            kind: self.task.kind.clone(),
            instance_id: self.instance_id.clone(),
        }
    }
}

impl fmt::Display for InstanceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Instance #{} ({})", self.instance_id, self.task.kind)
    }
}
