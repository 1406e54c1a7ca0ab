// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Drover Core - Control Plane
//!
//! This crate holds everything that executors, worker processes and external
//! controllers share: the persisted records, the control-plane backend, queues,
//! the task contract and the per-instance log files.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐   request (stop/kill/pause/resume)
//! │      droverctl       │──────────────────────────────┐
//! └──────────────────────┘                              │
//!                                                       ▼
//! ┌──────────────────────┐  pop / heartbeat  ┌──────────────────────┐
//! │  droverd (Executor)  │◄─────────────────►│    Control Plane     │
//! └──────────────────────┘                   │  (SQLite, this crate)│
//!           │ spawns                         └──────────────────────┘
//!           ▼                                           ▲
//! ┌──────────────────────┐   instance status            │
//! │    drover-worker     │──────────────────────────────┘
//! │  (Instance Lifecycle)│
//! └──────────────────────┘
//! ```
//!
//! # Modules
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`model`] | Executor / instance records and their status enums |
//! | [`persistence`] | [`ControlPlane`] trait and the SQLite backend |
//! | [`queue`] | [`Queue`] trait and the database-backed FIFO |
//! | [`task`] | [`Task`] contract, registry, shell command tasks |
//! | [`log`] | Per-instance log files with stdout/stderr redirection |
//! | [`backup`] | Archival of finished logs |
//!
//! # Configuration
//!
//! See [`Config::from_env`].

pub mod backup;
pub mod config;
pub mod error;
pub mod log;
pub mod model;
pub mod persistence;
pub mod queue;
pub mod task;

pub use backup::{DirectoryBackup, LogBackup, NoBackup};
pub use config::{Config, ConfigError};
pub use error::{CoreError, Result};
pub use log::{LogSink, OutputRedirect};
pub use model::{
    ExecutorRecord, ExecutorStatus, InstanceKey, InstanceRecord, InstanceStatus, Request, TaskRef,
};
pub use persistence::{ControlPlane, SqliteControlPlane};
pub use queue::{DbQueue, Queue};
pub use task::{
    CommandTask, CommandTaskSource, Task, TaskContext, TaskOutcome, TaskRegistry, TaskSource,
};
