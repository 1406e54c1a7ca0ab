// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Drover Executor - Worker Supervision
//!
//! An executor daemon (`droverd`) pulls instances from one queue and runs each
//! in its own worker process (`drover-worker`), never more than `concurrent`
//! at a time. Operators steer it by writing a request (stop, kill, pause,
//! resume) into its control-plane record, for example with `droverctl`.
//!
//! | Module | Runs in | Contents |
//! |--------|---------|----------|
//! | [`executor`] | `droverd` | The tick loop and control-plane sync |
//! | [`pool`] | `droverd` | Process pool, launcher trait, process and mock launchers |
//! | [`backup_pool`] | `droverd` | Bounded background log backups |
//! | [`lifecycle`] | `drover-worker` | One instance from CREATED to a terminal status |

pub mod backup_pool;
pub mod config;
pub mod error;
pub mod executor;
pub mod lifecycle;
pub mod pool;

pub use config::Config;
pub use error::{Error, Result};
pub use executor::{Executor, ExecutorBuilder};
pub use lifecycle::InstanceRunner;
pub use pool::{Launcher, MockLauncher, ProcessLauncher, ProcessLauncherConfig, ProcessPool};

/// Host name of this machine, or `localhost` when it cannot be read.
pub fn hostname() -> String {
    nix::unistd::gethostname()
        .ok()
        .and_then(|name| name.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string())
}
