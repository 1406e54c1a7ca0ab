// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for drover-executor.

use drover_core::ExecutorStatus;
use thiserror::Error;

/// Executor errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Configuration loading failed.
    #[error("Configuration error: {0}")]
    Config(#[from] drover_core::ConfigError),

    /// Control-plane operation failed.
    #[error("Core error: {0}")]
    Core(#[from] drover_core::CoreError),

    /// Worker process could not be launched or signalled.
    #[error("Launch error: {0}")]
    Launch(#[from] crate::pool::LaunchError),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A builder was missing a required component.
    #[error("{0} is required")]
    MissingComponent(&'static str),

    /// The executor record is already in a terminal status.
    #[error("Executor {executor_id} is already {status}")]
    AlreadyTerminal {
        /// The executor ID.
        executor_id: String,
        /// Its terminal status.
        status: ExecutorStatus,
    },

    /// Request validation failed.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Result type using Executor Error.
pub type Result<T> = std::result::Result<T, Error>;
