// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for drover-core.

use std::fmt;

/// Result type using CoreError
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors raised by the control plane and the task registry.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum CoreError {
    /// Executor was not found in the control plane.
    ExecutorNotFound {
        /// The executor ID that was not found.
        executor_id: String,
    },

    /// Instance was not found in the control plane.
    InstanceNotFound {
        /// The instance ID that was not found.
        instance_id: String,
    },

    /// Task definition was not found.
    TaskNotFound {
        /// Kind of the task (e.g. "command").
        kind: String,
        /// The task ID that was not found.
        task_id: String,
    },

    /// No task source is registered for the kind.
    UnknownTaskKind {
        /// The unregistered kind.
        kind: String,
    },

    /// A stored value could not be decoded.
    InvalidValue {
        /// The field holding the value.
        field: String,
        /// The raw value.
        value: String,
    },

    /// Input validation failed.
    ValidationError {
        /// The field that failed validation.
        field: String,
        /// The validation error message.
        message: String,
    },

    /// Database operation failed.
    DatabaseError {
        /// The operation that failed.
        operation: String,
        /// Error details.
        details: String,
    },
}

impl CoreError {
    /// Get the error code string for this error type.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::ExecutorNotFound { .. } => "EXECUTOR_NOT_FOUND",
            Self::InstanceNotFound { .. } => "INSTANCE_NOT_FOUND",
            Self::TaskNotFound { .. } => "TASK_NOT_FOUND",
            Self::UnknownTaskKind { .. } => "UNKNOWN_TASK_KIND",
            Self::InvalidValue { .. } => "INVALID_VALUE",
            Self::ValidationError { .. } => "VALIDATION_ERROR",
            Self::DatabaseError { .. } => "DATABASE_ERROR",
        }
    }

    pub(crate) fn invalid(field: &str, value: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.to_string(),
            value: value.into(),
        }
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExecutorNotFound { executor_id } => {
                write!(f, "Executor '{}' not found", executor_id)
            }
            Self::InstanceNotFound { instance_id } => {
                write!(f, "Instance '{}' not found", instance_id)
            }
            Self::TaskNotFound { kind, task_id } => {
                write!(f, "Task '{}' of kind '{}' not found", task_id, kind)
            }
            Self::UnknownTaskKind { kind } => {
                write!(f, "No task source registered for kind '{}'", kind)
            }
            Self::InvalidValue { field, value } => {
                write!(f, "Invalid value '{}' for '{}'", value, field)
            }
            Self::ValidationError { field, message } => {
                write!(f, "Validation error for '{}': {}", field, message)
            }
            Self::DatabaseError { operation, details } => {
                write!(f, "Database error during '{}': {}", operation, details)
            }
        }
    }
}

impl std::error::Error for CoreError {}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        CoreError::DatabaseError {
            operation: "query".to_string(),
            details: err.to_string(),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for CoreError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        CoreError::DatabaseError {
            operation: "migrate".to_string(),
            details: err.to_string(),
        }
    }
}
