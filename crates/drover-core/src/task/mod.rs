// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Task contract and the registry that resolves task references.
//!
//! A task is an immutable definition of work. Instances point at their task
//! through a [`TaskRef`] (kind + key); the worker resolves it through a
//! [`TaskRegistry`] in which every kind has one [`TaskSource`].

pub mod command;

pub use command::{CommandTask, CommandTaskSource};

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::CoreError;
use crate::log::LogSink;
use crate::model::{InstanceRecord, TaskRef};

/// Result reported by a task run that did not fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    /// The task explicitly reported success.
    Success,
    /// The task explicitly reported failure.
    Failure,
    /// The task returned without a result; counts as success.
    NoResult,
}

impl From<bool> for TaskOutcome {
    fn from(ok: bool) -> Self {
        if ok {
            TaskOutcome::Success
        } else {
            TaskOutcome::Failure
        }
    }
}

/// Everything a task run can see.
#[derive(Clone)]
pub struct TaskContext {
    /// The instance being executed.
    pub instance: InstanceRecord,
    /// The instance's log.
    pub log: Arc<LogSink>,
    /// Settings available for substitution in task definitions.
    pub settings: Arc<BTreeMap<String, String>>,
}

/// A unit of work that can be started for an instance.
#[async_trait]
pub trait Task: Send + Sync {
    /// Human-readable name.
    fn name(&self) -> &str;

    /// Wall-clock limit for one run. Zero means no limit.
    fn timeout(&self) -> Duration;

    /// Run the task. An `Err` is an unhandled fault.
    async fn start(&self, ctx: &TaskContext) -> anyhow::Result<TaskOutcome>;
}

/// Loads task definitions of one kind.
#[async_trait]
pub trait TaskSource: Send + Sync {
    /// The kind this source serves, as stored in [`TaskRef::kind`].
    fn kind(&self) -> &str;

    /// Load a task by key.
    async fn load(&self, task_id: &str) -> Result<Option<Arc<dyn Task>>, CoreError>;
}

/// Kind -> source lookup.
#[derive(Default, Clone)]
pub struct TaskRegistry {
    sources: HashMap<String, Arc<dyn TaskSource>>,
}

impl TaskRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a source under its kind, replacing any previous one.
    pub fn register(&mut self, source: Arc<dyn TaskSource>) {
        self.sources.insert(source.kind().to_string(), source);
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(mut self, source: Arc<dyn TaskSource>) -> Self {
        self.register(source);
        self
    }

    /// Whether a source exists for `kind`.
    pub fn contains(&self, kind: &str) -> bool {
        self.sources.contains_key(kind)
    }

    /// Resolve a task reference.
    pub async fn resolve(&self, task: &TaskRef) -> Result<Arc<dyn Task>, CoreError> {
        let source = self
            .sources
            .get(&task.kind)
            .ok_or_else(|| CoreError::UnknownTaskKind {
                kind: task.kind.clone(),
            })?;

        source
            .load(&task.task_id)
            .await?
            .ok_or_else(|| CoreError::TaskNotFound {
                kind: task.kind.clone(),
                task_id: task.task_id.clone(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    #[async_trait]
    impl Task for Noop {
        fn name(&self) -> &str {
            "noop"
        }

        fn timeout(&self) -> Duration {
            Duration::ZERO
        }

        async fn start(&self, _ctx: &TaskContext) -> anyhow::Result<TaskOutcome> {
            Ok(TaskOutcome::NoResult)
        }
    }

    struct NoopSource;

    #[async_trait]
    impl TaskSource for NoopSource {
        fn kind(&self) -> &str {
            "noop"
        }

        async fn load(&self, task_id: &str) -> Result<Option<Arc<dyn Task>>, CoreError> {
            Ok((task_id == "only").then(|| Arc::new(Noop) as Arc<dyn Task>))
        }
    }

    #[test]
    fn test_outcome_from_bool() {
        assert_eq!(TaskOutcome::from(true), TaskOutcome::Success);
        assert_eq!(TaskOutcome::from(false), TaskOutcome::Failure);
    }

    #[tokio::test]
    async fn test_registry_resolves_known_task() {
        let registry = TaskRegistry::new().with(Arc::new(NoopSource));
        assert!(registry.contains("noop"));

        let task = registry.resolve(&TaskRef::new("noop", "only")).await.unwrap();
        assert_eq!(task.name(), "noop");
    }

    #[tokio::test]
    async fn test_registry_errors() {
        let registry = TaskRegistry::new().with(Arc::new(NoopSource));

        let err = registry
            .resolve(&TaskRef::new("sqs", "x"))
            .await
            .err()
            .expect("unknown kind");
        assert_eq!(err.error_code(), "UNKNOWN_TASK_KIND");

        let err = registry
            .resolve(&TaskRef::new("noop", "other"))
            .await
            .err()
            .expect("missing task");
        assert_eq!(err.error_code(), "TASK_NOT_FOUND");
    }
}
