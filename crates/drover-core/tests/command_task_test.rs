// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Command tasks resolved through the registry and run against a log sink.

mod common;

use std::collections::BTreeMap;
use std::sync::Arc;

use drover_core::{
    CommandTask, CommandTaskSource, ControlPlane, InstanceRecord, LogSink, TaskContext,
    TaskOutcome, TaskRef, TaskRegistry,
};

use common::TestContext;

async fn run(ctx: &TestContext, command: &str) -> (TaskOutcome, String) {
    let task = CommandTask::new(format!("t-{}", uuid::Uuid::new_v4()), command);
    ctx.control.create_command_task(&task).await.unwrap();

    let registry = TaskRegistry::new().with(Arc::new(CommandTaskSource::new(ctx.plane())));
    let resolved = registry
        .resolve(&TaskRef::new("command", &task.task_id))
        .await
        .unwrap();

    let instance = InstanceRecord::new(TaskRef::new("command", &task.task_id));
    let log = Arc::new(LogSink::for_instance(ctx.dir.path(), &instance.instance_id, false).unwrap());
    let settings = BTreeMap::from([(
        "DROVER_TMP_DIR".to_string(),
        ctx.dir.path().display().to_string(),
    )]);
    let task_ctx = TaskContext {
        instance,
        log: log.clone(),
        settings: Arc::new(settings),
    };

    let outcome = resolved.start(&task_ctx).await.unwrap();
    let content = std::fs::read_to_string(log.path()).unwrap();
    (outcome, content)
}

#[tokio::test]
async fn test_command_output_lands_in_log() {
    let ctx = TestContext::new().await;
    let (outcome, log) = run(&ctx, "echo hello from $DROVER_TMP_DIR; echo oops >&2").await;

    assert_eq!(outcome, TaskOutcome::Success);
    assert!(log.contains(&format!("hello from {}", ctx.dir.path().display())));
    assert!(log.contains("oops"));
    assert!(log.contains("INFO: Executing command..."));
}

#[tokio::test]
async fn test_nonzero_exit_is_failure() {
    let ctx = TestContext::new().await;
    let (outcome, _) = run(&ctx, "exit 3").await;
    assert_eq!(outcome, TaskOutcome::Failure);
}

#[tokio::test]
async fn test_lookup_by_name() {
    let ctx = TestContext::new().await;
    let task = CommandTask::new("by-name", "true").with_timeout(7);
    ctx.control.create_command_task(&task).await.unwrap();

    let loaded = ctx.control.get_command_task("by-name").await.unwrap();
    assert_eq!(loaded, Some(task));
}
