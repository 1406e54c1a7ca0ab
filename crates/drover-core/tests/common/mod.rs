// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared fixtures for drover-core integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use drover_core::{ControlPlane, InstanceRecord, SqliteControlPlane, TaskRef};
use tempfile::TempDir;

/// A file-backed control plane living in a temp directory.
pub struct TestContext {
    pub control: Arc<SqliteControlPlane>,
    pub dir: TempDir,
}

impl TestContext {
    pub async fn new() -> Self {
        let dir = TempDir::new().expect("temp dir");
        let control = SqliteControlPlane::from_path(dir.path().join("control.db"))
            .await
            .expect("control plane");
        Self {
            control: Arc::new(control),
            dir,
        }
    }

    pub fn plane(&self) -> Arc<dyn ControlPlane> {
        self.control.clone()
    }

    /// Create `n` CREATED instances of a command task and enqueue them.
    pub async fn enqueue_instances(&self, queue: &str, n: usize) -> Vec<String> {
        let mut ids = Vec::with_capacity(n);
        for _ in 0..n {
            let instance = InstanceRecord::new(TaskRef::new("command", "t-1"));
            self.control.create_instance(&instance).await.unwrap();
            self.control
                .enqueue(queue, &instance.instance_id)
                .await
                .unwrap();
            ids.push(instance.instance_id);
        }
        ids
    }
}
