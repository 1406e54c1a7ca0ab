// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Instance queues.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::CoreError;
use crate::model::InstanceRecord;
use crate::persistence::ControlPlane;

/// Source of instances for an executor.
///
/// `pop` must not block and must never hand the same instance to two callers.
#[async_trait]
pub trait Queue: Send + Sync {
    /// Queue name.
    fn name(&self) -> &str;

    /// Take the next instance, if any.
    async fn pop(&self) -> Result<Option<InstanceRecord>, CoreError>;
}

/// FIFO queue stored in the control plane.
#[derive(Clone)]
pub struct DbQueue {
    name: String,
    control: Arc<dyn ControlPlane>,
}

impl DbQueue {
    pub fn new(name: impl Into<String>, control: Arc<dyn ControlPlane>) -> Self {
        Self {
            name: name.into(),
            control,
        }
    }

    /// Append an instance.
    pub async fn push(&self, instance_id: &str) -> Result<(), CoreError> {
        self.control.enqueue(&self.name, instance_id).await
    }

    /// Number of waiting instances.
    pub async fn len(&self) -> Result<i64, CoreError> {
        self.control.queue_len(&self.name).await
    }

    pub async fn is_empty(&self) -> Result<bool, CoreError> {
        Ok(self.len().await? == 0)
    }
}

#[async_trait]
impl Queue for DbQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn pop(&self) -> Result<Option<InstanceRecord>, CoreError> {
        self.control.pop_queue(&self.name).await
    }
}
