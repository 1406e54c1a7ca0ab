// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Fire-and-forget log backups with bounded parallelism.

use std::path::PathBuf;
use std::sync::Arc;

use drover_core::LogBackup;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Default number of backups running at once.
pub const DEFAULT_BACKUP_CONCURRENCY: usize = 5;

/// Totals reported by [`BackupPool::join`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BackupSummary {
    pub succeeded: usize,
    pub failed: usize,
}

/// Runs [`LogBackup`] calls in the background, never on the caller's path.
pub struct BackupPool {
    backup: Arc<dyn LogBackup>,
    permits: Arc<Semaphore>,
    tasks: JoinSet<bool>,
    summary: BackupSummary,
}

impl BackupPool {
    pub fn new(backup: Arc<dyn LogBackup>, concurrency: usize) -> Self {
        Self {
            backup,
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
            tasks: JoinSet::new(),
            summary: BackupSummary::default(),
        }
    }

    /// Queue a backup of `log_path`. Returns immediately.
    pub fn submit(&mut self, log_path: PathBuf) {
        self.collect_finished();

        let backup = self.backup.clone();
        let permits = self.permits.clone();
        self.tasks.spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                warn!(log = %log_path.display(), "Backup pool closed, skipping backup");
                return false;
            };
            backup.backup(&log_path).await
        });
    }

    /// Backups submitted but not yet collected.
    pub fn pending(&self) -> usize {
        self.tasks.len()
    }

    /// Wait for every queued backup.
    pub async fn join(mut self) -> BackupSummary {
        if !self.tasks.is_empty() {
            info!(pending = self.tasks.len(), "Waiting for log backups");
        }
        while let Some(result) = self.tasks.join_next().await {
            self.record(result);
        }
        self.summary
    }

    fn collect_finished(&mut self) {
        while let Some(result) = self.tasks.try_join_next() {
            self.record(result);
        }
    }

    fn record(&mut self, result: Result<bool, tokio::task::JoinError>) {
        match result {
            Ok(true) => self.summary.succeeded += 1,
            Ok(false) => self.summary.failed += 1,
            Err(e) => {
                warn!(error = %e, "Backup task panicked");
                self.summary.failed += 1;
            }
        }
        debug!(
            succeeded = self.summary.succeeded,
            failed = self.summary.failed,
            "Backup finished"
        );
    }
}
