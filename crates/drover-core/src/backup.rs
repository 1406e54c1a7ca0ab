// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Archival of finished instance logs.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, warn};

/// Best-effort log archival. Failures are logged and reported as `false`.
#[async_trait]
pub trait LogBackup: Send + Sync {
    /// Archive the log at `log_path`.
    async fn backup(&self, log_path: &Path) -> bool;
}

/// Backup that does nothing and always succeeds.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoBackup;

#[async_trait]
impl LogBackup for NoBackup {
    async fn backup(&self, _log_path: &Path) -> bool {
        true
    }
}

/// Copies logs into an archive directory, keyed by file name.
#[derive(Debug, Clone)]
pub struct DirectoryBackup {
    archive_dir: PathBuf,
}

impl DirectoryBackup {
    pub fn new(archive_dir: impl Into<PathBuf>) -> Self {
        Self {
            archive_dir: archive_dir.into(),
        }
    }

    pub fn archive_dir(&self) -> &Path {
        &self.archive_dir
    }

    async fn copy(&self, log_path: &Path) -> std::io::Result<PathBuf> {
        let name = log_path.file_name().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "log path has no file name")
        })?;
        let target = self.archive_dir.join(name);
        tokio::fs::create_dir_all(&self.archive_dir).await?;
        tokio::fs::copy(log_path, &target).await?;
        Ok(target)
    }
}

#[async_trait]
impl LogBackup for DirectoryBackup {
    async fn backup(&self, log_path: &Path) -> bool {
        match self.copy(log_path).await {
            Ok(target) => {
                debug!(
                    log = %log_path.display(),
                    archived = %target.display(),
                    "Log archived"
                );
                true
            }
            Err(e) => {
                warn!(log = %log_path.display(), error = %e, "Log backup failed");
                false
            }
        }
    }
}
