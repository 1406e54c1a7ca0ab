// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-instance log files.
//!
//! Every instance gets one append-only file under
//! `<log_dir>/instances/<instance_id>.log`. Lines look like:
//!
//! ```text
//! [2026/10/18 09:07:03.512301] INFO: Starting Instance #0b9c... (command)
//! ```
//!
//! [`LogSink::redirect`] points the process's stdout and stderr at the same
//! file for as long as the returned guard lives, so output from task code and
//! from child processes that inherit the descriptors lands in the log too.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::Local;
use nix::unistd::{close, dup, dup2};
use tracing::warn;

const TIMESTAMP_FORMAT: &str = "%Y/%m/%d %H:%M:%S%.6f";

/// Path of the log file for an instance.
pub fn instance_log_path(log_dir: &Path, instance_id: &str) -> PathBuf {
    log_dir.join("instances").join(format!("{}.log", instance_id))
}

/// Append-only log file for one instance.
#[derive(Debug)]
pub struct LogSink {
    path: PathBuf,
    file: Mutex<File>,
    debug: bool,
}

impl LogSink {
    /// Open (or create) the log at `path`, creating parent directories.
    pub fn open(path: impl Into<PathBuf>, debug: bool) -> io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
            debug,
        })
    }

    /// Open the log of `instance_id` under `log_dir`.
    pub fn for_instance(log_dir: &Path, instance_id: &str, debug: bool) -> io::Result<Self> {
        Self::open(instance_log_path(log_dir, instance_id), debug)
    }

    /// Location of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write an INFO line.
    pub fn info(&self, msg: &str) {
        self.write_entry("INFO", msg, None);
    }

    /// Write an ERROR line, followed by the error chain when given.
    pub fn error(&self, msg: &str, trace: Option<&anyhow::Error>) {
        let trace = trace.map(|e| format!("{:?}", e));
        self.write_entry("ERROR", msg, trace.as_deref());
    }

    /// Write a DEBUG line if debug logging is on.
    pub fn debug(&self, msg: &str) {
        if self.debug {
            self.write_entry("DEBUG", msg, None);
        }
    }

    /// A second handle on the log file, for a child's stdout/stderr.
    pub fn try_clone_file(&self) -> io::Result<File> {
        self.lock().try_clone()
    }

    /// Send process stdout/stderr to this log until the guard is dropped.
    pub fn redirect(&self) -> io::Result<OutputRedirect> {
        io::stdout().flush()?;
        io::stderr().flush()?;

        let file = self.lock();
        OutputRedirect::install(file.as_raw_fd())
    }

    fn lock(&self) -> MutexGuard<'_, File> {
        self.file.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_entry(&self, level: &str, msg: &str, trace: Option<&str>) {
        tracing::debug!(target: "drover_core::instance_log", path = %self.path.display(), level, "{}", msg);

        let mut entry = format!(
            "[{}] {}: {}\n",
            Local::now().format(TIMESTAMP_FORMAT),
            level,
            msg
        );
        if let Some(trace) = trace {
            entry.push_str(trace);
            entry.push('\n');
        }

        let mut file = self.lock();
        if let Err(e) = file.write_all(entry.as_bytes()).and_then(|_| file.flush()) {
            warn!(path = %self.path.display(), error = %e, "Failed to write instance log");
        }
    }
}

/// Guard returned by [`LogSink::redirect`]; restores stdout/stderr on drop.
#[derive(Debug)]
pub struct OutputRedirect {
    saved_stdout: RawFd,
    saved_stderr: RawFd,
}

impl OutputRedirect {
    fn install(target: RawFd) -> io::Result<Self> {
        let stdout = io::stdout().as_raw_fd();
        let stderr = io::stderr().as_raw_fd();

        let saved_stdout = dup(stdout)?;
        let saved_stderr = match dup(stderr) {
            Ok(fd) => fd,
            Err(e) => {
                let _ = close(saved_stdout);
                return Err(e.into());
            }
        };
        let guard = Self {
            saved_stdout,
            saved_stderr,
        };

        // On failure the guard's drop puts back whatever was already swapped.
        dup2(target, stdout)?;
        dup2(target, stderr)?;
        Ok(guard)
    }
}

impl Drop for OutputRedirect {
    fn drop(&mut self) {
        let _ = io::stdout().flush();
        let _ = io::stderr().flush();

        if let Err(e) = dup2(self.saved_stdout, io::stdout().as_raw_fd()) {
            warn!(error = %e, "Failed to restore stdout");
        }
        if let Err(e) = dup2(self.saved_stderr, io::stderr().as_raw_fd()) {
            warn!(error = %e, "Failed to restore stderr");
        }
        let _ = close(self.saved_stdout);
        let _ = close(self.saved_stderr);
    }
}
