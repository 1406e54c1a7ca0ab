// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Launcher trait definitions and the OS process launcher.
//!
//! A launcher only starts worker processes and signals them. It never touches
//! the control plane: stamping the executor on the instance is the caller's
//! job, and the instance's status is owned by the worker itself.
//!
//! Workers get a process group of their own, so a terminal Ctrl-C or a
//! group-wide signal aimed at the executor does not reach them. They only
//! stop when the executor signals them directly.

use std::fmt;
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};

use async_trait::async_trait;
use drover_core::InstanceKey;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use thiserror::Error;
use tracing::debug;

/// Errors from launcher operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LaunchError {
    /// The worker program could not be spawned.
    #[error("Failed to spawn worker: {0}")]
    Spawn(#[from] std::io::Error),

    /// The spawned process has no pid (it exited immediately).
    #[error("Spawned worker has no pid")]
    NoPid,

    /// Signalling the worker failed.
    #[error("Failed to signal pid {pid}: {errno}")]
    Signal {
        /// Process ID.
        pid: u32,
        /// OS error.
        errno: nix::errno::Errno,
    },
}

/// How a worker process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// Exited with a status code.
    Code(i32),
    /// Terminated by a signal.
    Signal(i32),
}

impl WorkerExit {
    /// Exit code 0.
    pub fn success(&self) -> bool {
        matches!(self, WorkerExit::Code(0))
    }
}

impl From<ExitStatus> for WorkerExit {
    fn from(status: ExitStatus) -> Self {
        match (status.code(), status.signal()) {
            (Some(code), _) => WorkerExit::Code(code),
            (None, Some(sig)) => WorkerExit::Signal(sig),
            (None, None) => WorkerExit::Code(-1),
        }
    }
}

impl fmt::Display for WorkerExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerExit::Code(code) => write!(f, "exit code {}", code),
            WorkerExit::Signal(sig) => write!(f, "signal {}", sig),
        }
    }
}

/// Handle on one running worker.
pub trait WorkerProcess: Send {
    /// OS process id.
    fn pid(&self) -> u32;

    /// Non-blocking liveness check; `Some` once the process has exited.
    fn try_wait(&mut self) -> std::io::Result<Option<WorkerExit>>;

    /// Ask the process to terminate (SIGTERM). Does not wait.
    fn terminate(&self) -> Result<(), LaunchError>;
}

/// Trait for worker launchers.
///
/// Implementations spawn one independent process per instance, handing it only
/// the instance's kind and id.
#[async_trait]
pub trait Launcher: Send + Sync {
    /// Launcher type identifier (e.g., "process", "mock")
    fn launcher_type(&self) -> &'static str;

    /// Spawn a worker for `key`.
    async fn launch(&self, key: &InstanceKey) -> Result<Box<dyn WorkerProcess>, LaunchError>;
}

/// Settings for [`ProcessLauncher`].
#[derive(Debug, Clone)]
pub struct ProcessLauncherConfig {
    /// Worker program.
    pub program: PathBuf,
    /// Arguments placed before `--kind K --instance-id ID`.
    pub args: Vec<String>,
    /// Extra environment for the worker.
    pub env: Vec<(String, String)>,
}

impl ProcessLauncherConfig {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

/// Launches workers as child processes of the executor.
pub struct ProcessLauncher {
    config: ProcessLauncherConfig,
}

impl ProcessLauncher {
    pub fn new(config: ProcessLauncherConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Launcher for ProcessLauncher {
    fn launcher_type(&self) -> &'static str {
        "process"
    }

    async fn launch(&self, key: &InstanceKey) -> Result<Box<dyn WorkerProcess>, LaunchError> {
        let child = tokio::process::Command::new(&self.config.program)
            .args(&self.config.args)
            .arg("--kind")
            .arg(&key.kind)
            .arg("--instance-id")
            .arg(&key.instance_id)
            .envs(self.config.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .process_group(0)
            .spawn()?;

        let pid = child.id().ok_or(LaunchError::NoPid)?;

        debug!(
            pid = pid,
            instance = %key,
            program = %self.config.program.display(),
            "Spawned worker process"
        );

        Ok(Box::new(ChildWorker {
            child,
            pid,
            exited: false,
        }))
    }
}

struct ChildWorker {
    child: tokio::process::Child,
    pid: u32,
    // Once reaped the pid may be reused, so it must not be signalled again.
    exited: bool,
}

impl WorkerProcess for ChildWorker {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn try_wait(&mut self) -> std::io::Result<Option<WorkerExit>> {
        let exit = self.child.try_wait()?.map(WorkerExit::from);
        if exit.is_some() {
            self.exited = true;
        }
        Ok(exit)
    }

    fn terminate(&self) -> Result<(), LaunchError> {
        if self.exited {
            return Ok(());
        }
        send_sigterm(self.pid)
    }
}

/// Send SIGTERM to `pid`. A process that is already gone is not an error.
pub fn send_sigterm(pid: u32) -> Result<(), LaunchError> {
    let raw = i32::try_from(pid).map_err(|_| LaunchError::Signal {
        pid,
        errno: nix::errno::Errno::EINVAL,
    })?;
    match signal::kill(Pid::from_raw(raw), Signal::SIGTERM) {
        Ok(()) => {
            debug!(pid = pid, "Sent SIGTERM to worker");
            Ok(())
        }
        Err(nix::errno::Errno::ESRCH) => {
            debug!(pid = pid, "Worker already gone (ESRCH)");
            Ok(())
        }
        Err(errno) => Err(LaunchError::Signal { pid, errno }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn key() -> InstanceKey {
        InstanceKey {
            kind: "command".to_string(),
            instance_id: "i-1".to_string(),
        }
    }

    async fn wait_exit(worker: &mut Box<dyn WorkerProcess>) -> WorkerExit {
        for _ in 0..100 {
            if let Some(exit) = worker.try_wait().unwrap() {
                return exit;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("worker did not exit");
    }

    #[tokio::test]
    async fn test_worker_receives_identifier_pair() {
        // $0 is "--kind", so $1..$3 are: command --instance-id i-1
        let launcher = ProcessLauncher::new(
            ProcessLauncherConfig::new("sh")
                .arg("-c")
                .arg(r#"[ "$1" = command ] && [ "$2" = --instance-id ] && [ "$3" = i-1 ] && [ "$X" = y ]"#)
                .env("X", "y"),
        );

        let mut worker = launcher.launch(&key()).await.unwrap();
        assert!(worker.pid() > 0);
        assert_eq!(wait_exit(&mut worker).await, WorkerExit::Code(0));
    }

    #[tokio::test]
    async fn test_exit_code_reported() {
        let launcher =
            ProcessLauncher::new(ProcessLauncherConfig::new("sh").arg("-c").arg("exit 7"));

        let mut worker = launcher.launch(&key()).await.unwrap();
        let exit = wait_exit(&mut worker).await;
        assert_eq!(exit, WorkerExit::Code(7));
        assert!(!exit.success());
    }

    #[tokio::test]
    async fn test_terminate_sends_sigterm() {
        let launcher =
            ProcessLauncher::new(ProcessLauncherConfig::new("sh").arg("-c").arg("sleep 30"));

        let mut worker = launcher.launch(&key()).await.unwrap();
        assert!(worker.try_wait().unwrap().is_none());

        worker.terminate().unwrap();
        assert_eq!(wait_exit(&mut worker).await, WorkerExit::Signal(15));

        // Reaped workers are never signalled again.
        worker.terminate().unwrap();
    }

    #[tokio::test]
    async fn test_worker_leads_its_own_process_group() {
        use nix::unistd::getpgid;

        let launcher =
            ProcessLauncher::new(ProcessLauncherConfig::new("sh").arg("-c").arg("sleep 30"));
        let mut worker = launcher.launch(&key()).await.unwrap();

        let pid = Pid::from_raw(worker.pid() as i32);
        let worker_group = getpgid(Some(pid)).unwrap();
        assert_eq!(worker_group, pid);
        assert_ne!(worker_group, getpgid(None).unwrap());

        worker.terminate().unwrap();
        assert_eq!(wait_exit(&mut worker).await, WorkerExit::Signal(15));
    }

    #[tokio::test]
    async fn test_missing_program() {
        let launcher = ProcessLauncher::new(ProcessLauncherConfig::new(
            "/nonexistent/drover-worker-binary",
        ));
        let err = launcher.launch(&key()).await.err().expect("spawn must fail");
        assert!(matches!(err, LaunchError::Spawn(_)));
    }
}
