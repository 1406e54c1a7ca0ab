// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for the executor daemon and the worker.

use std::path::PathBuf;
use std::time::Duration;

use drover_core::ConfigError;
use drover_core::config::parse_bool;

/// Executor and worker configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Settings shared with every drover process
    pub core: drover_core::Config,
    /// Queue the executor pulls from
    pub queue_name: String,
    /// Maximum simultaneous worker processes
    pub concurrent: u32,
    /// Sleep between two loop ticks
    pub tick: Duration,
    /// Heartbeat age after which an executor is considered dead
    pub liveness_window: Duration,
    /// Worker program launched for each instance
    pub worker_bin: PathBuf,
    /// Parallel log backups
    pub backup_concurrency: usize,
    /// Redirect worker stdout/stderr into the instance log
    pub redirect_output: bool,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// On top of [`drover_core::Config::from_env`]:
    /// - `DROVER_QUEUE`: queue name (default: `default`)
    /// - `DROVER_CONCURRENT`: concurrency cap, at least 1 (default: 4)
    /// - `DROVER_TICK_MS`: tick period in milliseconds (default: 1000)
    /// - `DROVER_LIVENESS_SECS`: liveness window in seconds (default: 30)
    /// - `DROVER_WORKER_BIN`: worker program (default: `drover-worker` next to
    ///   the running executable)
    /// - `DROVER_BACKUP_CONCURRENCY`: parallel log backups (default: 5)
    /// - `DROVER_REDIRECT_OUTPUT`: `true`/`false` (default: true)
    pub fn from_env() -> Result<Self, ConfigError> {
        let core = drover_core::Config::from_env()?;

        let queue_name = std::env::var("DROVER_QUEUE").unwrap_or_else(|_| "default".to_string());

        let concurrent: u32 = std::env::var("DROVER_CONCURRENT")
            .unwrap_or_else(|_| "4".to_string())
            .parse()
            .ok()
            .filter(|n| *n > 0)
            .ok_or(ConfigError::Invalid(
                "DROVER_CONCURRENT",
                "must be a positive integer",
            ))?;

        let tick_ms: u64 = std::env::var("DROVER_TICK_MS")
            .unwrap_or_else(|_| "1000".to_string())
            .parse()
            .ok()
            .filter(|n| *n > 0)
            .ok_or(ConfigError::Invalid(
                "DROVER_TICK_MS",
                "must be a positive number of milliseconds",
            ))?;

        let liveness_secs: u64 = std::env::var("DROVER_LIVENESS_SECS")
            .unwrap_or_else(|_| "30".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid("DROVER_LIVENESS_SECS", "must be a number of seconds")
            })?;

        let worker_bin = match std::env::var("DROVER_WORKER_BIN") {
            Ok(path) => PathBuf::from(path),
            Err(_) => default_worker_bin().ok_or(ConfigError::Invalid(
                "DROVER_WORKER_BIN",
                "could not locate drover-worker next to this executable",
            ))?,
        };

        let backup_concurrency: usize = std::env::var("DROVER_BACKUP_CONCURRENCY")
            .unwrap_or_else(|_| "5".to_string())
            .parse()
            .ok()
            .filter(|n| *n > 0)
            .ok_or(ConfigError::Invalid(
                "DROVER_BACKUP_CONCURRENCY",
                "must be a positive integer",
            ))?;

        let redirect_output = parse_bool("DROVER_REDIRECT_OUTPUT", true)?;

        Ok(Self {
            core,
            queue_name,
            concurrent,
            tick: Duration::from_millis(tick_ms),
            liveness_window: Duration::from_secs(liveness_secs),
            worker_bin,
            backup_concurrency,
            redirect_output,
        })
    }
}

fn default_worker_bin() -> Option<PathBuf> {
    let exe = std::env::current_exe().ok()?;
    Some(exe.with_file_name("drover-worker"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    // Mutex to serialize tests that modify environment variables
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    const VARS: &[&str] = &[
        "DROVER_QUEUE",
        "DROVER_CONCURRENT",
        "DROVER_TICK_MS",
        "DROVER_LIVENESS_SECS",
        "DROVER_WORKER_BIN",
        "DROVER_BACKUP_CONCURRENCY",
        "DROVER_REDIRECT_OUTPUT",
        "DROVER_LOG_DEBUG",
    ];

    struct EnvGuard {
        vars: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new() -> Self {
            let mut guard = Self { vars: Vec::new() };
            guard.set("DROVER_DATABASE_URL", "sqlite::memory:");
            for var in VARS {
                guard.remove(var);
            }
            guard
        }

        fn set(&mut self, key: &str, value: &str) {
            let old = env::var(key).ok();
            self.vars.push((key.to_string(), old));
            // SAFETY: Tests are serialized via ENV_MUTEX
            unsafe { env::set_var(key, value) };
        }

        fn remove(&mut self, key: &str) {
            let old = env::var(key).ok();
            self.vars.push((key.to_string(), old));
            // SAFETY: Tests are serialized via ENV_MUTEX
            unsafe { env::remove_var(key) };
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in self.vars.drain(..).rev() {
                // SAFETY: Tests are serialized via ENV_MUTEX
                unsafe {
                    match value {
                        Some(v) => env::set_var(&key, v),
                        None => env::remove_var(&key),
                    }
                }
            }
        }
    }

    #[test]
    fn test_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let _guard = EnvGuard::new();

        let config = Config::from_env().unwrap();

        assert_eq!(config.queue_name, "default");
        assert_eq!(config.concurrent, 4);
        assert_eq!(config.tick, Duration::from_secs(1));
        assert_eq!(config.liveness_window, Duration::from_secs(30));
        assert_eq!(config.backup_concurrency, 5);
        assert!(config.redirect_output);
        assert_eq!(config.worker_bin.file_name().unwrap(), "drover-worker");
    }

    #[test]
    fn test_custom_values() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();

        guard.set("DROVER_QUEUE", "reports");
        guard.set("DROVER_CONCURRENT", "16");
        guard.set("DROVER_TICK_MS", "250");
        guard.set("DROVER_LIVENESS_SECS", "10");
        guard.set("DROVER_WORKER_BIN", "/usr/local/bin/drover-worker");
        guard.set("DROVER_REDIRECT_OUTPUT", "false");

        let config = Config::from_env().unwrap();

        assert_eq!(config.queue_name, "reports");
        assert_eq!(config.concurrent, 16);
        assert_eq!(config.tick, Duration::from_millis(250));
        assert_eq!(config.liveness_window, Duration::from_secs(10));
        assert_eq!(
            config.worker_bin,
            PathBuf::from("/usr/local/bin/drover-worker")
        );
        assert!(!config.redirect_output);
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();

        guard.set("DROVER_CONCURRENT", "0");

        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid("DROVER_CONCURRENT", _)));
    }

    #[test]
    fn test_invalid_tick_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();

        guard.set("DROVER_TICK_MS", "soon");

        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid("DROVER_TICK_MS", _)));
    }
}
