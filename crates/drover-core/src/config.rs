// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::backup::{DirectoryBackup, LogBackup, NoBackup};

/// Settings shared by every drover process.
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite connection URL or file path of the control plane
    pub database_url: String,
    /// Root directory for instance logs
    pub log_dir: PathBuf,
    /// Scratch directory exposed to command templates
    pub tmp_dir: PathBuf,
    /// Archive directory for finished logs; `None` disables backup
    pub backup_dir: Option<PathBuf>,
    /// Write debug lines to instance logs
    pub log_debug: bool,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `DROVER_DATABASE_URL`: SQLite connection string or path
    ///
    /// Optional (with defaults):
    /// - `DROVER_LOG_DIR`: instance log root (default: `.data/logs`)
    /// - `DROVER_TMP_DIR`: scratch directory (default: system temp dir)
    /// - `DROVER_BACKUP_DIR`: log archive directory (default: unset)
    /// - `DROVER_LOG_DEBUG`: `true`/`false` (default: false)
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("DROVER_DATABASE_URL")
            .map_err(|_| ConfigError::Missing("DROVER_DATABASE_URL"))?;

        let log_dir = std::env::var("DROVER_LOG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(".data/logs"));

        let tmp_dir = std::env::var("DROVER_TMP_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| std::env::temp_dir());

        let backup_dir = std::env::var("DROVER_BACKUP_DIR")
            .ok()
            .filter(|s| !s.is_empty())
            .map(PathBuf::from);

        let log_debug = parse_bool("DROVER_LOG_DEBUG", false)?;

        Ok(Self {
            database_url,
            log_dir,
            tmp_dir,
            backup_dir,
            log_debug,
        })
    }

    /// Variables available as `$NAME` in command templates.
    pub fn settings(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (
                "DROVER_TMP_DIR".to_string(),
                self.tmp_dir.display().to_string(),
            ),
            ("DROVER_DATABASE_URL".to_string(), self.database_url.clone()),
        ])
    }

    /// The configured log backup.
    pub fn log_backup(&self) -> Arc<dyn LogBackup> {
        match &self.backup_dir {
            Some(dir) => Arc::new(DirectoryBackup::new(dir)),
            None => Arc::new(NoBackup),
        }
    }
}

/// Read a boolean variable, accepting `true/false/1/0/yes/no`.
pub fn parse_bool(key: &'static str, default: bool) -> Result<bool, ConfigError> {
    match std::env::var(key) {
        Err(_) => Ok(default),
        Ok(value) => match value.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" | "" => Ok(false),
            _ => Err(ConfigError::Invalid(key, "must be true or false")),
        },
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    // Mutex to serialize tests that modify environment variables
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    struct EnvGuard {
        vars: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new() -> Self {
            Self { vars: Vec::new() }
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
    fn test_config_from_env_with_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();

        guard.set("DROVER_DATABASE_URL", "sqlite:drover.db");
        guard.remove("DROVER_LOG_DIR");
        guard.remove("DROVER_TMP_DIR");
        guard.remove("DROVER_BACKUP_DIR");
        guard.remove("DROVER_LOG_DEBUG");

        let config = Config::from_env().unwrap();

        assert_eq!(config.database_url, "sqlite:drover.db");
        assert_eq!(config.log_dir, PathBuf::from(".data/logs"));
        assert_eq!(config.tmp_dir, env::temp_dir());
        assert!(config.backup_dir.is_none());
        assert!(!config.log_debug);
    }

    #[test]
    fn test_config_from_env_all_custom() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();

        guard.set("DROVER_DATABASE_URL", "/srv/drover/cp.db");
        guard.set("DROVER_LOG_DIR", "/var/log/drover");
        guard.set("DROVER_TMP_DIR", "/scratch");
        guard.set("DROVER_BACKUP_DIR", "/archive");
        guard.set("DROVER_LOG_DEBUG", "yes");

        let config = Config::from_env().unwrap();

        assert_eq!(config.log_dir, PathBuf::from("/var/log/drover"));
        assert_eq!(config.backup_dir, Some(PathBuf::from("/archive")));
        assert!(config.log_debug);

        let settings = config.settings();
        assert_eq!(settings["DROVER_TMP_DIR"], "/scratch");
        assert_eq!(settings["DROVER_DATABASE_URL"], "/srv/drover/cp.db");
    }

    #[test]
    fn test_config_missing_database_url() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();

        guard.remove("DROVER_DATABASE_URL");

        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Missing("DROVER_DATABASE_URL")));
        assert!(err.to_string().contains("DROVER_DATABASE_URL"));
    }

    #[test]
    fn test_config_invalid_debug_flag() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();

        guard.set("DROVER_DATABASE_URL", "sqlite::memory:");
        guard.set("DROVER_LOG_DEBUG", "sometimes");

        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid("DROVER_LOG_DEBUG", _)));
    }
}
