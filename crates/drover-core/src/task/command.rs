// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shell command tasks.
//!
//! Command templates may reference settings as `$NAME` and the current date
//! as `$LOCAL{...}` / `$UTC{...}`, where the braces hold a pattern built from
//! the tokens `YYYY`, `MM`, `DD`, `hh`, `mm` and `ss`:
//!
//! ```text
//! tar czf $DROVER_TMP_DIR/backup-$UTC{YYYYMMDD-hhmm}.tgz /srv/data
//! ```

use std::collections::BTreeMap;
use std::process::Stdio;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Local, NaiveDateTime, Utc};
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

use super::{Task, TaskContext, TaskOutcome, TaskSource};
use crate::error::CoreError;
use crate::persistence::ControlPlane;

/// Kind under which command tasks are registered.
pub const COMMAND_KIND: &str = "command";

static DATE_PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$(LOCAL|UTC)\{(.*?)\}").expect("date placeholder pattern is valid")
});

/// Task which runs an arbitrary shell command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandTask {
    /// Unique identifier (UUID).
    pub task_id: String,
    /// Unique human-readable name.
    pub name: String,
    /// Free-form description.
    pub description: String,
    /// Command template.
    pub command: String,
    /// Scheduling priority adjustment passed to `nice`; zero runs unchanged.
    pub nice: i32,
    /// Wall-clock limit in seconds; zero means none.
    pub timeout_seconds: u64,
}

impl CommandTask {
    /// Create a command task with no timeout and no niceness.
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            task_id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            description: String::new(),
            command: command.into(),
            nice: 0,
            timeout_seconds: 0,
        }
    }

    /// Set the timeout in seconds.
    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    /// Set the niceness.
    pub fn with_nice(mut self, nice: i32) -> Self {
        self.nice = nice;
        self
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// The command line that will be handed to the shell.
    pub fn command_line(&self, settings: &BTreeMap<String, String>) -> String {
        let command = interpret(
            &self.command,
            settings,
            Local::now().naive_local(),
            Utc::now().naive_utc(),
        );
        if self.nice != 0 {
            format!("nice -n {} {}", self.nice, command)
        } else {
            command
        }
    }
}

/// Expand settings and date placeholders in a command template.
///
/// Settings are substituted longest name first so `$DB_HOST` is not
/// clobbered by a setting named `DB`.
pub fn interpret(
    template: &str,
    settings: &BTreeMap<String, String>,
    local: NaiveDateTime,
    utc: NaiveDateTime,
) -> String {
    let mut names: Vec<&String> = settings.keys().collect();
    names.sort_by_key(|name| std::cmp::Reverse(name.len()));

    let mut command = template.to_string();
    for name in names {
        command = command.replace(&format!("${}", name), &settings[name]);
    }

    DATE_PLACEHOLDER
        .replace_all(&command, |caps: &Captures<'_>| {
            let at = if &caps[1] == "LOCAL" { local } else { utc };
            format_date_pattern(&caps[2], at)
        })
        .into_owned()
}

fn format_date_pattern(pattern: &str, at: NaiveDateTime) -> String {
    let format = pattern
        .replace('%', "%%")
        .replace("YYYY", "%Y")
        .replace("MM", "%m")
        .replace("DD", "%d")
        .replace("hh", "%H")
        .replace("mm", "%M")
        .replace("ss", "%S");
    at.format(&format).to_string()
}

#[async_trait]
impl Task for CommandTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    async fn start(&self, ctx: &TaskContext) -> anyhow::Result<TaskOutcome> {
        let command = self.command_line(&ctx.settings);
        ctx.log.info(&format!("Executing command...\n$ {}", command));

        let stdout = ctx.log.try_clone_file()?;
        let stderr = ctx.log.try_clone_file()?;

        let status = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&command)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .kill_on_drop(true)
            .status()
            .await?;

        ctx.log.debug(&format!("Command exited with {}", status));

        Ok(TaskOutcome::from(status.success()))
    }
}

/// Loads [`CommandTask`]s from the control plane.
pub struct CommandTaskSource {
    control: Arc<dyn ControlPlane>,
}

impl CommandTaskSource {
    /// Create a source backed by `control`.
    pub fn new(control: Arc<dyn ControlPlane>) -> Self {
        Self { control }
    }
}

#[async_trait]
impl TaskSource for CommandTaskSource {
    fn kind(&self) -> &str {
        COMMAND_KIND
    }

    async fn load(&self, task_id: &str) -> Result<Option<Arc<dyn Task>>, CoreError> {
        let task = self.control.get_command_task(task_id).await?;
        Ok(task.map(|t| Arc::new(t) as Arc<dyn Task>))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, s)
            .unwrap()
    }

    #[test]
    fn test_interpret_settings_longest_first() {
        let mut settings = BTreeMap::new();
        settings.insert("DB".to_string(), "wrong".to_string());
        settings.insert("DB_HOST".to_string(), "db.local".to_string());

        let now = at(2026, 1, 2, 3, 4, 5);
        let out = interpret("psql -h $DB_HOST $DB", &settings, now, now);
        assert_eq!(out, "psql -h db.local wrong");
    }

    #[test]
    fn test_interpret_date_placeholders() {
        let local = at(2026, 10, 18, 9, 7, 3);
        let utc = at(2026, 10, 18, 7, 7, 3);

        let out = interpret(
            "cp in out-$LOCAL{YYYY-MM-DD_hh.mm.ss} && echo $UTC{hhmm}",
            &BTreeMap::new(),
            local,
            utc,
        );
        assert_eq!(out, "cp in out-2026-10-18_09.07.03 && echo 0707");
    }

    #[test]
    fn test_interpret_keeps_literal_percent() {
        let now = at(2026, 3, 1, 0, 0, 0);
        let out = interpret("echo $UTC{100%-YYYY}", &BTreeMap::new(), now, now);
        assert_eq!(out, "echo 100%-2026");
    }

    #[test]
    fn test_command_line_applies_nice() {
        let task = CommandTask::new("n", "echo hi").with_nice(10);
        assert_eq!(task.command_line(&BTreeMap::new()), "nice -n 10 echo hi");

        let task = CommandTask::new("n", "echo hi");
        assert_eq!(task.command_line(&BTreeMap::new()), "echo hi");
    }

    #[test]
    fn test_timeout_zero_means_none() {
        let task = CommandTask::new("n", "true");
        assert_eq!(task.timeout(), Duration::ZERO);
        assert_eq!(task.with_timeout(5).timeout(), Duration::from_secs(5));
    }
}
