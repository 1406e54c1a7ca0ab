// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SQLite-backed control plane.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};

use crate::error::CoreError;
use crate::model::{
    ExecutorRecord, ExecutorStatus, InstanceRecord, InstanceStatus, Request, TaskRef,
};
use crate::task::CommandTask;

use super::ControlPlane;

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// SQLite-backed control plane.
///
/// Executors and their worker processes open the same database file, so the
/// pool runs in WAL mode with a busy timeout to tolerate concurrent writers.
#[derive(Clone)]
pub struct SqliteControlPlane {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct ExecutorRow {
    executor_id: String,
    host: String,
    queue_name: String,
    concurrent: i64,
    status: String,
    request: Option<String>,
    heartbeat: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<ExecutorRow> for ExecutorRecord {
    type Error = CoreError;

    fn try_from(row: ExecutorRow) -> Result<Self, Self::Error> {
        let concurrent = u32::try_from(row.concurrent)
            .map_err(|_| CoreError::invalid("concurrent", row.concurrent.to_string()))?;
        Ok(ExecutorRecord {
            executor_id: row.executor_id,
            host: row.host,
            queue_name: row.queue_name,
            concurrent,
            status: row.status.parse()?,
            request: parse_request(row.request)?,
            heartbeat: row.heartbeat,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct InstanceRow {
    instance_id: String,
    task_kind: String,
    task_id: String,
    status: String,
    enqueue_date: Option<DateTime<Utc>>,
    start_date: Option<DateTime<Utc>>,
    end_date: Option<DateTime<Utc>>,
    executor_id: Option<String>,
    claimed: bool,
}

impl TryFrom<InstanceRow> for InstanceRecord {
    type Error = CoreError;

    fn try_from(row: InstanceRow) -> Result<Self, Self::Error> {
        Ok(InstanceRecord {
            instance_id: row.instance_id,
            task: TaskRef::new(row.task_kind, row.task_id),
            status: row.status.parse()?,
            enqueue_date: row.enqueue_date,
            start_date: row.start_date,
            end_date: row.end_date,
            executor_id: row.executor_id,
            claimed: row.claimed,
        })
    }
}

#[derive(sqlx::FromRow)]
struct CommandTaskRow {
    task_id: String,
    name: String,
    description: String,
    command: String,
    nice: i64,
    timeout_seconds: i64,
}

impl TryFrom<CommandTaskRow> for CommandTask {
    type Error = CoreError;

    fn try_from(row: CommandTaskRow) -> Result<Self, Self::Error> {
        let nice = i32::try_from(row.nice)
            .map_err(|_| CoreError::invalid("nice", row.nice.to_string()))?;
        let timeout = u64::try_from(row.timeout_seconds)
            .map_err(|_| CoreError::invalid("timeout_seconds", row.timeout_seconds.to_string()))?;
        Ok(CommandTask {
            task_id: row.task_id,
            name: row.name,
            description: row.description,
            command: row.command,
            nice,
            timeout_seconds: timeout,
        })
    }
}

fn parse_request(raw: Option<String>) -> Result<Option<Request>, CoreError> {
    raw.map(|r| r.parse()).transpose()
}

const INSTANCE_COLUMNS: &str = "instance_id, task_kind, task_id, status, enqueue_date, \
     start_date, end_date, executor_id, claimed";

impl SqliteControlPlane {
    /// Create a control plane from an existing pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to a database URL (`sqlite:...`) or bare file path and run migrations.
    pub async fn connect(url: &str) -> Result<Self, CoreError> {
        let url = if url.starts_with("sqlite:") {
            url.to_string()
        } else {
            format!("sqlite:{}", url)
        };

        let options = SqliteConnectOptions::from_str(&url)
            .map_err(|e| CoreError::DatabaseError {
                operation: "parse_url".to_string(),
                details: format!("Invalid database URL {}: {}", url, e),
            })?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(10));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| CoreError::DatabaseError {
                operation: "connect".to_string(),
                details: format!("Failed to connect to SQLite at {}: {}", url, e),
            })?;

        MIGRATOR.run(&pool).await?;

        Ok(Self { pool })
    }

    /// Create and initialize a control plane from a file path.
    ///
    /// Creates parent directories and the database file when missing.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| CoreError::DatabaseError {
                operation: "create_dir".to_string(),
                details: format!("Failed to create directory {:?}: {}", parent, e),
            })?;
        }

        Self::connect(&path.to_string_lossy()).await
    }

    /// The underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait::async_trait]
impl ControlPlane for SqliteControlPlane {
    async fn create_executor(&self, executor: &ExecutorRecord) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            INSERT INTO executors (
                executor_id, host, queue_name, concurrent, status, request, heartbeat, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&executor.executor_id)
        .bind(&executor.host)
        .bind(&executor.queue_name)
        .bind(i64::from(executor.concurrent))
        .bind(executor.status.as_str())
        .bind(executor.request.map(|r| r.as_str()))
        .bind(executor.heartbeat)
        .bind(executor.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_executor(&self, executor_id: &str) -> Result<Option<ExecutorRecord>, CoreError> {
        let row = sqlx::query_as::<_, ExecutorRow>(
            r#"
            SELECT executor_id, host, queue_name, concurrent, status, request, heartbeat, created_at
            FROM executors
            WHERE executor_id = ?
            "#,
        )
        .bind(executor_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(ExecutorRecord::try_from).transpose()
    }

    async fn list_executors(
        &self,
        queue_name: Option<&str>,
    ) -> Result<Vec<ExecutorRecord>, CoreError> {
        let rows = sqlx::query_as::<_, ExecutorRow>(
            r#"
            SELECT executor_id, host, queue_name, concurrent, status, request, heartbeat, created_at
            FROM executors
            WHERE ?1 IS NULL OR queue_name = ?1
            ORDER BY created_at DESC
            "#,
        )
        .bind(queue_name)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ExecutorRecord::try_from).collect()
    }

    async fn get_executor_request(&self, executor_id: &str) -> Result<Option<Request>, CoreError> {
        let request: Option<Option<String>> =
            sqlx::query_scalar("SELECT request FROM executors WHERE executor_id = ?")
                .bind(executor_id)
                .fetch_optional(&self.pool)
                .await?;

        match request {
            Some(raw) => parse_request(raw),
            None => Err(CoreError::ExecutorNotFound {
                executor_id: executor_id.to_string(),
            }),
        }
    }

    async fn set_executor_request(
        &self,
        executor_id: &str,
        request: Option<Request>,
    ) -> Result<(), CoreError> {
        let result = sqlx::query("UPDATE executors SET request = ? WHERE executor_id = ?")
            .bind(request.map(|r| r.as_str()))
            .bind(executor_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::ExecutorNotFound {
                executor_id: executor_id.to_string(),
            });
        }

        Ok(())
    }

    async fn save_executor(&self, executor: &ExecutorRecord) -> Result<(), CoreError> {
        let result = sqlx::query(
            r#"
            UPDATE executors
            SET status = ?, concurrent = ?, heartbeat = ?
            WHERE executor_id = ?
            "#,
        )
        .bind(executor.status.as_str())
        .bind(i64::from(executor.concurrent))
        .bind(executor.heartbeat)
        .bind(&executor.executor_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::ExecutorNotFound {
                executor_id: executor.executor_id.clone(),
            });
        }

        Ok(())
    }

    async fn resolve_executor_request(
        &self,
        executor_id: &str,
        status: ExecutorStatus,
        handled: Request,
    ) -> Result<Option<Request>, CoreError> {
        let remaining: Option<Option<String>> = sqlx::query_scalar(
            r#"
            UPDATE executors
            SET status = ?1,
                request = CASE WHEN request = ?2 THEN NULL ELSE request END
            WHERE executor_id = ?3
            RETURNING request
            "#,
        )
        .bind(status.as_str())
        .bind(handled.as_str())
        .bind(executor_id)
        .fetch_optional(&self.pool)
        .await?;

        match remaining {
            Some(raw) => parse_request(raw),
            None => Err(CoreError::ExecutorNotFound {
                executor_id: executor_id.to_string(),
            }),
        }
    }

    async fn touch_heartbeat(
        &self,
        executor_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        sqlx::query("UPDATE executors SET heartbeat = ? WHERE executor_id = ?")
            .bind(at)
            .bind(executor_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn create_command_task(&self, task: &CommandTask) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            INSERT INTO command_tasks (
                task_id, name, description, command, nice, timeout_seconds, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&task.task_id)
        .bind(&task.name)
        .bind(&task.description)
        .bind(&task.command)
        .bind(i64::from(task.nice))
        .bind(i64::try_from(task.timeout_seconds).map_err(|_| CoreError::ValidationError {
            field: "timeout_seconds".to_string(),
            message: "too large".to_string(),
        })?)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_command_task(&self, task_id: &str) -> Result<Option<CommandTask>, CoreError> {
        let row = sqlx::query_as::<_, CommandTaskRow>(
            r#"
            SELECT task_id, name, description, command, nice, timeout_seconds
            FROM command_tasks
            WHERE task_id = ? OR name = ?
            "#,
        )
        .bind(task_id)
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(CommandTask::try_from).transpose()
    }

    async fn create_instance(&self, instance: &InstanceRecord) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            INSERT INTO instances (
                instance_id, task_kind, task_id, status, enqueue_date,
                start_date, end_date, executor_id, claimed
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&instance.instance_id)
        .bind(&instance.task.kind)
        .bind(&instance.task.task_id)
        .bind(instance.status.as_str())
        .bind(instance.enqueue_date)
        .bind(instance.start_date)
        .bind(instance.end_date)
        .bind(&instance.executor_id)
        .bind(instance.claimed)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_instance(&self, instance_id: &str) -> Result<Option<InstanceRecord>, CoreError> {
        let row = sqlx::query_as::<_, InstanceRow>(&format!(
            "SELECT {} FROM instances WHERE instance_id = ?",
            INSTANCE_COLUMNS
        ))
        .bind(instance_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(InstanceRecord::try_from).transpose()
    }

    async fn list_instances(
        &self,
        executor_id: Option<&str>,
        limit: i64,
    ) -> Result<Vec<InstanceRecord>, CoreError> {
        let rows = sqlx::query_as::<_, InstanceRow>(&format!(
            "SELECT {} FROM instances WHERE ?1 IS NULL OR executor_id = ?1 \
             ORDER BY rowid DESC LIMIT ?2",
            INSTANCE_COLUMNS
        ))
        .bind(executor_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(InstanceRecord::try_from).collect()
    }

    async fn set_instance_executor(
        &self,
        instance_id: &str,
        executor_id: &str,
    ) -> Result<(), CoreError> {
        let result = sqlx::query("UPDATE instances SET executor_id = ? WHERE instance_id = ?")
            .bind(executor_id)
            .bind(instance_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::InstanceNotFound {
                instance_id: instance_id.to_string(),
            });
        }

        Ok(())
    }

    async fn mark_instance_running(
        &self,
        instance_id: &str,
        start_date: DateTime<Utc>,
    ) -> Result<bool, CoreError> {
        let result = sqlx::query(
            r#"
            UPDATE instances
            SET status = 'running', start_date = ?
            WHERE instance_id = ? AND status = 'created'
            "#,
        )
        .bind(start_date)
        .bind(instance_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn finish_instance(
        &self,
        instance_id: &str,
        status: InstanceStatus,
        end_date: DateTime<Utc>,
    ) -> Result<bool, CoreError> {
        if !status.is_terminal() {
            return Err(CoreError::ValidationError {
                field: "status".to_string(),
                message: format!("{} is not a terminal status", status),
            });
        }

        let result = sqlx::query(
            r#"
            UPDATE instances
            SET status = ?, end_date = ?
            WHERE instance_id = ? AND status = 'running'
            "#,
        )
        .bind(status.as_str())
        .bind(end_date)
        .bind(instance_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn enqueue(&self, queue_name: &str, instance_id: &str) -> Result<(), CoreError> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query("UPDATE instances SET enqueue_date = ? WHERE instance_id = ?")
            .bind(Utc::now())
            .bind(instance_id)
            .execute(&mut *tx)
            .await?;

        if updated.rows_affected() == 0 {
            return Err(CoreError::InstanceNotFound {
                instance_id: instance_id.to_string(),
            });
        }

        sqlx::query("INSERT INTO queue_items (queue_name, instance_id) VALUES (?, ?)")
            .bind(queue_name)
            .bind(instance_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(())
    }

    async fn pop_queue(&self, queue_name: &str) -> Result<Option<InstanceRecord>, CoreError> {
        let mut tx = self.pool.begin().await?;

        let popped: Option<String> = sqlx::query_scalar(
            r#"
            DELETE FROM queue_items
            WHERE seq = (
                SELECT seq FROM queue_items WHERE queue_name = ? ORDER BY seq LIMIT 1
            )
            RETURNING instance_id
            "#,
        )
        .bind(queue_name)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(instance_id) = popped else {
            tx.commit().await?;
            return Ok(None);
        };

        sqlx::query("UPDATE instances SET claimed = 1 WHERE instance_id = ?")
            .bind(&instance_id)
            .execute(&mut *tx)
            .await?;

        let row = sqlx::query_as::<_, InstanceRow>(&format!(
            "SELECT {} FROM instances WHERE instance_id = ?",
            INSTANCE_COLUMNS
        ))
        .bind(&instance_id)
        .fetch_optional(&mut *tx)
        .await?;

        tx.commit().await?;

        match row {
            Some(row) => Ok(Some(row.try_into()?)),
            None => {
                tracing::warn!(
                    instance_id = %instance_id,
                    queue = %queue_name,
                    "Dropped queue entry for missing instance"
                );
                Ok(None)
            }
        }
    }

    async fn queue_len(&self, queue_name: &str) -> Result<i64, CoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM queue_items WHERE queue_name = ?")
            .bind(queue_name)
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    async fn health_check(&self) -> Result<bool, CoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(true)
    }
}
