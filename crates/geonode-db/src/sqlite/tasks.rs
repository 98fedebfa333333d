use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use geonode_core::models::{Task, TaskStatus, TaskType};

use super::{decode_row, encode, label, micros};
use crate::traits::TaskRepository;

const DEFAULT_MAX_RETRIES: i32 = 3;

/// Durable task queue. Claiming is a compare-and-set on the status column,
/// so two workers never run the same task.
#[derive(Clone)]
pub struct SqliteTaskRepository {
    pool: SqlitePool,
}

impl SqliteTaskRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn save(&self, task: &Task) -> anyhow::Result<()> {
        let result = sqlx::query(
            "UPDATE tasks SET status = ?, scheduled_at_us = ?, data = ? WHERE id = ?",
        )
        .bind(label(&task.status)?)
        .bind(micros(task.scheduled_at))
        .bind(encode(task)?)
        .bind(task.id.to_string())
        .execute(&self.pool)
        .await
        .context("Failed to update task")?;
        if result.rows_affected() == 0 {
            anyhow::bail!("Task {} not found", task.id);
        }
        Ok(())
    }

    async fn modify<F>(&self, task_id: Uuid, f: F) -> anyhow::Result<Task>
    where
        F: FnOnce(&mut Task) + Send,
    {
        let mut task = self
            .get_task(task_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Task {} not found", task_id))?;
        f(&mut task);
        task.updated_at = Utc::now();
        self.save(&task).await?;
        Ok(task)
    }
}

#[async_trait]
impl TaskRepository for SqliteTaskRepository {
    #[tracing::instrument(skip(self, payload))]
    async fn create_task(
        &self,
        task_type: TaskType,
        payload: serde_json::Value,
        scheduled_at: Option<DateTime<Utc>>,
        max_retries: Option<i32>,
        timeout_seconds: Option<u64>,
    ) -> anyhow::Result<Task> {
        let now = Utc::now();
        let task = Task {
            id: Uuid::new_v4(),
            task_type,
            status: TaskStatus::Pending,
            payload,
            result: None,
            scheduled_at: scheduled_at.unwrap_or(now),
            started_at: None,
            completed_at: None,
            retry_count: 0,
            max_retries: max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
            timeout_seconds,
            created_at: now,
            updated_at: now,
        };
        sqlx::query("INSERT INTO tasks (id, status, scheduled_at_us, data) VALUES (?, ?, ?, ?)")
            .bind(task.id.to_string())
            .bind(label(&task.status)?)
            .bind(micros(task.scheduled_at))
            .bind(encode(&task)?)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, task_type = ?task_type, "Failed to insert task into database");
                anyhow::anyhow!("Failed to insert task into database: {}", e)
            })?;
        Ok(task)
    }

    async fn get_task(&self, task_id: Uuid) -> anyhow::Result<Option<Task>> {
        let row = sqlx::query("SELECT data FROM tasks WHERE id = ?")
            .bind(task_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch task")?;
        Ok(row.as_ref().map(decode_row).transpose()?)
    }

    async fn claim_next_task(&self) -> anyhow::Result<Option<Task>> {
        let pending = label(&TaskStatus::Pending)?;
        let scheduled = label(&TaskStatus::Scheduled)?;
        let running = label(&TaskStatus::Running)?;
        loop {
            let now = Utc::now();
            let row = sqlx::query(
                "SELECT data FROM tasks WHERE status IN (?, ?) AND scheduled_at_us <= ? \
                 ORDER BY scheduled_at_us, rowid LIMIT 1",
            )
            .bind(&pending)
            .bind(&scheduled)
            .bind(micros(now))
            .fetch_optional(&self.pool)
            .await
            .context("Failed to look up the next task")?;
            let Some(row) = row else {
                return Ok(None);
            };
            let mut task: Task = decode_row(&row)?;
            let previous = label(&task.status)?;
            task.status = TaskStatus::Running;
            task.started_at = Some(now);
            task.updated_at = now;

            let claimed = sqlx::query("UPDATE tasks SET status = ?, data = ? WHERE id = ? AND status = ?")
                .bind(&running)
                .bind(encode(&task)?)
                .bind(task.id.to_string())
                .bind(previous)
                .execute(&self.pool)
                .await
                .context("Failed to claim task")?;
            if claimed.rows_affected() == 1 {
                return Ok(Some(task));
            }
            // Another worker took it first.
        }
    }

    async fn update_status(&self, task_id: Uuid, status: TaskStatus) -> anyhow::Result<Task> {
        self.modify(task_id, |t| t.status = status).await
    }

    async fn mark_completed(
        &self,
        task_id: Uuid,
        result: serde_json::Value,
    ) -> anyhow::Result<Task> {
        self.modify(task_id, |t| {
            t.status = TaskStatus::Completed;
            t.result = Some(result);
            t.completed_at = Some(Utc::now());
        })
        .await
    }

    async fn mark_failed(&self, task_id: Uuid, error: serde_json::Value) -> anyhow::Result<Task> {
        self.modify(task_id, |t| {
            t.status = TaskStatus::Failed;
            t.result = Some(error);
            t.completed_at = Some(Utc::now());
        })
        .await
    }

    async fn schedule_retry(&self, task_id: Uuid, backoff_seconds: u64) -> anyhow::Result<Task> {
        self.modify(task_id, |t| {
            t.status = TaskStatus::Scheduled;
            t.retry_count += 1;
            t.started_at = None;
            t.scheduled_at = Utc::now() + chrono::Duration::seconds(backoff_seconds as i64);
        })
        .await
    }
}
