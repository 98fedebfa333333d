use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use geonode_core::models::{Task, TaskStatus, TaskType};

use crate::traits::TaskRepository;

const DEFAULT_MAX_RETRIES: i32 = 3;

/// Task table kept in insertion order; `claim_next_task` picks the oldest
/// runnable row under the write lock.
#[derive(Default)]
pub struct InMemoryTaskRepository {
    tasks: RwLock<Vec<Task>>,
}

impl InMemoryTaskRepository {
    pub fn new() -> Self {
        Self::default()
    }

    async fn modify<F>(&self, task_id: Uuid, f: F) -> anyhow::Result<Task>
    where
        F: FnOnce(&mut Task),
    {
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .iter_mut()
            .find(|t| t.id == task_id)
            .ok_or_else(|| anyhow::anyhow!("Task {} not found", task_id))?;
        f(task);
        task.updated_at = Utc::now();
        Ok(task.clone())
    }
}

#[async_trait]
impl TaskRepository for InMemoryTaskRepository {
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
        self.tasks.write().await.push(task.clone());
        Ok(task)
    }

    async fn get_task(&self, task_id: Uuid) -> anyhow::Result<Option<Task>> {
        Ok(self
            .tasks
            .read()
            .await
            .iter()
            .find(|t| t.id == task_id)
            .cloned())
    }

    async fn claim_next_task(&self) -> anyhow::Result<Option<Task>> {
        let mut tasks = self.tasks.write().await;
        let now = Utc::now();
        let next = tasks
            .iter_mut()
            .filter(|t| t.is_ready_to_run())
            .min_by_key(|t| t.scheduled_at);
        Ok(next.map(|task| {
            task.status = TaskStatus::Running;
            task.started_at = Some(now);
            task.updated_at = now;
            task.clone()
        }))
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

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn claim_returns_each_task_once() {
        let repo = InMemoryTaskRepository::new();
        let first = repo
            .create_task(TaskType::ExecutionStep, serde_json::json!({"n": 1}), None, None, None)
            .await
            .unwrap();
        repo.create_task(TaskType::ExecutionStep, serde_json::json!({"n": 2}), None, None, None)
            .await
            .unwrap();

        let claimed = repo.claim_next_task().await.unwrap().unwrap();
        assert_eq!(claimed.id, first.id);
        assert_eq!(claimed.status, TaskStatus::Running);

        let second = repo.claim_next_task().await.unwrap().unwrap();
        assert_ne!(second.id, first.id);
        assert!(repo.claim_next_task().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn retry_is_deferred_by_backoff() {
        let repo = InMemoryTaskRepository::new();
        let task = repo
            .create_task(TaskType::ExecutionStep, serde_json::json!({}), None, Some(2), None)
            .await
            .unwrap();
        repo.claim_next_task().await.unwrap();

        let retried = repo.schedule_retry(task.id, 60).await.unwrap();
        assert_eq!(retried.retry_count, 1);
        assert_eq!(retried.status, TaskStatus::Scheduled);
        assert!(repo.claim_next_task().await.unwrap().is_none());

        let retried = repo.schedule_retry(task.id, 0).await.unwrap();
        assert_eq!(retried.retry_count, 2);
        assert!(!retried.can_retry());
        assert!(repo.claim_next_task().await.unwrap().is_some());
    }
}
