//! Task queue: worker pool, polling, retry, and submission.
//!
//! Submitting a task wakes the worker immediately; the worker also polls at
//! `poll_interval_ms` so scheduled retries are picked up once their backoff
//! has elapsed.
//!
//! Shutdown: [`WorkerHandle::shutdown`] signals the pool to stop; it does not
//! wait for in-flight tasks.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, Notify, Semaphore};
use tokio::time::sleep;
use uuid::Uuid;

use geonode_core::models::{Task, TaskPayload, TaskStatus, TaskType};
use geonode_core::{TaskError, WorkerConfig};
use geonode_db::TaskRepository;

use crate::context::TaskHandlerContext;

/// Maximum delay in seconds before retrying a failed task. Caps exponential backoff
/// so that high retry counts do not produce excessively long delays.
pub const MAX_RETRY_BACKOFF_SECS: u64 = 300;

/// Computes backoff in seconds for a given retry count (exponential with cap).
#[inline]
pub(crate) fn compute_retry_backoff_seconds(retry_count: i32) -> u64 {
    2_u64
        .checked_pow(retry_count.max(0) as u32)
        .unwrap_or(MAX_RETRY_BACKOFF_SECS)
        .min(MAX_RETRY_BACKOFF_SECS)
}

/// Notified with the final status of every task that stops running.
pub type TaskFinishedSender = mpsc::Sender<(Uuid, TaskStatus)>;

#[derive(Clone, Debug)]
pub struct TaskQueueConfig {
    pub max_workers: usize,
    pub poll_interval_ms: u64,
    pub default_timeout_seconds: u64,
    pub max_retries: i32,
}

impl Default for TaskQueueConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            poll_interval_ms: 1000,
            default_timeout_seconds: 3600,
            max_retries: 3,
        }
    }
}

impl From<&WorkerConfig> for TaskQueueConfig {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            max_workers: config.max_workers,
            default_timeout_seconds: config.default_timeout_seconds,
            max_retries: config.max_retries,
            ..Self::default()
        }
    }
}

/// Submission side of the queue. Cheap to clone.
#[derive(Clone)]
pub struct TaskQueue {
    repository: Arc<dyn TaskRepository>,
    config: TaskQueueConfig,
    wake: Arc<Notify>,
}

/// Running worker pool.
pub struct WorkerHandle {
    shutdown_tx: mpsc::Sender<()>,
}

impl WorkerHandle {
    /// Signals the worker pool to stop claiming new tasks and exit its loop.
    /// Already-spawned task handlers run until they complete or time out.
    pub async fn shutdown(&self) {
        tracing::info!("Initiating task queue shutdown");
        let _ = self.shutdown_tx.send(()).await;
    }
}

impl TaskQueue {
    pub fn new(repository: Arc<dyn TaskRepository>, config: TaskQueueConfig) -> Self {
        Self {
            repository,
            config,
            wake: Arc::new(Notify::new()),
        }
    }

    pub fn repository(&self) -> &Arc<dyn TaskRepository> {
        &self.repository
    }

    /// Spawn the worker pool. The context is held weakly; tasks claimed after
    /// it is dropped fail.
    pub fn start_worker(
        &self,
        context: Weak<dyn TaskHandlerContext>,
        task_finished_tx: Option<TaskFinishedSender>,
    ) -> WorkerHandle {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let repository = self.repository.clone();
        let config = self.config.clone();
        let wake = self.wake.clone();

        tokio::spawn(async move {
            Self::worker_pool(repository, config, context, wake, shutdown_rx, task_finished_tx)
                .await;
        });

        WorkerHandle { shutdown_tx }
    }

    /// Submit a new task to the queue.
    #[tracing::instrument(skip(self, payload))]
    pub async fn submit_task(
        &self,
        task_type: TaskType,
        payload: serde_json::Value,
        scheduled_at: Option<DateTime<Utc>>,
    ) -> Result<Uuid> {
        let task = self
            .repository
            .create_task(
                task_type,
                payload,
                scheduled_at,
                Some(self.config.max_retries),
                Some(self.config.default_timeout_seconds),
            )
            .await
            .map_err(|e| {
                tracing::error!(
                    error = %e,
                    task_type = %task_type,
                    "Failed to create task in repository"
                );
                anyhow::anyhow!("Failed to create task in repository: {}", e)
            })?;

        tracing::info!(task_id = %task.id, task_type = %task_type, "Task submitted to queue");
        self.wake.notify_one();
        Ok(task.id)
    }

    /// Submit a typed payload.
    pub async fn submit<P: TaskPayload>(&self, payload: &P) -> Result<Uuid> {
        let value = serde_json::to_value(payload).context("Failed to serialize task payload")?;
        self.submit_task(P::task_type(), value, None).await
    }

    async fn worker_pool(
        repository: Arc<dyn TaskRepository>,
        config: TaskQueueConfig,
        context: Weak<dyn TaskHandlerContext>,
        wake: Arc<Notify>,
        mut shutdown_rx: mpsc::Receiver<()>,
        task_finished_tx: Option<TaskFinishedSender>,
    ) {
        tracing::info!(
            max_workers = config.max_workers,
            poll_interval_ms = config.poll_interval_ms,
            "Task queue worker pool started"
        );

        let semaphore = Arc::new(Semaphore::new(config.max_workers.max(1)));
        let poll_interval = Duration::from_millis(config.poll_interval_ms);

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!("Task queue worker pool shutting down");
                    break;
                }
                _ = wake.notified() => {
                    Self::claim_and_dispatch(&repository, &semaphore, &context, &task_finished_tx).await;
                }
                _ = sleep(poll_interval) => {
                    Self::claim_and_dispatch(&repository, &semaphore, &context, &task_finished_tx).await;
                }
            }
        }

        tracing::info!("Task queue worker pool stopped");
    }

    /// Claim runnable tasks while workers are free.
    async fn claim_and_dispatch(
        repository: &Arc<dyn TaskRepository>,
        semaphore: &Arc<Semaphore>,
        context: &Weak<dyn TaskHandlerContext>,
        task_finished_tx: &Option<TaskFinishedSender>,
    ) {
        loop {
            let permit = match semaphore.clone().try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => {
                    tracing::debug!("No workers available, skipping claim");
                    return;
                }
            };

            match repository.claim_next_task().await {
                Ok(Some(task)) => {
                    let repo = repository.clone();
                    let ctx = context.clone();
                    let finished_tx = task_finished_tx.clone();
                    tokio::spawn(async move {
                        let _permit = permit;
                        if let Err(e) = Self::process_task_with_retry(task, repo, ctx, finished_tx).await {
                            tracing::error!(error = %e, "Task processing failed");
                        }
                    });
                }
                Ok(None) => {
                    tracing::trace!("No tasks available in queue");
                    return;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to claim task from queue");
                    return;
                }
            }
        }
    }

    async fn notify_finished(
        task_finished_tx: &Option<TaskFinishedSender>,
        task_id: Uuid,
        status: TaskStatus,
    ) {
        if let Some(tx) = task_finished_tx {
            let _ = tx.send((task_id, status)).await;
        }
    }

    #[tracing::instrument(skip(repository, context, task_finished_tx), fields(task.id = %task.id, task.type = %task.task_type))]
    async fn process_task_with_retry(
        task: Task,
        repository: Arc<dyn TaskRepository>,
        context: Weak<dyn TaskHandlerContext>,
        task_finished_tx: Option<TaskFinishedSender>,
    ) -> Result<()> {
        let Some(ctx) = context.upgrade() else {
            let error_result = json!({
                "error": "Task handler context was dropped",
                "retry_count": task.retry_count,
            });
            repository.mark_failed(task.id, error_result).await?;
            Self::notify_finished(&task_finished_tx, task.id, TaskStatus::Failed).await;
            return Err(anyhow::anyhow!(
                "TaskHandlerContext was dropped, cannot process task"
            ));
        };

        let timeout_duration = Duration::from_secs(task.timeout_seconds.unwrap_or(3600));
        let start = std::time::Instant::now();
        let result = tokio::time::timeout(timeout_duration, ctx.dispatch_task(&task)).await;

        match result {
            Ok(Ok(task_result)) => {
                repository
                    .mark_completed(task.id, task_result)
                    .await
                    .context("Failed to mark task as completed")?;
                Self::notify_finished(&task_finished_tx, task.id, TaskStatus::Completed).await;
                tracing::info!(
                    task_id = %task.id,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "Task completed successfully"
                );
                Ok(())
            }
            Ok(Err(e)) => {
                let is_unrecoverable = e
                    .downcast_ref::<TaskError>()
                    .map(|te| !te.is_recoverable())
                    .unwrap_or(false);

                tracing::error!(
                    task_id = %task.id,
                    error = %e,
                    retry_count = task.retry_count,
                    max_retries = task.max_retries,
                    unrecoverable = is_unrecoverable,
                    "Task execution failed"
                );

                if !is_unrecoverable && task.can_retry() {
                    let backoff_seconds = compute_retry_backoff_seconds(task.retry_count);
                    tracing::info!(
                        task_id = %task.id,
                        retry_count = task.retry_count + 1,
                        backoff_seconds = backoff_seconds,
                        "Scheduling task retry"
                    );
                    repository.schedule_retry(task.id, backoff_seconds).await?;
                    return Ok(());
                }

                let error_result = json!({
                    "error": e.to_string(),
                    "retry_count": task.retry_count,
                    "unrecoverable": is_unrecoverable,
                });
                repository
                    .mark_failed(task.id, error_result)
                    .await
                    .context("Failed to mark task as failed")?;
                Self::notify_finished(&task_finished_tx, task.id, TaskStatus::Failed).await;
                Err(e)
            }
            Err(_) => {
                tracing::error!(
                    task_id = %task.id,
                    timeout_seconds = ?task.timeout_seconds,
                    "Task execution timed out"
                );
                if task.can_retry() {
                    let backoff_seconds = compute_retry_backoff_seconds(task.retry_count);
                    repository.schedule_retry(task.id, backoff_seconds).await?;
                    Ok(())
                } else {
                    let error_result = json!({
                        "error": "Task execution timed out",
                        "timeout_seconds": task.timeout_seconds,
                    });
                    repository.mark_failed(task.id, error_result).await?;
                    Self::notify_finished(&task_finished_tx, task.id, TaskStatus::Failed).await;
                    Err(anyhow::anyhow!("Task execution timed out"))
                }
            }
        }
    }
}
