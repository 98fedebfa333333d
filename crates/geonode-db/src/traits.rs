//! Repository trait abstractions
//!
//! Services depend on these traits only, so storage of the records can be
//! swapped without touching orchestration code.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use geonode_core::models::{
    Asset, AssetLink, ExecutionRequest, Resource, ResourceHandlerInfo, Task, TaskStatus, TaskType,
    Upload, UploadParallelismLimit, UploadSizeLimit,
};
use geonode_core::AppError;

#[async_trait]
pub trait AssetRepository: Send + Sync {
    async fn create(&self, asset: Asset) -> Result<Asset, AppError>;

    async fn get(&self, id: Uuid) -> Result<Option<Asset>, AppError>;

    /// Replace the stored row; fails with `NotFound` if it does not exist.
    async fn update(&self, asset: Asset) -> Result<Asset, AppError>;

    /// Returns whether a row was deleted.
    async fn delete(&self, id: Uuid) -> Result<bool, AppError>;
}

#[async_trait]
pub trait AssetLinkRepository: Send + Sync {
    async fn create_link(&self, link: AssetLink) -> Result<AssetLink, AppError>;

    /// Links of a resource, oldest first.
    async fn links_for_resource(&self, resource_id: Uuid) -> Result<Vec<AssetLink>, AppError>;

    async fn links_for_asset(&self, asset_id: Uuid) -> Result<Vec<AssetLink>, AppError>;

    async fn delete_links_for_asset(&self, asset_id: Uuid) -> Result<usize, AppError>;
}

#[async_trait]
pub trait ResourceRepository: Send + Sync {
    async fn create_resource(&self, resource: Resource) -> Result<Resource, AppError>;

    async fn get_resource(&self, id: Uuid) -> Result<Option<Resource>, AppError>;

    async fn update_resource(&self, resource: Resource) -> Result<Resource, AppError>;

    /// Resource published under `alternate`, if any.
    async fn find_by_alternate(&self, alternate: &str) -> Result<Option<Resource>, AppError>;

    async fn delete_resource(&self, id: Uuid) -> Result<bool, AppError>;
}

#[async_trait]
pub trait UploadRepository: Send + Sync {
    async fn create(&self, upload: Upload) -> Result<Upload, AppError>;

    async fn get(&self, id: Uuid) -> Result<Option<Upload>, AppError>;

    async fn update(&self, upload: Upload) -> Result<Upload, AppError>;

    async fn delete(&self, id: Uuid) -> Result<bool, AppError>;

    async fn list(&self) -> Result<Vec<Upload>, AppError>;

    /// Sessions whose state is anything but `PROCESSED`.
    async fn list_unprocessed(&self) -> Result<Vec<Upload>, AppError>;

    async fn find_by_execution(&self, execution_id: Uuid) -> Result<Option<Upload>, AppError>;
}

#[async_trait]
pub trait LimitsRepository: Send + Sync {
    async fn get_size_limit(&self, slug: &str) -> Result<Option<UploadSizeLimit>, AppError>;

    async fn list_size_limits(&self) -> Result<Vec<UploadSizeLimit>, AppError>;

    async fn upsert_size_limit(&self, limit: UploadSizeLimit)
        -> Result<UploadSizeLimit, AppError>;

    async fn delete_size_limit(&self, slug: &str) -> Result<bool, AppError>;

    async fn get_parallelism_limit(
        &self,
        slug: &str,
    ) -> Result<Option<UploadParallelismLimit>, AppError>;

    async fn list_parallelism_limits(&self) -> Result<Vec<UploadParallelismLimit>, AppError>;

    async fn upsert_parallelism_limit(
        &self,
        limit: UploadParallelismLimit,
    ) -> Result<UploadParallelismLimit, AppError>;

    async fn delete_parallelism_limit(&self, slug: &str) -> Result<bool, AppError>;
}

#[async_trait]
pub trait ExecutionRequestRepository: Send + Sync {
    async fn create(&self, request: ExecutionRequest) -> Result<ExecutionRequest, AppError>;

    async fn get(&self, exec_id: Uuid) -> Result<Option<ExecutionRequest>, AppError>;

    async fn update(&self, request: ExecutionRequest) -> Result<ExecutionRequest, AppError>;

    /// Number of the user's executions in `READY` or `RUNNING`.
    async fn count_in_flight_for_user(&self, user: &str) -> Result<usize, AppError>;

    async fn list_for_user(&self, user: &str) -> Result<Vec<ExecutionRequest>, AppError>;
}

#[async_trait]
pub trait ResourceHandlerInfoRepository: Send + Sync {
    async fn upsert_handler_info(
        &self,
        info: ResourceHandlerInfo,
    ) -> Result<ResourceHandlerInfo, AppError>;

    async fn handler_info_for_resource(
        &self,
        resource_id: Uuid,
    ) -> Result<Option<ResourceHandlerInfo>, AppError>;

    async fn delete_handler_info(&self, resource_id: Uuid) -> Result<bool, AppError>;
}

/// Durable queue of worker tasks.
#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn create_task(
        &self,
        task_type: TaskType,
        payload: serde_json::Value,
        scheduled_at: Option<DateTime<Utc>>,
        max_retries: Option<i32>,
        timeout_seconds: Option<u64>,
    ) -> anyhow::Result<Task>;

    async fn get_task(&self, task_id: Uuid) -> anyhow::Result<Option<Task>>;

    /// Atomically move the oldest runnable task to `running` and return it.
    async fn claim_next_task(&self) -> anyhow::Result<Option<Task>>;

    async fn update_status(&self, task_id: Uuid, status: TaskStatus) -> anyhow::Result<Task>;

    async fn mark_completed(&self, task_id: Uuid, result: serde_json::Value)
        -> anyhow::Result<Task>;

    async fn mark_failed(&self, task_id: Uuid, error: serde_json::Value) -> anyhow::Result<Task>;

    /// Bump `retry_count` and reschedule the task `backoff_seconds` from now.
    async fn schedule_retry(&self, task_id: Uuid, backoff_seconds: u64) -> anyhow::Result<Task>;
}
