//! Data access layer
//!
//! Repository traits for assets, resources, upload sessions, limits,
//! execution requests and worker tasks. The SQLite implementations persist
//! across restarts; the in-memory ones back tests and throwaway runs.

pub mod defaults;
pub mod memory;
pub mod sqlite;
pub mod traits;

use std::sync::Arc;

use geonode_core::LimitsConfig;

pub use memory::{
    InMemoryAssetRepository, InMemoryExecutionRepository, InMemoryLimitsRepository,
    InMemoryTaskRepository, InMemoryUploadRepository,
};
pub use sqlite::{
    SqliteAssetRepository, SqliteExecutionRepository, SqliteLimitsRepository,
    SqliteTaskRepository, SqliteUploadRepository,
};
pub use traits::{
    AssetLinkRepository, AssetRepository, ExecutionRequestRepository, LimitsRepository,
    ResourceHandlerInfoRepository, ResourceRepository, TaskRepository, UploadRepository,
};

/// Every repository the services need, behind trait objects.
#[derive(Clone)]
pub struct Repositories {
    pub assets: Arc<dyn AssetRepository>,
    pub links: Arc<dyn AssetLinkRepository>,
    pub resources: Arc<dyn ResourceRepository>,
    pub uploads: Arc<dyn UploadRepository>,
    pub limits: Arc<dyn LimitsRepository>,
    pub executions: Arc<dyn ExecutionRequestRepository>,
    pub handler_info: Arc<dyn ResourceHandlerInfoRepository>,
    pub tasks: Arc<dyn TaskRepository>,
}

impl Repositories {
    /// In-memory repositories with the protected limits seeded from config.
    pub fn in_memory(limits: &LimitsConfig) -> Self {
        let assets = Arc::new(InMemoryAssetRepository::new());
        let executions = Arc::new(InMemoryExecutionRepository::new());
        Self {
            assets: assets.clone(),
            links: assets.clone(),
            resources: assets,
            uploads: Arc::new(InMemoryUploadRepository::new()),
            limits: Arc::new(InMemoryLimitsRepository::with_defaults(limits)),
            executions: executions.clone(),
            handler_info: executions,
            tasks: Arc::new(InMemoryTaskRepository::new()),
        }
    }

    /// SQLite repositories on the database at `url`. Migrations run first,
    /// then protected limits missing from the table are seeded.
    pub async fn connect(url: &str, limits: &LimitsConfig) -> anyhow::Result<Self> {
        let pool = sqlite::connect(url).await?;
        let limits_repo = SqliteLimitsRepository::new(pool.clone());
        limits_repo.seed_defaults(limits).await?;

        let assets = Arc::new(SqliteAssetRepository::new(pool.clone()));
        let executions = Arc::new(SqliteExecutionRepository::new(pool.clone()));
        Ok(Self {
            assets: assets.clone(),
            links: assets.clone(),
            resources: assets,
            uploads: Arc::new(SqliteUploadRepository::new(pool.clone())),
            limits: Arc::new(limits_repo),
            executions: executions.clone(),
            handler_info: executions,
            tasks: Arc::new(SqliteTaskRepository::new(pool)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geonode_core::models::Upload;
    use geonode_core::Config;

    #[tokio::test]
    async fn records_survive_a_reconnect() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("geonode.db").display());
        let config = Config::local(dir.path().join("assets"), dir.path().join("media"));

        let repos = Repositories::connect(&url, config.limits()).await.unwrap();
        let upload = repos.uploads.create(Upload::new("alice", "roads")).await.unwrap();
        let seeded = repos.limits.list_size_limits().await.unwrap().len();
        assert!(seeded > 0);
        drop(repos);

        let repos = Repositories::connect(&url, config.limits()).await.unwrap();
        let stored = repos.uploads.get(upload.id).await.unwrap().unwrap();
        assert_eq!(stored.name, "roads");
        assert_eq!(repos.limits.list_size_limits().await.unwrap().len(), seeded);
    }
}
