use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use geonode_core::models::{ExecutionRequest, ResourceHandlerInfo};
use geonode_core::AppError;

use crate::traits::{ExecutionRequestRepository, ResourceHandlerInfoRepository};

/// Execution requests and the handler records of the resources they produced.
#[derive(Default)]
pub struct InMemoryExecutionRepository {
    requests: RwLock<HashMap<Uuid, ExecutionRequest>>,
    handler_info: RwLock<HashMap<Uuid, ResourceHandlerInfo>>,
}

impl InMemoryExecutionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExecutionRequestRepository for InMemoryExecutionRepository {
    async fn create(&self, request: ExecutionRequest) -> Result<ExecutionRequest, AppError> {
        self.requests
            .write()
            .await
            .insert(request.exec_id, request.clone());
        Ok(request)
    }

    async fn get(&self, exec_id: Uuid) -> Result<Option<ExecutionRequest>, AppError> {
        Ok(self.requests.read().await.get(&exec_id).cloned())
    }

    async fn update(&self, mut request: ExecutionRequest) -> Result<ExecutionRequest, AppError> {
        let mut requests = self.requests.write().await;
        match requests.get_mut(&request.exec_id) {
            Some(row) => {
                request.last_updated = Utc::now();
                *row = request.clone();
                Ok(request)
            }
            None => Err(AppError::NotFound(format!(
                "Execution request {} not found",
                request.exec_id
            ))),
        }
    }

    async fn count_in_flight_for_user(&self, user: &str) -> Result<usize, AppError> {
        Ok(self
            .requests
            .read()
            .await
            .values()
            .filter(|r| r.user == user && r.status.is_in_flight())
            .count())
    }

    async fn list_for_user(&self, user: &str) -> Result<Vec<ExecutionRequest>, AppError> {
        let mut rows: Vec<ExecutionRequest> = self
            .requests
            .read()
            .await
            .values()
            .filter(|r| r.user == user)
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.created);
        Ok(rows)
    }
}

#[async_trait]
impl ResourceHandlerInfoRepository for InMemoryExecutionRepository {
    async fn upsert_handler_info(
        &self,
        info: ResourceHandlerInfo,
    ) -> Result<ResourceHandlerInfo, AppError> {
        self.handler_info
            .write()
            .await
            .insert(info.resource_id, info.clone());
        Ok(info)
    }

    async fn handler_info_for_resource(
        &self,
        resource_id: Uuid,
    ) -> Result<Option<ResourceHandlerInfo>, AppError> {
        Ok(self.handler_info.read().await.get(&resource_id).cloned())
    }

    async fn delete_handler_info(&self, resource_id: Uuid) -> Result<bool, AppError> {
        Ok(self.handler_info.write().await.remove(&resource_id).is_some())
    }
}
