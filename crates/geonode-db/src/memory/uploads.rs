use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use geonode_core::models::Upload;
use geonode_core::AppError;

use crate::traits::UploadRepository;

#[derive(Default)]
pub struct InMemoryUploadRepository {
    uploads: RwLock<HashMap<Uuid, Upload>>,
}

impl InMemoryUploadRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UploadRepository for InMemoryUploadRepository {
    async fn create(&self, upload: Upload) -> Result<Upload, AppError> {
        self.uploads.write().await.insert(upload.id, upload.clone());
        Ok(upload)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Upload>, AppError> {
        Ok(self.uploads.read().await.get(&id).cloned())
    }

    async fn update(&self, upload: Upload) -> Result<Upload, AppError> {
        let mut uploads = self.uploads.write().await;
        match uploads.get_mut(&upload.id) {
            Some(row) => {
                *row = upload.clone();
                Ok(upload)
            }
            None => Err(AppError::NotFound(format!("Upload {} not found", upload.id))),
        }
    }

    async fn delete(&self, id: Uuid) -> Result<bool, AppError> {
        Ok(self.uploads.write().await.remove(&id).is_some())
    }

    async fn list(&self) -> Result<Vec<Upload>, AppError> {
        let mut uploads: Vec<Upload> = self.uploads.read().await.values().cloned().collect();
        uploads.sort_by_key(|u| u.date);
        Ok(uploads)
    }

    async fn list_unprocessed(&self) -> Result<Vec<Upload>, AppError> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|u| !u.is_processed())
            .collect())
    }

    async fn find_by_execution(&self, execution_id: Uuid) -> Result<Option<Upload>, AppError> {
        Ok(self
            .uploads
            .read()
            .await
            .values()
            .find(|u| u.execution_id == Some(execution_id))
            .cloned())
    }
}
