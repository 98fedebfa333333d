use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use geonode_core::models::{ExecutionRequest, ExecutionStatus, ResourceHandlerInfo};
use geonode_core::AppError;

use super::{db_err, decode_row, encode, label, micros};
use crate::traits::{ExecutionRequestRepository, ResourceHandlerInfoRepository};

/// Execution requests and the handler records of the resources they produced.
#[derive(Clone)]
pub struct SqliteExecutionRepository {
    pool: SqlitePool,
}

impl SqliteExecutionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ExecutionRequestRepository for SqliteExecutionRepository {
    #[tracing::instrument(skip(self, request), fields(execution_id = %request.exec_id))]
    async fn create(&self, request: ExecutionRequest) -> Result<ExecutionRequest, AppError> {
        sqlx::query(
            "INSERT INTO execution_requests (exec_id, user_name, status, created_us, data) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(request.exec_id.to_string())
        .bind(&request.user)
        .bind(label(&request.status)?)
        .bind(micros(request.created))
        .bind(encode(&request)?)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(request)
    }

    async fn get(&self, exec_id: Uuid) -> Result<Option<ExecutionRequest>, AppError> {
        let row = sqlx::query("SELECT data FROM execution_requests WHERE exec_id = ?")
            .bind(exec_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(decode_row).transpose()
    }

    async fn update(&self, mut request: ExecutionRequest) -> Result<ExecutionRequest, AppError> {
        request.last_updated = Utc::now();
        let result =
            sqlx::query("UPDATE execution_requests SET status = ?, data = ? WHERE exec_id = ?")
                .bind(label(&request.status)?)
                .bind(encode(&request)?)
                .bind(request.exec_id.to_string())
                .execute(&self.pool)
                .await
                .map_err(db_err)?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!(
                "Execution request {} not found",
                request.exec_id
            )));
        }
        Ok(request)
    }

    async fn count_in_flight_for_user(&self, user: &str) -> Result<usize, AppError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM execution_requests WHERE user_name = ? AND status IN (?, ?)",
        )
        .bind(user)
        .bind(label(&ExecutionStatus::Ready)?)
        .bind(label(&ExecutionStatus::Running)?)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(count as usize)
    }

    async fn list_for_user(&self, user: &str) -> Result<Vec<ExecutionRequest>, AppError> {
        let rows = sqlx::query(
            "SELECT data FROM execution_requests WHERE user_name = ? ORDER BY created_us, rowid",
        )
        .bind(user)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter().map(decode_row).collect()
    }
}

#[async_trait]
impl ResourceHandlerInfoRepository for SqliteExecutionRepository {
    async fn upsert_handler_info(
        &self,
        info: ResourceHandlerInfo,
    ) -> Result<ResourceHandlerInfo, AppError> {
        sqlx::query(
            "INSERT INTO resource_handler_info (resource_id, data) VALUES (?, ?) \
             ON CONFLICT (resource_id) DO UPDATE SET data = excluded.data",
        )
        .bind(info.resource_id.to_string())
        .bind(encode(&info)?)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(info)
    }

    async fn handler_info_for_resource(
        &self,
        resource_id: Uuid,
    ) -> Result<Option<ResourceHandlerInfo>, AppError> {
        let row = sqlx::query("SELECT data FROM resource_handler_info WHERE resource_id = ?")
            .bind(resource_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(decode_row).transpose()
    }

    async fn delete_handler_info(&self, resource_id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM resource_handler_info WHERE resource_id = ?")
            .bind(resource_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::memory_pool;
    use geonode_core::models::ImportAction;

    #[tokio::test]
    async fn in_flight_count_follows_status_updates() {
        let repo = SqliteExecutionRepository::new(memory_pool().await);
        let mut request = repo
            .create(ExecutionRequest::new(
                "alice",
                ImportAction::Import,
                "start_import",
                serde_json::json!({"files": {"base_file": "/tmp/a.tif"}}),
            ))
            .await
            .unwrap();
        repo.create(ExecutionRequest::new(
            "bob",
            ImportAction::Import,
            "start_import",
            serde_json::json!({}),
        ))
        .await
        .unwrap();
        assert_eq!(repo.count_in_flight_for_user("alice").await.unwrap(), 1);

        request.status = ExecutionStatus::Finished;
        request.output_params = serde_json::json!({"alternate": "geonode:a"});
        repo.update(request.clone()).await.unwrap();

        assert_eq!(repo.count_in_flight_for_user("alice").await.unwrap(), 0);
        let stored = repo.get(request.exec_id).await.unwrap().unwrap();
        assert_eq!(stored.output_params["alternate"], "geonode:a");
        assert_eq!(stored.input_params["files"]["base_file"], "/tmp/a.tif");
        assert_eq!(repo.list_for_user("alice").await.unwrap().len(), 1);
    }
}
