use async_trait::async_trait;
use sqlx::SqlitePool;
use uuid::Uuid;

use geonode_core::models::{Upload, UploadState};
use geonode_core::AppError;

use super::{db_err, decode_row, encode, micros};
use crate::traits::UploadRepository;

#[derive(Clone)]
pub struct SqliteUploadRepository {
    pool: SqlitePool,
}

impl SqliteUploadRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UploadRepository for SqliteUploadRepository {
    async fn create(&self, upload: Upload) -> Result<Upload, AppError> {
        sqlx::query(
            "INSERT INTO uploads (id, state, execution_id, date_us, data) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(upload.id.to_string())
        .bind(upload.state.to_string())
        .bind(upload.execution_id.map(|id| id.to_string()))
        .bind(micros(upload.date))
        .bind(encode(&upload)?)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(upload)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Upload>, AppError> {
        let row = sqlx::query("SELECT data FROM uploads WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(decode_row).transpose()
    }

    async fn update(&self, upload: Upload) -> Result<Upload, AppError> {
        let result =
            sqlx::query("UPDATE uploads SET state = ?, execution_id = ?, data = ? WHERE id = ?")
                .bind(upload.state.to_string())
                .bind(upload.execution_id.map(|id| id.to_string()))
                .bind(encode(&upload)?)
                .bind(upload.id.to_string())
                .execute(&self.pool)
                .await
                .map_err(db_err)?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Upload {} not found", upload.id)));
        }
        Ok(upload)
    }

    async fn delete(&self, id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM uploads WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn list(&self) -> Result<Vec<Upload>, AppError> {
        let rows = sqlx::query("SELECT data FROM uploads ORDER BY date_us, rowid")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.iter().map(decode_row).collect()
    }

    async fn list_unprocessed(&self) -> Result<Vec<Upload>, AppError> {
        let rows = sqlx::query("SELECT data FROM uploads WHERE state != ? ORDER BY date_us, rowid")
            .bind(UploadState::Processed.to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.iter().map(decode_row).collect()
    }

    async fn find_by_execution(&self, execution_id: Uuid) -> Result<Option<Upload>, AppError> {
        let row = sqlx::query("SELECT data FROM uploads WHERE execution_id = ? LIMIT 1")
            .bind(execution_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(decode_row).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::memory_pool;

    #[tokio::test]
    async fn state_changes_are_visible_to_filters() {
        let repo = SqliteUploadRepository::new(memory_pool().await);
        let execution_id = Uuid::new_v4();
        let mut first = Upload::new("alice", "grid.tif");
        first.execution_id = Some(execution_id);
        let first = repo.create(first).await.unwrap();
        repo.create(Upload::new("bob", "roads.shp")).await.unwrap();
        assert_eq!(repo.list_unprocessed().await.unwrap().len(), 2);

        let mut done = repo.find_by_execution(execution_id).await.unwrap().unwrap();
        assert_eq!(done.id, first.id);
        done.state = UploadState::Processed;
        done.import_id = Some(7);
        repo.update(done).await.unwrap();

        let open = repo.list_unprocessed().await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].user, "bob");
        assert_eq!(repo.get(first.id).await.unwrap().unwrap().import_id, Some(7));
        assert_eq!(repo.list().await.unwrap().len(), 2);
    }
}
