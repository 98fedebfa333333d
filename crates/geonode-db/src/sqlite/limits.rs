use async_trait::async_trait;
use sqlx::SqlitePool;

use geonode_core::models::{UploadParallelismLimit, UploadSizeLimit};
use geonode_core::{AppError, LimitsConfig};

use super::{db_err, decode_row, encode};
use crate::defaults::{protected_parallelism_limits, protected_size_limits};
use crate::traits::LimitsRepository;

#[derive(Clone)]
pub struct SqliteLimitsRepository {
    pool: SqlitePool,
}

impl SqliteLimitsRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert the protected limits that are missing. Values changed through
    /// the admin API are kept.
    pub async fn seed_defaults(&self, config: &LimitsConfig) -> Result<(), AppError> {
        for limit in protected_size_limits(config) {
            sqlx::query("INSERT OR IGNORE INTO upload_size_limits (slug, data) VALUES (?, ?)")
                .bind(&limit.slug)
                .bind(encode(&limit)?)
                .execute(&self.pool)
                .await
                .map_err(db_err)?;
        }
        for limit in protected_parallelism_limits(config) {
            sqlx::query("INSERT OR IGNORE INTO upload_parallelism_limits (slug, data) VALUES (?, ?)")
                .bind(&limit.slug)
                .bind(encode(&limit)?)
                .execute(&self.pool)
                .await
                .map_err(db_err)?;
        }
        Ok(())
    }
}

#[async_trait]
impl LimitsRepository for SqliteLimitsRepository {
    async fn get_size_limit(&self, slug: &str) -> Result<Option<UploadSizeLimit>, AppError> {
        let row = sqlx::query("SELECT data FROM upload_size_limits WHERE slug = ?")
            .bind(slug)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(decode_row).transpose()
    }

    async fn list_size_limits(&self) -> Result<Vec<UploadSizeLimit>, AppError> {
        let rows = sqlx::query("SELECT data FROM upload_size_limits ORDER BY slug")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.iter().map(decode_row).collect()
    }

    async fn upsert_size_limit(
        &self,
        limit: UploadSizeLimit,
    ) -> Result<UploadSizeLimit, AppError> {
        sqlx::query(
            "INSERT INTO upload_size_limits (slug, data) VALUES (?, ?) \
             ON CONFLICT (slug) DO UPDATE SET data = excluded.data",
        )
        .bind(&limit.slug)
        .bind(encode(&limit)?)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(limit)
    }

    async fn delete_size_limit(&self, slug: &str) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM upload_size_limits WHERE slug = ?")
            .bind(slug)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_parallelism_limit(
        &self,
        slug: &str,
    ) -> Result<Option<UploadParallelismLimit>, AppError> {
        let row = sqlx::query("SELECT data FROM upload_parallelism_limits WHERE slug = ?")
            .bind(slug)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(decode_row).transpose()
    }

    async fn list_parallelism_limits(&self) -> Result<Vec<UploadParallelismLimit>, AppError> {
        let rows = sqlx::query("SELECT data FROM upload_parallelism_limits ORDER BY slug")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.iter().map(decode_row).collect()
    }

    async fn upsert_parallelism_limit(
        &self,
        limit: UploadParallelismLimit,
    ) -> Result<UploadParallelismLimit, AppError> {
        sqlx::query(
            "INSERT INTO upload_parallelism_limits (slug, data) VALUES (?, ?) \
             ON CONFLICT (slug) DO UPDATE SET data = excluded.data",
        )
        .bind(&limit.slug)
        .bind(encode(&limit)?)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(limit)
    }

    async fn delete_parallelism_limit(&self, slug: &str) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM upload_parallelism_limits WHERE slug = ?")
            .bind(slug)
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
    use geonode_core::constants::DEFAULT_MAX_PARALLEL_UPLOADS_SLUG;
    use geonode_core::Config;

    #[tokio::test]
    async fn seeding_keeps_admin_changes() {
        let config = Config::local("/tmp/a", "/tmp/m");
        let repo = SqliteLimitsRepository::new(memory_pool().await);
        repo.seed_defaults(config.limits()).await.unwrap();
        assert_eq!(repo.list_size_limits().await.unwrap().len(), 2);

        let mut limit = repo
            .get_parallelism_limit(DEFAULT_MAX_PARALLEL_UPLOADS_SLUG)
            .await
            .unwrap()
            .unwrap();
        limit.max_number = 0;
        repo.upsert_parallelism_limit(limit).await.unwrap();

        repo.seed_defaults(config.limits()).await.unwrap();
        let kept = repo
            .get_parallelism_limit(DEFAULT_MAX_PARALLEL_UPLOADS_SLUG)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(kept.max_number, 0);
    }
}
