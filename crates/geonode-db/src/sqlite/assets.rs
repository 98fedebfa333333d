use async_trait::async_trait;
use sqlx::SqlitePool;
use uuid::Uuid;

use geonode_core::models::{Asset, AssetLink, Resource};
use geonode_core::AppError;

use super::{db_err, decode_row, encode, micros};
use crate::traits::{AssetLinkRepository, AssetRepository, ResourceRepository};

/// Assets, their resource links and the resources themselves.
#[derive(Clone)]
pub struct SqliteAssetRepository {
    pool: SqlitePool,
}

impl SqliteAssetRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn fetch_links(&self, column: &str, id: Uuid) -> Result<Vec<AssetLink>, AppError> {
        let sql = format!("SELECT data FROM asset_links WHERE {} = ? ORDER BY rowid", column);
        let rows = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.iter()
            .map(decode_row)
            .collect()
    }
}

#[async_trait]
impl AssetRepository for SqliteAssetRepository {
    #[tracing::instrument(skip(self, asset), fields(asset_id = %asset.id))]
    async fn create(&self, asset: Asset) -> Result<Asset, AppError> {
        let result = sqlx::query("INSERT OR IGNORE INTO assets (id, data) VALUES (?, ?)")
            .bind(asset.id.to_string())
            .bind(encode(&asset)?)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        if result.rows_affected() == 0 {
            return Err(AppError::BadRequest(format!(
                "Asset {} already exists",
                asset.id
            )));
        }
        Ok(asset)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Asset>, AppError> {
        let row = sqlx::query("SELECT data FROM assets WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(decode_row).transpose()
    }

    async fn update(&self, asset: Asset) -> Result<Asset, AppError> {
        let result = sqlx::query("UPDATE assets SET data = ? WHERE id = ?")
            .bind(encode(&asset)?)
            .bind(asset.id.to_string())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Asset {} not found", asset.id)));
        }
        Ok(asset)
    }

    async fn delete(&self, id: Uuid) -> Result<bool, AppError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let removed = sqlx::query("DELETE FROM assets WHERE id = ?")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(db_err)?
            .rows_affected()
            > 0;
        if removed {
            sqlx::query("DELETE FROM asset_links WHERE asset_id = ?")
                .bind(id.to_string())
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
        }
        tx.commit().await.map_err(db_err)?;
        Ok(removed)
    }
}

#[async_trait]
impl AssetLinkRepository for SqliteAssetRepository {
    async fn create_link(&self, link: AssetLink) -> Result<AssetLink, AppError> {
        sqlx::query("INSERT INTO asset_links (id, resource_id, asset_id, data) VALUES (?, ?, ?, ?)")
            .bind(link.id.to_string())
            .bind(link.resource_id.to_string())
            .bind(link.asset_id.to_string())
            .bind(encode(&link)?)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(link)
    }

    async fn links_for_resource(&self, resource_id: Uuid) -> Result<Vec<AssetLink>, AppError> {
        self.fetch_links("resource_id", resource_id).await
    }

    async fn links_for_asset(&self, asset_id: Uuid) -> Result<Vec<AssetLink>, AppError> {
        self.fetch_links("asset_id", asset_id).await
    }

    async fn delete_links_for_asset(&self, asset_id: Uuid) -> Result<usize, AppError> {
        let result = sqlx::query("DELETE FROM asset_links WHERE asset_id = ?")
            .bind(asset_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected() as usize)
    }
}

#[async_trait]
impl ResourceRepository for SqliteAssetRepository {
    #[tracing::instrument(skip(self, resource), fields(resource_id = %resource.id))]
    async fn create_resource(&self, resource: Resource) -> Result<Resource, AppError> {
        sqlx::query("INSERT INTO resources (id, alternate, created_us, data) VALUES (?, ?, ?, ?)")
            .bind(resource.id.to_string())
            .bind(resource.alternate.as_deref())
            .bind(micros(resource.created))
            .bind(encode(&resource)?)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(resource)
    }

    async fn get_resource(&self, id: Uuid) -> Result<Option<Resource>, AppError> {
        let row = sqlx::query("SELECT data FROM resources WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(decode_row).transpose()
    }

    async fn update_resource(&self, resource: Resource) -> Result<Resource, AppError> {
        let result = sqlx::query("UPDATE resources SET alternate = ?, data = ? WHERE id = ?")
            .bind(resource.alternate.as_deref())
            .bind(encode(&resource)?)
            .bind(resource.id.to_string())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Resource {} not found", resource.id)));
        }
        Ok(resource)
    }

    async fn find_by_alternate(&self, alternate: &str) -> Result<Option<Resource>, AppError> {
        let row = sqlx::query(
            "SELECT data FROM resources WHERE alternate = ? ORDER BY created_us, rowid LIMIT 1",
        )
        .bind(alternate)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.as_ref().map(decode_row).transpose()
    }

    async fn delete_resource(&self, id: Uuid) -> Result<bool, AppError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let removed = sqlx::query("DELETE FROM resources WHERE id = ?")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(db_err)?
            .rows_affected()
            > 0;
        if removed {
            sqlx::query("DELETE FROM asset_links WHERE resource_id = ?")
                .bind(id.to_string())
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
        }
        tx.commit().await.map_err(db_err)?;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::memory_pool;

    #[tokio::test]
    async fn rows_survive_a_round_trip_through_the_pool() {
        let repo = SqliteAssetRepository::new(memory_pool().await);
        let asset = Asset::new_local("roads", None, "original", "alice", vec!["/a/roads.shp".into()]);
        repo.create(asset.clone()).await.unwrap();
        assert!(matches!(
            repo.create(asset.clone()).await,
            Err(AppError::BadRequest(_))
        ));

        let mut resource = Resource::dataset("roads", "alice");
        resource.alternate = Some("geonode:roads".to_string());
        repo.create_resource(resource.clone()).await.unwrap();
        repo.create_link(AssetLink::data(resource.id, asset.id)).await.unwrap();

        let found = repo.find_by_alternate("geonode:roads").await.unwrap().unwrap();
        assert_eq!(found.id, resource.id);
        assert_eq!(repo.links_for_resource(resource.id).await.unwrap().len(), 1);

        assert!(repo.delete(asset.id).await.unwrap());
        assert!(repo.links_for_asset(asset.id).await.unwrap().is_empty());
        assert!(repo.get(asset.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn resource_files_are_persisted() {
        let repo = SqliteAssetRepository::new(memory_pool().await);
        let mut resource = repo
            .create_resource(Resource::dataset("grid", "alice"))
            .await
            .unwrap();
        resource.files = vec!["/media/resources/grid.tif".to_string()];
        resource.alternate = Some("geonode:grid".to_string());
        repo.update_resource(resource.clone()).await.unwrap();

        let stored = repo.find_by_alternate("geonode:grid").await.unwrap().unwrap();
        assert_eq!(stored.files, resource.files);

        let missing = repo.update_resource(Resource::dataset("x", "bob")).await;
        assert!(matches!(missing, Err(AppError::NotFound(_))));
    }
}
