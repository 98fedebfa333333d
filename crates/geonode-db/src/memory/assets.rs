use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use geonode_core::models::{Asset, AssetLink, Resource};
use geonode_core::AppError;

use crate::traits::{AssetLinkRepository, AssetRepository, ResourceRepository};

/// Assets, their resource links and the resources themselves.
#[derive(Default)]
pub struct InMemoryAssetRepository {
    assets: RwLock<HashMap<Uuid, Asset>>,
    links: RwLock<Vec<AssetLink>>,
    resources: RwLock<HashMap<Uuid, Resource>>,
}

impl InMemoryAssetRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AssetRepository for InMemoryAssetRepository {
    async fn create(&self, asset: Asset) -> Result<Asset, AppError> {
        let mut assets = self.assets.write().await;
        if assets.contains_key(&asset.id) {
            return Err(AppError::BadRequest(format!(
                "Asset {} already exists",
                asset.id
            )));
        }
        assets.insert(asset.id, asset.clone());
        Ok(asset)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Asset>, AppError> {
        Ok(self.assets.read().await.get(&id).cloned())
    }

    async fn update(&self, asset: Asset) -> Result<Asset, AppError> {
        let mut assets = self.assets.write().await;
        match assets.get_mut(&asset.id) {
            Some(row) => {
                *row = asset.clone();
                Ok(asset)
            }
            None => Err(AppError::NotFound(format!("Asset {} not found", asset.id))),
        }
    }

    async fn delete(&self, id: Uuid) -> Result<bool, AppError> {
        let removed = self.assets.write().await.remove(&id).is_some();
        if removed {
            self.links.write().await.retain(|l| l.asset_id != id);
        }
        Ok(removed)
    }
}

#[async_trait]
impl AssetLinkRepository for InMemoryAssetRepository {
    async fn create_link(&self, link: AssetLink) -> Result<AssetLink, AppError> {
        self.links.write().await.push(link.clone());
        Ok(link)
    }

    async fn links_for_resource(&self, resource_id: Uuid) -> Result<Vec<AssetLink>, AppError> {
        Ok(self
            .links
            .read()
            .await
            .iter()
            .filter(|l| l.resource_id == resource_id)
            .cloned()
            .collect())
    }

    async fn links_for_asset(&self, asset_id: Uuid) -> Result<Vec<AssetLink>, AppError> {
        Ok(self
            .links
            .read()
            .await
            .iter()
            .filter(|l| l.asset_id == asset_id)
            .cloned()
            .collect())
    }

    async fn delete_links_for_asset(&self, asset_id: Uuid) -> Result<usize, AppError> {
        let mut links = self.links.write().await;
        let before = links.len();
        links.retain(|l| l.asset_id != asset_id);
        Ok(before - links.len())
    }
}

#[async_trait]
impl ResourceRepository for InMemoryAssetRepository {
    async fn create_resource(&self, resource: Resource) -> Result<Resource, AppError> {
        self.resources
            .write()
            .await
            .insert(resource.id, resource.clone());
        Ok(resource)
    }

    async fn get_resource(&self, id: Uuid) -> Result<Option<Resource>, AppError> {
        Ok(self.resources.read().await.get(&id).cloned())
    }

    async fn update_resource(&self, resource: Resource) -> Result<Resource, AppError> {
        let mut resources = self.resources.write().await;
        match resources.get_mut(&resource.id) {
            Some(row) => {
                *row = resource.clone();
                Ok(resource)
            }
            None => Err(AppError::NotFound(format!("Resource {} not found", resource.id))),
        }
    }

    async fn find_by_alternate(&self, alternate: &str) -> Result<Option<Resource>, AppError> {
        Ok(self
            .resources
            .read()
            .await
            .values()
            .filter(|r| r.alternate.as_deref() == Some(alternate))
            .min_by_key(|r| r.created)
            .cloned())
    }

    async fn delete_resource(&self, id: Uuid) -> Result<bool, AppError> {
        let removed = self.resources.write().await.remove(&id).is_some();
        if removed {
            self.links.write().await.retain(|l| l.resource_id != id);
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn deleting_asset_drops_its_links() {
        let repo = InMemoryAssetRepository::new();
        let asset = Asset::new_local("a", None, "original", "alice", vec!["/x".into()]);
        let resource = Resource::dataset("r", "alice");
        repo.create(asset.clone()).await.unwrap();
        repo.create_resource(resource.clone()).await.unwrap();
        repo.create_link(AssetLink::data(resource.id, asset.id))
            .await
            .unwrap();

        assert_eq!(repo.links_for_resource(resource.id).await.unwrap().len(), 1);
        assert!(repo.delete(asset.id).await.unwrap());
        assert!(repo.links_for_resource(resource.id).await.unwrap().is_empty());
        assert!(!repo.delete(asset.id).await.unwrap());
    }

    #[tokio::test]
    async fn resources_are_found_by_alternate() {
        let repo = InMemoryAssetRepository::new();
        let mut resource = Resource::dataset("roads", "alice");
        resource.alternate = Some("geonode:roads".to_string());
        repo.create_resource(resource.clone()).await.unwrap();

        let found = repo.find_by_alternate("geonode:roads").await.unwrap().unwrap();
        assert_eq!(found.id, resource.id);
        assert!(repo.find_by_alternate("geonode:rivers").await.unwrap().is_none());

        resource.files = vec!["/media/roads/roads.shp".to_string()];
        repo.update_resource(resource.clone()).await.unwrap();
        let stored = repo.get_resource(resource.id).await.unwrap().unwrap();
        assert_eq!(stored.files, resource.files);

        let missing = repo.update_resource(Resource::dataset("x", "bob")).await;
        assert!(matches!(missing, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn update_missing_asset_is_not_found() {
        let repo = InMemoryAssetRepository::new();
        let asset = Asset::new_local("a", None, "original", "alice", vec![]);
        let err = repo.update(asset).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
