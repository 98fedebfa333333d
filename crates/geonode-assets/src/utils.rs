//! Asset and link bookkeeping shared by the import steps.

use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

use geonode_core::constants::{DATA_LINK_TYPE, ORIGINAL_ASSET_TYPE};
use geonode_core::models::{Asset, AssetLink, Resource};
use geonode_db::Repositories;

use crate::error::{AssetError, AssetResult};
use crate::handler::{AssetHandler, CreateAsset};
use crate::registry::AssetHandlerRegistry;

/// Options of [`create_asset_and_link`]. Unset fields take defaults.
#[derive(Debug, Clone)]
pub struct NewAssetLink {
    pub owner: String,
    pub files: Vec<PathBuf>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub link_type: Option<String>,
    pub extension: Option<String>,
    pub asset_type: Option<String>,
    pub mime: Option<String>,
    pub clone_files: bool,
}

impl NewAssetLink {
    pub fn new(owner: impl Into<String>, files: Vec<PathBuf>) -> Self {
        Self {
            owner: owner.into(),
            files,
            title: None,
            description: None,
            link_type: None,
            extension: None,
            asset_type: None,
            mime: None,
            clone_files: true,
        }
    }
}

/// Create an asset for `resource` and link it. If linking fails the asset's
/// data and row are removed again before the error is returned.
#[tracing::instrument(skip(registry, repos, handler, request), fields(resource_id = %resource.id))]
pub async fn create_asset_and_link(
    registry: &AssetHandlerRegistry,
    repos: &Repositories,
    resource: &Resource,
    handler: Option<Arc<dyn AssetHandler>>,
    request: NewAssetLink,
) -> AssetResult<(Asset, AssetLink)> {
    let handler = handler.unwrap_or_else(|| registry.default_handler());
    let extension = request.extension.clone().or_else(|| {
        request
            .files
            .first()
            .and_then(|f| f.extension())
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
    });
    let title = request.title.unwrap_or_else(|| "Original".to_string());

    let asset = handler
        .create(CreateAsset {
            title: title.clone(),
            description: request.description,
            asset_type: request
                .asset_type
                .unwrap_or_else(|| ORIGINAL_ASSET_TYPE.to_string()),
            owner: request.owner,
            files: request.files,
            clone_files: request.clone_files,
        })
        .await?;

    let link = AssetLink {
        id: Uuid::new_v4(),
        resource_id: resource.id,
        asset_id: asset.id,
        link_type: request.link_type.unwrap_or_else(|| DATA_LINK_TYPE.to_string()),
        name: Some(title),
        extension,
        mime: request.mime,
        url: Some(handler.create_link_url(&asset)),
    };

    match repos.links.create_link(link).await {
        Ok(link) => {
            tracing::info!(asset_id = %asset.id, "Asset linked to resource");
            Ok((asset, link))
        }
        Err(e) => {
            tracing::error!(asset_id = %asset.id, error = %e, "Asset link failed, removing asset");
            if let Err(cleanup) = handler.remove_data(&asset).await {
                tracing::warn!(asset_id = %asset.id, error = %cleanup, "Asset data cleanup failed");
            }
            if let Err(cleanup) = repos.assets.delete(asset.id).await {
                tracing::warn!(asset_id = %asset.id, error = %cleanup, "Asset row cleanup failed");
            }
            Err(AssetError::Repository(e))
        }
    }
}

/// Clone every asset linked to `source` and link the clones to `target`.
#[tracing::instrument(skip(registry, repos), fields(source_id = %source.id, target_id = %target.id))]
pub async fn copy_assets_and_links(
    registry: &AssetHandlerRegistry,
    repos: &Repositories,
    source: &Resource,
    target: &Resource,
) -> AssetResult<Vec<(Asset, AssetLink)>> {
    let mut copied = Vec::new();
    for link in repos.links.links_for_resource(source.id).await? {
        let Some(asset) = repos.assets.get(link.asset_id).await? else {
            tracing::warn!(asset_id = %link.asset_id, "Linked asset missing, skipped");
            continue;
        };
        let handler = registry
            .get_handler(&asset)
            .ok_or(AssetError::HandlerNotFound(asset.tag()))?;
        let clone = handler.clone_asset(&asset).await?;
        let new_link = repos
            .links
            .create_link(AssetLink {
                id: Uuid::new_v4(),
                resource_id: target.id,
                asset_id: clone.id,
                url: Some(handler.create_link_url(&clone)),
                ..link
            })
            .await?;
        copied.push((clone, new_link));
    }
    Ok(copied)
}

/// First asset linked to the resource with the `data` link type.
pub async fn get_default_asset(repos: &Repositories, resource_id: Uuid) -> AssetResult<Option<Asset>> {
    let links = repos.links.links_for_resource(resource_id).await?;
    match links.into_iter().find(|l| l.link_type == DATA_LINK_TYPE) {
        Some(link) => Ok(repos.assets.get(link.asset_id).await?),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geonode_core::Config;
    use tempfile::tempdir;

    fn setup(root: &std::path::Path) -> (AssetHandlerRegistry, Repositories) {
        let config = Config::local(root.join("assets"), root.join("media"));
        let repos = Repositories::in_memory(config.limits());
        let registry = AssetHandlerRegistry::from_config(&config, repos.assets.clone()).unwrap();
        (registry, repos)
    }

    #[tokio::test]
    async fn creates_asset_with_data_link() {
        let dir = tempdir().unwrap();
        let (registry, repos) = setup(dir.path());
        let file = dir.path().join("roads.geojson");
        std::fs::write(&file, b"{}").unwrap();
        let resource = repos
            .resources
            .create_resource(Resource::dataset("roads", "alice"))
            .await
            .unwrap();

        let (asset, link) = create_asset_and_link(
            &registry,
            &repos,
            &resource,
            None,
            NewAssetLink::new("alice", vec![file]),
        )
        .await
        .unwrap();

        assert_eq!(link.link_type, DATA_LINK_TYPE);
        assert_eq!(link.extension.as_deref(), Some("geojson"));
        assert_eq!(asset.asset_type, ORIGINAL_ASSET_TYPE);

        let default = get_default_asset(&repos, resource.id).await.unwrap().unwrap();
        assert_eq!(default.id, asset.id);
    }

    #[tokio::test]
    async fn failed_create_leaves_no_link() {
        let dir = tempdir().unwrap();
        let (registry, repos) = setup(dir.path());
        let resource = Resource::dataset("empty", "alice");

        let err = create_asset_and_link(&registry, &repos, &resource, None, NewAssetLink::new("alice", vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, AssetError::NoFiles));
        assert!(get_default_asset(&repos, resource.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn copies_assets_to_target_resource() {
        let dir = tempdir().unwrap();
        let (registry, repos) = setup(dir.path());
        let file = dir.path().join("grid.tif");
        std::fs::write(&file, b"II*\0").unwrap();
        let source = Resource::dataset("grid", "alice");
        let target = Resource::dataset("grid copy", "alice");

        let (original, _) = create_asset_and_link(
            &registry,
            &repos,
            &source,
            None,
            NewAssetLink::new("alice", vec![file]),
        )
        .await
        .unwrap();

        let copied = copy_assets_and_links(&registry, &repos, &source, &target)
            .await
            .unwrap();
        assert_eq!(copied.len(), 1);
        let (clone, link) = &copied[0];
        assert_ne!(clone.id, original.id);
        assert_eq!(link.resource_id, target.id);
        assert_ne!(clone.location(), original.location());
    }
}
