use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;

use geonode_core::models::Asset;
use geonode_core::AssetKindTag;

use crate::download::AssetDownloadHandler;
use crate::error::AssetResult;

/// Input of [`AssetHandler::create`].
#[derive(Debug, Clone)]
pub struct CreateAsset {
    pub title: String,
    pub description: Option<String>,
    pub asset_type: String,
    pub owner: String,
    pub files: Vec<PathBuf>,
    /// Copy `files` into a fresh managed folder instead of referencing them.
    pub clone_files: bool,
}

/// Storage-facing operations for one asset kind.
#[async_trait]
pub trait AssetHandler: Send + Sync {
    fn kind(&self) -> AssetKindTag;

    /// Persist a new asset.
    async fn create(&self, request: CreateAsset) -> AssetResult<Asset>;

    /// Delete the asset's files if it owns them. The row is left alone.
    async fn remove_data(&self, asset: &Asset) -> AssetResult<()>;

    /// Swap the asset's files for `files` and persist the new location.
    async fn replace_data(&self, asset: &mut Asset, files: &[PathBuf]) -> AssetResult<()>;

    /// Persist a copy of the asset under a new id, duplicating owned files.
    async fn clone_asset(&self, asset: &Asset) -> AssetResult<Asset>;

    fn create_download_url(&self, asset: &Asset) -> String;

    fn create_link_url(&self, asset: &Asset) -> String;

    fn download_handler(&self) -> Arc<dyn AssetDownloadHandler>;
}
