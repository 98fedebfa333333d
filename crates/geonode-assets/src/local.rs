//! Assets backed by files on the local filesystem.
//!
//! An asset is *managed* when every entry of its `location` sits under
//! `ASSETS_ROOT`. Managed files live in one `ASSETS_ROOT/<timestamp>-<rand>/`
//! folder per asset and are owned by it; unmanaged files are only referenced.

use async_trait::async_trait;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use geonode_core::models::Asset;
use geonode_core::AssetKindTag;
use geonode_db::AssetRepository;

use crate::download::{AssetDownloadHandler, LocalAssetDownloadHandler};
use crate::error::{AssetError, AssetResult};
use crate::handler::{AssetHandler, CreateAsset};

pub struct LocalAssetHandler {
    assets_root: PathBuf,
    repository: Arc<dyn AssetRepository>,
    downloader: Arc<LocalAssetDownloadHandler>,
}

impl LocalAssetHandler {
    pub fn new(assets_root: impl AsRef<Path>, repository: Arc<dyn AssetRepository>) -> Self {
        let assets_root = absolute(assets_root.as_ref());
        Self {
            downloader: Arc::new(LocalAssetDownloadHandler::new(assets_root.clone())),
            assets_root,
            repository,
        }
    }

    pub fn assets_root(&self) -> &Path {
        &self.assets_root
    }

    pub fn is_managed_path(&self, path: &str) -> bool {
        absolute(Path::new(path)).starts_with(&self.assets_root)
    }

    /// `true` when every entry is under `ASSETS_ROOT`, `false` when none is
    /// (or the list is empty), an error when they are mixed.
    pub fn are_files_managed(&self, location: &[String]) -> AssetResult<bool> {
        let managed = location.iter().filter(|p| self.is_managed_path(p)).count();
        match managed {
            0 => Ok(false),
            n if n == location.len() => Ok(true),
            _ => Err(AssetError::MixedManagement(location.to_vec())),
        }
    }

    /// `ASSETS_ROOT/<folder>` holding a managed asset's files.
    pub fn managed_dir(&self, asset: &Asset) -> AssetResult<Option<PathBuf>> {
        if !self.are_files_managed(asset.location())? {
            return Ok(None);
        }
        let first = absolute(Path::new(&asset.location()[0]));
        let folder = first
            .strip_prefix(&self.assets_root)
            .ok()
            .and_then(|rest| rest.components().next())
            .map(|c| self.assets_root.join(c.as_os_str()));
        Ok(folder)
    }

    async fn create_asset_dir(&self) -> AssetResult<PathBuf> {
        tokio::fs::create_dir_all(&self.assets_root).await?;
        let root = self.assets_root.clone();
        let prefix = format!("{}-", Utc::now().format("%Y%m%d%H%M%S"));
        let dir = tokio::task::spawn_blocking(move || {
            tempfile::Builder::new()
                .prefix(&prefix)
                .tempdir_in(&root)
                .map(|dir| dir.keep())
        })
        .await
        .map_err(|e| std::io::Error::other(e.to_string()))??;
        Ok(dir)
    }

    /// Copy files and directories into a fresh managed folder.
    async fn copy_data(&self, files: &[PathBuf]) -> AssetResult<Vec<String>> {
        let dir = self.create_asset_dir().await?;
        let files = files.to_vec();
        let target = dir.clone();
        let result = tokio::task::spawn_blocking(move || -> std::io::Result<Vec<String>> {
            let mut out = Vec::with_capacity(files.len());
            for file in &files {
                let name = file.file_name().ok_or_else(|| {
                    std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        format!("{} has no file name", file.display()),
                    )
                })?;
                let dest = target.join(name);
                copy_tree(file, &dest)?;
                out.push(dest.to_string_lossy().into_owned());
            }
            Ok(out)
        })
        .await
        .map_err(|e| std::io::Error::other(e.to_string()))?;

        match result {
            Ok(location) => {
                tracing::debug!(folder = %dir.display(), files = location.len(), "Asset files copied");
                Ok(location)
            }
            Err(e) => {
                let _ = tokio::fs::remove_dir_all(&dir).await;
                Err(e.into())
            }
        }
    }
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Recursive copy of a file or directory.
pub(crate) fn copy_tree(src: &Path, dest: &Path) -> std::io::Result<()> {
    if src.is_dir() {
        std::fs::create_dir_all(dest)?;
        for entry in std::fs::read_dir(src)? {
            let entry = entry?;
            copy_tree(&entry.path(), &dest.join(entry.file_name()))?;
        }
    } else {
        std::fs::copy(src, dest)?;
    }
    Ok(())
}

#[async_trait]
impl AssetHandler for LocalAssetHandler {
    fn kind(&self) -> AssetKindTag {
        AssetKindTag::Local
    }

    #[tracing::instrument(skip(self, request), fields(owner = %request.owner, files = request.files.len()))]
    async fn create(&self, request: CreateAsset) -> AssetResult<Asset> {
        if request.files.is_empty() {
            return Err(AssetError::NoFiles);
        }
        let location = if request.clone_files {
            self.copy_data(&request.files).await?
        } else {
            request
                .files
                .iter()
                .map(|f| f.to_string_lossy().into_owned())
                .collect()
        };

        let asset = Asset::new_local(
            request.title,
            request.description,
            request.asset_type,
            request.owner,
            location,
        );
        let asset = self.repository.create(asset).await?;
        tracing::info!(asset_id = %asset.id, "Local asset created");
        Ok(asset)
    }

    async fn remove_data(&self, asset: &Asset) -> AssetResult<()> {
        match self.managed_dir(asset)? {
            Some(dir) => {
                match tokio::fs::remove_dir_all(&dir).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
                tracing::info!(asset_id = %asset.id, folder = %dir.display(), "Asset data removed");
            }
            None => {
                tracing::debug!(asset_id = %asset.id, "Asset files are not managed, nothing removed");
            }
        }
        Ok(())
    }

    async fn replace_data(&self, asset: &mut Asset, files: &[PathBuf]) -> AssetResult<()> {
        if files.is_empty() {
            return Err(AssetError::NoFiles);
        }
        let location = self.copy_data(files).await?;
        self.remove_data(asset).await?;
        asset.set_location(location);
        *asset = self.repository.update(asset.clone()).await?;
        Ok(())
    }

    async fn clone_asset(&self, asset: &Asset) -> AssetResult<Asset> {
        let mut cloned = asset.clone();
        cloned.id = uuid::Uuid::new_v4();
        cloned.created = Utc::now();

        if let Some(old_dir) = self.managed_dir(asset)? {
            let new_dir = self.create_asset_dir().await?;
            let (src, dest) = (old_dir.clone(), new_dir.clone());
            tokio::task::spawn_blocking(move || -> std::io::Result<()> {
                for entry in std::fs::read_dir(&src)? {
                    let entry = entry?;
                    copy_tree(&entry.path(), &dest.join(entry.file_name()))?;
                }
                Ok(())
            })
            .await
            .map_err(|e| std::io::Error::other(e.to_string()))??;

            let location = asset
                .location()
                .iter()
                .map(|entry| match absolute(Path::new(entry)).strip_prefix(&old_dir) {
                    Ok(rest) => new_dir.join(rest).to_string_lossy().into_owned(),
                    Err(_) => {
                        tracing::warn!(
                            asset_id = %asset.id,
                            entry = %entry,
                            folder = %old_dir.display(),
                            "Location entry outside the asset folder kept unchanged"
                        );
                        entry.clone()
                    }
                })
                .collect();
            cloned.set_location(location);
        }

        let cloned = self.repository.create(cloned).await?;
        tracing::info!(asset_id = %asset.id, clone_id = %cloned.id, "Asset cloned");
        Ok(cloned)
    }

    fn create_download_url(&self, asset: &Asset) -> String {
        format!("/api/v2/assets/{}/download", asset.id)
    }

    fn create_link_url(&self, asset: &Asset) -> String {
        format!("/api/v2/assets/{}/link", asset.id)
    }

    fn download_handler(&self) -> Arc<dyn AssetDownloadHandler> {
        self.downloader.clone()
    }
}
