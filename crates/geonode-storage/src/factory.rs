use crate::{DropboxStorage, GcsStorage, LocalStorage, S3Storage};
use crate::{Storage, StorageBackend, StorageError, StorageResult};
use geonode_core::Config;
use std::sync::Arc;

/// Create the storage backend selected by `STORAGE_BACKEND`.
pub async fn create_storage(config: &Config) -> StorageResult<Arc<dyn Storage>> {
    let storage = config.storage();

    match config.storage_backend() {
        StorageBackend::Local => {
            let backend =
                LocalStorage::new(storage.media_root.clone(), storage.base_url.clone()).await?;
            Ok(Arc::new(backend))
        }

        StorageBackend::S3 => {
            let bucket = storage
                .s3_bucket
                .clone()
                .ok_or_else(|| StorageError::ConfigError("S3_BUCKET not configured".to_string()))?;
            let region = storage
                .s3_region
                .clone()
                .or_else(|| storage.aws_region.clone())
                .ok_or_else(|| {
                    StorageError::ConfigError("S3_REGION or AWS_REGION not configured".to_string())
                })?;

            let backend = S3Storage::new_s3(bucket, region, storage.s3_endpoint.clone())?;
            Ok(Arc::new(backend))
        }

        StorageBackend::Gcs => {
            let bucket = storage
                .gcs_bucket
                .clone()
                .ok_or_else(|| StorageError::ConfigError("GCS_BUCKET not configured".to_string()))?;
            Ok(Arc::new(GcsStorage::new_gcs(bucket)?))
        }

        StorageBackend::Dropbox => {
            let token = storage.dropbox_oauth2_token.clone().ok_or_else(|| {
                StorageError::ConfigError("DROPBOX_OAUTH2_TOKEN not configured".to_string())
            })?;
            Ok(Arc::new(DropboxStorage::new(
                token,
                storage.dropbox_root_path.clone(),
            )?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn local_backend_rooted_at_media_root() {
        let dir = tempdir().unwrap();
        let config = Config::local(dir.path().join("assets"), dir.path().join("media"));
        let storage = create_storage(&config).await.unwrap();
        assert_eq!(storage.backend_type(), StorageBackend::Local);
        assert_eq!(
            storage.path("a.tif").unwrap(),
            dir.path().join("media").join("a.tif")
        );
    }

    #[tokio::test]
    async fn missing_bucket_is_config_error() {
        let dir = tempdir().unwrap();
        let mut config = Config::local(dir.path().join("assets"), dir.path().join("media"));
        config.inner_mut().storage.backend = StorageBackend::Gcs;
        assert!(matches!(
            create_storage(&config).await,
            Err(StorageError::ConfigError(_))
        ));
    }
}
