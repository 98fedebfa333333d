//! S3 and GCS storage over `object_store`.

use crate::names::{alternative_name, object_key};
use crate::traits::{ByteStream, Storage, StorageError, StorageResult};
use crate::StorageBackend;
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use http::Method;
use object_store::aws::{AmazonS3, AmazonS3Builder};
use object_store::gcp::{GoogleCloudStorage, GoogleCloudStorageBuilder};
use object_store::path::Path;
use object_store::signer::Signer;
use object_store::Error as ObjectStoreError;
use object_store::{ObjectStore, ObjectStoreExt, PutPayload, Result as ObjectResult};
use std::path::PathBuf;
use std::pin::Pin;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};

const MAX_NAME_ATTEMPTS: usize = 100;
const SIGNED_URL_EXPIRY: Duration = Duration::from_secs(3600);

/// Object storage backend. `url` hands out pre-signed GET URLs.
#[derive(Clone, Debug)]
pub struct ObjectStorage<S> {
    store: S,
    bucket: String,
    backend: StorageBackend,
}

pub type S3Storage = ObjectStorage<AmazonS3>;
pub type GcsStorage = ObjectStorage<GoogleCloudStorage>;

impl ObjectStorage<AmazonS3> {
    /// Create an S3 backend
    ///
    /// # Arguments
    /// * `bucket` - S3 bucket name
    /// * `region` - AWS region (or region identifier for S3-compatible providers)
    /// * `endpoint_url` - Optional custom endpoint for S3-compatible providers
    ///   (e.g. "http://localhost:9000" for MinIO)
    pub fn new_s3(
        bucket: String,
        region: String,
        endpoint_url: Option<String>,
    ) -> StorageResult<Self> {
        let mut builder = AmazonS3Builder::from_env()
            .with_region(region)
            .with_bucket_name(bucket.clone());

        if let Some(endpoint) = endpoint_url {
            let allow_http = endpoint.starts_with("http://");
            builder = builder.with_endpoint(endpoint).with_allow_http(allow_http);
        }

        let store = builder
            .build()
            .map_err(|e| StorageError::ConfigError(e.to_string()))?;

        Ok(ObjectStorage {
            store,
            bucket,
            backend: StorageBackend::S3,
        })
    }
}

impl ObjectStorage<GoogleCloudStorage> {
    /// Create a GCS backend; credentials come from the `GOOGLE_*` environment.
    pub fn new_gcs(bucket: String) -> StorageResult<Self> {
        let store = GoogleCloudStorageBuilder::from_env()
            .with_bucket_name(bucket.clone())
            .build()
            .map_err(|e| StorageError::ConfigError(e.to_string()))?;

        Ok(ObjectStorage {
            store,
            bucket,
            backend: StorageBackend::Gcs,
        })
    }
}

impl<S> ObjectStorage<S>
where
    S: ObjectStore + Signer,
{
    fn location(name: &str) -> StorageResult<Path> {
        Ok(Path::from(object_key(name)?))
    }

    async fn head_exists(&self, location: &Path) -> StorageResult<bool> {
        match self.store.head(location).await {
            Ok(_) => Ok(true),
            Err(ObjectStoreError::NotFound { .. }) => Ok(false),
            Err(e) => Err(StorageError::BackendError(e.to_string())),
        }
    }

    async fn available_location(&self, name: &str) -> StorageResult<Path> {
        let mut location = Self::location(name)?;
        let mut attempts = 0;
        while self.head_exists(&location).await? {
            attempts += 1;
            if attempts > MAX_NAME_ATTEMPTS {
                return Err(StorageError::UploadFailed(format!(
                    "Could not find an available name for {}",
                    name
                )));
            }
            location = Self::location(&alternative_name(name))?;
        }
        Ok(location)
    }

    async fn put_bytes(&self, location: &Path, bytes: Bytes) -> StorageResult<()> {
        let size = bytes.len();
        let start = std::time::Instant::now();
        let result: ObjectResult<_> = self.store.put(location, PutPayload::from(bytes)).await;

        result.map_err(|e| {
            tracing::error!(
                error = %e,
                bucket = %self.bucket,
                key = %location,
                size_bytes = size,
                duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                "Object upload failed"
            );
            StorageError::UploadFailed(e.to_string())
        })?;

        tracing::debug!(
            backend = %self.backend,
            bucket = %self.bucket,
            key = %location,
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Object upload successful"
        );
        Ok(())
    }
}

#[async_trait]
impl<S> Storage for ObjectStorage<S>
where
    S: ObjectStore + Signer,
{
    async fn save(&self, name: &str, content: Bytes) -> StorageResult<String> {
        let location = self.available_location(name).await?;
        self.put_bytes(&location, content).await?;
        Ok(location.to_string())
    }

    async fn save_stream(
        &self,
        name: &str,
        mut reader: Pin<Box<dyn AsyncRead + Send + Unpin>>,
    ) -> StorageResult<String> {
        let location = self.available_location(name).await?;
        // Buffered in memory and written with a single put.
        let mut buffer = Vec::new();
        reader.read_to_end(&mut buffer).await.map_err(|e| {
            StorageError::UploadFailed(format!("Failed to read from stream: {}", e))
        })?;
        self.put_bytes(&location, Bytes::from(buffer)).await?;
        Ok(location.to_string())
    }

    async fn open(&self, name: &str) -> StorageResult<ByteStream> {
        let location = Self::location(name)?;
        let result: ObjectResult<_> = self.store.get(&location).await;

        let result = result.map_err(|e| match e {
            ObjectStoreError::NotFound { .. } => StorageError::NotFound(name.to_string()),
            other => StorageError::DownloadFailed(other.to_string()),
        })?;

        let bucket = self.bucket.clone();
        let key = name.to_string();
        let stream = result.into_stream().map(move |res| {
            res.map_err(|e| {
                tracing::error!(bucket = %bucket, key = %key, error = %e, "Object stream error");
                StorageError::DownloadFailed(e.to_string())
            })
        });

        Ok(Box::pin(stream))
    }

    async fn delete(&self, name: &str) -> StorageResult<()> {
        let location = Self::location(name)?;
        let result: ObjectResult<_> = self.store.delete(&location).await;

        match result {
            Ok(()) | Err(ObjectStoreError::NotFound { .. }) => Ok(()),
            Err(e) => {
                tracing::error!(
                    error = %e,
                    bucket = %self.bucket,
                    key = %location,
                    "Object delete failed"
                );
                Err(StorageError::DeleteFailed(e.to_string()))
            }
        }
    }

    async fn exists(&self, name: &str) -> StorageResult<bool> {
        let location = Self::location(name)?;
        self.head_exists(&location).await
    }

    async fn listdir(&self, path: &str) -> StorageResult<(Vec<String>, Vec<String>)> {
        let prefix = match path.trim_matches('/') {
            "" => None,
            _ => Some(Self::location(path)?),
        };
        let listing = self
            .store
            .list_with_delimiter(prefix.as_ref())
            .await
            .map_err(|e| StorageError::BackendError(e.to_string()))?;

        let mut dirs: Vec<String> = listing
            .common_prefixes
            .iter()
            .filter_map(|p| p.filename().map(str::to_string))
            .collect();
        let mut files: Vec<String> = listing
            .objects
            .iter()
            .filter_map(|o| o.location.filename().map(str::to_string))
            .collect();
        dirs.sort();
        files.sort();
        Ok((dirs, files))
    }

    fn path(&self, _name: &str) -> StorageResult<PathBuf> {
        Err(StorageError::NotSupported {
            backend: self.backend,
            operation: "path",
        })
    }

    async fn size(&self, name: &str) -> StorageResult<u64> {
        let location = Self::location(name)?;
        match self.store.head(&location).await {
            Ok(meta) => Ok(meta.size),
            Err(ObjectStoreError::NotFound { .. }) => Err(StorageError::NotFound(name.to_string())),
            Err(e) => Err(StorageError::BackendError(e.to_string())),
        }
    }

    async fn url(&self, name: &str) -> StorageResult<String> {
        let location = Self::location(name)?;
        let url_result: ObjectResult<_> = self
            .store
            .signed_url(Method::GET, &location, SIGNED_URL_EXPIRY)
            .await;

        Ok(url_result
            .map_err(|e| StorageError::BackendError(e.to_string()))?
            .to_string())
    }

    async fn copy(&self, from: &str, to: &str) -> StorageResult<String> {
        let start = std::time::Instant::now();
        let from_location = Self::location(from)?;
        let to_location = Self::location(to)?;

        let copy_result: ObjectResult<_> = self.store.copy(&from_location, &to_location).await;

        copy_result.map_err(|e| match e {
            ObjectStoreError::NotFound { .. } => StorageError::NotFound(from.to_string()),
            other => StorageError::BackendError(other.to_string()),
        })?;

        tracing::debug!(
            from_key = %from_location,
            to_key = %to_location,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Object copy successful"
        );

        Ok(to_location.to_string())
    }

    fn backend_type(&self) -> StorageBackend {
        self.backend
    }
}
