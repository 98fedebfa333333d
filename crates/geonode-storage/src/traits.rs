//! Storage abstraction trait
//!
//! This module defines the file-lifecycle contract every storage backend
//! implements.

use crate::StorageBackend;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use std::path::PathBuf;
use std::pin::Pin;
use thiserror::Error;
use tokio::io::AsyncRead;

use geonode_core::AppError;

/// Storage operation errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Delete failed: {0}")]
    DeleteFailed(String),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Invalid storage name: {0}")]
    InvalidKey(String),

    /// The name resolves outside the backend's root.
    #[error("Detected path traversal attempt in '{0}'")]
    SuspiciousFileOperation(String),

    /// A remote reference points somewhere staging may not read from.
    #[error("Remote reference '{uri}' rejected: {reason}")]
    RemoteNotAllowed { uri: String, reason: String },

    #[error("Staged files exceed {limit} bytes")]
    SizeLimitExceeded { limit: u64 },

    #[error("Operation not supported by the {backend} backend: {operation}")]
    NotSupported {
        backend: StorageBackend,
        operation: &'static str,
    },

    #[error("Storage backend error: {0}")]
    BackendError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(name) => AppError::NotFound(format!("File not found: {}", name)),
            StorageError::InvalidKey(msg) => AppError::InvalidInput(msg),
            StorageError::SuspiciousFileOperation(name) => {
                AppError::Forbidden(format!("Access to '{}' is not allowed", name))
            }
            StorageError::RemoteNotAllowed { uri, reason } => {
                AppError::Forbidden(format!("Remote file '{}' is not allowed: {}", uri, reason))
            }
            StorageError::SizeLimitExceeded { limit } => AppError::FileUploadLimit(format!(
                "Total upload size exceeds {}. Please try again with smaller files.",
                limit
            )),
            other => AppError::Storage(other.to_string()),
        }
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Chunked file content.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, StorageError>> + Send>>;

/// Storage abstraction trait
///
/// Implemented by the local, S3, GCS and Dropbox backends. Callers hold an
/// `Arc<dyn Storage>` and never branch on the concrete backend.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Write `content` under `name` and return the name actually used, which
    /// differs from the requested one when the backend avoids an overwrite.
    async fn save(&self, name: &str, content: Bytes) -> StorageResult<String>;

    /// Like [`Storage::save`], consuming a reader until EOF.
    async fn save_stream(
        &self,
        name: &str,
        reader: Pin<Box<dyn AsyncRead + Send + Unpin>>,
    ) -> StorageResult<String>;

    /// Open a file for reading as a stream of chunks.
    async fn open(&self, name: &str) -> StorageResult<ByteStream>;

    /// Read a whole file into memory.
    async fn read(&self, name: &str) -> StorageResult<Bytes> {
        let mut stream = self.open(name).await?;
        let mut buffer = BytesMut::new();
        while let Some(chunk) = stream.next().await {
            buffer.extend_from_slice(&chunk?);
        }
        Ok(buffer.freeze())
    }

    /// Delete a file. Deleting a missing file is not an error.
    async fn delete(&self, name: &str) -> StorageResult<()>;

    async fn exists(&self, name: &str) -> StorageResult<bool>;

    /// List a directory as `(directories, files)`, both sorted.
    async fn listdir(&self, path: &str) -> StorageResult<(Vec<String>, Vec<String>)>;

    /// Absolute local filesystem path of `name`. Remote backends return
    /// [`StorageError::NotSupported`].
    fn path(&self, name: &str) -> StorageResult<PathBuf>;

    async fn size(&self, name: &str) -> StorageResult<u64>;

    /// URL clients can fetch the file from.
    async fn url(&self, name: &str) -> StorageResult<String>;

    /// Sanitise the file-name component of `name`, keeping its directory.
    fn generate_filename(&self, name: &str) -> String {
        crate::names::generate_filename(name)
    }

    /// Copy `from` to `to` inside the backend; returns the destination name.
    async fn copy(&self, from: &str, to: &str) -> StorageResult<String>;

    fn backend_type(&self) -> StorageBackend;
}
