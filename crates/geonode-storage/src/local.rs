use crate::names::alternative_name;
use crate::traits::{ByteStream, Storage, StorageError, StorageResult};
use crate::StorageBackend;
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::path::{Component, Path, PathBuf};
use std::pin::Pin;
use tokio::fs;
use tokio::io::{AsyncRead, AsyncWriteExt};

const MAX_NAME_ATTEMPTS: usize = 100;

/// Local filesystem storage implementation
#[derive(Clone, Debug)]
pub struct LocalStorage {
    base_path: PathBuf,
    canonical_base: PathBuf,
    base_url: String,
}

/// Resolve `.` and `..` without touching the filesystem.
pub(crate) fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

impl LocalStorage {
    /// Create a new LocalStorage instance
    ///
    /// # Arguments
    /// * `base_path` - Root directory for file storage (e.g. `MEDIA_ROOT`)
    /// * `base_url` - Base URL the root is served from
    pub async fn new(base_path: impl Into<PathBuf>, base_url: String) -> StorageResult<Self> {
        let base_path = base_path.into();

        fs::create_dir_all(&base_path).await.map_err(|e| {
            StorageError::ConfigError(format!(
                "Failed to create storage directory {}: {}",
                base_path.display(),
                e
            ))
        })?;

        let canonical_base = base_path.canonicalize().map_err(|e| {
            StorageError::ConfigError(format!("Failed to canonicalize base path: {}", e))
        })?;
        let base_path = if base_path.is_absolute() {
            normalize_path(&base_path)
        } else {
            canonical_base.clone()
        };

        Ok(LocalStorage {
            base_path,
            canonical_base,
            base_url,
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Map a name to a path under the root, rejecting anything that escapes it.
    fn resolve(&self, name: &str) -> StorageResult<PathBuf> {
        let candidate = Path::new(name);
        let joined = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.base_path.join(candidate)
        };
        let path = normalize_path(&joined);

        let inside = path.starts_with(&self.base_path) || path.starts_with(&self.canonical_base);
        if !inside {
            return Err(StorageError::SuspiciousFileOperation(name.to_string()));
        }

        // Symlinks pointing out of the root are rejected as well
        if let Ok(canonical) = path.canonicalize() {
            if !canonical.starts_with(&self.canonical_base) {
                return Err(StorageError::SuspiciousFileOperation(name.to_string()));
            }
        }

        Ok(path)
    }

    fn relative_name(&self, path: &Path) -> String {
        path.strip_prefix(&self.base_path)
            .or_else(|_| path.strip_prefix(&self.canonical_base))
            .unwrap_or(path)
            .to_string_lossy()
            .into_owned()
    }

    /// First name based on `name` that does not exist yet.
    async fn available_path(&self, name: &str) -> StorageResult<PathBuf> {
        let mut path = self.resolve(name)?;
        let mut attempts = 0;
        while fs::try_exists(&path).await.unwrap_or(false) {
            attempts += 1;
            if attempts > MAX_NAME_ATTEMPTS {
                return Err(StorageError::UploadFailed(format!(
                    "Could not find an available name for {}",
                    name
                )));
            }
            path = self.resolve(&alternative_name(name))?;
        }
        Ok(path)
    }

    async fn ensure_parent_dir(&self, path: &Path) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Storage for LocalStorage {
    async fn save(&self, name: &str, content: Bytes) -> StorageResult<String> {
        let path = self.available_path(name).await?;
        let size = content.len();
        self.ensure_parent_dir(&path).await?;

        let start = std::time::Instant::now();

        let mut file = fs::File::create(&path).await.map_err(|e| {
            StorageError::UploadFailed(format!("Failed to create file {}: {}", path.display(), e))
        })?;

        file.write_all(&content).await.map_err(|e| {
            StorageError::UploadFailed(format!("Failed to write file {}: {}", path.display(), e))
        })?;

        file.sync_all().await.map_err(|e| {
            StorageError::UploadFailed(format!("Failed to sync file {}: {}", path.display(), e))
        })?;

        tracing::debug!(
            path = %path.display(),
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local storage save successful"
        );

        Ok(self.relative_name(&path))
    }

    async fn save_stream(
        &self,
        name: &str,
        mut reader: Pin<Box<dyn AsyncRead + Send + Unpin>>,
    ) -> StorageResult<String> {
        let path = self.available_path(name).await?;
        self.ensure_parent_dir(&path).await?;
        let start = std::time::Instant::now();

        let mut file = fs::File::create(&path).await.map_err(|e| {
            StorageError::UploadFailed(format!("Failed to create file {}: {}", path.display(), e))
        })?;

        let bytes_copied = tokio::io::copy(&mut reader, &mut file).await.map_err(|e| {
            StorageError::UploadFailed(format!(
                "Failed to write stream to file {}: {}",
                path.display(),
                e
            ))
        })?;

        file.sync_all().await.map_err(|e| {
            StorageError::UploadFailed(format!("Failed to sync file {}: {}", path.display(), e))
        })?;

        tracing::debug!(
            path = %path.display(),
            size_bytes = bytes_copied,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local storage stream save successful"
        );

        Ok(self.relative_name(&path))
    }

    async fn open(&self, name: &str) -> StorageResult<ByteStream> {
        let path = self.resolve(name)?;

        let file = fs::File::open(&path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => StorageError::NotFound(name.to_string()),
            _ => StorageError::DownloadFailed(format!(
                "Failed to open file {}: {}",
                path.display(),
                e
            )),
        })?;

        let stream = tokio_util::io::ReaderStream::new(file).map(|result| {
            result.map_err(|e| StorageError::DownloadFailed(format!("Failed to read chunk: {}", e)))
        });

        Ok(Box::pin(stream))
    }

    async fn delete(&self, name: &str) -> StorageResult<()> {
        let path = self.resolve(name)?;

        let meta = match fs::metadata(&path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(StorageError::DeleteFailed(e.to_string())),
        };

        let result = if meta.is_dir() {
            fs::remove_dir(&path).await
        } else {
            fs::remove_file(&path).await
        };
        result.map_err(|e| {
            StorageError::DeleteFailed(format!("Failed to delete {}: {}", path.display(), e))
        })?;

        tracing::debug!(path = %path.display(), "Local storage delete successful");
        Ok(())
    }

    async fn exists(&self, name: &str) -> StorageResult<bool> {
        let path = self.resolve(name)?;
        Ok(fs::try_exists(&path).await.unwrap_or(false))
    }

    async fn listdir(&self, path: &str) -> StorageResult<(Vec<String>, Vec<String>)> {
        let dir = self.resolve(path)?;
        let mut entries = fs::read_dir(&dir).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => StorageError::NotFound(path.to_string()),
            _ => StorageError::BackendError(e.to_string()),
        })?;

        let mut dirs = Vec::new();
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if entry.file_type().await?.is_dir() {
                dirs.push(name);
            } else {
                files.push(name);
            }
        }
        dirs.sort();
        files.sort();
        Ok((dirs, files))
    }

    fn path(&self, name: &str) -> StorageResult<PathBuf> {
        self.resolve(name)
    }

    async fn size(&self, name: &str) -> StorageResult<u64> {
        let path = self.resolve(name)?;
        let meta = fs::metadata(&path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => StorageError::NotFound(name.to_string()),
            _ => StorageError::BackendError(e.to_string()),
        })?;
        Ok(meta.len())
    }

    async fn url(&self, name: &str) -> StorageResult<String> {
        let path = self.resolve(name)?;
        let relative = self.relative_name(&path);
        let encoded: Vec<String> = relative
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| urlencoding::encode(s).into_owned())
            .collect();
        Ok(format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            encoded.join("/")
        ))
    }

    async fn copy(&self, from: &str, to: &str) -> StorageResult<String> {
        let from_path = self.resolve(from)?;
        let to_path = self.resolve(to)?;

        if !fs::try_exists(&from_path).await.unwrap_or(false) {
            return Err(StorageError::NotFound(from.to_string()));
        }

        self.ensure_parent_dir(&to_path).await?;

        fs::copy(&from_path, &to_path).await.map_err(|e| {
            StorageError::BackendError(format!(
                "Failed to copy {} to {}: {}",
                from_path.display(),
                to_path.display(),
                e
            ))
        })?;

        tracing::debug!(
            from_path = %from_path.display(),
            to_path = %to_path.display(),
            "Local storage copy successful"
        );

        Ok(self.relative_name(&to_path))
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::Local
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn storage(dir: &Path) -> LocalStorage {
        LocalStorage::new(dir, "http://localhost:8000/uploaded".to_string())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn save_and_read_back() {
        let dir = tempdir().unwrap();
        let storage = storage(dir.path()).await;

        let name = storage
            .save("layers/roads.csv", Bytes::from_static(b"lat,lon\n1,2\n"))
            .await
            .unwrap();
        assert_eq!(name, "layers/roads.csv");
        assert_eq!(
            storage.read(&name).await.unwrap(),
            Bytes::from_static(b"lat,lon\n1,2\n")
        );
        assert_eq!(storage.size(&name).await.unwrap(), 12);
        assert_eq!(storage.path(&name).unwrap(), dir.path().join("layers/roads.csv"));
    }

    #[tokio::test]
    async fn save_never_overwrites() {
        let dir = tempdir().unwrap();
        let storage = storage(dir.path()).await;

        let first = storage.save("a.txt", Bytes::from_static(b"1")).await.unwrap();
        let second = storage.save("a.txt", Bytes::from_static(b"2")).await.unwrap();
        assert_ne!(first, second);
        assert!(second.starts_with("a_") && second.ends_with(".txt"));
        assert_eq!(storage.read("a.txt").await.unwrap(), Bytes::from_static(b"1"));
    }

    #[tokio::test]
    async fn absolute_names_inside_root_are_accepted() {
        let dir = tempdir().unwrap();
        let storage = storage(dir.path()).await;
        let absolute = dir.path().join("x/y.tif");

        let name = storage
            .save(&absolute.to_string_lossy(), Bytes::from_static(b"II*\0"))
            .await
            .unwrap();
        assert_eq!(name, "x/y.tif");
    }

    #[tokio::test]
    async fn test_path_traversal_rejected() {
        let dir = tempdir().unwrap();
        let storage = storage(dir.path()).await;

        let result = storage.read("../../../etc/passwd").await;
        assert!(matches!(result, Err(StorageError::SuspiciousFileOperation(_))));

        let result = storage.delete("../etc/passwd").await;
        assert!(matches!(result, Err(StorageError::SuspiciousFileOperation(_))));

        let result = storage.exists("/etc/passwd").await;
        assert!(matches!(result, Err(StorageError::SuspiciousFileOperation(_))));
    }

    #[tokio::test]
    async fn delete_missing_file_is_ok() {
        let dir = tempdir().unwrap();
        let storage = storage(dir.path()).await;
        assert!(storage.delete("nonexistent/file.txt").await.is_ok());
    }

    #[tokio::test]
    async fn listdir_splits_dirs_and_files() {
        let dir = tempdir().unwrap();
        let storage = storage(dir.path()).await;
        storage.save("d/one.txt", Bytes::from_static(b"1")).await.unwrap();
        storage.save("d/sub/two.txt", Bytes::from_static(b"2")).await.unwrap();

        let (dirs, files) = storage.listdir("d").await.unwrap();
        assert_eq!(dirs, vec!["sub".to_string()]);
        assert_eq!(files, vec!["one.txt".to_string()]);
    }

    #[tokio::test]
    async fn url_is_percent_encoded() {
        let dir = tempdir().unwrap();
        let storage = storage(dir.path()).await;
        let url = storage.url("my dir/a b.tif").await.unwrap();
        assert_eq!(url, "http://localhost:8000/uploaded/my%20dir/a%20b.tif");
    }

    #[tokio::test]
    async fn copy_inside_root() {
        let dir = tempdir().unwrap();
        let storage = storage(dir.path()).await;
        storage.save("src.txt", Bytes::from_static(b"data")).await.unwrap();

        let to = storage.copy("src.txt", "copies/dst.txt").await.unwrap();
        assert_eq!(to, "copies/dst.txt");
        assert_eq!(storage.read(&to).await.unwrap(), Bytes::from_static(b"data"));
        assert!(matches!(
            storage.copy("missing.txt", "x.txt").await,
            Err(StorageError::NotFound(_))
        ));
    }
}
