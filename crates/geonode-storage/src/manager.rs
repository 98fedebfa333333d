//! Storage facade with replace/copy policy.
//!
//! `replace` and `copy` read source files from the local filesystem and write
//! them through the configured backend into a fresh `<uuid>` directory that is
//! a sibling of the old file's directory, so a replaced file never reuses a
//! cached URL. Neither operation is transactional: a failure part way leaves
//! the files already written in place.

use bytes::Bytes;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::io::StreamReader;
use uuid::Uuid;

use geonode_core::Config;

use crate::traits::{ByteStream, Storage, StorageError, StorageResult};
use crate::{create_storage, StorageBackend};

/// One path or a list of paths; results keep the shape of the input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileSet {
    Single(String),
    Many(Vec<String>),
}

impl FileSet {
    pub fn len(&self) -> usize {
        match self {
            FileSet::Single(_) => 1,
            FileSet::Many(files) => files.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_vec(&self) -> Vec<String> {
        match self {
            FileSet::Single(file) => vec![file.clone()],
            FileSet::Many(files) => files.clone(),
        }
    }

    pub fn into_vec(self) -> Vec<String> {
        match self {
            FileSet::Single(file) => vec![file],
            FileSet::Many(files) => files,
        }
    }
}

impl From<&str> for FileSet {
    fn from(value: &str) -> Self {
        FileSet::Single(value.to_string())
    }
}

impl From<String> for FileSet {
    fn from(value: String) -> Self {
        FileSet::Single(value)
    }
}

impl From<&Path> for FileSet {
    fn from(value: &Path) -> Self {
        FileSet::Single(value.to_string_lossy().into_owned())
    }
}

impl From<Vec<String>> for FileSet {
    fn from(value: Vec<String>) -> Self {
        FileSet::Many(value)
    }
}

impl From<Vec<PathBuf>> for FileSet {
    fn from(value: Vec<PathBuf>) -> Self {
        FileSet::Many(
            value
                .into_iter()
                .map(|p| p.to_string_lossy().into_owned())
                .collect(),
        )
    }
}

/// `<grandparent of old>/<token>`: a directory next to the one holding `old`.
fn sibling_dir(old: &Path, token: &str) -> PathBuf {
    match old.parent().and_then(Path::parent) {
        Some(grandparent) => grandparent.join(token),
        None => PathBuf::from(token),
    }
}

fn base_name(path: &Path) -> StorageResult<String> {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| StorageError::InvalidKey(format!("{} has no file name", path.display())))
}

/// Facade over the configured backend.
#[derive(Clone)]
pub struct StorageManager {
    storage: Arc<dyn Storage>,
    media_root: PathBuf,
}

impl StorageManager {
    pub fn new(storage: Arc<dyn Storage>, media_root: impl Into<PathBuf>) -> Self {
        Self {
            storage,
            media_root: media_root.into(),
        }
    }

    pub async fn from_config(config: &Config) -> StorageResult<Self> {
        let storage = create_storage(config).await?;
        Ok(Self::new(storage, config.media_root()))
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub async fn save(&self, name: &str, content: Bytes) -> StorageResult<String> {
        self.storage.save(name, content).await
    }

    pub async fn open(&self, name: &str) -> StorageResult<ByteStream> {
        self.storage.open(name).await
    }

    pub async fn read(&self, name: &str) -> StorageResult<Bytes> {
        self.storage.read(name).await
    }

    pub async fn delete(&self, name: &str) -> StorageResult<()> {
        self.storage.delete(name).await
    }

    pub async fn exists(&self, name: &str) -> StorageResult<bool> {
        self.storage.exists(name).await
    }

    pub async fn listdir(&self, path: &str) -> StorageResult<(Vec<String>, Vec<String>)> {
        self.storage.listdir(path).await
    }

    pub fn path(&self, name: &str) -> StorageResult<PathBuf> {
        self.storage.path(name)
    }

    pub async fn size(&self, name: &str) -> StorageResult<u64> {
        self.storage.size(name).await
    }

    pub async fn url(&self, name: &str) -> StorageResult<String> {
        self.storage.url(name).await
    }

    pub fn generate_filename(&self, name: &str) -> String {
        self.storage.generate_filename(name)
    }

    pub fn backend_type(&self) -> StorageBackend {
        self.storage.backend_type()
    }

    /// Supersede `old_files` with `new_files`.
    ///
    /// The i-th new file is written as `<old stem>.<new extension>` into a
    /// fresh `<uuid>` directory next to the i-th old file's directory. New
    /// files beyond the old list keep their own base name and land next to
    /// the first old file. Old files are left untouched.
    #[tracing::instrument(skip(self, old_files, new_files))]
    pub async fn replace(
        &self,
        old_files: impl Into<FileSet>,
        new_files: impl Into<FileSet>,
    ) -> StorageResult<FileSet> {
        let old_files = old_files.into();
        let new_files = new_files.into();
        let single = matches!(
            (&old_files, &new_files),
            (FileSet::Single(_), FileSet::Single(_))
        );

        let old = old_files.into_vec();
        let new = new_files.into_vec();
        let Some(first_old) = old.first() else {
            return Err(StorageError::InvalidKey(
                "replace needs at least one existing file".to_string(),
            ));
        };

        let token = Uuid::new_v4().simple().to_string();
        let mut out = Vec::with_capacity(new.len());
        for (index, new_file) in new.iter().enumerate() {
            let new_path = Path::new(new_file);
            let target = match old.get(index) {
                Some(old_file) => {
                    let old_path = Path::new(old_file);
                    let stem = old_path
                        .file_stem()
                        .map(|s| s.to_string_lossy().into_owned())
                        .ok_or_else(|| {
                            StorageError::InvalidKey(format!("{} has no file name", old_file))
                        })?;
                    let file_name = match new_path.extension() {
                        Some(ext) => format!("{}.{}", stem, ext.to_string_lossy()),
                        None => stem,
                    };
                    sibling_dir(old_path, &token).join(file_name)
                }
                None => sibling_dir(Path::new(first_old), &token).join(base_name(new_path)?),
            };
            out.push(self.copy_single_file(new_path, &target).await?);
        }

        tracing::info!(
            replaced = old.len(),
            written = out.len(),
            "Storage replace completed"
        );

        Ok(if single {
            FileSet::Single(out.remove(0))
        } else {
            FileSet::Many(out)
        })
    }

    /// Copy every file into one fresh `<uuid>` directory next to its current
    /// directory, keeping base names.
    #[tracing::instrument(skip(self, files))]
    pub async fn copy(&self, files: impl Into<FileSet>) -> StorageResult<FileSet> {
        let files = files.into();
        let single = matches!(files, FileSet::Single(_));
        let token = Uuid::new_v4().simple().to_string();

        let mut out = Vec::with_capacity(files.len());
        for file in files.into_vec() {
            let source = Path::new(&file);
            let target = sibling_dir(source, &token).join(base_name(source)?);
            out.push(self.copy_single_file(source, &target).await?);
        }

        Ok(if single && out.len() == 1 {
            FileSet::Single(out.remove(0))
        } else {
            FileSet::Many(out)
        })
    }

    /// Copy local files into `dir`, keeping base names.
    pub async fn copy_files_list(&self, files: &[String], dir: &Path) -> StorageResult<Vec<String>> {
        let mut out = Vec::with_capacity(files.len());
        for file in files {
            let source = Path::new(file);
            out.push(
                self.copy_single_file(source, &dir.join(base_name(source)?))
                    .await?,
            );
        }
        Ok(out)
    }

    /// Write one local file to `target` through the backend. A target that
    /// escapes the backend root is retried under `MEDIA_ROOT`, keeping its
    /// `<dir>/<name>` tail. Returns the absolute path where the backend has
    /// one, otherwise the stored name.
    pub async fn copy_single_file(&self, source: &Path, target: &Path) -> StorageResult<String> {
        let name = target.to_string_lossy().into_owned();
        let stored = match self.write_from(source, &name).await {
            Err(StorageError::SuspiciousFileOperation(_)) => {
                let fallback = self.media_root_fallback(target)?;
                tracing::warn!(
                    target = %name,
                    fallback = %fallback.display(),
                    "Target outside storage root, writing under MEDIA_ROOT"
                );
                self.write_from(source, &fallback.to_string_lossy()).await?
            }
            other => other?,
        };

        match self.storage.path(&stored) {
            Ok(path) => Ok(path.to_string_lossy().into_owned()),
            Err(StorageError::NotSupported { .. }) => Ok(stored),
            Err(e) => Err(e),
        }
    }

    fn media_root_fallback(&self, target: &Path) -> StorageResult<PathBuf> {
        let file_name = base_name(target)?;
        let parent = target
            .parent()
            .and_then(Path::file_name)
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| Uuid::new_v4().simple().to_string());
        Ok(self.media_root.join(parent).join(file_name))
    }

    /// Local files are streamed from disk. Anything else is read back
    /// through the backend, so stored names of object backends can be
    /// copied too.
    async fn write_from(&self, source: &Path, name: &str) -> StorageResult<String> {
        match tokio::fs::File::open(source).await {
            Ok(file) => self.storage.save_stream(name, Box::pin(file)).await,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let stored = source.to_string_lossy();
                let stream = self.storage.open(&stored).await.map_err(|e| match e {
                    StorageError::SuspiciousFileOperation(_) | StorageError::InvalidKey(_) => {
                        StorageError::NotFound(stored.to_string())
                    }
                    other => other,
                })?;
                let reader = StreamReader::new(stream.map(|chunk| chunk.map_err(std::io::Error::other)));
                self.storage.save_stream(name, Box::pin(reader)).await
            }
            Err(e) => Err(StorageError::IoError(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LocalStorage;
    use tempfile::tempdir;

    async fn manager(media_root: &Path) -> StorageManager {
        let storage = LocalStorage::new(media_root, "http://localhost/uploaded".to_string())
            .await
            .unwrap();
        StorageManager::new(Arc::new(storage), media_root)
    }

    fn write(path: &Path, content: &[u8]) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[tokio::test]
    async fn replace_single_file_keeps_old_stem_with_new_extension() {
        let dir = tempdir().unwrap();
        let media = dir.path().join("media");
        let manager = manager(&media).await;

        let old = media.join("layers/roads/roads.shp");
        write(&old, b"old");
        let new = dir.path().join("upload/new_upload.zip");
        write(&new, b"new");

        let result = manager
            .replace(old.to_string_lossy().into_owned(), new.to_string_lossy().into_owned())
            .await
            .unwrap();

        let FileSet::Single(path) = result else {
            panic!("single input must give a single output");
        };
        let path = PathBuf::from(path);
        assert_eq!(path.file_name().unwrap(), "roads.zip");
        let uuid_dir = path.parent().unwrap();
        assert_eq!(uuid_dir.parent().unwrap(), media.join("layers"));
        assert_ne!(uuid_dir, media.join("layers/roads"));
        assert_eq!(std::fs::read(&path).unwrap(), b"new");
        assert!(old.exists());
    }

    #[tokio::test]
    async fn replace_list_of_files() {
        let dir = tempdir().unwrap();
        let media = dir.path().join("media");
        let manager = manager(&media).await;

        let old: Vec<String> = ["a.shp", "a.dbf", "a.shx"]
            .iter()
            .map(|n| {
                let p = media.join("data/a").join(n);
                write(&p, b"old");
                p.to_string_lossy().into_owned()
            })
            .collect();
        let new: Vec<String> = ["b.shp", "b.dbf", "b.shx"]
            .iter()
            .map(|n| {
                let p = dir.path().join("upload").join(n);
                write(&p, n.as_bytes());
                p.to_string_lossy().into_owned()
            })
            .collect();

        let result = manager.replace(old, new).await.unwrap();
        let FileSet::Many(paths) = result else {
            panic!("list input must give a list output");
        };
        let names: Vec<String> = paths
            .iter()
            .map(|p| Path::new(p).file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.shp", "a.dbf", "a.shx"]);

        // One fresh directory for the whole set
        let parents: std::collections::HashSet<_> =
            paths.iter().map(|p| Path::new(p).parent().unwrap().to_path_buf()).collect();
        assert_eq!(parents.len(), 1);
        assert_eq!(std::fs::read(&paths[1]).unwrap(), b"b.dbf");
    }

    #[tokio::test]
    async fn replace_outside_root_falls_back_to_media_root() {
        let dir = tempdir().unwrap();
        let media = dir.path().join("media");
        let manager = manager(&media).await;

        // Sibling of MEDIA_ROOT itself is outside the backend root
        let old = media.join("grid.tif");
        write(&old, b"old");
        let new = dir.path().join("upload/grid_v2.tif");
        write(&new, b"new");

        let result = manager
            .replace(old.to_string_lossy().into_owned(), new.to_string_lossy().into_owned())
            .await
            .unwrap();
        let FileSet::Single(path) = result else {
            panic!("expected single output");
        };
        let path = PathBuf::from(path);
        assert!(path.starts_with(&media));
        assert_eq!(path.file_name().unwrap(), "grid.tif");
    }

    #[tokio::test]
    async fn copy_keeps_base_names_in_one_new_directory() {
        let dir = tempdir().unwrap();
        let media = dir.path().join("media");
        let manager = manager(&media).await;

        let files: Vec<String> = ["x.csv", "x.prj"]
            .iter()
            .map(|n| {
                let p = media.join("docs/x").join(n);
                write(&p, n.as_bytes());
                p.to_string_lossy().into_owned()
            })
            .collect();

        let copied = manager.copy(files.clone()).await.unwrap().into_vec();
        assert_eq!(copied.len(), 2);
        for (src, dst) in files.iter().zip(&copied) {
            assert_ne!(src, dst);
            assert_eq!(
                Path::new(src).file_name(),
                Path::new(dst).file_name()
            );
            assert_eq!(std::fs::read(src).unwrap(), std::fs::read(dst).unwrap());
            assert_eq!(
                Path::new(dst).parent().unwrap().parent().unwrap(),
                media.join("docs")
            );
        }
    }

    #[tokio::test]
    async fn replace_requires_old_files() {
        let dir = tempdir().unwrap();
        let manager = manager(dir.path()).await;
        let result = manager
            .replace(Vec::<String>::new(), vec!["/tmp/x.tif".to_string()])
            .await;
        assert!(matches!(result, Err(StorageError::InvalidKey(_))));
    }

    #[tokio::test]
    async fn copy_reads_stored_names_through_the_backend() {
        let dir = tempdir().unwrap();
        let media = dir.path().join("media");
        let manager = manager(&media).await;
        let stored = manager
            .save("layers/a/a.csv", Bytes::from_static(b"x,y\n"))
            .await
            .unwrap();

        let copied = manager.copy(stored).await.unwrap();
        let FileSet::Single(path) = copied else {
            panic!("single input must give a single output");
        };
        let path = PathBuf::from(path);
        assert!(path.starts_with(media.join("layers")));
        assert_eq!(path.file_name().unwrap(), "a.csv");
        assert_eq!(std::fs::read(&path).unwrap(), b"x,y\n");

        let missing = manager.copy("layers/a/none.csv").await;
        assert!(matches!(missing, Err(StorageError::NotFound(_))));
    }
}
