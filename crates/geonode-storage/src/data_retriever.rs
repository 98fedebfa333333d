//! Staging of uploaded, local and remote files into local paths.
//!
//! Import handlers need plain filesystem paths. A [`DataRetriever`] owns one
//! temporary folder per transfer, writes every non-local source into it, and
//! removes it again on [`DataRetriever::delete_retrieved_paths`]. Nothing is
//! fetched implicitly: reading paths before a transfer fails unless the caller
//! opts in with `allow_transfer`.

use bytes::Bytes;
use futures::StreamExt;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::{AsyncWriteExt, BufWriter};

use geonode_core::{AppError, Config};

use crate::archive::{expand_archive, is_zip};
use crate::names::get_valid_filename;
use crate::remote::{remote_file_name, RemoteOpener};
use crate::traits::StorageError;

const TEMP_FOLDER_PREFIX: &str = "geonode-upload-";

#[derive(Debug, Error)]
pub enum DataRetrieverError {
    #[error("File '{0}' has not been transferred yet")]
    NotTransferred(String),

    #[error("Refusing to delete '{}': {reason}", path.display())]
    UnsafeDelete { path: PathBuf, reason: &'static str },

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<DataRetrieverError> for AppError {
    fn from(err: DataRetrieverError) -> Self {
        match err {
            DataRetrieverError::Storage(e) => e.into(),
            DataRetrieverError::NotTransferred(name) => {
                AppError::Internal(format!("File '{}' has not been transferred yet", name))
            }
            other => AppError::Storage(other.to_string()),
        }
    }
}

pub type RetrieverResult<T> = Result<T, DataRetrieverError>;

/// One file reference as received from a client.
#[derive(Debug, Clone)]
pub enum FileSource {
    /// Content received in the request body.
    Uploaded { name: String, content: Bytes },
    /// A file already on local disk. Used in place.
    LocalPath(PathBuf),
    /// `http(s)://`, `s3://` or `gs://` reference. Local paths are refused.
    RemoteUri(String),
}

impl FileSource {
    pub fn file_name(&self) -> String {
        let name = match self {
            FileSource::Uploaded { name, .. } => Path::new(name)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned()),
            FileSource::LocalPath(path) => path.file_name().map(|n| n.to_string_lossy().into_owned()),
            FileSource::RemoteUri(uri) => remote_file_name(uri),
        };
        let name = get_valid_filename(&name.unwrap_or_default());
        if name.is_empty() {
            "file".to_string()
        } else {
            name
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, FileSource::LocalPath(_))
    }
}

/// Shared transfer settings.
#[derive(Clone)]
struct TransferSettings {
    opener: RemoteOpener,
    buffer_size: usize,
    temp_root: PathBuf,
    /// Cap on the bytes staged by one retriever, archive members included.
    max_bytes: Option<u64>,
}

async fn create_temporary_folder(temp_root: &Path) -> RetrieverResult<PathBuf> {
    tokio::fs::create_dir_all(temp_root).await?;
    let root = temp_root.to_path_buf();
    let folder = tokio::task::spawn_blocking(move || {
        tempfile::Builder::new()
            .prefix(TEMP_FOLDER_PREFIX)
            .tempdir_in(&root)
            .map(|dir| dir.keep())
    })
    .await
    .map_err(|e| std::io::Error::other(e.to_string()))??;
    tracing::debug!(folder = %folder.display(), "Temporary folder created");
    Ok(folder)
}

/// Retriever for a single file reference.
pub struct DataItemRetriever {
    source: FileSource,
    settings: TransferSettings,
    file_path: Option<PathBuf>,
    temporary_folder: Option<PathBuf>,
}

impl DataItemRetriever {
    pub fn new(source: FileSource, opener: RemoteOpener, buffer_size: usize, temp_root: PathBuf) -> Self {
        Self::with_settings(
            source,
            TransferSettings {
                opener,
                buffer_size,
                temp_root,
                max_bytes: None,
            },
        )
    }

    /// Abort the transfer once more than `max_bytes` have been written.
    pub fn with_size_limit(mut self, max_bytes: Option<u64>) -> Self {
        self.settings.max_bytes = max_bytes;
        self
    }

    fn with_settings(source: FileSource, settings: TransferSettings) -> Self {
        let file_path = match &source {
            FileSource::LocalPath(path) => Some(path.clone()),
            _ => None,
        };
        Self {
            source,
            settings,
            file_path,
            temporary_folder: None,
        }
    }

    pub fn source(&self) -> &FileSource {
        &self.source
    }

    /// Stream the source into `temp_dir`, or into a folder of its own when
    /// none is given, writing in `buffer_size` chunks. Local paths are not
    /// copied.
    pub async fn transfer_remote_file(&mut self, temp_dir: Option<&Path>) -> RetrieverResult<PathBuf> {
        let file_name = self.source.file_name();
        let limit = self.settings.max_bytes;
        self.transfer_as(temp_dir, &file_name, limit).await.map(|(path, _)| path)
    }

    /// Transfer under `file_name`, failing with `SizeLimitExceeded` once more
    /// than `budget` bytes arrive. The partial file is removed on failure.
    #[tracing::instrument(skip(self, temp_dir), fields(file = %file_name))]
    async fn transfer_as(
        &mut self,
        temp_dir: Option<&Path>,
        file_name: &str,
        budget: Option<u64>,
    ) -> RetrieverResult<(PathBuf, u64)> {
        if let FileSource::LocalPath(path) = &self.source {
            return Ok((path.clone(), 0));
        }

        let folder = match temp_dir {
            Some(dir) => dir.to_path_buf(),
            None => {
                let folder = create_temporary_folder(&self.settings.temp_root).await?;
                self.temporary_folder = Some(folder.clone());
                folder
            }
        };
        let target = folder.join(file_name);
        let start = std::time::Instant::now();

        let written = match self.write_source(&target, budget).await {
            Ok(written) => written,
            Err(e) => {
                let _ = tokio::fs::remove_file(&target).await;
                return Err(e);
            }
        };

        tracing::debug!(
            target = %target.display(),
            size_bytes = written,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "File transferred"
        );
        self.file_path = Some(target.clone());
        Ok((target, written))
    }

    async fn write_source(&self, target: &Path, budget: Option<u64>) -> RetrieverResult<u64> {
        let limit = self.settings.max_bytes;
        let check = |written: u64| -> RetrieverResult<()> {
            match (budget, limit) {
                (Some(budget), Some(limit)) if written > budget => {
                    Err(StorageError::SizeLimitExceeded { limit }.into())
                }
                (Some(budget), None) if written > budget => {
                    Err(StorageError::SizeLimitExceeded { limit: budget }.into())
                }
                _ => Ok(()),
            }
        };

        let file = tokio::fs::File::create(target).await?;
        let mut writer = BufWriter::with_capacity(self.settings.buffer_size, file);
        let mut written: u64 = 0;
        match &self.source {
            FileSource::Uploaded { content, .. } => {
                check(content.len() as u64)?;
                for chunk in content.chunks(self.settings.buffer_size) {
                    writer.write_all(chunk).await?;
                    written += chunk.len() as u64;
                }
            }
            FileSource::RemoteUri(uri) => {
                let mut stream = self.settings.opener.open(uri).await?;
                while let Some(chunk) = stream.next().await {
                    let chunk = chunk?;
                    written += chunk.len() as u64;
                    check(written)?;
                    writer.write_all(&chunk).await?;
                }
            }
            FileSource::LocalPath(_) => {}
        }
        writer.flush().await?;
        Ok(written)
    }

    /// Materialised path. Without `allow_transfer` a source that has not
    /// been transferred yet is an error.
    pub async fn get_path(&mut self, allow_transfer: bool) -> RetrieverResult<PathBuf> {
        if let Some(path) = &self.file_path {
            return Ok(path.clone());
        }
        if !allow_transfer {
            return Err(DataRetrieverError::NotTransferred(self.source.file_name()));
        }
        self.transfer_remote_file(None).await
    }

    /// Remove the transferred copy. Local sources are never touched.
    pub async fn delete_temporary_file(&mut self) -> RetrieverResult<()> {
        if self.source.is_local() {
            return Ok(());
        }
        if let Some(folder) = self.temporary_folder.take() {
            remove_folder(&folder).await?;
        } else if let Some(path) = &self.file_path {
            match tokio::fs::remove_file(path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        self.file_path = None;
        Ok(())
    }
}

async fn remove_folder(folder: &Path) -> RetrieverResult<()> {
    match tokio::fs::remove_dir_all(folder).await {
        Ok(()) => {
            tracing::debug!(folder = %folder.display(), "Temporary folder removed");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn same_dir(a: &Path, b: &Path) -> bool {
    match (std::fs::canonicalize(a), std::fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

/// Delete a staging folder left behind by an earlier request. The media root
/// is never removed.
pub async fn remove_staging_folder(folder: &Path, media_root: &Path) -> RetrieverResult<()> {
    if same_dir(folder, media_root) {
        return Err(DataRetrieverError::UnsafeDelete {
            path: folder.to_path_buf(),
            reason: "folder is the media root",
        });
    }
    remove_folder(folder).await
}

/// Stages a keyed set of file references (`base_file`, `dbf_file`, ...).
pub struct DataRetriever {
    items: BTreeMap<String, DataItemRetriever>,
    settings: TransferSettings,
    media_root: PathBuf,
    temporary_folder: Option<PathBuf>,
    paths: Option<BTreeMap<String, PathBuf>>,
    owned: HashSet<PathBuf>,
}

impl DataRetriever {
    pub async fn new(
        files: BTreeMap<String, FileSource>,
        config: &Config,
        opener: RemoteOpener,
        transfer_at_creation: bool,
    ) -> RetrieverResult<Self> {
        let settings = TransferSettings {
            opener,
            buffer_size: config.file_upload_buffer_size(),
            temp_root: config.temp_dir(),
            max_bytes: None,
        };
        let items = files
            .into_iter()
            .map(|(key, source)| (key, DataItemRetriever::with_settings(source, settings.clone())))
            .collect();

        let mut retriever = Self {
            items,
            settings,
            media_root: config.media_root().to_path_buf(),
            temporary_folder: None,
            paths: None,
            owned: HashSet::new(),
        };
        if transfer_at_creation {
            retriever.clone_remote_files().await?;
        }
        Ok(retriever)
    }

    /// Cap the total bytes [`DataRetriever::clone_remote_files`] may stage,
    /// archive members included. Transfers stop as soon as the cap is
    /// passed.
    pub fn with_size_limit(mut self, max_bytes: Option<u64>) -> Self {
        self.settings.max_bytes = max_bytes;
        for item in self.items.values_mut() {
            item.settings.max_bytes = max_bytes;
        }
        self
    }

    pub fn temporary_folder(&self) -> Option<&Path> {
        self.temporary_folder.as_deref()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.items.keys().map(String::as_str)
    }

    /// Transfer every item into a new temporary folder. Each call uses a
    /// fresh folder; the previous one is removed. A zipped `base_file` is
    /// expanded and its members re-keyed. Two items with the same file name
    /// are kept apart as `<key>_<name>`. On failure the folder is removed.
    #[tracing::instrument(skip(self), fields(files = self.items.len()))]
    pub async fn clone_remote_files(&mut self) -> RetrieverResult<BTreeMap<String, PathBuf>> {
        if self.temporary_folder.is_some() {
            self.delete_retrieved_paths(true).await?;
        }
        let folder = create_temporary_folder(&self.settings.temp_root).await?;
        self.temporary_folder = Some(folder.clone());
        self.owned.clear();

        match self.stage_into(&folder).await {
            Ok(paths) => {
                self.paths = Some(paths.clone());
                Ok(paths)
            }
            Err(e) => {
                if let Err(cleanup) = remove_folder(&folder).await {
                    tracing::warn!(folder = %folder.display(), error = %cleanup, "Failed to remove partial transfer");
                }
                self.temporary_folder = None;
                self.owned.clear();
                for item in self.items.values_mut() {
                    if !item.source.is_local() {
                        item.file_path = None;
                    }
                }
                Err(e)
            }
        }
    }

    async fn stage_into(&mut self, folder: &Path) -> RetrieverResult<BTreeMap<String, PathBuf>> {
        let limit = self.settings.max_bytes;
        let mut total: u64 = 0;
        let mut taken: HashSet<String> = HashSet::new();
        let mut paths = BTreeMap::new();
        for (key, item) in self.items.iter_mut() {
            let mut file_name = item.source.file_name();
            if !item.source.is_local() && !taken.insert(file_name.clone()) {
                file_name = format!("{}_{}", get_valid_filename(key), file_name);
                taken.insert(file_name.clone());
            }
            let budget = limit.map(|limit| limit.saturating_sub(total));
            let (path, written) = item.transfer_as(Some(folder), &file_name, budget).await?;
            total += written;
            if !item.source.is_local() {
                self.owned.insert(path.clone());
            }
            paths.insert(key.clone(), path);
        }

        if let Some(base) = paths.get("base_file").cloned() {
            if is_zip(&base) {
                let budget = limit.map(|limit| limit.saturating_sub(total));
                let extracted = expand_archive(&base, folder, budget)
                    .await
                    .map_err(|e| match (e, limit) {
                        (StorageError::SizeLimitExceeded { .. }, Some(limit)) => {
                            StorageError::SizeLimitExceeded { limit }
                        }
                        (other, _) => other,
                    })?;
                if extracted.contains_key("base_file") {
                    self.owned.extend(extracted.values().cloned());
                    paths.extend(extracted);
                } else {
                    tracing::warn!(archive = %base.display(), "Archive has no supported main file");
                }
            }
        }
        Ok(paths)
    }

    /// One path per key. Fails with `NotTransferred` when nothing has been
    /// transferred and `allow_transfer` is false.
    pub async fn get_retrieved_paths(
        &mut self,
        allow_transfer: bool,
    ) -> RetrieverResult<BTreeMap<String, PathBuf>> {
        match &self.paths {
            Some(paths) => Ok(paths.clone()),
            None if allow_transfer => self.clone_remote_files().await,
            None => Err(DataRetrieverError::NotTransferred(
                self.items.keys().cloned().collect::<Vec<_>>().join(", "),
            )),
        }
    }

    pub async fn get_paths(&mut self, allow_transfer: bool) -> RetrieverResult<Vec<PathBuf>> {
        Ok(self.get_retrieved_paths(allow_transfer).await?.into_values().collect())
    }

    /// Remove the temporary folder. Never removes the media root. Without
    /// `force`, a folder holding files this retriever did not write is kept.
    pub async fn delete_retrieved_paths(&mut self, force: bool) -> RetrieverResult<()> {
        let Some(folder) = self.temporary_folder.clone() else {
            return Ok(());
        };
        if same_dir(&folder, &self.media_root) {
            return Err(DataRetrieverError::UnsafeDelete {
                path: folder,
                reason: "folder is the media root",
            });
        }
        if !force && self.has_foreign_entries(&folder).await? {
            tracing::warn!(folder = %folder.display(), "Temporary folder holds foreign files, not deleted");
            return Err(DataRetrieverError::UnsafeDelete {
                path: folder,
                reason: "folder contains files not written by this retriever",
            });
        }

        remove_folder(&folder).await?;
        self.temporary_folder = None;
        self.paths = None;
        self.owned.clear();
        for item in self.items.values_mut() {
            if !item.source.is_local() {
                item.file_path = None;
            }
        }
        Ok(())
    }

    async fn has_foreign_entries(&self, folder: &Path) -> RetrieverResult<bool> {
        let mut entries = match tokio::fs::read_dir(folder).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !self.owned.iter().any(|owned| owned.starts_with(&path)) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Hand the staged folder to a guard that removes it on drop.
    pub fn into_staged(mut self) -> RetrieverResult<StagedFiles> {
        let paths = self
            .paths
            .take()
            .ok_or_else(|| DataRetrieverError::NotTransferred(self.items.keys().cloned().collect::<Vec<_>>().join(", ")))?;
        Ok(StagedFiles {
            folder: self.temporary_folder.take(),
            paths,
        })
    }
}

/// Staged paths whose folder is deleted when the guard is dropped, unless
/// [`StagedFiles::persist`] hands ownership elsewhere.
#[derive(Debug)]
pub struct StagedFiles {
    folder: Option<PathBuf>,
    paths: BTreeMap<String, PathBuf>,
}

impl StagedFiles {
    pub fn paths(&self) -> &BTreeMap<String, PathBuf> {
        &self.paths
    }

    pub fn folder(&self) -> Option<&Path> {
        self.folder.as_deref()
    }

    pub fn base_file(&self) -> Option<&Path> {
        self.paths.get("base_file").map(PathBuf::as_path)
    }

    /// Keep the folder. The caller becomes responsible for removing it.
    pub fn persist(mut self) -> (Option<PathBuf>, BTreeMap<String, PathBuf>) {
        (self.folder.take(), std::mem::take(&mut self.paths))
    }
}

impl Drop for StagedFiles {
    fn drop(&mut self) {
        if let Some(folder) = self.folder.take() {
            match std::fs::remove_dir_all(&folder) {
                Ok(()) => tracing::debug!(folder = %folder.display(), "Staged files discarded"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => tracing::warn!(
                    folder = %folder.display(),
                    error = %e,
                    "Failed to remove staged files"
                ),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::RemoteHostRegistry;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn config(root: &Path) -> Config {
        let mut config = Config::local(root.join("assets"), root.join("media"));
        config.inner_mut().storage.temp_dir = Some(root.join("tmp"));
        config.inner_mut().storage.buffer_size = 4;
        config
    }

    fn opener() -> RemoteOpener {
        RemoteOpener::new(Arc::new(RemoteHostRegistry::default()))
    }

    fn uploaded(name: &str, content: &'static [u8]) -> FileSource {
        FileSource::Uploaded {
            name: name.to_string(),
            content: Bytes::from_static(content),
        }
    }

    #[tokio::test]
    async fn paths_require_transfer_unless_allowed() {
        let dir = tempdir().unwrap();
        let files = BTreeMap::from([("base_file".to_string(), uploaded("points.csv", b"lat,lon\n1,2\n"))]);
        let mut retriever = DataRetriever::new(files, &config(dir.path()), opener(), false)
            .await
            .unwrap();

        let err = retriever.get_retrieved_paths(false).await.unwrap_err();
        assert!(matches!(err, DataRetrieverError::NotTransferred(_)));

        let paths = retriever.get_retrieved_paths(true).await.unwrap();
        let base = &paths["base_file"];
        assert!(base.starts_with(dir.path().join("tmp")));
        assert_eq!(std::fs::read(base).unwrap(), b"lat,lon\n1,2\n");
    }

    #[tokio::test]
    async fn every_clone_uses_a_new_folder() {
        let dir = tempdir().unwrap();
        let files = BTreeMap::from([("base_file".to_string(), uploaded("a.geojson", b"{}"))]);
        let mut retriever = DataRetriever::new(files, &config(dir.path()), opener(), true)
            .await
            .unwrap();
        let first = retriever.temporary_folder().unwrap().to_path_buf();

        retriever.clone_remote_files().await.unwrap();
        let second = retriever.temporary_folder().unwrap().to_path_buf();
        assert_ne!(first, second);
        assert!(!first.exists());
        assert!(second.join("a.geojson").exists());
    }

    #[tokio::test]
    async fn delete_clears_folder_and_keeps_local_sources() {
        let dir = tempdir().unwrap();
        let local = dir.path().join("style.sld");
        std::fs::write(&local, b"<sld/>").unwrap();
        let files = BTreeMap::from([
            ("base_file".to_string(), uploaded("roads.kml", b"<kml/>")),
            ("sld_file".to_string(), FileSource::LocalPath(local.clone())),
        ]);
        let mut retriever = DataRetriever::new(files, &config(dir.path()), opener(), true)
            .await
            .unwrap();
        let paths = retriever.get_retrieved_paths(false).await.unwrap();
        assert_eq!(paths["sld_file"], local);
        let folder = retriever.temporary_folder().unwrap().to_path_buf();

        retriever.delete_retrieved_paths(false).await.unwrap();
        assert!(retriever.temporary_folder().is_none());
        assert!(!folder.exists());
        assert!(local.exists());
    }

    #[tokio::test]
    async fn non_forced_delete_keeps_foreign_files() {
        let dir = tempdir().unwrap();
        let files = BTreeMap::from([("base_file".to_string(), uploaded("a.csv", b"x,y\n"))]);
        let mut retriever = DataRetriever::new(files, &config(dir.path()), opener(), true)
            .await
            .unwrap();
        let folder = retriever.temporary_folder().unwrap().to_path_buf();
        std::fs::write(folder.join("someone_else.txt"), b"!").unwrap();

        let err = retriever.delete_retrieved_paths(false).await.unwrap_err();
        assert!(matches!(err, DataRetrieverError::UnsafeDelete { .. }));
        assert!(folder.exists());

        retriever.delete_retrieved_paths(true).await.unwrap();
        assert!(!folder.exists());
    }

    #[tokio::test]
    async fn media_root_is_never_deleted() {
        let dir = tempdir().unwrap();
        let media = dir.path().join("media");
        std::fs::create_dir_all(&media).unwrap();
        let err = remove_staging_folder(&media, &media).await.unwrap_err();
        assert!(matches!(err, DataRetrieverError::UnsafeDelete { .. }));
        assert!(media.exists());
    }

    #[tokio::test]
    async fn zipped_shapefile_is_expanded() {
        use std::io::Write;
        let mut buffer = std::io::Cursor::new(Vec::new());
        {
            let mut zip = zip::ZipWriter::new(&mut buffer);
            for name in ["roads.shp", "roads.dbf", "roads.shx"] {
                zip.start_file(name, zip::write::FileOptions::default()).unwrap();
                zip.write_all(name.as_bytes()).unwrap();
            }
            zip.finish().unwrap();
        }
        let dir = tempdir().unwrap();
        let files = BTreeMap::from([(
            "base_file".to_string(),
            FileSource::Uploaded {
                name: "roads.zip".to_string(),
                content: Bytes::from(buffer.into_inner()),
            },
        )]);
        let mut retriever = DataRetriever::new(files, &config(dir.path()), opener(), true)
            .await
            .unwrap();
        let paths = retriever.get_retrieved_paths(false).await.unwrap();
        assert!(paths["base_file"].ends_with("roads.shp"));
        assert!(paths["dbf_file"].ends_with("roads.dbf"));
        assert!(paths["shx_file"].ends_with("roads.shx"));

        retriever.delete_retrieved_paths(false).await.unwrap();
    }

    #[tokio::test]
    async fn staged_files_are_removed_on_drop_unless_persisted() {
        let dir = tempdir().unwrap();
        let files = BTreeMap::from([("base_file".to_string(), uploaded("a.csv", b"x,y\n"))]);

        let retriever = DataRetriever::new(files.clone(), &config(dir.path()), opener(), true)
            .await
            .unwrap();
        let staged = retriever.into_staged().unwrap();
        let folder = staged.folder().unwrap().to_path_buf();
        drop(staged);
        assert!(!folder.exists());

        let retriever = DataRetriever::new(files, &config(dir.path()), opener(), true)
            .await
            .unwrap();
        let (folder, paths) = retriever.into_staged().unwrap().persist();
        let folder = folder.unwrap();
        assert!(folder.exists());
        assert!(paths["base_file"].exists());
    }

    #[tokio::test]
    async fn single_item_transfers_into_its_own_folder() {
        let dir = tempdir().unwrap();
        let mut item = DataItemRetriever::new(
            uploaded("grid.tif", b"II*\0data"),
            opener(),
            3,
            dir.path().join("tmp"),
        );
        assert!(item.get_path(false).await.is_err());
        let path = item.get_path(true).await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"II*\0data");

        item.delete_temporary_file().await.unwrap();
        assert!(!path.exists());
        assert!(!path.parent().unwrap().exists());
    }

    fn staged_entries(root: &Path) -> usize {
        std::fs::read_dir(root.join("tmp")).map(|d| d.count()).unwrap_or(0)
    }

    #[tokio::test]
    async fn uploads_over_the_limit_are_not_staged() {
        let dir = tempdir().unwrap();
        let files = BTreeMap::from([
            ("base_file".to_string(), uploaded("a.csv", b"x,y\n1,2\n")),
            ("xml_file".to_string(), uploaded("a.xml", b"<metadata>0123456789</metadata>")),
        ]);
        let mut retriever = DataRetriever::new(files, &config(dir.path()), opener(), false)
            .await
            .unwrap()
            .with_size_limit(Some(16));

        let err = retriever.clone_remote_files().await.unwrap_err();
        assert!(matches!(
            err,
            DataRetrieverError::Storage(StorageError::SizeLimitExceeded { limit: 16 })
        ));
        assert!(retriever.temporary_folder().is_none());
        assert_eq!(staged_entries(dir.path()), 0);
    }

    #[tokio::test]
    async fn remote_streams_stop_at_the_limit() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            let body = "z".repeat(4096);
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            let _ = socket.write_all(response.as_bytes()).await;
        });

        let dir = tempdir().unwrap();
        let files = BTreeMap::from([(
            "base_file".to_string(),
            FileSource::RemoteUri(format!("http://{}/big.csv", addr)),
        )]);
        let mut retriever =
            DataRetriever::new(files, &config(dir.path()), opener().with_private_hosts(true), false)
                .await
                .unwrap()
                .with_size_limit(Some(100));

        let err = retriever.clone_remote_files().await.unwrap_err();
        assert!(matches!(
            err,
            DataRetrieverError::Storage(StorageError::SizeLimitExceeded { limit: 100 })
        ));
        assert_eq!(staged_entries(dir.path()), 0);
    }

    #[tokio::test]
    async fn archive_members_count_towards_the_limit() {
        use std::io::Write;
        let mut buffer = std::io::Cursor::new(Vec::new());
        {
            let mut zip = zip::ZipWriter::new(&mut buffer);
            let options = zip::write::FileOptions::default()
                .compression_method(zip::CompressionMethod::Deflated);
            zip.start_file("roads.shp", options).unwrap();
            zip.write_all(&vec![0u8; 200_000]).unwrap();
            zip.finish().unwrap();
        }
        let archive = buffer.into_inner();
        assert!(archive.len() < 4096);

        let dir = tempdir().unwrap();
        let files = BTreeMap::from([(
            "base_file".to_string(),
            FileSource::Uploaded {
                name: "roads.zip".to_string(),
                content: Bytes::from(archive),
            },
        )]);
        let mut retriever = DataRetriever::new(files, &config(dir.path()), opener(), false)
            .await
            .unwrap()
            .with_size_limit(Some(4096));

        let err = retriever.clone_remote_files().await.unwrap_err();
        assert!(matches!(
            err,
            DataRetrieverError::Storage(StorageError::SizeLimitExceeded { limit: 4096 })
        ));
        assert_eq!(staged_entries(dir.path()), 0);
    }

    #[tokio::test]
    async fn same_file_names_are_kept_apart() {
        let dir = tempdir().unwrap();
        let files = BTreeMap::from([
            ("base_file".to_string(), uploaded("data.csv", b"x,y\n1,2\n")),
            ("xml_file".to_string(), uploaded("data.csv", b"<metadata/>")),
        ]);
        let mut retriever = DataRetriever::new(files, &config(dir.path()), opener(), true)
            .await
            .unwrap();
        let paths = retriever.get_retrieved_paths(false).await.unwrap();

        assert_ne!(paths["base_file"], paths["xml_file"]);
        assert!(paths["base_file"].ends_with("data.csv"));
        assert!(paths["xml_file"].ends_with("xml_file_data.csv"));
        assert_eq!(std::fs::read(&paths["base_file"]).unwrap(), b"x,y\n1,2\n");
        assert_eq!(std::fs::read(&paths["xml_file"]).unwrap(), b"<metadata/>");
    }
}
