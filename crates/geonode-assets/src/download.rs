//! Serving asset files over HTTP.
//!
//! A single file is streamed as is. Several files, or a directory, are packed
//! into an uncompressed zip written while it is sent. Its length is computed
//! from the member sizes, so the response still carries `Content-Length`.

use async_trait::async_trait;
use futures::StreamExt;
use http::header::{HeaderValue, CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE, LAST_MODIFIED};
use http::HeaderMap;
use std::path::{Component, Path, PathBuf};
use tokio_util::io::ReaderStream;

use geonode_core::models::Asset;
use geonode_storage::{ByteStream, StorageError};

use crate::error::{AssetError, AssetResult};
use crate::zip_stream::ZipPlan;

/// Headers and body of a download, independent of the HTTP framework.
pub struct DownloadResponse {
    pub headers: HeaderMap,
    pub body: ByteStream,
    pub file_name: String,
}

#[async_trait]
pub trait AssetDownloadHandler: Send + Sync {
    /// Build the response for `asset`. `path` selects one file inside the
    /// asset folder; `basename` names the zip of a multi-file asset.
    async fn create_response(
        &self,
        asset: &Asset,
        attachment: bool,
        basename: Option<&str>,
        path: Option<&str>,
    ) -> AssetResult<DownloadResponse>;
}

pub struct LocalAssetDownloadHandler {
    assets_root: PathBuf,
}

fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "zip" => "application/zip",
        "json" | "geojson" => "application/json",
        "kml" => "application/vnd.google-earth.kml+xml",
        "kmz" => "application/vnd.google-earth.kmz",
        "csv" => "text/csv",
        "tif" | "tiff" => "image/tiff",
        "xml" | "sld" => "application/xml",
        "gpkg" => "application/geopackage+sqlite3",
        "txt" | "prj" => "text/plain",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "pdf" => "application/pdf",
        _ => "application/octet-stream",
    }
}

fn is_traversal(path: &str) -> bool {
    path.contains("/../")
        || path.starts_with("../")
        || path.ends_with("/..")
        || path == ".."
        || Path::new(path)
            .components()
            .any(|c| matches!(c, Component::ParentDir))
}

fn disposition(attachment: bool, file_name: &str) -> String {
    let safe: String = file_name.chars().filter(|c| *c != '"' && !c.is_control()).collect();
    if attachment {
        format!("attachment; filename=\"{}\"", safe)
    } else {
        format!("inline; filename=\"{}\"", safe)
    }
}

fn header(value: &str) -> AssetResult<HeaderValue> {
    HeaderValue::from_str(value).map_err(|e| AssetError::Archive(format!("Invalid header value: {}", e)))
}

/// Files to pack: `(entry name, absolute path)`, directories walked.
fn collect_entries(location: &[String]) -> std::io::Result<Vec<(String, PathBuf)>> {
    fn walk(dir: &Path, prefix: &str, out: &mut Vec<(String, PathBuf)>) -> std::io::Result<()> {
        let mut entries: Vec<_> = std::fs::read_dir(dir)?.collect::<Result<_, _>>()?;
        entries.sort_by_key(|e| e.file_name());
        for entry in entries {
            let name = format!("{}/{}", prefix, entry.file_name().to_string_lossy());
            let path = entry.path();
            if path.is_dir() {
                walk(&path, &name, out)?;
            } else {
                out.push((name, path));
            }
        }
        Ok(())
    }

    let mut out = Vec::new();
    for entry in location {
        let path = PathBuf::from(entry);
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if path.is_dir() {
            walk(&path, &name, &mut out)?;
        } else if path.exists() {
            out.push((name, path));
        } else {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} does not exist", entry),
            ));
        }
    }
    Ok(out)
}

fn file_stream(file: tokio::fs::File) -> ByteStream {
    Box::pin(ReaderStream::new(file).map(|chunk| chunk.map_err(StorageError::from)))
}

impl LocalAssetDownloadHandler {
    pub fn new(assets_root: PathBuf) -> Self {
        Self { assets_root }
    }

    /// Folder a sub-path is resolved against: the asset's only directory, or
    /// the parent of its first file.
    fn asset_folder(asset: &Asset) -> Option<PathBuf> {
        let first = Path::new(asset.location().first()?);
        if asset.location().len() == 1 && first.is_dir() {
            Some(first.to_path_buf())
        } else {
            first.parent().map(Path::to_path_buf)
        }
    }

    async fn single_file(&self, file: &Path, attachment: bool) -> AssetResult<DownloadResponse> {
        let metadata = tokio::fs::metadata(file)
            .await
            .map_err(|_| AssetError::FileNotFound(file.display().to_string()))?;
        let handle = tokio::fs::File::open(file).await?;
        let file_name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "download".to_string());

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type_for(file)));
        headers.insert(CONTENT_LENGTH, HeaderValue::from(metadata.len()));
        headers.insert(CONTENT_DISPOSITION, header(&disposition(attachment, &file_name))?);
        if let Ok(modified) = metadata.modified() {
            headers.insert(LAST_MODIFIED, header(&httpdate::fmt_http_date(modified))?);
        }

        Ok(DownloadResponse {
            headers,
            body: file_stream(handle),
            file_name,
        })
    }
}

#[async_trait]
impl AssetDownloadHandler for LocalAssetDownloadHandler {
    #[tracing::instrument(skip(self, asset), fields(asset_id = %asset.id))]
    async fn create_response(
        &self,
        asset: &Asset,
        attachment: bool,
        basename: Option<&str>,
        path: Option<&str>,
    ) -> AssetResult<DownloadResponse> {
        if asset.location().is_empty() {
            return Err(AssetError::EmptyAsset);
        }

        if let Some(sub_path) = path.filter(|p| !p.is_empty()) {
            if is_traversal(sub_path) {
                tracing::warn!(path = %sub_path, "Rejected download sub-path");
                return Err(AssetError::PathTraversal(sub_path.to_string()));
            }
            let folder = Self::asset_folder(asset).ok_or(AssetError::EmptyAsset)?;
            let target = folder.join(sub_path.trim_start_matches('/'));
            if !target.is_file() {
                return Err(AssetError::FileNotFound(sub_path.to_string()));
            }
            return self.single_file(&target, attachment).await;
        }

        if asset.location().len() == 1 && Path::new(&asset.location()[0]).is_file() {
            return self.single_file(Path::new(&asset.location()[0]), attachment).await;
        }

        let location = asset.location().to_vec();
        let start = std::time::Instant::now();
        let plan = tokio::task::spawn_blocking(move || {
            let entries = collect_entries(&location)
                .map_err(|e| AssetError::FileNotFound(e.to_string()))?;
            ZipPlan::new(entries)
        })
        .await
        .map_err(|e| AssetError::Archive(e.to_string()))??;
        let (length, latest) = (plan.length(), plan.latest());

        let file_name = format!("{}.zip", basename.unwrap_or(&asset.title));
        tracing::debug!(
            size_bytes = length,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            assets_root = %self.assets_root.display(),
            "Asset archive streaming"
        );

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/zip"));
        headers.insert(CONTENT_LENGTH, HeaderValue::from(length));
        headers.insert(CONTENT_DISPOSITION, header(&disposition(attachment, &file_name))?);
        headers.insert(LAST_MODIFIED, header(&httpdate::fmt_http_date(latest))?);

        Ok(DownloadResponse {
            headers,
            body: plan.into_stream(),
            file_name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;
    use std::io::Read;
    use tempfile::tempdir;

    async fn body(response: DownloadResponse) -> Vec<u8> {
        let chunks: Vec<bytes::Bytes> = response.body.try_collect().await.unwrap();
        chunks.concat()
    }

    fn asset(location: Vec<PathBuf>) -> Asset {
        Asset::new_local(
            "roads",
            None,
            "original",
            "alice",
            location.iter().map(|p| p.to_string_lossy().into_owned()).collect(),
        )
    }

    #[tokio::test]
    async fn single_file_is_streamed() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("grid.tif");
        std::fs::write(&file, b"II*\0tiff").unwrap();
        let handler = LocalAssetDownloadHandler::new(dir.path().to_path_buf());

        let response = handler
            .create_response(&asset(vec![file]), true, None, None)
            .await
            .unwrap();
        assert_eq!(response.headers[CONTENT_TYPE], "image/tiff");
        assert_eq!(response.headers[CONTENT_LENGTH], "8");
        assert_eq!(
            response.headers[CONTENT_DISPOSITION],
            "attachment; filename=\"grid.tif\""
        );
        assert_eq!(body(response).await, b"II*\0tiff");
    }

    #[tokio::test]
    async fn multiple_files_are_zipped_with_length_and_mtime() {
        let dir = tempdir().unwrap();
        let files: Vec<PathBuf> = ["a.shp", "a.dbf", "a.shx"]
            .iter()
            .map(|n| {
                let p = dir.path().join(n);
                std::fs::write(&p, n.as_bytes()).unwrap();
                p
            })
            .collect();
        let handler = LocalAssetDownloadHandler::new(dir.path().to_path_buf());

        let response = handler
            .create_response(&asset(files), true, Some("layer"), None)
            .await
            .unwrap();
        assert_eq!(response.file_name, "layer.zip");
        assert!(response.headers.contains_key(LAST_MODIFIED));
        let length: usize = response.headers[CONTENT_LENGTH].to_str().unwrap().parse().unwrap();

        let bytes = body(response).await;
        assert_eq!(bytes.len(), length);
        let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).unwrap();
        assert_eq!(archive.len(), 3);
        let mut member = archive.by_name("a.dbf").unwrap();
        assert_eq!(member.compression(), zip::CompressionMethod::Stored);
        let mut content = String::new();
        member.read_to_string(&mut content).unwrap();
        assert_eq!(content, "a.dbf");
    }

    #[tokio::test]
    async fn traversal_sub_paths_are_rejected() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("x/a.csv");
        std::fs::create_dir_all(file.parent().unwrap()).unwrap();
        std::fs::write(&file, b"lat,lon").unwrap();
        let handler = LocalAssetDownloadHandler::new(dir.path().to_path_buf());
        let asset = asset(vec![file]);

        for bad in ["sub/../../etc/passwd", "../a.csv", ".."] {
            let result = handler.create_response(&asset, false, None, Some(bad)).await;
            assert!(matches!(result, Err(AssetError::PathTraversal(_))), "{}", bad);
        }
    }

    #[tokio::test]
    async fn sub_path_selects_file_in_folder() {
        let dir = tempdir().unwrap();
        let folder = dir.path().join("layer");
        std::fs::create_dir_all(folder.join("styles")).unwrap();
        std::fs::write(folder.join("styles/default.sld"), b"<sld/>").unwrap();
        let handler = LocalAssetDownloadHandler::new(dir.path().to_path_buf());

        let response = handler
            .create_response(&asset(vec![folder.clone()]), false, None, Some("styles/default.sld"))
            .await
            .unwrap();
        assert_eq!(
            response.headers[CONTENT_DISPOSITION],
            "inline; filename=\"default.sld\""
        );
        assert_eq!(body(response).await, b"<sld/>");

        let missing = handler
            .create_response(&asset(vec![folder]), false, None, Some("nope.sld"))
            .await;
        assert!(matches!(missing, Err(AssetError::FileNotFound(_))));
    }

    #[tokio::test]
    async fn directory_asset_is_zipped_with_relative_names() {
        let dir = tempdir().unwrap();
        let folder = dir.path().join("tiles");
        std::fs::create_dir_all(folder.join("0")).unwrap();
        std::fs::write(folder.join("0/0.png"), b"png").unwrap();
        let handler = LocalAssetDownloadHandler::new(dir.path().to_path_buf());

        let response = handler
            .create_response(&asset(vec![folder]), true, None, None)
            .await
            .unwrap();
        assert_eq!(response.file_name, "roads.zip");
        let bytes = body(response).await;
        let archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).unwrap();
        assert!(archive.file_names().any(|n| n == "tiles/0/0.png"));
    }

    #[tokio::test]
    async fn empty_asset_is_not_found() {
        let handler = LocalAssetDownloadHandler::new(PathBuf::from("/tmp"));
        let result = handler.create_response(&asset(vec![]), true, None, None).await;
        assert!(matches!(result, Err(AssetError::EmptyAsset)));
    }
}
