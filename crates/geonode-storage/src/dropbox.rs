//! Dropbox storage over the HTTP API v2.

use crate::names::{alternative_name, object_key};
use crate::traits::{ByteStream, Storage, StorageError, StorageResult};
use crate::StorageBackend;
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;
use std::path::PathBuf;
use std::pin::Pin;
use tokio::io::{AsyncRead, AsyncReadExt};

const API_URL: &str = "https://api.dropboxapi.com/2";
const CONTENT_URL: &str = "https://content.dropboxapi.com/2";
const MAX_NAME_ATTEMPTS: usize = 100;

#[derive(Debug, Deserialize)]
struct Metadata {
    #[serde(rename = ".tag")]
    tag: String,
    name: String,
    #[serde(default)]
    size: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ListFolderResult {
    entries: Vec<Metadata>,
    cursor: String,
    has_more: bool,
}

#[derive(Debug, Deserialize)]
struct TemporaryLink {
    link: String,
}

#[derive(Debug, Deserialize)]
struct UploadResult {
    path_display: String,
}

/// Dropbox backend. Names are placed under `root_path`.
#[derive(Clone)]
pub struct DropboxStorage {
    client: reqwest::Client,
    token: String,
    root_path: String,
}

/// `Dropbox-API-Arg` must be ASCII; non-ASCII characters are `\u` escaped.
fn api_arg(value: &serde_json::Value) -> String {
    let mut out = String::new();
    for c in value.to_string().chars() {
        if c.is_ascii() {
            out.push(c);
        } else {
            let mut buf = [0u16; 2];
            for unit in c.encode_utf16(&mut buf) {
                out.push_str(&format!("\\u{:04x}", unit));
            }
        }
    }
    out
}

impl DropboxStorage {
    pub fn new(token: String, root_path: String) -> StorageResult<Self> {
        if token.is_empty() {
            return Err(StorageError::ConfigError(
                "DROPBOX_OAUTH2_TOKEN not configured".to_string(),
            ));
        }
        let root_path = format!("/{}", root_path.trim_matches('/'));
        Ok(Self {
            client: reqwest::Client::new(),
            token,
            root_path: root_path.trim_end_matches('/').to_string(),
        })
    }

    fn full_path(&self, name: &str) -> StorageResult<String> {
        let key = object_key(name)?;
        Ok(format!("{}/{}", self.root_path, key))
    }

    fn relative(&self, full_path: &str) -> String {
        full_path
            .strip_prefix(&self.root_path)
            .unwrap_or(full_path)
            .trim_start_matches('/')
            .to_string()
    }

    async fn rpc(&self, endpoint: &str, body: serde_json::Value) -> StorageResult<reqwest::Response> {
        self.client
            .post(format!("{}/{}", API_URL, endpoint))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .map_err(|e| StorageError::BackendError(format!("Dropbox {} failed: {}", endpoint, e)))
    }

    /// Dropbox reports missing paths as 409 with a `not_found` summary.
    async fn is_not_found(response: reqwest::Response) -> (bool, String) {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        (
            status == reqwest::StatusCode::CONFLICT && text.contains("not_found"),
            format!("{}: {}", status, text),
        )
    }

    async fn metadata(&self, name: &str) -> StorageResult<Option<Metadata>> {
        let response = self
            .rpc("files/get_metadata", json!({ "path": self.full_path(name)? }))
            .await?;
        if response.status().is_success() {
            let meta = response
                .json::<Metadata>()
                .await
                .map_err(|e| StorageError::BackendError(e.to_string()))?;
            return Ok(Some(meta));
        }
        match Self::is_not_found(response).await {
            (true, _) => Ok(None),
            (false, detail) => Err(StorageError::BackendError(detail)),
        }
    }

    async fn available_name(&self, name: &str) -> StorageResult<String> {
        let mut candidate = name.to_string();
        let mut attempts = 0;
        while self.metadata(&candidate).await?.is_some() {
            attempts += 1;
            if attempts > MAX_NAME_ATTEMPTS {
                return Err(StorageError::UploadFailed(format!(
                    "Could not find an available name for {}",
                    name
                )));
            }
            candidate = alternative_name(name);
        }
        Ok(candidate)
    }

    async fn upload(&self, name: &str, content: Bytes) -> StorageResult<String> {
        let path = self.full_path(name)?;
        let size = content.len();
        let response = self
            .client
            .post(format!("{}/files/upload", CONTENT_URL))
            .bearer_auth(&self.token)
            .header(
                "Dropbox-API-Arg",
                api_arg(&json!({ "path": path, "mode": "add", "autorename": false })),
            )
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(content)
            .send()
            .await
            .map_err(|e| StorageError::UploadFailed(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(StorageError::UploadFailed(format!("{}: {}", status, text)));
        }
        let result = response
            .json::<UploadResult>()
            .await
            .map_err(|e| StorageError::UploadFailed(e.to_string()))?;

        tracing::debug!(path = %result.path_display, size_bytes = size, "Dropbox upload successful");
        Ok(self.relative(&result.path_display))
    }
}

#[async_trait]
impl Storage for DropboxStorage {
    async fn save(&self, name: &str, content: Bytes) -> StorageResult<String> {
        let name = self.available_name(name).await?;
        self.upload(&name, content).await
    }

    async fn save_stream(
        &self,
        name: &str,
        mut reader: Pin<Box<dyn AsyncRead + Send + Unpin>>,
    ) -> StorageResult<String> {
        let mut buffer = Vec::new();
        reader.read_to_end(&mut buffer).await.map_err(|e| {
            StorageError::UploadFailed(format!("Failed to read from stream: {}", e))
        })?;
        self.save(name, Bytes::from(buffer)).await
    }

    async fn open(&self, name: &str) -> StorageResult<ByteStream> {
        let path = self.full_path(name)?;
        let response = self
            .client
            .post(format!("{}/files/download", CONTENT_URL))
            .bearer_auth(&self.token)
            .header("Dropbox-API-Arg", api_arg(&json!({ "path": path })))
            .send()
            .await
            .map_err(|e| StorageError::DownloadFailed(e.to_string()))?;

        if !response.status().is_success() {
            return match Self::is_not_found(response).await {
                (true, _) => Err(StorageError::NotFound(name.to_string())),
                (false, detail) => Err(StorageError::DownloadFailed(detail)),
            };
        }

        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| StorageError::DownloadFailed(e.to_string())));
        Ok(Box::pin(stream))
    }

    async fn delete(&self, name: &str) -> StorageResult<()> {
        let response = self
            .rpc("files/delete_v2", json!({ "path": self.full_path(name)? }))
            .await?;
        if response.status().is_success() {
            return Ok(());
        }
        match Self::is_not_found(response).await {
            (true, _) => Ok(()),
            (false, detail) => Err(StorageError::DeleteFailed(detail)),
        }
    }

    async fn exists(&self, name: &str) -> StorageResult<bool> {
        Ok(self.metadata(name).await?.is_some())
    }

    async fn listdir(&self, path: &str) -> StorageResult<(Vec<String>, Vec<String>)> {
        let folder = match path.trim_matches('/') {
            "" => self.root_path.clone(),
            _ => self.full_path(path)?,
        };
        // The API root is addressed by the empty string
        let folder = if folder == "/" { String::new() } else { folder };

        let mut dirs = Vec::new();
        let mut files = Vec::new();
        let mut response = self.rpc("files/list_folder", json!({ "path": folder })).await?;
        loop {
            if !response.status().is_success() {
                return match Self::is_not_found(response).await {
                    (true, _) => Err(StorageError::NotFound(path.to_string())),
                    (false, detail) => Err(StorageError::BackendError(detail)),
                };
            }
            let page = response
                .json::<ListFolderResult>()
                .await
                .map_err(|e| StorageError::BackendError(e.to_string()))?;
            for entry in page.entries {
                match entry.tag.as_str() {
                    "folder" => dirs.push(entry.name),
                    "file" => files.push(entry.name),
                    _ => {}
                }
            }
            if !page.has_more {
                break;
            }
            response = self
                .rpc("files/list_folder/continue", json!({ "cursor": page.cursor }))
                .await?;
        }
        dirs.sort();
        files.sort();
        Ok((dirs, files))
    }

    fn path(&self, _name: &str) -> StorageResult<PathBuf> {
        Err(StorageError::NotSupported {
            backend: StorageBackend::Dropbox,
            operation: "path",
        })
    }

    async fn size(&self, name: &str) -> StorageResult<u64> {
        match self.metadata(name).await? {
            Some(meta) => Ok(meta.size.unwrap_or(0)),
            None => Err(StorageError::NotFound(name.to_string())),
        }
    }

    async fn url(&self, name: &str) -> StorageResult<String> {
        let response = self
            .rpc("files/get_temporary_link", json!({ "path": self.full_path(name)? }))
            .await?;
        if !response.status().is_success() {
            return match Self::is_not_found(response).await {
                (true, _) => Err(StorageError::NotFound(name.to_string())),
                (false, detail) => Err(StorageError::BackendError(detail)),
            };
        }
        let link = response
            .json::<TemporaryLink>()
            .await
            .map_err(|e| StorageError::BackendError(e.to_string()))?;
        Ok(link.link)
    }

    async fn copy(&self, from: &str, to: &str) -> StorageResult<String> {
        let response = self
            .rpc(
                "files/copy_v2",
                json!({ "from_path": self.full_path(from)?, "to_path": self.full_path(to)? }),
            )
            .await?;
        if !response.status().is_success() {
            return match Self::is_not_found(response).await {
                (true, _) => Err(StorageError::NotFound(from.to_string())),
                (false, detail) => Err(StorageError::BackendError(detail)),
            };
        }
        Ok(object_key(to)?)
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::Dropbox
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_arg_escapes_non_ascii() {
        let arg = api_arg(&json!({ "path": "/données/é.tif" }));
        assert!(arg.is_ascii());
        assert!(arg.contains("\\u00e9"));
    }

    #[test]
    fn names_are_placed_under_root() {
        let storage = DropboxStorage::new("token".into(), "geonode/".into()).unwrap();
        assert_eq!(storage.full_path("/a/b.tif").unwrap(), "/geonode/a/b.tif");
        assert_eq!(storage.relative("/geonode/a/b.tif"), "a/b.tif");
        assert!(storage.full_path("../x").is_err());

        let bare = DropboxStorage::new("token".into(), String::new()).unwrap();
        assert_eq!(bare.full_path("x.csv").unwrap(), "/x.csv");
    }

    #[test]
    fn empty_token_is_rejected() {
        assert!(matches!(
            DropboxStorage::new(String::new(), String::new()),
            Err(StorageError::ConfigError(_))
        ));
    }
}
