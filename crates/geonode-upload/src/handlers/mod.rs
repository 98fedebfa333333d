//! Import handlers, one per supported spatial format.
//!
//! A handler decides whether it can take a set of staged files, validates
//! them, and names the steps of each action it supports. Resolution walks
//! [`HandlerKind::ALL`] in order and takes the first handler whose
//! `can_handle` accepts the files.

mod csv;
mod geojson;
mod geotiff;
mod gpkg;
mod kml;
mod shapefile;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::AsyncReadExt;

use geonode_core::models::{HandlerKind, ImportAction};

use crate::error::{UploadError, UploadResult};
use crate::limits::UploadLimitValidator;

pub use self::csv::CsvHandler;
pub use self::geojson::GeoJsonHandler;
pub use self::geotiff::GeoTiffHandler;
pub use self::gpkg::GeoPackageHandler;
pub use self::kml::KmlHandler;
pub use self::shapefile::ShapefileHandler;

/// Staged files keyed by role (`base_file`, `dbf_file`, ...).
pub type UploadFiles = BTreeMap<String, PathBuf>;

pub const BASE_FILE_KEY: &str = "base_file";

pub const START_IMPORT: &str = "start_import";
pub const IMPORT_RESOURCE: &str = "import_resource";
pub const PUBLISH_RESOURCE: &str = "publish_resource";
pub const CREATE_GEONODE_RESOURCE: &str = "create_geonode_resource";
pub const START_COPY: &str = "start_copy";
pub const COPY_DYNAMIC_MODEL: &str = "copy_dynamic_model";
pub const COPY_RASTER_FILE: &str = "copy_raster_file";
pub const COPY_GEONODE_RESOURCE: &str = "copy_geonode_resource";

pub const IMPORT_STEPS: [&str; 4] = [
    START_IMPORT,
    IMPORT_RESOURCE,
    PUBLISH_RESOURCE,
    CREATE_GEONODE_RESOURCE,
];

pub const COPY_STEPS: [&str; 4] = [
    START_COPY,
    COPY_DYNAMIC_MODEL,
    PUBLISH_RESOURCE,
    COPY_GEONODE_RESOURCE,
];

/// Parameters an import accepts from the request body. Anything else is dropped.
const IMPORT_PARAMS: [&str; 4] = [
    "skip_existing_layers",
    "overwrite_existing_layer",
    "store_spatial_files",
    "title",
];

#[async_trait]
pub trait ImportHandler: Send + Sync {
    fn kind(&self) -> HandlerKind;

    /// Lowercase extensions accepted as `base_file`.
    fn supported_extensions(&self) -> &'static [&'static str];

    fn can_handle(&self, files: &UploadFiles) -> bool {
        files
            .get(BASE_FILE_KEY)
            .and_then(|p| extension_of(p))
            .map(|ext| self.supported_extensions().contains(&ext.as_str()))
            .unwrap_or(false)
    }

    /// Format checks only, no admission control.
    async fn validate_format(&self, files: &UploadFiles) -> UploadResult<()>;

    /// Full validation: the user's parallelism limit first, then the format.
    async fn is_valid(
        &self,
        files: &UploadFiles,
        user: &str,
        limits: &UploadLimitValidator,
    ) -> UploadResult<()> {
        limits.validate_parallelism_limit_per_user(user).await?;
        self.validate_format(files).await
    }

    fn can_do(&self, action: ImportAction) -> bool {
        matches!(action, ImportAction::Import | ImportAction::Copy)
    }

    /// Ordered step names of `action`.
    fn tasks(&self, action: ImportAction) -> &'static [&'static str] {
        match action {
            ImportAction::Import => &IMPORT_STEPS,
            ImportAction::Copy => &COPY_STEPS,
        }
    }

    /// Keep the request parameters relevant to `action`, with defaults filled in.
    fn extract_params(&self, data: &Value, action: ImportAction) -> UploadResult<Value> {
        let data = match data {
            Value::Null => Value::Object(Default::default()),
            Value::Object(_) => data.clone(),
            other => {
                return Err(UploadError::InvalidParams(format!(
                    "expected an object, got {}",
                    other
                )))
            }
        };
        match action {
            ImportAction::Import => {
                let mut params = json!({
                    "skip_existing_layers": false,
                    "overwrite_existing_layer": false,
                    "store_spatial_files": true,
                });
                for key in IMPORT_PARAMS {
                    if let Some(value) = data.get(key) {
                        params[key] = value.clone();
                    }
                }
                Ok(params)
            }
            ImportAction::Copy => {
                let resource_id = data
                    .get("resource_id")
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        UploadError::InvalidParams("copy requires a resource_id".to_string())
                    })?;
                Ok(json!({
                    "resource_id": resource_id,
                    "title": data.get("title").cloned().unwrap_or(Value::Null),
                }))
            }
        }
    }
}

/// Handlers resolved once at startup.
#[derive(Clone)]
pub struct HandlerRegistry {
    handlers: Vec<Arc<dyn ImportHandler>>,
}

impl HandlerRegistry {
    pub fn new(handlers: Vec<Arc<dyn ImportHandler>>) -> Self {
        Self { handlers }
    }

    /// Every built-in handler in resolution order.
    pub fn with_defaults() -> Self {
        let handlers = HandlerKind::ALL
            .iter()
            .map(|kind| -> Arc<dyn ImportHandler> {
                match kind {
                    HandlerKind::Shapefile => Arc::new(ShapefileHandler),
                    HandlerKind::GeoPackage => Arc::new(GeoPackageHandler),
                    HandlerKind::GeoJson => Arc::new(GeoJsonHandler),
                    HandlerKind::Kml => Arc::new(KmlHandler),
                    HandlerKind::Csv => Arc::new(CsvHandler),
                    HandlerKind::GeoTiff => Arc::new(GeoTiffHandler),
                }
            })
            .collect();
        Self { handlers }
    }

    /// First handler accepting the files.
    pub fn get_handler(&self, files: &UploadFiles) -> Option<Arc<dyn ImportHandler>> {
        self.handlers.iter().find(|h| h.can_handle(files)).cloned()
    }

    pub fn get_by_kind(&self, kind: HandlerKind) -> Option<Arc<dyn ImportHandler>> {
        self.handlers.iter().find(|h| h.kind() == kind).cloned()
    }

    pub fn supported_extensions(&self) -> Vec<&'static str> {
        self.handlers
            .iter()
            .flat_map(|h| h.supported_extensions().iter().copied())
            .collect()
    }
}

pub(crate) fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
}

pub(crate) fn base_file<'a>(
    files: &'a UploadFiles,
    invalid: fn(String) -> UploadError,
) -> UploadResult<&'a Path> {
    files
        .get(BASE_FILE_KEY)
        .map(PathBuf::as_path)
        .ok_or_else(|| invalid("base_file is missing".to_string()))
}

/// Up to `len` leading bytes of the file.
pub(crate) async fn read_prefix(path: &Path, len: usize) -> UploadResult<Vec<u8>> {
    let file = tokio::fs::File::open(path).await?;
    let mut buffer = Vec::with_capacity(len);
    file.take(len as u64).read_to_end(&mut buffer).await?;
    Ok(buffer)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub fn files(entries: &[(&str, &Path)]) -> UploadFiles {
        entries
            .iter()
            .map(|(k, p)| (k.to_string(), p.to_path_buf()))
            .collect()
    }

    pub fn write(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }
}
