use async_trait::async_trait;

use geonode_core::models::{HandlerKind, ImportAction};

use super::{
    base_file, read_prefix, ImportHandler, UploadFiles, COPY_GEONODE_RESOURCE, COPY_RASTER_FILE,
    IMPORT_STEPS, PUBLISH_RESOURCE, START_COPY,
};
use crate::error::{UploadError, UploadResult};

const TIFF_MAGIC: [[u8; 4]; 4] = [
    *b"II*\0",
    *b"MM\0*",
    // BigTIFF
    *b"II+\0",
    *b"MM\0+",
];

const RASTER_COPY_STEPS: [&str; 4] = [
    START_COPY,
    COPY_RASTER_FILE,
    PUBLISH_RESOURCE,
    COPY_GEONODE_RESOURCE,
];

/// Single-file GeoTIFF rasters. Copies duplicate the raster file instead
/// of a vector table.
pub struct GeoTiffHandler;

#[async_trait]
impl ImportHandler for GeoTiffHandler {
    fn kind(&self) -> HandlerKind {
        HandlerKind::GeoTiff
    }

    fn supported_extensions(&self) -> &'static [&'static str] {
        &["tif", "tiff", "geotiff", "geotif"]
    }

    async fn validate_format(&self, files: &UploadFiles) -> UploadResult<()> {
        let path = base_file(files, UploadError::InvalidGeoTiff)?;
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        // The layer name is derived from the stem.
        if stem.contains('.') {
            return Err(UploadError::InvalidGeoTiff(
                "Please remove the additional dots in the filename".to_string(),
            ));
        }

        let head = read_prefix(path, 4).await?;
        if !TIFF_MAGIC.iter().any(|magic| head == magic) {
            return Err(UploadError::InvalidGeoTiff(
                "the file is not a TIFF image".to_string(),
            ));
        }
        Ok(())
    }

    fn tasks(&self, action: ImportAction) -> &'static [&'static str] {
        match action {
            ImportAction::Import => &IMPORT_STEPS,
            ImportAction::Copy => &RASTER_COPY_STEPS,
        }
    }
}
