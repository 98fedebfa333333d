use async_trait::async_trait;

use geonode_core::models::HandlerKind;

use super::{base_file, read_prefix, ImportHandler, UploadFiles};
use crate::error::{UploadError, UploadResult};

/// Big-endian file code opening every `.shp` main file.
const SHP_FILE_CODE: [u8; 4] = [0x00, 0x00, 0x27, 0x0a];

const REQUIRED_SIDECARS: [&str; 2] = ["dbf_file", "shx_file"];

/// ESRI shapefiles. Sidecars come either as separate upload fields or from
/// the expanded zip archive.
pub struct ShapefileHandler;

#[async_trait]
impl ImportHandler for ShapefileHandler {
    fn kind(&self) -> HandlerKind {
        HandlerKind::Shapefile
    }

    fn supported_extensions(&self) -> &'static [&'static str] {
        &["shp"]
    }

    async fn validate_format(&self, files: &UploadFiles) -> UploadResult<()> {
        let path = base_file(files, UploadError::InvalidShapefile)?;
        let missing: Vec<&str> = REQUIRED_SIDECARS
            .iter()
            .copied()
            .filter(|key| !files.contains_key(*key))
            .collect();
        if !missing.is_empty() {
            return Err(UploadError::InvalidShapefile(format!(
                "missing required files: {}",
                missing.join(", ")
            )));
        }

        if read_prefix(path, 4).await? != SHP_FILE_CODE {
            return Err(UploadError::InvalidShapefile(
                "the .shp file has an invalid header".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{files, write};
    use super::*;

    #[tokio::test]
    async fn requires_dbf_and_shx() {
        let dir = tempfile::tempdir().unwrap();
        let shp = write(dir.path(), "roads.shp", &[0x00, 0x00, 0x27, 0x0a, 0x00]);
        let dbf = write(dir.path(), "roads.dbf", b"dbf");
        let shx = write(dir.path(), "roads.shx", b"shx");

        let err = ShapefileHandler
            .validate_format(&files(&[("base_file", &shp), ("dbf_file", &dbf)]))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("shx_file"));

        ShapefileHandler
            .validate_format(&files(&[
                ("base_file", &shp),
                ("dbf_file", &dbf),
                ("shx_file", &shx),
            ]))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn checks_file_code() {
        let dir = tempfile::tempdir().unwrap();
        let shp = write(dir.path(), "roads.shp", b"PK\x03\x04");
        let dbf = write(dir.path(), "roads.dbf", b"dbf");
        let shx = write(dir.path(), "roads.shx", b"shx");
        assert!(matches!(
            ShapefileHandler
                .validate_format(&files(&[
                    ("base_file", &shp),
                    ("dbf_file", &dbf),
                    ("shx_file", &shx),
                ]))
                .await,
            Err(UploadError::InvalidShapefile(_))
        ));
    }
}
