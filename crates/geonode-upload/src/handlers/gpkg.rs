use async_trait::async_trait;

use geonode_core::models::HandlerKind;

use super::{base_file, read_prefix, ImportHandler, UploadFiles};
use crate::error::{UploadError, UploadResult};

const SQLITE_HEADER: &[u8; 16] = b"SQLite format 3\0";

pub struct GeoPackageHandler;

#[async_trait]
impl ImportHandler for GeoPackageHandler {
    fn kind(&self) -> HandlerKind {
        HandlerKind::GeoPackage
    }

    fn supported_extensions(&self) -> &'static [&'static str] {
        &["gpkg"]
    }

    async fn validate_format(&self, files: &UploadFiles) -> UploadResult<()> {
        let path = base_file(files, UploadError::InvalidGeoPackage)?;
        if read_prefix(path, SQLITE_HEADER.len()).await? != SQLITE_HEADER {
            return Err(UploadError::InvalidGeoPackage(
                "the file is not an SQLite database".to_string(),
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
    async fn checks_sqlite_header() {
        let dir = tempfile::tempdir().unwrap();
        let mut content = SQLITE_HEADER.to_vec();
        content.extend_from_slice(&[0u8; 84]);
        let good = write(dir.path(), "parcels.gpkg", &content);
        GeoPackageHandler
            .validate_format(&files(&[("base_file", &good)]))
            .await
            .unwrap();

        let bad = write(dir.path(), "parcels2.gpkg", b"SQLite format 2\0");
        assert!(GeoPackageHandler
            .validate_format(&files(&[("base_file", &bad)]))
            .await
            .is_err());
    }
}
