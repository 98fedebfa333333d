use std::io::Read;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use geonode_core::models::HandlerKind;

use super::{base_file, extension_of, read_prefix, ImportHandler, UploadFiles};
use crate::error::{UploadError, UploadResult};

/// Bytes scanned for the root element; prologs and comments fit well within.
const ROOT_SCAN_LEN: usize = 64 * 1024;

/// KML documents, plain or zipped as KMZ.
pub struct KmlHandler;

/// Local name of the first element, skipping the XML declaration,
/// processing instructions, comments and the doctype.
fn root_element(xml: &str) -> Option<&str> {
    let mut rest = xml.trim_start_matches('\u{feff}');
    loop {
        rest = rest.trim_start();
        if let Some(after) = rest.strip_prefix("<?") {
            rest = &after[after.find("?>")? + 2..];
        } else if let Some(after) = rest.strip_prefix("<!--") {
            rest = &after[after.find("-->")? + 3..];
        } else if let Some(after) = rest.strip_prefix("<!") {
            rest = &after[after.find('>')? + 1..];
        } else if let Some(after) = rest.strip_prefix('<') {
            let end = after
                .find(|c: char| c.is_whitespace() || c == '>' || c == '/')
                .unwrap_or(after.len());
            let name = &after[..end];
            return Some(name.rsplit(':').next().unwrap_or(name));
        } else {
            return None;
        }
    }
}

fn check_root(xml: &str) -> UploadResult<()> {
    match root_element(xml) {
        Some(root) if root.eq_ignore_ascii_case("kml") => Ok(()),
        Some(root) => Err(UploadError::InvalidKml(format!(
            "the root element is '{}', expected 'kml'",
            root
        ))),
        None => Err(UploadError::InvalidKml(
            "the file is not an XML document".to_string(),
        )),
    }
}

/// Head of the first `.kml` entry of a KMZ archive.
fn read_kmz_document(path: PathBuf) -> UploadResult<String> {
    let file = std::fs::File::open(&path)?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|e| UploadError::InvalidKml(format!("the KMZ is not a zip archive: {}", e)))?;
    let index = (0..archive.len())
        .find(|&i| {
            archive
                .by_index(i)
                .map(|f| f.name().to_ascii_lowercase().ends_with(".kml"))
                .unwrap_or(false)
        })
        .ok_or_else(|| UploadError::InvalidKml("the KMZ contains no .kml document".to_string()))?;
    let entry = archive
        .by_index(index)
        .map_err(|e| UploadError::InvalidKml(e.to_string()))?;
    let mut head = Vec::new();
    entry.take(ROOT_SCAN_LEN as u64).read_to_end(&mut head)?;
    Ok(String::from_utf8_lossy(&head).into_owned())
}

impl KmlHandler {
    async fn document_head(path: &Path) -> UploadResult<String> {
        if extension_of(path).as_deref() == Some("kmz") {
            let path = path.to_path_buf();
            return tokio::task::spawn_blocking(move || read_kmz_document(path))
                .await
                .map_err(|e| UploadError::InvalidKml(e.to_string()))?;
        }
        let head = read_prefix(path, ROOT_SCAN_LEN).await?;
        Ok(String::from_utf8_lossy(&head).into_owned())
    }
}

#[async_trait]
impl ImportHandler for KmlHandler {
    fn kind(&self) -> HandlerKind {
        HandlerKind::Kml
    }

    fn supported_extensions(&self) -> &'static [&'static str] {
        &["kml", "kmz"]
    }

    async fn validate_format(&self, files: &UploadFiles) -> UploadResult<()> {
        let path = base_file(files, UploadError::InvalidKml)?;
        let head = Self::document_head(path).await?;
        check_root(&head)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{files, write};
    use super::*;
    use std::io::Write;

    const DOC: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!-- exported -->
<kml xmlns="http://www.opengis.net/kml/2.2"><Document/></kml>"#;

    #[test]
    fn finds_root_element() {
        assert_eq!(root_element(DOC), Some("kml"));
        assert_eq!(root_element("<kml:kml xmlns:kml=\"x\"/>"), Some("kml"));
        assert_eq!(root_element("<gpx version=\"1.1\">"), Some("gpx"));
        assert_eq!(root_element("not xml"), None);
    }

    #[tokio::test]
    async fn validates_plain_kml() {
        let dir = tempfile::tempdir().unwrap();
        let good = write(dir.path(), "doc.kml", DOC.as_bytes());
        KmlHandler
            .validate_format(&files(&[("base_file", &good)]))
            .await
            .unwrap();

        let gpx = write(dir.path(), "track.kml", b"<gpx></gpx>");
        let err = KmlHandler
            .validate_format(&files(&[("base_file", &gpx)]))
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::InvalidKml(_)));
    }

    #[tokio::test]
    async fn validates_kmz_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.kmz");
        {
            let mut zip = zip::ZipWriter::new(std::fs::File::create(&path).unwrap());
            zip.start_file("doc.kml", zip::write::FileOptions::default())
                .unwrap();
            zip.write_all(DOC.as_bytes()).unwrap();
            zip.finish().unwrap();
        }
        KmlHandler
            .validate_format(&files(&[("base_file", &path)]))
            .await
            .unwrap();

        let not_zip = write(dir.path(), "broken.kmz", DOC.as_bytes());
        assert!(KmlHandler
            .validate_format(&files(&[("base_file", &not_zip)]))
            .await
            .is_err());
    }
}
