use async_trait::async_trait;
use serde_json::Value;

use geonode_core::models::HandlerKind;

use super::{base_file, ImportHandler, UploadFiles};
use crate::error::{UploadError, UploadResult};

const GEOJSON_TYPES: [&str; 9] = [
    "FeatureCollection",
    "Feature",
    "Point",
    "MultiPoint",
    "LineString",
    "MultiLineString",
    "Polygon",
    "MultiPolygon",
    "GeometryCollection",
];

pub struct GeoJsonHandler;

fn check_document(document: &Value) -> UploadResult<()> {
    let kind = document
        .as_object()
        .ok_or_else(|| UploadError::InvalidGeoJson("the document is not a JSON object".to_string()))?
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| UploadError::InvalidGeoJson("the 'type' member is missing".to_string()))?;
    if !GEOJSON_TYPES.contains(&kind) {
        return Err(UploadError::InvalidGeoJson(format!(
            "unsupported type '{}'",
            kind
        )));
    }
    if kind == "FeatureCollection" && !document["features"].is_array() {
        return Err(UploadError::InvalidGeoJson(
            "a FeatureCollection needs a 'features' array".to_string(),
        ));
    }
    Ok(())
}

#[async_trait]
impl ImportHandler for GeoJsonHandler {
    fn kind(&self) -> HandlerKind {
        HandlerKind::GeoJson
    }

    fn supported_extensions(&self) -> &'static [&'static str] {
        &["geojson", "json"]
    }

    async fn validate_format(&self, files: &UploadFiles) -> UploadResult<()> {
        let path = base_file(files, UploadError::InvalidGeoJson)?;
        let content = tokio::fs::read(path).await?;
        let document: Value = serde_json::from_slice(&content)
            .map_err(|e| UploadError::InvalidGeoJson(e.to_string()))?;
        check_document(&document)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{files, write};
    use super::*;
    use serde_json::json;

    #[test]
    fn document_types() {
        check_document(&json!({"type": "FeatureCollection", "features": []})).unwrap();
        check_document(&json!({"type": "Point", "coordinates": [1, 2]})).unwrap();
        assert!(check_document(&json!({"type": "FeatureCollection"})).is_err());
        assert!(check_document(&json!({"type": "Topology"})).is_err());
        assert!(check_document(&json!([1, 2])).is_err());
    }

    #[tokio::test]
    async fn rejects_malformed_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "roads.geojson", b"{\"type\": ");
        let err = GeoJsonHandler
            .validate_format(&files(&[("base_file", &path)]))
            .await
            .unwrap_err();
        assert!(err.is_invalid_file());
    }
}
