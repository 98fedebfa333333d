use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;

/// Published resource produced by an import.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource {
    pub id: Uuid,
    pub title: String,
    pub owner: String,
    pub resource_type: String,
    /// `vector` or `raster` for datasets.
    pub subtype: Option<String>,
    /// Workspace-qualified layer name once published.
    pub alternate: Option<String>,
    /// Spatial files kept for the resource, as returned by the storage
    /// backend (absolute paths for local storage, object names otherwise).
    #[serde(default)]
    pub files: Vec<String>,
    pub created: DateTime<Utc>,
}

impl Resource {
    pub fn dataset(title: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            owner: owner.into(),
            resource_type: "dataset".to_string(),
            subtype: None,
            alternate: None,
            files: Vec::new(),
            created: Utc::now(),
        }
    }
}

/// Import handlers known to the orchestrator, one per supported format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum HandlerKind {
    Csv,
    Kml,
    GeoJson,
    GeoTiff,
    Shapefile,
    GeoPackage,
}

impl HandlerKind {
    pub const ALL: [HandlerKind; 6] = [
        HandlerKind::Shapefile,
        HandlerKind::GeoPackage,
        HandlerKind::GeoJson,
        HandlerKind::Kml,
        HandlerKind::Csv,
        HandlerKind::GeoTiff,
    ];

    pub fn is_raster(&self) -> bool {
        matches!(self, HandlerKind::GeoTiff)
    }
}

impl Display for HandlerKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            HandlerKind::Csv => write!(f, "csv"),
            HandlerKind::Kml => write!(f, "kml"),
            HandlerKind::GeoJson => write!(f, "geojson"),
            HandlerKind::GeoTiff => write!(f, "geotiff"),
            HandlerKind::Shapefile => write!(f, "shapefile"),
            HandlerKind::GeoPackage => write!(f, "geopackage"),
        }
    }
}

impl FromStr for HandlerKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "csv" => Ok(HandlerKind::Csv),
            "kml" | "kmz" => Ok(HandlerKind::Kml),
            "geojson" => Ok(HandlerKind::GeoJson),
            "geotiff" | "tiff" => Ok(HandlerKind::GeoTiff),
            "shapefile" | "shp" => Ok(HandlerKind::Shapefile),
            "geopackage" | "gpkg" => Ok(HandlerKind::GeoPackage),
            _ => Err(anyhow::anyhow!("Invalid import handler: {}", s)),
        }
    }
}

/// Records which import handler produced a resource so later copy and
/// delete operations are routed back to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceHandlerInfo {
    pub resource_id: Uuid,
    pub handler: HandlerKind,
    pub execution_id: Option<Uuid>,
    pub kwargs: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handler_kind_round_trip() {
        for kind in HandlerKind::ALL {
            assert_eq!(kind.to_string().parse::<HandlerKind>().unwrap(), kind);
        }
        assert_eq!("gpkg".parse::<HandlerKind>().unwrap(), HandlerKind::GeoPackage);
        assert!("dxf".parse::<HandlerKind>().is_err());
    }
}
