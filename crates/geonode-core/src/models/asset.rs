use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::storage_types::AssetKindTag;

/// Files backing a local asset. Entries are absolute paths, either all under
/// `ASSETS_ROOT` (managed) or all outside it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalAsset {
    pub location: Vec<String>,
}

/// Kind-specific payload of an asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum AssetKind {
    Local(LocalAsset),
}

impl AssetKind {
    pub fn tag(&self) -> AssetKindTag {
        match self {
            AssetKind::Local(_) => AssetKindTag::Local,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Asset {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub asset_type: String,
    pub owner: String,
    pub created: DateTime<Utc>,
    pub kind: AssetKind,
}

impl Asset {
    pub fn new_local(
        title: impl Into<String>,
        description: Option<String>,
        asset_type: impl Into<String>,
        owner: impl Into<String>,
        location: Vec<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            description,
            asset_type: asset_type.into(),
            owner: owner.into(),
            created: Utc::now(),
            kind: AssetKind::Local(LocalAsset { location }),
        }
    }

    pub fn tag(&self) -> AssetKindTag {
        self.kind.tag()
    }

    /// Backing file paths, in insertion order.
    pub fn location(&self) -> &[String] {
        match &self.kind {
            AssetKind::Local(local) => &local.location,
        }
    }

    pub fn set_location(&mut self, location: Vec<String>) {
        match &mut self.kind {
            AssetKind::Local(local) => local.location = location,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AssetResponse {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub asset_type: String,
    pub owner: String,
    pub kind: String,
    pub files: Vec<String>,
    pub created: DateTime<Utc>,
}

impl From<Asset> for AssetResponse {
    fn from(asset: Asset) -> Self {
        let kind = asset.tag().to_string();
        let files = asset
            .location()
            .iter()
            .filter_map(|p| {
                std::path::Path::new(p)
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
            })
            .collect();
        AssetResponse {
            id: asset.id,
            title: asset.title,
            description: asset.description,
            asset_type: asset.asset_type,
            owner: asset.owner,
            kind,
            files,
            created: asset.created,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_serializes_with_discriminant() {
        let asset = Asset::new_local(
            "roads",
            None,
            "original",
            "alice",
            vec!["/data/assets/x/roads.shp".to_string()],
        );
        let json = serde_json::to_value(&asset.kind).unwrap();
        assert_eq!(json["kind"], "local");
        assert_eq!(json["location"][0], "/data/assets/x/roads.shp");
        assert_eq!(asset.tag(), AssetKindTag::Local);
    }

    #[test]
    fn response_exposes_basenames_only() {
        let asset = Asset::new_local(
            "grid",
            Some("dem".to_string()),
            "original",
            "bob",
            vec!["/data/assets/2024/test_grid.tif".to_string()],
        );
        let response = AssetResponse::from(asset);
        assert_eq!(response.files, vec!["test_grid.tif".to_string()]);
        assert_eq!(response.kind, "local");
    }
}
