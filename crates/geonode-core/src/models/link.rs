use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::DATA_LINK_TYPE;

/// Join row between a resource and one of its assets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetLink {
    pub id: Uuid,
    pub resource_id: Uuid,
    pub asset_id: Uuid,
    pub link_type: String,
    pub name: Option<String>,
    pub extension: Option<String>,
    pub mime: Option<String>,
    pub url: Option<String>,
}

impl AssetLink {
    pub fn data(resource_id: Uuid, asset_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            resource_id,
            asset_id,
            link_type: DATA_LINK_TYPE.to_string(),
            name: None,
            extension: None,
            mime: None,
            url: None,
        }
    }
}
