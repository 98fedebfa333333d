use std::collections::HashMap;
use std::sync::Arc;

use geonode_core::models::Asset;
use geonode_core::{AssetKindTag, Config};
use geonode_db::AssetRepository;

use crate::error::{AssetError, AssetResult};
use crate::handler::AssetHandler;
use crate::local::LocalAssetHandler;

/// Handlers keyed by asset kind, fixed after construction.
#[derive(Clone)]
pub struct AssetHandlerRegistry {
    handlers: HashMap<AssetKindTag, Arc<dyn AssetHandler>>,
    default: Arc<dyn AssetHandler>,
}

impl AssetHandlerRegistry {
    pub fn new(handlers: Vec<Arc<dyn AssetHandler>>, default: AssetKindTag) -> AssetResult<Self> {
        let handlers: HashMap<_, _> = handlers.into_iter().map(|h| (h.kind(), h)).collect();
        let default = handlers
            .get(&default)
            .cloned()
            .ok_or(AssetError::HandlerNotFound(default))?;
        Ok(Self { handlers, default })
    }

    /// One handler per kind listed in `ASSET_HANDLERS`.
    pub fn from_config(config: &Config, repository: Arc<dyn AssetRepository>) -> AssetResult<Self> {
        let handlers = config
            .asset_handlers()
            .iter()
            .map(|kind| -> Arc<dyn AssetHandler> {
                match kind {
                    AssetKindTag::Local => {
                        Arc::new(LocalAssetHandler::new(config.assets_root(), repository.clone()))
                    }
                }
            })
            .collect();
        let registry = Self::new(handlers, config.default_asset_handler())?;
        tracing::info!(
            kinds = ?registry.kinds(),
            default = %registry.default.kind(),
            "Asset handlers registered"
        );
        Ok(registry)
    }

    /// Handler for the asset's kind; `None` (with a warning) when that kind
    /// is not enabled.
    pub fn get_handler(&self, asset: &Asset) -> Option<Arc<dyn AssetHandler>> {
        let handler = self.get_handler_by_kind(asset.tag());
        if handler.is_none() {
            tracing::warn!(asset_id = %asset.id, kind = %asset.tag(), "No asset handler registered");
        }
        handler
    }

    pub fn get_handler_by_kind(&self, kind: AssetKindTag) -> Option<Arc<dyn AssetHandler>> {
        self.handlers.get(&kind).cloned()
    }

    pub fn default_handler(&self) -> Arc<dyn AssetHandler> {
        self.default.clone()
    }

    pub fn kinds(&self) -> Vec<AssetKindTag> {
        let mut kinds: Vec<_> = self.handlers.keys().copied().collect();
        kinds.sort_by_key(|k| k.to_string());
        kinds
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geonode_db::InMemoryAssetRepository;

    #[test]
    fn default_must_be_registered() {
        assert!(matches!(
            AssetHandlerRegistry::new(vec![], AssetKindTag::Local),
            Err(AssetError::HandlerNotFound(AssetKindTag::Local))
        ));
    }

    #[test]
    fn resolves_handler_by_asset_kind() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::local(dir.path().join("assets"), dir.path().join("media"));
        let registry =
            AssetHandlerRegistry::from_config(&config, Arc::new(InMemoryAssetRepository::new()))
                .unwrap();

        let asset = Asset::new_local("a", None, "original", "alice", vec!["/x/a.csv".into()]);
        let handler = registry.get_handler(&asset).unwrap();
        assert_eq!(handler.kind(), AssetKindTag::Local);
        assert_eq!(registry.default_handler().kind(), AssetKindTag::Local);
        assert_eq!(registry.kinds(), vec![AssetKindTag::Local]);
    }
}
