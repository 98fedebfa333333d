//! Publishing seam towards the spatial server.
//!
//! Steps that touch GeoServer or the spatial database go through
//! [`SpatialBackend`]; the default implementation only records the calls.

use async_trait::async_trait;
use std::path::Path;
use uuid::Uuid;

use geonode_core::models::HandlerKind;

/// Outcome of loading staged files into the spatial store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportedLayer {
    /// Workspace-qualified layer name.
    pub alternate: String,
    /// Importer session the load ran in, when the backend uses one. Stored
    /// on the upload so the session sweeper can poll and clean it up.
    pub import_id: Option<i64>,
}

impl ImportedLayer {
    pub fn new(alternate: impl Into<String>) -> Self {
        Self {
            alternate: alternate.into(),
            import_id: None,
        }
    }
}

#[async_trait]
pub trait SpatialBackend: Send + Sync {
    /// Load the staged files into the spatial store.
    async fn import_resource(
        &self,
        execution_id: Uuid,
        handler: HandlerKind,
        base_file: &Path,
    ) -> anyhow::Result<ImportedLayer>;

    async fn publish_resource(&self, execution_id: Uuid, alternate: &str) -> anyhow::Result<()>;

    /// Duplicate the stored data of `alternate`; returns the new alternate.
    async fn copy_dynamic_model(&self, execution_id: Uuid, alternate: &str)
        -> anyhow::Result<String>;

    async fn delete_resource(&self, alternate: &str) -> anyhow::Result<()>;
}

/// Backend for deployments without a spatial server.
#[derive(Debug, Clone, Default)]
pub struct LoggingSpatialBackend;

/// `geonode:<stem>` with characters outside `[A-Za-z0-9_]` replaced.
pub fn alternate_for(base_file: &Path) -> String {
    let stem: String = base_file
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    format!("geonode:{}", stem.to_ascii_lowercase())
}

#[async_trait]
impl SpatialBackend for LoggingSpatialBackend {
    async fn import_resource(
        &self,
        execution_id: Uuid,
        handler: HandlerKind,
        base_file: &Path,
    ) -> anyhow::Result<ImportedLayer> {
        let alternate = alternate_for(base_file);
        tracing::info!(
            execution_id = %execution_id,
            handler = %handler,
            base_file = %base_file.display(),
            alternate = %alternate,
            "Resource imported"
        );
        Ok(ImportedLayer::new(alternate))
    }

    async fn publish_resource(&self, execution_id: Uuid, alternate: &str) -> anyhow::Result<()> {
        tracing::info!(execution_id = %execution_id, alternate = %alternate, "Resource published");
        Ok(())
    }

    async fn copy_dynamic_model(
        &self,
        execution_id: Uuid,
        alternate: &str,
    ) -> anyhow::Result<String> {
        let suffix = execution_id.simple().to_string();
        let copy = format!("{}_{}", alternate, &suffix[..8]);
        tracing::info!(execution_id = %execution_id, source = %alternate, alternate = %copy, "Model copied");
        Ok(copy)
    }

    async fn delete_resource(&self, alternate: &str) -> anyhow::Result<()> {
        tracing::info!(alternate = %alternate, "Resource removed from spatial backend");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alternate_from_file_stem() {
        assert_eq!(alternate_for(Path::new("/tmp/x/Roads 2024.shp")), "geonode:roads_2024");
        assert_eq!(alternate_for(Path::new("grid.tif")), "geonode:grid");
    }

    #[tokio::test]
    async fn copies_get_a_new_alternate() {
        let backend = LoggingSpatialBackend;
        let exec = Uuid::new_v4();
        let copy = backend.copy_dynamic_model(exec, "geonode:roads").await.unwrap();
        assert!(copy.starts_with("geonode:roads_"));
        assert_ne!(copy, "geonode:roads");
    }
}
