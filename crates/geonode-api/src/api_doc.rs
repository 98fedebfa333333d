//! OpenAPI documentation, served at `/api/v2/openapi.json`.

use utoipa::OpenApi;

use crate::error;
use crate::handlers;
use geonode_core::models;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "GeoNode Upload API",
        version = "0.1.0",
        description = "Upload orchestration for geospatial datasets: file staging, format validation, admission limits, asynchronous import and copy executions, and asset downloads. Versioned endpoints live under /api/v2/."
    ),
    paths(
        handlers::health::health,
        // Uploads and executions
        handlers::uploads::create_upload,
        handlers::executions::get_execution,
        handlers::executions::list_executions,
        // Resources
        handlers::resources::copy_resource,
        handlers::resources::delete_resource,
        // Assets
        handlers::assets::get_asset,
        handlers::assets::download_asset,
        handlers::assets::download_asset_path,
        handlers::assets::asset_link,
        // Limits
        handlers::limits::list_size_limits,
        handlers::limits::put_size_limit,
        handlers::limits::delete_size_limit,
        handlers::limits::list_parallelism_limits,
        handlers::limits::put_parallelism_limit,
        handlers::limits::delete_parallelism_limit,
        // Remote hosts
        handlers::remote_hosts::list_hosts,
        handlers::remote_hosts::add_host,
        handlers::remote_hosts::remove_host,
    ),
    components(
        schemas(
            error::ErrorResponse,
            handlers::health::HealthResponse,
            handlers::uploads::ExecutionAccepted,
            handlers::resources::CopyResourceRequest,
            handlers::limits::SizeLimitUpdate,
            handlers::limits::ParallelismLimitUpdate,
            handlers::remote_hosts::RemoteHost,
            models::ExecutionRequestResponse,
            models::ExecutionStatus,
            models::ImportAction,
            models::HandlerKind,
            models::AssetResponse,
            models::UploadSizeLimit,
            models::UploadParallelismLimit,
        )
    ),
    tags(
        (name = "health", description = "Liveness"),
        (name = "uploads", description = "Dataset uploads"),
        (name = "executions", description = "Execution request status"),
        (name = "resources", description = "Resource copy and deletion"),
        (name = "assets", description = "Asset metadata and downloads"),
        (name = "limits", description = "Upload size and parallelism limits"),
        (name = "remote-hosts", description = "Allowed hosts for remote file references"),
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_route_is_documented() {
        let doc = ApiDoc::openapi();
        for path in [
            "/health",
            "/api/v2/uploads",
            "/api/v2/executionrequest/{id}",
            "/api/v2/assets/{id}/link",
            "/api/v2/upload-size-limits/{slug}",
            "/api/v2/remote-hosts",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {}", path);
        }
    }
}
