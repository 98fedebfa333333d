//! Asset metadata, downloads and links.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use utoipa::IntoParams;
use uuid::Uuid;

use geonode_assets::AssetHandler;
use geonode_core::models::{Asset, AssetResponse};
use geonode_core::AppError;

use crate::auth::CallerIdentity;
use crate::error::{ErrorResponse, HttpAppError};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct DownloadQuery {
    /// Send `Content-Disposition: attachment` (default true)
    pub attachment: Option<bool>,
    /// File name of the zip built for multi-file assets
    pub basename: Option<String>,
}

async fn load_asset(
    state: &AppState,
    id: Uuid,
) -> Result<(Asset, Arc<dyn AssetHandler>), HttpAppError> {
    let asset = state
        .repos
        .assets
        .get(id)
        .await?
        .ok_or_else(|| HttpAppError(AppError::NotFound(format!("Asset {} not found", id))))?;
    let handler = state.assets.get_handler(&asset).ok_or_else(|| {
        HttpAppError(AppError::Internal(format!(
            "No handler registered for asset kind {}",
            asset.tag()
        )))
    })?;
    Ok((asset, handler))
}

async fn download(
    state: &AppState,
    id: Uuid,
    query: DownloadQuery,
    path: Option<String>,
) -> Result<Response, HttpAppError> {
    let (asset, handler) = load_asset(state, id).await?;
    let download = handler
        .download_handler()
        .create_response(
            &asset,
            query.attachment.unwrap_or(true),
            query.basename.as_deref(),
            path.as_deref(),
        )
        .await?;

    tracing::info!(asset_id = %id, file_name = %download.file_name, "Asset download started");
    let mut response = Response::new(Body::from_stream(download.body));
    *response.headers_mut() = download.headers;
    Ok(response)
}

#[utoipa::path(
    get,
    path = "/api/v2/assets/{id}",
    tag = "assets",
    params(("id" = Uuid, Path, description = "Asset ID")),
    responses(
        (status = 200, description = "Asset", body = AssetResponse),
        (status = 404, description = "Asset not found", body = ErrorResponse)
    )
)]
pub async fn get_asset(
    State(state): State<Arc<AppState>>,
    _caller: CallerIdentity,
    Path(id): Path<Uuid>,
) -> Result<Json<AssetResponse>, HttpAppError> {
    let (asset, _) = load_asset(&state, id).await?;
    Ok(Json(asset.into()))
}

#[utoipa::path(
    get,
    path = "/api/v2/assets/{id}/download",
    tag = "assets",
    params(("id" = Uuid, Path, description = "Asset ID"), DownloadQuery),
    responses(
        (status = 200, description = "File content, or a zip of every file of the asset"),
        (status = 404, description = "Asset or file not found", body = ErrorResponse)
    )
)]
pub async fn download_asset(
    State(state): State<Arc<AppState>>,
    _caller: CallerIdentity,
    Path(id): Path<Uuid>,
    Query(query): Query<DownloadQuery>,
) -> Result<Response, HttpAppError> {
    download(&state, id, query, None).await
}

#[utoipa::path(
    get,
    path = "/api/v2/assets/{id}/download/{path}",
    tag = "assets",
    params(
        ("id" = Uuid, Path, description = "Asset ID"),
        ("path" = String, Path, description = "File or folder inside the asset"),
        DownloadQuery
    ),
    responses(
        (status = 200, description = "File content"),
        (status = 400, description = "Path escapes the asset folder", body = ErrorResponse),
        (status = 404, description = "Asset or file not found", body = ErrorResponse)
    )
)]
pub async fn download_asset_path(
    State(state): State<Arc<AppState>>,
    _caller: CallerIdentity,
    Path((id, path)): Path<(Uuid, String)>,
    Query(query): Query<DownloadQuery>,
) -> Result<Response, HttpAppError> {
    download(&state, id, query, Some(path)).await
}

#[utoipa::path(
    get,
    path = "/api/v2/assets/{id}/link",
    tag = "assets",
    params(("id" = Uuid, Path, description = "Asset ID")),
    responses(
        (status = 302, description = "Redirect to the download URL"),
        (status = 404, description = "Asset not found", body = ErrorResponse)
    )
)]
pub async fn asset_link(
    State(state): State<Arc<AppState>>,
    _caller: CallerIdentity,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, HttpAppError> {
    let (asset, handler) = load_asset(&state, id).await?;
    let url = handler.create_download_url(&asset);
    Ok((StatusCode::FOUND, [(header::LOCATION, url)]))
}
