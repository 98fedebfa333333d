//! Administration of the upload size and parallelism limits.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use utoipa::ToSchema;

use geonode_core::models::{UploadParallelismLimit, UploadSizeLimit};
use geonode_core::AppError;

use crate::auth::CallerIdentity;
use crate::error::{ErrorResponse, HttpAppError, ValidatedJson};
use crate::state::AppState;

#[derive(Debug, Deserialize, ToSchema)]
pub struct SizeLimitUpdate {
    pub max_size: u64,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ParallelismLimitUpdate {
    pub max_number: u32,
    pub description: Option<String>,
}

#[utoipa::path(
    get,
    path = "/api/v2/upload-size-limits",
    tag = "limits",
    responses((status = 200, description = "Size limits", body = Vec<UploadSizeLimit>))
)]
pub async fn list_size_limits(
    State(state): State<Arc<AppState>>,
    _caller: CallerIdentity,
) -> Result<Json<Vec<UploadSizeLimit>>, HttpAppError> {
    Ok(Json(state.limits.list_size_limits().await?))
}

#[utoipa::path(
    put,
    path = "/api/v2/upload-size-limits/{slug}",
    tag = "limits",
    request_body = SizeLimitUpdate,
    params(("slug" = String, Path, description = "Limit slug")),
    responses(
        (status = 200, description = "Limit stored", body = UploadSizeLimit),
        (status = 400, description = "Limit violates the handler safety factor", body = ErrorResponse)
    )
)]
pub async fn put_size_limit(
    State(state): State<Arc<AppState>>,
    _caller: CallerIdentity,
    Path(slug): Path<String>,
    ValidatedJson(update): ValidatedJson<SizeLimitUpdate>,
) -> Result<Json<UploadSizeLimit>, HttpAppError> {
    let limit = UploadSizeLimit::new(slug, update.description.as_deref(), update.max_size);
    Ok(Json(state.limits.update_size_limit(limit).await?))
}

#[utoipa::path(
    delete,
    path = "/api/v2/upload-size-limits/{slug}",
    tag = "limits",
    params(("slug" = String, Path, description = "Limit slug")),
    responses(
        (status = 204, description = "Limit deleted"),
        (status = 400, description = "Limit is protected", body = ErrorResponse),
        (status = 404, description = "Limit not found", body = ErrorResponse)
    )
)]
pub async fn delete_size_limit(
    State(state): State<Arc<AppState>>,
    _caller: CallerIdentity,
    Path(slug): Path<String>,
) -> Result<StatusCode, HttpAppError> {
    if state.limits.delete_size_limit(&slug).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(HttpAppError(AppError::NotFound(format!("Size limit {} not found", slug))))
    }
}

#[utoipa::path(
    get,
    path = "/api/v2/upload-parallelism-limits",
    tag = "limits",
    responses((status = 200, description = "Parallelism limits", body = Vec<UploadParallelismLimit>))
)]
pub async fn list_parallelism_limits(
    State(state): State<Arc<AppState>>,
    _caller: CallerIdentity,
) -> Result<Json<Vec<UploadParallelismLimit>>, HttpAppError> {
    Ok(Json(state.limits.list_parallelism_limits().await?))
}

#[utoipa::path(
    put,
    path = "/api/v2/upload-parallelism-limits/{slug}",
    tag = "limits",
    request_body = ParallelismLimitUpdate,
    params(("slug" = String, Path, description = "Limit slug")),
    responses(
        (status = 200, description = "Limit stored", body = UploadParallelismLimit),
        (status = 400, description = "Invalid limit", body = ErrorResponse)
    )
)]
pub async fn put_parallelism_limit(
    State(state): State<Arc<AppState>>,
    _caller: CallerIdentity,
    Path(slug): Path<String>,
    ValidatedJson(update): ValidatedJson<ParallelismLimitUpdate>,
) -> Result<Json<UploadParallelismLimit>, HttpAppError> {
    let limit = UploadParallelismLimit::new(slug, update.description.as_deref(), update.max_number);
    Ok(Json(state.limits.update_parallelism_limit(limit).await?))
}

#[utoipa::path(
    delete,
    path = "/api/v2/upload-parallelism-limits/{slug}",
    tag = "limits",
    params(("slug" = String, Path, description = "Limit slug")),
    responses(
        (status = 204, description = "Limit deleted"),
        (status = 400, description = "Limit is protected", body = ErrorResponse),
        (status = 404, description = "Limit not found", body = ErrorResponse)
    )
)]
pub async fn delete_parallelism_limit(
    State(state): State<Arc<AppState>>,
    _caller: CallerIdentity,
    Path(slug): Path<String>,
) -> Result<StatusCode, HttpAppError> {
    if state.limits.delete_parallelism_limit(&slug).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(HttpAppError(AppError::NotFound(format!(
            "Parallelism limit {} not found",
            slug
        ))))
    }
}
