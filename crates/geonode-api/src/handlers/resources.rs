use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;
use utoipa::ToSchema;
use uuid::Uuid;

use geonode_core::AppError;

use crate::auth::CallerIdentity;
use crate::error::{ErrorResponse, HttpAppError, ValidatedJson};
use crate::handlers::uploads::ExecutionAccepted;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct CopyResourceRequest {
    /// Title of the copy; defaults to "<title> - copy"
    pub title: Option<String>,
}

#[utoipa::path(
    post,
    path = "/api/v2/resources/{id}/copy",
    tag = "resources",
    request_body = CopyResourceRequest,
    params(("id" = Uuid, Path, description = "Resource ID")),
    responses(
        (status = 201, description = "Copy started", body = ExecutionAccepted),
        (status = 400, description = "Limit exceeded or no handler recorded", body = ErrorResponse),
        (status = 404, description = "Resource not found", body = ErrorResponse)
    )
)]
#[tracing::instrument(skip(state, request), fields(user = %user))]
pub async fn copy_resource(
    State(state): State<Arc<AppState>>,
    CallerIdentity(user): CallerIdentity,
    Path(id): Path<Uuid>,
    ValidatedJson(request): ValidatedJson<CopyResourceRequest>,
) -> Result<impl IntoResponse, HttpAppError> {
    let submitted = state
        .orchestrator
        .copy_resource(&user, id, json!({ "title": request.title }))
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(ExecutionAccepted::ready(submitted.execution_id)),
    ))
}

#[utoipa::path(
    delete,
    path = "/api/v2/resources/{id}",
    tag = "resources",
    params(("id" = Uuid, Path, description = "Resource ID")),
    responses(
        (status = 204, description = "Resource deleted"),
        (status = 403, description = "Resource belongs to another user", body = ErrorResponse),
        (status = 404, description = "Resource not found", body = ErrorResponse)
    )
)]
pub async fn delete_resource(
    State(state): State<Arc<AppState>>,
    CallerIdentity(user): CallerIdentity,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, HttpAppError> {
    let resource = state
        .repos
        .resources
        .get_resource(id)
        .await?
        .ok_or_else(|| HttpAppError(AppError::NotFound(format!("Resource {} not found", id))))?;
    if resource.owner != user {
        return Err(HttpAppError(AppError::Forbidden(
            "You do not have permission to delete this resource".to_string(),
        )));
    }
    state.orchestrator.delete_resource(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
