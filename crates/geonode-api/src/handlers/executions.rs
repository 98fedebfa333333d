use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};
use uuid::Uuid;

use geonode_core::models::ExecutionRequestResponse;
use geonode_core::AppError;

use crate::auth::CallerIdentity;
use crate::error::{ErrorResponse, HttpAppError};
use crate::state::AppState;

#[utoipa::path(
    get,
    path = "/api/v2/executionrequest/{id}",
    tag = "executions",
    params(
        ("id" = Uuid, Path, description = "Execution request ID"),
        ("x-user-id" = String, Header, description = "Authenticated user")
    ),
    responses(
        (status = 200, description = "Execution status", body = ExecutionRequestResponse),
        (status = 403, description = "Execution belongs to another user", body = ErrorResponse),
        (status = 404, description = "Execution not found", body = ErrorResponse)
    )
)]
pub async fn get_execution(
    State(state): State<Arc<AppState>>,
    CallerIdentity(user): CallerIdentity,
    Path(id): Path<Uuid>,
) -> Result<Json<ExecutionRequestResponse>, HttpAppError> {
    let execution = state.orchestrator.get_execution(id).await?;
    if execution.user != user {
        return Err(HttpAppError(AppError::Forbidden(
            "You do not have permission to view this execution".to_string(),
        )));
    }
    Ok(Json(execution.into()))
}

#[utoipa::path(
    get,
    path = "/api/v2/executionrequest",
    tag = "executions",
    params(("x-user-id" = String, Header, description = "Authenticated user")),
    responses(
        (status = 200, description = "Executions of the caller", body = Vec<ExecutionRequestResponse>)
    )
)]
pub async fn list_executions(
    State(state): State<Arc<AppState>>,
    CallerIdentity(user): CallerIdentity,
) -> Result<Json<Vec<ExecutionRequestResponse>>, HttpAppError> {
    let executions = state.repos.executions.list_for_user(&user).await?;
    Ok(Json(executions.into_iter().map(Into::into).collect()))
}
