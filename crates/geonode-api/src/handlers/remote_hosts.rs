//! Allowlist of hosts remote file references may point to.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use geonode_core::AppError;

use crate::auth::CallerIdentity;
use crate::error::{ErrorResponse, HttpAppError, ValidatedJson};
use crate::state::AppState;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RemoteHost {
    pub host: String,
}

#[utoipa::path(
    get,
    path = "/api/v2/remote-hosts",
    tag = "remote-hosts",
    responses((status = 200, description = "Allowed hosts; empty allows every host", body = Vec<RemoteHost>))
)]
pub async fn list_hosts(
    State(state): State<Arc<AppState>>,
    _caller: CallerIdentity,
) -> Json<Vec<RemoteHost>> {
    let hosts = state.remote_hosts.hosts().await;
    Json(hosts.into_iter().map(|host| RemoteHost { host }).collect())
}

#[utoipa::path(
    post,
    path = "/api/v2/remote-hosts",
    tag = "remote-hosts",
    request_body = RemoteHost,
    responses(
        (status = 201, description = "Host allowed", body = RemoteHost),
        (status = 400, description = "Empty host", body = ErrorResponse)
    )
)]
pub async fn add_host(
    State(state): State<Arc<AppState>>,
    _caller: CallerIdentity,
    ValidatedJson(request): ValidatedJson<RemoteHost>,
) -> Result<(StatusCode, Json<RemoteHost>), HttpAppError> {
    let host = request.host.trim().to_ascii_lowercase();
    if host.is_empty() {
        return Err(HttpAppError(AppError::InvalidInput("host must not be empty".to_string())));
    }
    state.remote_hosts.register(&host).await;
    tracing::info!(host = %host, "Remote host allowed");
    Ok((StatusCode::CREATED, Json(RemoteHost { host })))
}

#[utoipa::path(
    delete,
    path = "/api/v2/remote-hosts/{host}",
    tag = "remote-hosts",
    params(("host" = String, Path, description = "Host name")),
    responses(
        (status = 204, description = "Host removed"),
        (status = 404, description = "Host was not allowed", body = ErrorResponse)
    )
)]
pub async fn remove_host(
    State(state): State<Arc<AppState>>,
    _caller: CallerIdentity,
    Path(host): Path<String>,
) -> Result<StatusCode, HttpAppError> {
    if state.remote_hosts.unregister(&host).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(HttpAppError(AppError::NotFound(format!("Host {} is not allowed", host))))
    }
}
