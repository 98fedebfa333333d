//! Upload submission.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Serialize;
use serde_json::Value;
use utoipa::ToSchema;
use uuid::Uuid;

use geonode_core::models::ImportAction;
use geonode_core::AppError;
use geonode_storage::FileSource;
use geonode_upload::UploadRequest;

use crate::auth::CallerIdentity;
use crate::constants::FILE_FIELDS;
use crate::error::{ErrorResponse, HttpAppError};
use crate::state::AppState;

#[derive(Debug, Serialize, ToSchema)]
pub struct ExecutionAccepted {
    pub success: bool,
    pub status: String,
    pub execution_id: Uuid,
}

impl ExecutionAccepted {
    pub fn ready(execution_id: Uuid) -> Self {
        Self {
            success: true,
            status: "ready".to_string(),
            execution_id,
        }
    }
}

/// Form values arrive as text; booleans are the only typed parameters.
fn parse_param(value: &str) -> Value {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "on" => Value::Bool(true),
        "false" | "off" => Value::Bool(false),
        _ => Value::String(value.to_string()),
    }
}

/// Only network references are accepted from clients.
fn parse_remote_url(value: &str) -> Result<String, HttpAppError> {
    let uri = value.trim();
    let scheme = uri.split_once("://").map(|(scheme, _)| scheme.to_ascii_lowercase());
    match scheme.as_deref() {
        Some("http" | "https" | "s3" | "gs" | "gcs") => Ok(uri.to_string()),
        _ => Err(HttpAppError(AppError::BadRequest(
            "url must be an http(s), s3 or gs URI".to_string(),
        ))),
    }
}

#[utoipa::path(
    post,
    path = "/api/v2/uploads",
    tag = "uploads",
    request_body(content_type = "multipart/form-data", description = "base_file with optional sidecar files, or a url field"),
    params(("x-user-id" = String, Header, description = "Authenticated user")),
    responses(
        (status = 201, description = "Upload accepted", body = ExecutionAccepted),
        (status = 400, description = "Invalid upload or limit exceeded", body = ErrorResponse),
        (status = 401, description = "Missing identity", body = ErrorResponse),
        (status = 403, description = "Remote url points at a disallowed host", body = ErrorResponse)
    )
)]
#[tracing::instrument(skip(state, multipart), fields(user = %user))]
pub async fn create_upload(
    State(state): State<Arc<AppState>>,
    CallerIdentity(user): CallerIdentity,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, HttpAppError> {
    let limits = state.orchestrator.limits();
    let mut files = BTreeMap::new();
    let mut remote: Option<String> = None;
    let mut action = ImportAction::Import;
    let mut params = serde_json::Map::new();

    while let Some(field) = multipart.next_field().await? {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        if FILE_FIELDS.contains(&name.as_str()) {
            let file_name = field
                .file_name()
                .map(str::to_string)
                .unwrap_or_else(|| name.clone());
            let content = field.bytes().await?;
            limits.validate_max_file_size(content.len() as u64).await?;
            files.insert(
                name,
                FileSource::Uploaded {
                    name: file_name,
                    content,
                },
            );
            continue;
        }

        let value = field.text().await?;
        match name.as_str() {
            "action" => {
                action = value
                    .parse()
                    .map_err(|e: anyhow::Error| HttpAppError(AppError::BadRequest(e.to_string())))?;
            }
            "url" => remote = Some(parse_remote_url(&value)?),
            _ => {
                params.insert(name, parse_param(&value));
            }
        }
    }

    if let Some(uri) = remote {
        if files.contains_key("base_file") {
            return Err(HttpAppError(AppError::BadRequest(
                "Provide either base_file or url, not both".to_string(),
            )));
        }
        files.insert("base_file".to_string(), FileSource::RemoteUri(uri));
    }
    if files.is_empty() {
        return Err(HttpAppError(AppError::BadRequest(
            "No files were uploaded".to_string(),
        )));
    }

    let submitted = state
        .orchestrator
        .submit_upload(UploadRequest {
            user,
            action,
            files,
            params: Value::Object(params),
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(ExecutionAccepted::ready(submitted.execution_id)),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn form_values() {
        assert_eq!(parse_param("True"), Value::Bool(true));
        assert_eq!(parse_param("off"), Value::Bool(false));
        assert_eq!(parse_param("Roads"), Value::String("Roads".to_string()));
    }

    #[test]
    fn only_network_urls_are_accepted() {
        assert_eq!(
            parse_remote_url(" https://example.com/a.zip ").unwrap(),
            "https://example.com/a.zip"
        );
        assert!(parse_remote_url("s3://bucket/a.tif").is_ok());
        for local in ["/etc/passwd", "file:///etc/passwd", "FILE:///etc/passwd", "data/a.csv"] {
            assert!(parse_remote_url(local).is_err(), "{}", local);
        }
    }
}
