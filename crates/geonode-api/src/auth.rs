//! Caller identity.
//!
//! Authentication happens in front of this service; the authenticated user
//! name arrives in the `X-User-Id` header.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use geonode_core::AppError;

use crate::constants::USER_HEADER;
use crate::error::HttpAppError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity(pub String);

impl<S> FromRequestParts<S> for CallerIdentity
where
    S: Send + Sync,
{
    type Rejection = HttpAppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user = parts
            .headers
            .get(USER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                HttpAppError(AppError::Unauthorized(format!(
                    "Missing {} header",
                    USER_HEADER
                )))
            })?;
        Ok(CallerIdentity(user.to_string()))
    }
}
