use thiserror::Error;
use uuid::Uuid;

use geonode_assets::AssetError;
use geonode_core::AppError;
use geonode_storage::{DataRetrieverError, StorageError};

/// Failures of upload validation and of the execution chains.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("Invalid CSV: {0}")]
    InvalidCsv(String),

    #[error("Invalid KML: {0}")]
    InvalidKml(String),

    #[error("Invalid GeoJSON: {0}")]
    InvalidGeoJson(String),

    #[error("Invalid GeoTIFF: {0}")]
    InvalidGeoTiff(String),

    #[error("Invalid shapefile: {0}")]
    InvalidShapefile(String),

    #[error("Invalid GeoPackage: {0}")]
    InvalidGeoPackage(String),

    #[error("{0}")]
    FileUploadLimit(String),

    #[error("{0}")]
    ParallelismLimit(String),

    #[error("No handler found for this type of file: {0}")]
    HandlerNotFound(String),

    #[error("The {handler} handler cannot perform '{action}'")]
    UnsupportedAction { handler: String, action: String },

    #[error("Execution request {0} not found")]
    ExecutionNotFound(Uuid),

    #[error("Resource {0} not found")]
    ResourceNotFound(Uuid),

    #[error("Resource {resource_id} belongs to another user")]
    NotResourceOwner { resource_id: Uuid },

    #[error("Limit '{0}' is protected and cannot be deleted")]
    ProtectedLimit(String),

    #[error("Invalid limit: {0}")]
    InvalidLimit(String),

    #[error("Invalid execution parameters: {0}")]
    InvalidParams(String),

    #[error("Spatial backend error: {0}")]
    Backend(#[source] anyhow::Error),

    #[error("Task queue error: {0}")]
    Queue(#[source] anyhow::Error),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Retriever(#[from] DataRetrieverError),

    #[error(transparent)]
    Asset(#[from] AssetError),

    #[error(transparent)]
    Repository(#[from] AppError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl UploadError {
    /// Format validation failures, reported to the client as `invalid_upload`.
    pub fn is_invalid_file(&self) -> bool {
        matches!(
            self,
            UploadError::InvalidCsv(_)
                | UploadError::InvalidKml(_)
                | UploadError::InvalidGeoJson(_)
                | UploadError::InvalidGeoTiff(_)
                | UploadError::InvalidShapefile(_)
                | UploadError::InvalidGeoPackage(_)
        )
    }
}

impl From<UploadError> for AppError {
    fn from(err: UploadError) -> Self {
        if err.is_invalid_file() {
            return AppError::InvalidUpload(err.to_string());
        }
        match err {
            UploadError::FileUploadLimit(msg) => AppError::FileUploadLimit(msg),
            UploadError::ParallelismLimit(msg) => AppError::UploadParallelismLimit(msg),
            UploadError::HandlerNotFound(msg) => AppError::HandlerNotFound(msg),
            UploadError::UnsupportedAction { .. }
            | UploadError::ProtectedLimit(_)
            | UploadError::InvalidLimit(_)
            | UploadError::InvalidParams(_) => AppError::BadRequest(err.to_string()),
            UploadError::ExecutionNotFound(_) | UploadError::ResourceNotFound(_) => {
                AppError::NotFound(err.to_string())
            }
            UploadError::NotResourceOwner { .. } => AppError::Forbidden(err.to_string()),
            UploadError::Storage(e) => e.into(),
            UploadError::Retriever(e) => e.into(),
            UploadError::Asset(e) => e.into(),
            UploadError::Repository(e) => e,
            UploadError::Backend(source) | UploadError::Queue(source) => AppError::InternalWithSource {
                message: source.to_string(),
                source,
            },
            other => AppError::Internal(other.to_string()),
        }
    }
}

pub type UploadResult<T> = Result<T, UploadError>;

#[cfg(test)]
mod tests {
    use super::*;
    use geonode_core::ErrorMetadata;

    #[test]
    fn validation_errors_map_to_invalid_upload() {
        let app: AppError = UploadError::InvalidCsv("Not enough geometry field are set".into()).into();
        assert_eq!(app.error_code(), "invalid_upload");
        assert_eq!(app.http_status_code(), 400);
    }

    #[test]
    fn limit_errors_keep_their_codes() {
        let app: AppError = UploadError::FileUploadLimit("too big".into()).into();
        assert_eq!(app.error_code(), "upload_exceeds_limit_error");
        let app: AppError = UploadError::ParallelismLimit("too many".into()).into();
        assert_eq!(app.error_code(), "upload_parallelism_limit_exceeded");
    }
}
