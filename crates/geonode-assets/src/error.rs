use thiserror::Error;

use geonode_core::{AppError, AssetKindTag};
use geonode_storage::StorageError;

#[derive(Debug, Error)]
pub enum AssetError {
    #[error("At least one file is needed to create an asset")]
    NoFiles,

    #[error("Asset files are partly managed and partly external: {0:?}")]
    MixedManagement(Vec<String>),

    #[error("Asset has no files")]
    EmptyAsset,

    #[error("Invalid path '{0}'")]
    PathTraversal(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("No handler registered for asset kind '{0}'")]
    HandlerNotFound(AssetKindTag),

    #[error("Archive error: {0}")]
    Archive(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Repository(#[from] AppError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<AssetError> for AppError {
    fn from(err: AssetError) -> Self {
        match err {
            AssetError::NoFiles => AppError::InvalidInput(err.to_string()),
            AssetError::PathTraversal(path) => {
                AppError::Forbidden(format!("Access to '{}' is not allowed", path))
            }
            AssetError::FileNotFound(_) | AssetError::EmptyAsset => {
                AppError::NotFound(err.to_string())
            }
            AssetError::HandlerNotFound(_) => AppError::HandlerNotFound(err.to_string()),
            AssetError::Storage(e) => e.into(),
            AssetError::Repository(e) => e,
            AssetError::MixedManagement(_) | AssetError::Archive(_) | AssetError::Io(_) => {
                AppError::Internal(err.to_string())
            }
        }
    }
}

pub type AssetResult<T> = Result<T, AssetError>;
