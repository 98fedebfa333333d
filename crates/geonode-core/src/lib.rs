//! GeoNode Core Library
//!
//! This crate provides core domain models, error types and configuration
//! shared by the storage, asset, upload and API crates.

pub mod config;
pub mod constants;
pub mod error;
pub mod models;
pub mod storage_types;
pub mod task_error;

// Re-export commonly used types
pub use config::{Config, GeoServerConfig, LimitsConfig, StorageConfig, WorkerConfig};
pub use error::{AppError, ErrorMetadata, LogLevel};
pub use storage_types::{AssetKindTag, StorageBackend};
pub use task_error::{TaskError, TaskResultExt};
