use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

/// Storage backend types
///
/// This enum defines the available storage backend types.
/// It's defined in core because it's used in configuration and by the storage factory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Local,
    S3,
    Gcs,
    Dropbox,
}

impl FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" | "filesystem" => Ok(StorageBackend::Local),
            "s3" | "aws" => Ok(StorageBackend::S3),
            "gcs" | "google" => Ok(StorageBackend::Gcs),
            "dropbox" => Ok(StorageBackend::Dropbox),
            _ => Err(anyhow::anyhow!("Invalid storage backend: {}", s)),
        }
    }
}

impl Display for StorageBackend {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            StorageBackend::Local => write!(f, "local"),
            StorageBackend::S3 => write!(f, "s3"),
            StorageBackend::Gcs => write!(f, "gcs"),
            StorageBackend::Dropbox => write!(f, "dropbox"),
        }
    }
}

/// Discriminant of the asset payload variants, used to key the handler registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetKindTag {
    Local,
}

impl FromStr for AssetKindTag {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "local" | "localasset" => Ok(AssetKindTag::Local),
            _ => Err(anyhow::anyhow!("Invalid asset handler: {}", s)),
        }
    }
}

impl Display for AssetKindTag {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            AssetKindTag::Local => write!(f, "local"),
        }
    }
}
