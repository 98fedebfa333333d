//! Configuration module
//!
//! This module provides configuration structures for the API and services,
//! including storage, asset handlers, upload limits, the worker pool and the
//! GeoServer importer connection.

use std::env;
use std::path::{Path, PathBuf};

use crate::storage_types::{AssetKindTag, StorageBackend};

// Common constants
const SERVER_PORT: u16 = 8000;
const FILE_UPLOAD_BUFFER_SIZE: usize = 64 * 1024;
const DEFAULT_MAX_UPLOAD_SIZE: u64 = 100 * 1024 * 1024;
const DEFAULT_MAX_PARALLEL_UPLOADS_PER_USER: u32 = 5;
const UPLOAD_SESSION_EXPIRY_HOURS: i64 = 24;
const UPLOAD_SESSION_SWEEP_INTERVAL_SECS: u64 = 600;
const TASK_QUEUE_MAX_WORKERS: usize = 4;
const TASK_QUEUE_MAX_RETRIES: i32 = 3;
const TASK_QUEUE_DEFAULT_TIMEOUT_SECS: u64 = 3600;
const DATABASE_URL: &str = "sqlite://geonode.db";

/// Base configuration for the HTTP service
#[derive(Clone, Debug)]
pub struct BaseConfig {
    pub server_port: u16,
    pub environment: String,
    pub cors_origins: Vec<String>,
    /// SQLite database for persistent records; `None` keeps them in memory.
    pub database_url: Option<String>,
}

/// Storage and staging configuration
#[derive(Clone, Debug)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub assets_root: PathBuf,
    pub media_root: PathBuf,
    /// Parent directory for staging folders; `None` uses the OS temp dir.
    pub temp_dir: Option<PathBuf>,
    pub buffer_size: usize,
    pub base_url: String,
    pub s3_bucket: Option<String>,
    pub s3_region: Option<String>,
    pub s3_endpoint: Option<String>, // Custom endpoint for S3-compatible providers (MinIO, etc.)
    pub aws_region: Option<String>,
    pub gcs_bucket: Option<String>,
    pub dropbox_oauth2_token: Option<String>,
    pub dropbox_root_path: String,
    // If set, only remote URIs on these hosts are staged
    pub remote_host_allowlist: Vec<String>,
    /// Let remote URIs resolve to loopback or private-network addresses.
    pub remote_allow_private_hosts: bool,
}

/// Upload admission-control defaults
#[derive(Clone, Debug)]
pub struct LimitsConfig {
    pub default_max_upload_size: u64,
    pub default_max_parallel_uploads_per_user: u32,
    pub upload_session_expiry_hours: i64,
    /// 0 disables the periodic session sweep.
    pub upload_session_sweep_interval_secs: u64,
}

#[derive(Clone, Debug)]
pub struct WorkerConfig {
    pub max_workers: usize,
    pub max_retries: i32,
    pub default_timeout_seconds: u64,
}

#[derive(Clone, Debug)]
pub struct GeoServerConfig {
    pub url: String,
    pub user: String,
    pub password: String,
}

/// Whole-process configuration.
#[derive(Clone, Debug)]
pub struct GeoNodeConfig {
    pub base: BaseConfig,
    pub storage: StorageConfig,
    pub limits: LimitsConfig,
    pub worker: WorkerConfig,
    pub asset_handlers: Vec<AssetKindTag>,
    pub default_asset_handler: AssetKindTag,
    pub geoserver: Option<GeoServerConfig>,
}

/// Application configuration.
#[derive(Clone, Debug)]
pub struct Config(pub Box<GeoNodeConfig>);

impl Config {
    fn inner(&self) -> &GeoNodeConfig {
        &self.0
    }

    pub fn from_env() -> Result<Self, anyhow::Error> {
        let config = GeoNodeConfig::from_env()?;
        Ok(Config(Box::new(config)))
    }

    /// Local-filesystem configuration rooted at the given directories, with
    /// every other setting at its default. Used by tests and embedded setups.
    pub fn local(assets_root: impl AsRef<Path>, media_root: impl AsRef<Path>) -> Self {
        let media_root = media_root.as_ref().to_path_buf();
        Config(Box::new(GeoNodeConfig {
            base: BaseConfig {
                server_port: SERVER_PORT,
                environment: "development".to_string(),
                cors_origins: vec!["*".to_string()],
                database_url: None,
            },
            storage: StorageConfig {
                backend: StorageBackend::Local,
                assets_root: assets_root.as_ref().to_path_buf(),
                media_root: media_root.clone(),
                temp_dir: None,
                buffer_size: FILE_UPLOAD_BUFFER_SIZE,
                base_url: "http://localhost:8000/uploaded".to_string(),
                s3_bucket: None,
                s3_region: None,
                s3_endpoint: None,
                aws_region: None,
                gcs_bucket: None,
                dropbox_oauth2_token: None,
                dropbox_root_path: String::new(),
                remote_host_allowlist: Vec::new(),
                remote_allow_private_hosts: false,
            },
            limits: LimitsConfig {
                default_max_upload_size: DEFAULT_MAX_UPLOAD_SIZE,
                default_max_parallel_uploads_per_user: DEFAULT_MAX_PARALLEL_UPLOADS_PER_USER,
                upload_session_expiry_hours: UPLOAD_SESSION_EXPIRY_HOURS,
                upload_session_sweep_interval_secs: UPLOAD_SESSION_SWEEP_INTERVAL_SECS,
            },
            worker: WorkerConfig {
                max_workers: TASK_QUEUE_MAX_WORKERS,
                max_retries: TASK_QUEUE_MAX_RETRIES,
                default_timeout_seconds: TASK_QUEUE_DEFAULT_TIMEOUT_SECS,
            },
            asset_handlers: vec![AssetKindTag::Local],
            default_asset_handler: AssetKindTag::Local,
            geoserver: None,
        }))
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        self.inner().validate()
    }

    /// Check if the application is running in production mode
    pub fn is_production(&self) -> bool {
        let env = self.inner().base.environment.to_lowercase();
        env == "production" || env == "prod"
    }

    pub fn server_port(&self) -> u16 {
        self.inner().base.server_port
    }

    pub fn environment(&self) -> &str {
        &self.inner().base.environment
    }

    pub fn cors_origins(&self) -> &[String] {
        &self.inner().base.cors_origins
    }

    pub fn database_url(&self) -> Option<&str> {
        self.inner().base.database_url.as_deref()
    }

    pub fn storage(&self) -> &StorageConfig {
        &self.inner().storage
    }

    pub fn storage_backend(&self) -> StorageBackend {
        self.inner().storage.backend
    }

    pub fn assets_root(&self) -> &Path {
        &self.inner().storage.assets_root
    }

    pub fn media_root(&self) -> &Path {
        &self.inner().storage.media_root
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.inner()
            .storage
            .temp_dir
            .clone()
            .unwrap_or_else(env::temp_dir)
    }

    pub fn file_upload_buffer_size(&self) -> usize {
        self.inner().storage.buffer_size
    }

    pub fn remote_host_allowlist(&self) -> &[String] {
        &self.inner().storage.remote_host_allowlist
    }

    pub fn remote_allow_private_hosts(&self) -> bool {
        self.inner().storage.remote_allow_private_hosts
    }

    pub fn limits(&self) -> &LimitsConfig {
        &self.inner().limits
    }

    pub fn worker(&self) -> &WorkerConfig {
        &self.inner().worker
    }

    pub fn asset_handlers(&self) -> &[AssetKindTag] {
        &self.inner().asset_handlers
    }

    pub fn default_asset_handler(&self) -> AssetKindTag {
        self.inner().default_asset_handler
    }

    pub fn geoserver(&self) -> Option<&GeoServerConfig> {
        self.inner().geoserver.as_ref()
    }

    /// Mutable access for tests and embedders that tweak a default config.
    pub fn inner_mut(&mut self) -> &mut GeoNodeConfig {
        &mut self.0
    }
}

fn env_list(name: &str) -> Option<Vec<String>> {
    env::var(name).ok().map(|s| {
        s.split(',')
            .map(|item| item.trim().to_lowercase())
            .filter(|item| !item.is_empty())
            .collect()
    })
}

impl GeoNodeConfig {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();

        let environment = env::var("ENVIRONMENT")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string());

        let base = BaseConfig {
            server_port: env::var("PORT")
                .unwrap_or_else(|_| SERVER_PORT.to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number"))?,
            environment,
            cors_origins: env::var("CORS_ORIGINS")
                .unwrap_or_else(|_| "*".to_string())
                .split(',')
                .map(|s| s.trim().to_string())
                .collect(),
            // "memory" opts out of persistence.
            database_url: match env::var("DATABASE_URL") {
                Ok(url) if url.eq_ignore_ascii_case("memory") => None,
                Ok(url) => Some(url),
                Err(_) => Some(DATABASE_URL.to_string()),
            },
        };

        let backend = env::var("STORAGE_BACKEND")
            .or_else(|_| env::var("STORAGE_MANAGER_CONCRETE_CLASS"))
            .unwrap_or_else(|_| "local".to_string())
            .parse::<StorageBackend>()?;

        let storage = StorageConfig {
            backend,
            assets_root: env::var("ASSETS_ROOT")
                .unwrap_or_else(|_| "./data/assets".to_string())
                .into(),
            media_root: env::var("MEDIA_ROOT")
                .unwrap_or_else(|_| "./data/media".to_string())
                .into(),
            temp_dir: env::var("FILE_UPLOAD_TEMP_DIR").ok().map(PathBuf::from),
            buffer_size: env::var("FILE_UPLOAD_BUFFER_SIZE")
                .unwrap_or_else(|_| FILE_UPLOAD_BUFFER_SIZE.to_string())
                .parse()
                .unwrap_or(FILE_UPLOAD_BUFFER_SIZE),
            base_url: env::var("STORAGE_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:8000/uploaded".to_string()),
            s3_bucket: env::var("S3_BUCKET").ok(),
            s3_region: env::var("S3_REGION").ok(),
            s3_endpoint: env::var("S3_ENDPOINT").ok(),
            aws_region: env::var("AWS_REGION").ok(),
            gcs_bucket: env::var("GCS_BUCKET").ok(),
            dropbox_oauth2_token: env::var("DROPBOX_OAUTH2_TOKEN")
                .ok()
                .filter(|s| !s.is_empty()),
            dropbox_root_path: env::var("DROPBOX_ROOT_PATH").unwrap_or_default(),
            remote_host_allowlist: env_list("REMOTE_HOST_ALLOWLIST").unwrap_or_default(),
            remote_allow_private_hosts: env::var("REMOTE_ALLOW_PRIVATE_HOSTS")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
        };

        let limits = LimitsConfig {
            default_max_upload_size: env::var("DEFAULT_MAX_UPLOAD_SIZE")
                .unwrap_or_else(|_| DEFAULT_MAX_UPLOAD_SIZE.to_string())
                .parse()
                .unwrap_or(DEFAULT_MAX_UPLOAD_SIZE),
            default_max_parallel_uploads_per_user: env::var(
                "DEFAULT_MAX_PARALLEL_UPLOADS_PER_USER",
            )
            .unwrap_or_else(|_| DEFAULT_MAX_PARALLEL_UPLOADS_PER_USER.to_string())
            .parse()
            .unwrap_or(DEFAULT_MAX_PARALLEL_UPLOADS_PER_USER),
            upload_session_expiry_hours: env::var("UPLOAD_SESSION_EXPIRY_HOURS")
                .unwrap_or_else(|_| UPLOAD_SESSION_EXPIRY_HOURS.to_string())
                .parse()
                .unwrap_or(UPLOAD_SESSION_EXPIRY_HOURS),
            upload_session_sweep_interval_secs: env::var("UPLOAD_SESSION_SWEEP_INTERVAL_SECS")
                .unwrap_or_else(|_| UPLOAD_SESSION_SWEEP_INTERVAL_SECS.to_string())
                .parse()
                .unwrap_or(UPLOAD_SESSION_SWEEP_INTERVAL_SECS),
        };

        let worker = WorkerConfig {
            max_workers: env::var("TASK_QUEUE_MAX_WORKERS")
                .unwrap_or_else(|_| TASK_QUEUE_MAX_WORKERS.to_string())
                .parse()
                .unwrap_or(TASK_QUEUE_MAX_WORKERS),
            max_retries: env::var("TASK_QUEUE_MAX_RETRIES")
                .unwrap_or_else(|_| TASK_QUEUE_MAX_RETRIES.to_string())
                .parse()
                .unwrap_or(TASK_QUEUE_MAX_RETRIES),
            default_timeout_seconds: env::var("TASK_QUEUE_DEFAULT_TIMEOUT_SECONDS")
                .unwrap_or_else(|_| TASK_QUEUE_DEFAULT_TIMEOUT_SECS.to_string())
                .parse()
                .unwrap_or(TASK_QUEUE_DEFAULT_TIMEOUT_SECS),
        };

        let asset_handlers = env_list("ASSET_HANDLERS")
            .unwrap_or_else(|| vec!["local".to_string()])
            .iter()
            .map(|s| s.parse::<AssetKindTag>())
            .collect::<Result<Vec<_>, _>>()?;

        let default_asset_handler = env::var("DEFAULT_ASSET_HANDLER")
            .unwrap_or_else(|_| "local".to_string())
            .parse::<AssetKindTag>()?;

        let geoserver = env::var("GEOSERVER_URL")
            .ok()
            .filter(|s| !s.is_empty())
            .map(|url| GeoServerConfig {
                url,
                user: env::var("GEOSERVER_USER").unwrap_or_else(|_| "admin".to_string()),
                password: env::var("GEOSERVER_PASSWORD").unwrap_or_default(),
            });

        let config = GeoNodeConfig {
            base,
            storage,
            limits,
            worker,
            asset_handlers,
            default_asset_handler,
            geoserver,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.storage.buffer_size == 0 {
            return Err(anyhow::anyhow!(
                "FILE_UPLOAD_BUFFER_SIZE must be greater than zero"
            ));
        }

        if self.worker.max_workers == 0 {
            return Err(anyhow::anyhow!(
                "TASK_QUEUE_MAX_WORKERS must be greater than zero"
            ));
        }

        if !self.asset_handlers.contains(&self.default_asset_handler) {
            return Err(anyhow::anyhow!(
                "DEFAULT_ASSET_HANDLER '{}' must be listed in ASSET_HANDLERS",
                self.default_asset_handler
            ));
        }

        // Validate storage backend configuration
        match self.storage.backend {
            StorageBackend::Local => {}
            StorageBackend::S3 => {
                if self.storage.s3_bucket.is_none() {
                    return Err(anyhow::anyhow!(
                        "S3_BUCKET must be set when using S3 storage backend"
                    ));
                }
                if self.storage.s3_region.is_none() && self.storage.aws_region.is_none() {
                    return Err(anyhow::anyhow!(
                        "S3_REGION or AWS_REGION must be set when using S3 storage backend"
                    ));
                }
            }
            StorageBackend::Gcs => {
                if self.storage.gcs_bucket.is_none() {
                    return Err(anyhow::anyhow!(
                        "GCS_BUCKET must be set when using GCS storage backend"
                    ));
                }
            }
            StorageBackend::Dropbox => {
                if self.storage.dropbox_oauth2_token.is_none() {
                    return Err(anyhow::anyhow!(
                        "DROPBOX_OAUTH2_TOKEN must be set when using Dropbox storage backend"
                    ));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_config_is_valid() {
        let config = Config::local("/tmp/assets", "/tmp/media");
        assert!(config.validate().is_ok());
        assert_eq!(config.storage_backend(), StorageBackend::Local);
        assert_eq!(config.limits().upload_session_expiry_hours, 24);
        assert_eq!(config.default_asset_handler(), AssetKindTag::Local);
        assert!(config.database_url().is_none());
    }

    #[test]
    fn s3_requires_bucket() {
        let mut config = Config::local("/tmp/assets", "/tmp/media");
        config.inner_mut().storage.backend = StorageBackend::S3;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("S3_BUCKET"));

        config.inner_mut().storage.s3_bucket = Some("bucket".to_string());
        config.inner_mut().storage.aws_region = Some("eu-west-1".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn default_handler_must_be_enabled() {
        let mut config = Config::local("/tmp/assets", "/tmp/media");
        config.inner_mut().asset_handlers.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_buffer_size_rejected() {
        let mut config = Config::local("/tmp/assets", "/tmp/media");
        config.inner_mut().storage.buffer_size = 0;
        assert!(config.validate().is_err());
    }
}
