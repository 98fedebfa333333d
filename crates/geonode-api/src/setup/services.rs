//! Repositories, storage, the import orchestrator and background loops.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use geonode_assets::AssetHandlerRegistry;
use geonode_core::Config;
use geonode_db::Repositories;
use geonode_storage::{RemoteHostRegistry, RemoteOpener, StorageManager};
use geonode_upload::{
    GeoServerImporterClient, ImportOrchestrator, ImportSessionClient, LimitsService,
    LoggingSpatialBackend, SessionSweeper,
};
use geonode_worker::{TaskQueue, TaskQueueConfig};

use crate::state::{AppState, BackgroundState};

pub async fn initialize_services(config: Config) -> Result<Arc<AppState>> {
    let repos = match config.database_url() {
        Some(url) => {
            let repos = Repositories::connect(url, config.limits())
                .await
                .context("Failed to initialize database")?;
            tracing::info!("Records persisted in SQLite");
            repos
        }
        None => {
            tracing::warn!("No database configured; records are kept in memory");
            Repositories::in_memory(config.limits())
        }
    };

    let storage = StorageManager::from_config(&config)
        .await
        .context("Failed to initialize storage backend")?;
    let storage = Arc::new(storage);
    tracing::info!(backend = %storage.backend_type(), "Storage initialized");

    let assets = AssetHandlerRegistry::from_config(&config, repos.assets.clone())
        .context("Failed to initialize asset handlers")?;
    let assets = Arc::new(assets);

    let remote_hosts = Arc::new(RemoteHostRegistry::new(config.remote_host_allowlist()));
    let opener = RemoteOpener::new(remote_hosts.clone())
        .with_private_hosts(config.remote_allow_private_hosts());
    if config.remote_allow_private_hosts() {
        tracing::warn!("Remote files may be fetched from private network addresses");
    }

    let queue = TaskQueue::new(repos.tasks.clone(), TaskQueueConfig::from(config.worker()));

    let orchestrator = Arc::new(ImportOrchestrator::new(
        config.clone(),
        repos.clone(),
        storage.clone(),
        assets.clone(),
        opener,
        queue,
        Arc::new(LoggingSpatialBackend),
    ));
    let worker = orchestrator.start_worker(None);

    let session_client = config.geoserver().map(|geoserver| {
        Arc::new(GeoServerImporterClient::new(geoserver.clone())) as Arc<dyn ImportSessionClient>
    });
    if session_client.is_none() {
        tracing::info!("No importer configured; stale sessions are only expired");
    }
    let sweeper = Arc::new(SessionSweeper::new(
        repos.uploads.clone(),
        session_client,
        config.limits().upload_session_expiry_hours,
    ));
    let sweep_interval = config.limits().upload_session_sweep_interval_secs;
    let sweeper_shutdown = (sweep_interval > 0)
        .then(|| sweeper.clone().start(Duration::from_secs(sweep_interval)));

    let limits = LimitsService::new(repos.limits.clone());

    Ok(Arc::new(AppState {
        config,
        repos,
        storage,
        assets,
        remote_hosts,
        orchestrator,
        limits,
        background: BackgroundState {
            worker,
            sweeper,
            sweeper_shutdown,
        },
    }))
}
