use std::sync::Arc;

use tokio::sync::mpsc;

use geonode_assets::AssetHandlerRegistry;
use geonode_core::Config;
use geonode_db::Repositories;
use geonode_storage::{RemoteHostRegistry, StorageManager};
use geonode_upload::{ImportOrchestrator, LimitsService, SessionSweeper};
use geonode_worker::WorkerHandle;

/// Background loops owned by the application. Dropping their handles stops them.
pub struct BackgroundState {
    pub worker: WorkerHandle,
    pub sweeper: Arc<SessionSweeper>,
    pub sweeper_shutdown: Option<mpsc::Sender<()>>,
}

pub struct AppState {
    pub config: Config,
    pub repos: Repositories,
    pub storage: Arc<StorageManager>,
    pub assets: Arc<AssetHandlerRegistry>,
    pub remote_hosts: Arc<RemoteHostRegistry>,
    pub orchestrator: Arc<ImportOrchestrator>,
    pub limits: LimitsService,
    pub background: BackgroundState,
}
