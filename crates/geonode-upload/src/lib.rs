//! GeoNode upload orchestration
//!
//! Format handlers decide which uploads can be imported, the limit validator
//! admits them, and the [`ImportOrchestrator`] drives each accepted upload
//! through its step chain on the background worker. The [`SessionSweeper`]
//! finalises upload sessions that never completed.

pub mod backend;
pub mod error;
pub mod geoserver;
pub mod handlers;
pub mod limits;
pub mod orchestrator;
pub mod sessions;

pub use backend::{ImportedLayer, LoggingSpatialBackend, SpatialBackend};
pub use error::{UploadError, UploadResult};
pub use geoserver::GeoServerImporterClient;
pub use handlers::{HandlerRegistry, ImportHandler, UploadFiles, COPY_STEPS, IMPORT_STEPS};
pub use limits::{LimitsService, UploadLimitValidator};
pub use orchestrator::{ImportOrchestrator, SubmittedUpload, UploadRequest};
pub use sessions::{
    ImportSessionClient, ImportSessionState, KeyedLock, SessionSweeper, SweepReport,
};
