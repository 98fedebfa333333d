//! In-memory repositories
//!
//! Rows live in `tokio::sync::RwLock`-protected maps. Ordering follows
//! insertion where callers rely on it (links, tasks).

mod assets;
mod executions;
mod limits;
mod tasks;
mod uploads;

pub use assets::InMemoryAssetRepository;
pub use executions::InMemoryExecutionRepository;
pub use limits::InMemoryLimitsRepository;
pub use tasks::InMemoryTaskRepository;
pub use uploads::InMemoryUploadRepository;
