//! Task handler context trait
//!
//! The upload orchestrator implements this trait. The worker calls
//! `dispatch_task` for every claimed task; the implementation matches on task
//! type and runs the step.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use geonode_core::models::Task;

/// Context for task dispatch.
///
/// The worker holds a weak reference so the context can be dropped at
/// shutdown while tasks are still queued.
#[async_trait]
pub trait TaskHandlerContext: Send + Sync {
    /// Run the task and return its result payload. Errors wrapping an
    /// unrecoverable [`TaskError`](geonode_core::TaskError) are not retried.
    async fn dispatch_task(self: Arc<Self>, task: &Task) -> Result<serde_json::Value>;
}
