//! Background task queue for execution steps.
//!
//! Tasks are rows in a [`TaskRepository`](geonode_db::TaskRepository). A
//! [`TaskQueue`] writes them; a worker started with
//! [`TaskQueue::start_worker`] claims runnable rows, dispatches them through a
//! [`TaskHandlerContext`] and applies the retry policy.

pub mod context;
pub mod queue;

pub use context::TaskHandlerContext;
pub use queue::{
    TaskFinishedSender, TaskQueue, TaskQueueConfig, WorkerHandle, MAX_RETRY_BACKOFF_SECS,
};
