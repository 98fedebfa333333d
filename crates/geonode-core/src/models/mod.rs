//! Data models for the application
//!
//! Assets and their resource links, upload sessions, admission-control
//! limits, execution requests and the worker's task records.

mod asset;
mod execution;
mod limits;
mod link;
mod resource;
mod task;
mod upload;

pub use asset::*;
pub use execution::*;
pub use limits::*;
pub use link::*;
pub use resource::*;
pub use task::*;
pub use upload::*;
