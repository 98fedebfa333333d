//! GeoNode upload API
//!
//! HTTP handlers, error rendering and application setup. The binary in
//! `main.rs` is a thin wrapper around [`setup::initialize_app`].

mod api_doc;
pub mod constants;
mod handlers;
pub mod setup;
mod telemetry;

pub mod auth;
pub mod error;
pub mod state;

pub use api_doc::ApiDoc;
pub use error::{ErrorResponse, HttpAppError};
pub use state::AppState;
