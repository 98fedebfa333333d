//! Application setup and initialization

pub mod routes;
pub mod server;
pub mod services;

use crate::state::AppState;
use anyhow::{Context, Result};
use geonode_core::Config;
use std::sync::Arc;

/// Initialize the entire application
pub async fn initialize_app(config: Config) -> Result<(Arc<AppState>, axum::Router)> {
    // Fail fast on misconfiguration
    config.validate().context("Configuration validation failed")?;

    crate::telemetry::init_telemetry(config.environment());
    tracing::info!("Configuration loaded and validated successfully");

    let state = services::initialize_services(config).await?;
    let router = routes::setup_routes(&state.config, state.clone()).await?;

    Ok((state, router))
}
