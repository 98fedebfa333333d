//! Route configuration and setup

use crate::api_doc::ApiDoc;
use crate::constants::API_PREFIX;
use crate::handlers;
use crate::state::AppState;
use anyhow::Context;
use axum::{
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method},
    routing::{delete, get, post, put},
    Json, Router,
};
use geonode_core::Config;
use std::sync::Arc;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

/// Setup all application routes
pub async fn setup_routes(
    config: &Config,
    state: Arc<AppState>,
) -> Result<Router<()>, anyhow::Error> {
    let cors = setup_cors(config);

    // Multipart bodies are bounded by the request limit, which admits the
    // handler's whole upload allowance.
    let max_request_size = state
        .orchestrator
        .limits()
        .max_request_size()
        .await
        .context("Failed to read the upload size limits")?;
    let max_request_size = usize::try_from(max_request_size).unwrap_or(usize::MAX);
    tracing::info!(max_request_size, "Request body limit configured");

    let api = Router::new()
        .route("/uploads", post(handlers::uploads::create_upload))
        .route("/executionrequest", get(handlers::executions::list_executions))
        .route("/executionrequest/{id}", get(handlers::executions::get_execution))
        .route("/resources/{id}", delete(handlers::resources::delete_resource))
        .route("/resources/{id}/copy", post(handlers::resources::copy_resource))
        .route("/assets/{id}", get(handlers::assets::get_asset))
        .route("/assets/{id}/download", get(handlers::assets::download_asset))
        .route(
            "/assets/{id}/download/{*path}",
            get(handlers::assets::download_asset_path),
        )
        .route("/assets/{id}/link", get(handlers::assets::asset_link))
        .route("/upload-size-limits", get(handlers::limits::list_size_limits))
        .route(
            "/upload-size-limits/{slug}",
            put(handlers::limits::put_size_limit).delete(handlers::limits::delete_size_limit),
        )
        .route(
            "/upload-parallelism-limits",
            get(handlers::limits::list_parallelism_limits),
        )
        .route(
            "/upload-parallelism-limits/{slug}",
            put(handlers::limits::put_parallelism_limit)
                .delete(handlers::limits::delete_parallelism_limit),
        )
        .route(
            "/remote-hosts",
            get(handlers::remote_hosts::list_hosts).post(handlers::remote_hosts::add_host),
        )
        .route("/remote-hosts/{host}", delete(handlers::remote_hosts::remove_host))
        .route("/openapi.json", get(|| async { Json(ApiDoc::openapi()) }));

    // Server-level concurrency cap; uploads stage whole files to disk.
    let http_concurrency_limit = std::env::var("HTTP_CONCURRENCY_LIMIT")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(1_000)
        .max(1);

    let app = Router::new()
        .route("/health", get(handlers::health::health))
        .nest(API_PREFIX, api)
        .layer(ConcurrencyLimitLayer::new(http_concurrency_limit))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_request_size))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    Ok(app)
}

/// Setup CORS configuration
fn setup_cors(config: &Config) -> CorsLayer {
    let methods = [
        Method::GET,
        Method::POST,
        Method::PUT,
        Method::DELETE,
        Method::OPTIONS,
    ];
    if config.cors_origins().iter().any(|o| o == "*") {
        tracing::warn!("CORS configured to allow all origins - not recommended for production");
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(methods)
            .allow_headers(Any)
    } else {
        let origins: Vec<HeaderValue> = config
            .cors_origins()
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(methods)
            .allow_headers(Any)
    }
}
