//! Test helpers: build AppState and router for integration tests.
//!
//! Everything runs in memory on a temporary directory; no external services
//! are needed. Run with `cargo test -p geonode-api`.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum_test::multipart::{MultipartForm, Part};
use axum_test::TestServer;
use geonode_api::constants::{API_PREFIX, USER_HEADER};
use geonode_api::setup::{routes, services};
use geonode_api::state::AppState;
use geonode_core::config::GeoNodeConfig;
use geonode_core::Config;
use serde_json::Value;
use tempfile::TempDir;
use uuid::Uuid;

/// Minimal little-endian TIFF header followed by filler.
pub const TIFF_BYTES: &[u8] = b"II*\0geonode-test-raster";

/// API path prefix for tests (`/api/v2`).
pub fn api_path(path: &str) -> String {
    format!("{}{}", API_PREFIX, path)
}

pub struct TestApp {
    pub server: TestServer,
    pub state: Arc<AppState>,
    pub _temp_dir: TempDir,
}

impl TestApp {
    pub fn client(&self) -> &TestServer {
        &self.server
    }

    /// Poll an execution until it leaves `ready`/`running`.
    pub async fn wait_for_execution(&self, user: &str, id: Uuid) -> Value {
        for _ in 0..100 {
            let response = self
                .server
                .get(&api_path(&format!("/executionrequest/{}", id)))
                .add_header(USER_HEADER, user)
                .await;
            assert_eq!(response.status_code(), 200);
            let body: Value = response.json();
            if matches!(body["status"].as_str(), Some("finished") | Some("failed")) {
                return body;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("execution {} did not complete", id);
    }

    /// Upload one file as `base_file` and return the response.
    pub async fn upload(&self, user: &str, name: &str, content: &[u8]) -> axum_test::TestResponse {
        let part = Part::bytes(bytes::Bytes::copy_from_slice(content)).file_name(name);
        let form = MultipartForm::new()
            .add_text("action", "upload")
            .add_part("base_file", part);
        self.server
            .post(&api_path("/uploads"))
            .add_header(USER_HEADER, user)
            .multipart(form)
            .await
    }

    /// Upload a GeoTIFF and wait for the import to finish.
    pub async fn import_raster(&self, user: &str, name: &str) -> Value {
        let response = self.upload(user, name, TIFF_BYTES).await;
        assert_eq!(response.status_code(), 201, "{}", response.text());
        let body: Value = response.json();
        let id = Uuid::parse_str(body["execution_id"].as_str().expect("execution_id"))
            .expect("execution_id is a uuid");
        self.wait_for_execution(user, id).await
    }
}

pub async fn setup_test_app() -> TestApp {
    setup_test_app_with(|_| {}).await
}

/// Like [`setup_test_app`], with a hook to adjust the configuration.
pub async fn setup_test_app_with(configure: impl FnOnce(&mut GeoNodeConfig)) -> TestApp {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let mut config = Config::local(temp_dir.path().join("assets"), temp_dir.path().join("media"));
    {
        let inner = config.inner_mut();
        inner.storage.temp_dir = Some(temp_dir.path().join("tmp"));
        inner.limits.upload_session_sweep_interval_secs = 0;
        configure(inner);
    }

    let state = services::initialize_services(config.clone())
        .await
        .expect("Failed to initialize services");
    let app = routes::setup_routes(&config, state.clone())
        .await
        .expect("Failed to setup routes");
    let server = TestServer::new(app.into_make_service()).expect("Failed to create test server");

    TestApp {
        server,
        state,
        _temp_dir: temp_dir,
    }
}
