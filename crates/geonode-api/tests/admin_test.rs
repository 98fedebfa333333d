//! Limits, remote host and service endpoint tests.

mod helpers;

use geonode_api::constants::USER_HEADER;
use helpers::{api_path, setup_test_app, TIFF_BYTES};
use serde_json::{json, Value};

#[tokio::test]
async fn test_health() {
    let app = setup_test_app().await;

    let response = app.client().get("/health").await;

    assert_eq!(response.status_code(), 200);
    let body: Value = response.json();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["storage_backend"], "local");
}

#[tokio::test]
async fn test_openapi_document_is_served() {
    let app = setup_test_app().await;

    let response = app.client().get(&api_path("/openapi.json")).await;

    assert_eq!(response.status_code(), 200);
    let body: Value = response.json();
    assert!(body["paths"]["/api/v2/uploads"].is_object());
}

#[tokio::test]
async fn test_protected_size_limit_cannot_be_deleted() {
    let app = setup_test_app().await;

    let response = app
        .client()
        .delete(&api_path("/upload-size-limits/total_upload_size_sum"))
        .add_header(USER_HEADER, "admin")
        .await;

    assert_eq!(response.status_code(), 400);
    let body: Value = response.json();
    assert_eq!(body["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_raising_total_size_raises_handler_limit() {
    let app = setup_test_app().await;

    let response = app
        .client()
        .put(&api_path("/upload-size-limits/total_upload_size_sum"))
        .add_header(USER_HEADER, "admin")
        .json(&json!({ "max_size": 500_000_000u64 }))
        .await;
    assert_eq!(response.status_code(), 200, "{}", response.text());

    let listed: Value = app
        .client()
        .get(&api_path("/upload-size-limits"))
        .add_header(USER_HEADER, "admin")
        .await
        .json();
    let handler = listed
        .as_array()
        .and_then(|limits| {
            limits
                .iter()
                .find(|l| l["slug"] == "file_upload_handler")
                .cloned()
        })
        .expect("handler limit listed");
    assert_eq!(handler["max_size"], 1_000_000_000u64);
}

#[tokio::test]
async fn test_handler_limit_below_safety_factor_is_rejected() {
    let app = setup_test_app().await;

    let response = app
        .client()
        .put(&api_path("/upload-size-limits/file_upload_handler"))
        .add_header(USER_HEADER, "admin")
        .json(&json!({ "max_size": 1024 }))
        .await;

    assert_eq!(response.status_code(), 400);
}

#[tokio::test]
async fn test_zero_parallelism_limit_pauses_uploads() {
    let app = setup_test_app().await;

    let paused = app
        .client()
        .put(&api_path("/upload-parallelism-limits/default_max_parallel_uploads"))
        .add_header(USER_HEADER, "admin")
        .json(&json!({ "max_number": 0 }))
        .await;
    assert_eq!(paused.status_code(), 200, "{}", paused.text());
    let body: Value = paused.json();
    assert_eq!(body["max_number"], 0);

    let rejected = app.upload("alice", "grid.tif", TIFF_BYTES).await;
    assert_eq!(rejected.status_code(), 400);
    let body: Value = rejected.json();
    assert_eq!(body["code"], "upload_parallelism_limit_exceeded");

    let accepted = app
        .client()
        .put(&api_path("/upload-parallelism-limits/default_max_parallel_uploads"))
        .add_header(USER_HEADER, "admin")
        .json(&json!({ "max_number": 10, "description": "Raised" }))
        .await;
    assert_eq!(accepted.status_code(), 200);
    let body: Value = accepted.json();
    assert_eq!(body["max_number"], 10);

    let resumed = app.upload("alice", "grid.tif", TIFF_BYTES).await;
    assert_eq!(resumed.status_code(), 201, "{}", resumed.text());
}

#[tokio::test]
async fn test_malformed_limit_body() {
    let app = setup_test_app().await;

    let response = app
        .client()
        .put(&api_path("/upload-size-limits/total_upload_size_sum"))
        .add_header(USER_HEADER, "admin")
        .json(&json!({ "max_size": "big" }))
        .await;

    assert_eq!(response.status_code(), 400);
    let body: Value = response.json();
    assert_eq!(body["code"], "INVALID_INPUT");
}

#[tokio::test]
async fn test_remote_host_allowlist_round_trip() {
    let app = setup_test_app().await;

    let added = app
        .client()
        .post(&api_path("/remote-hosts"))
        .add_header(USER_HEADER, "admin")
        .json(&json!({ "host": "Data.Example.org" }))
        .await;
    assert_eq!(added.status_code(), 201);
    let added: Value = added.json();
    assert_eq!(added["host"], "data.example.org");

    let listed: Value = app
        .client()
        .get(&api_path("/remote-hosts"))
        .add_header(USER_HEADER, "admin")
        .await
        .json();
    assert_eq!(listed, json!([{ "host": "data.example.org" }]));

    let removed = app
        .client()
        .delete(&api_path("/remote-hosts/data.example.org"))
        .add_header(USER_HEADER, "admin")
        .await;
    assert_eq!(removed.status_code(), 204);

    let missing = app
        .client()
        .delete(&api_path("/remote-hosts/data.example.org"))
        .add_header(USER_HEADER, "admin")
        .await;
    assert_eq!(missing.status_code(), 404);
}
