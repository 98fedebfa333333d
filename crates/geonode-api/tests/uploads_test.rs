//! Upload, execution and asset integration tests.

mod helpers;

use axum_test::multipart::{MultipartForm, Part};
use geonode_api::constants::USER_HEADER;
use helpers::{api_path, setup_test_app, setup_test_app_with, TIFF_BYTES};
use serde_json::{json, Value};

#[tokio::test]
async fn test_upload_requires_identity() {
    let app = setup_test_app().await;
    let part = Part::bytes(bytes::Bytes::from_static(TIFF_BYTES)).file_name("grid.tif");
    let response = app
        .client()
        .post(&api_path("/uploads"))
        .multipart(MultipartForm::new().add_part("base_file", part))
        .await;

    assert_eq!(response.status_code(), 401);
    let body: Value = response.json();
    assert_eq!(body["code"], "UNAUTHORIZED");
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_raster_import_runs_to_completion() {
    let app = setup_test_app().await;

    let execution = app.import_raster("alice", "grid.tif").await;

    assert_eq!(execution["status"], "finished", "{}", execution);
    assert_eq!(execution["handler"], "geotiff");
    assert_eq!(execution["output_params"]["alternate"], "geonode:grid");
    assert!(execution["resource_id"].is_string());
    assert_eq!(
        execution["tasks"],
        json!([
            "start_import",
            "import_resource",
            "publish_resource",
            "create_geonode_resource"
        ])
    );
}

#[tokio::test]
async fn test_imported_asset_can_be_downloaded() {
    let app = setup_test_app().await;
    let execution = app.import_raster("alice", "grid.tif").await;
    let asset_id = execution["output_params"]["asset_id"]
        .as_str()
        .expect("asset_id recorded")
        .to_string();

    let asset = app
        .client()
        .get(&api_path(&format!("/assets/{}", asset_id)))
        .add_header(USER_HEADER, "alice")
        .await;
    assert_eq!(asset.status_code(), 200);
    let asset: Value = asset.json();
    assert_eq!(asset["owner"], "alice");

    let download = app
        .client()
        .get(&api_path(&format!("/assets/{}/download", asset_id)))
        .add_header(USER_HEADER, "alice")
        .await;
    assert_eq!(download.status_code(), 200);
    assert_eq!(download.as_bytes().as_ref(), TIFF_BYTES);
    let disposition = download.header("content-disposition");
    assert!(disposition.to_str().unwrap_or_default().starts_with("attachment"));

    let link = app
        .client()
        .get(&api_path(&format!("/assets/{}/link", asset_id)))
        .add_header(USER_HEADER, "alice")
        .await;
    assert_eq!(link.status_code(), 302);
    assert_eq!(
        link.header("location").to_str().unwrap_or_default(),
        format!("/api/v2/assets/{}/download", asset_id)
    );
}

#[tokio::test]
async fn test_download_rejects_parent_paths() {
    let app = setup_test_app().await;
    let execution = app.import_raster("alice", "grid.tif").await;
    let asset_id = execution["output_params"]["asset_id"].as_str().unwrap_or_default().to_string();

    let response = app
        .client()
        .get(&api_path(&format!("/assets/{}/download/../secret.txt", asset_id)))
        .add_header(USER_HEADER, "alice")
        .await;
    assert!(response.status_code().is_client_error());
}

#[tokio::test]
async fn test_invalid_csv_is_rejected() {
    let app = setup_test_app().await;

    let response = app.upload("alice", "points.csv", b"name,value\nA,1\n").await;

    assert_eq!(response.status_code(), 400);
    let body: Value = response.json();
    assert_eq!(body["code"], "invalid_upload");
    assert!(body["msg"]
        .as_str()
        .unwrap_or_default()
        .contains("Not enough geometry field are set"));
}

#[tokio::test]
async fn test_unknown_format_has_no_handler() {
    let app = setup_test_app().await;

    let response = app.upload("alice", "notes.docx", b"not geospatial").await;

    assert_eq!(response.status_code(), 400);
    let body: Value = response.json();
    assert_eq!(body["code"], "handler_not_found");
}

#[tokio::test]
async fn test_upload_over_total_size_limit() {
    let app = setup_test_app_with(|config| {
        config.limits.default_max_upload_size = 1024;
    })
    .await;

    let mut content = TIFF_BYTES.to_vec();
    content.resize(1500, 0);
    let response = app.upload("alice", "grid.tif", &content).await;

    assert_eq!(response.status_code(), 400);
    let body: Value = response.json();
    assert_eq!(body["code"], "upload_exceeds_limit_error");
    assert!(body["msg"].as_str().unwrap_or_default().contains("1.0 KB"));
}

#[tokio::test]
async fn test_execution_is_private_to_its_user() {
    let app = setup_test_app().await;
    let execution = app.import_raster("alice", "grid.tif").await;
    let id = execution["exec_id"].as_str().unwrap_or_default().to_string();

    let response = app
        .client()
        .get(&api_path(&format!("/executionrequest/{}", id)))
        .add_header(USER_HEADER, "bob")
        .await;
    assert_eq!(response.status_code(), 403);

    let listed = app
        .client()
        .get(&api_path("/executionrequest"))
        .add_header(USER_HEADER, "bob")
        .await;
    assert_eq!(listed.status_code(), 200);
    let listed: Value = listed.json();
    assert_eq!(listed, json!([]));
}

#[tokio::test]
async fn test_copy_and_delete_resource() {
    let app = setup_test_app().await;
    let execution = app.import_raster("alice", "grid.tif").await;
    let resource_id = execution["resource_id"].as_str().unwrap_or_default().to_string();

    let response = app
        .client()
        .post(&api_path(&format!("/resources/{}/copy", resource_id)))
        .add_header(USER_HEADER, "alice")
        .json(&json!({ "title": "Grid copy" }))
        .await;
    assert_eq!(response.status_code(), 201, "{}", response.text());
    let accepted: Value = response.json();
    let copy_id = uuid::Uuid::parse_str(accepted["execution_id"].as_str().unwrap_or_default())
        .expect("execution_id is a uuid");

    let copy = app.wait_for_execution("alice", copy_id).await;
    assert_eq!(copy["status"], "finished", "{}", copy);
    assert_eq!(copy["action"], "copy");
    assert_ne!(copy["resource_id"], execution["resource_id"]);

    let forbidden = app
        .client()
        .delete(&api_path(&format!("/resources/{}", resource_id)))
        .add_header(USER_HEADER, "bob")
        .await;
    assert_eq!(forbidden.status_code(), 403);

    let deleted = app
        .client()
        .delete(&api_path(&format!("/resources/{}", resource_id)))
        .add_header(USER_HEADER, "alice")
        .await;
    assert_eq!(deleted.status_code(), 204);

    let again = app
        .client()
        .delete(&api_path(&format!("/resources/{}", resource_id)))
        .add_header(USER_HEADER, "alice")
        .await;
    assert_eq!(again.status_code(), 404);
}

#[tokio::test]
async fn test_url_field_rejects_local_paths() {
    let app = setup_test_app().await;
    let secret = app._temp_dir.path().join("secret.csv");
    std::fs::write(&secret, b"lat,lon\n1,2\n").expect("write secret");

    for url in [
        secret.display().to_string(),
        format!("file://{}", secret.display()),
    ] {
        let response = app
            .client()
            .post(&api_path("/uploads"))
            .add_header(USER_HEADER, "alice")
            .multipart(MultipartForm::new().add_text("url", url.clone()))
            .await;
        assert_eq!(response.status_code(), 400, "{}: {}", url, response.text());
    }
    let uploads = app.state.repos.uploads.list().await.expect("list uploads");
    assert!(uploads.is_empty());
}

#[tokio::test]
async fn test_url_field_rejects_private_hosts() {
    let app = setup_test_app().await;

    for url in [
        "http://127.0.0.1:8000/api/v2/limits",
        "http://169.254.169.254/latest/meta-data/grid.tif",
        "http://localhost/grid.tif",
    ] {
        let response = app
            .client()
            .post(&api_path("/uploads"))
            .add_header(USER_HEADER, "alice")
            .multipart(MultipartForm::new().add_text("url", url))
            .await;
        assert_eq!(response.status_code(), 403, "{}: {}", url, response.text());
    }
}
