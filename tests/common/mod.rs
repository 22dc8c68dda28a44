#![allow(dead_code)]

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use ephemeral_share::config::Config;
use ephemeral_share::infrastructure::database;
use ephemeral_share::AppState;
use http_body_util::BodyExt;
use sea_orm::{ConnectOptions, Database};
use serde_json::Value;
use std::path::Path;
use tower::ServiceExt;

pub const BOUNDARY: &str = "---------------------------123456789012345678901234567";

/// App state backed by a file-based SQLite database and a scratch root, both
/// inside the caller's temp directory.
pub async fn test_state(temp_dir: &Path) -> AppState {
    test_state_with(temp_dir, |_| {}).await
}

pub async fn test_state_with<F>(temp_dir: &Path, tweak: F) -> AppState
where
    F: FnOnce(&mut Config),
{
    let db_path = temp_dir.join("test.db");
    let mut opt = ConnectOptions::new(format!("sqlite://{}?mode=rwc", db_path.display()));
    opt.max_connections(5).sqlx_logging(false);
    let db = Database::connect(opt).await.unwrap();
    database::create_schema(&db).await.unwrap();

    let mut config = Config {
        temp_dir: temp_dir.join("scratch").to_string_lossy().into_owned(),
        admin_password: Some("test-admin".to_string()),
        jwt_secret: "test-secret".to_string(),
        ..Config::default()
    };
    tweak(&mut config);

    AppState::new(config, db).await.unwrap()
}

/// Multipart body with a single file-style field.
pub fn multipart_file(field: &str, filename: &str, content_type: &str, content: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\nContent-Type: {content_type}\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

/// Multipart body with a file field plus extra text fields.
pub fn multipart_file_with_fields(
    field: &str,
    filename: &str,
    content: &[u8],
    fields: &[(&str, &str)],
) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(content);
    body.extend_from_slice(b"\r\n");
    for (name, value) in fields {
        body.extend_from_slice(
            format!("--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n")
                .as_bytes(),
        );
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

pub fn multipart_content_type() -> String {
    format!("multipart/form-data; boundary={}", BOUNDARY)
}

/// Upload a small file and return its parsed JSON response.
pub async fn upload_file(app: &Router, filename: &str, content_type: &str, content: &[u8]) -> Value {
    let body = multipart_file("file", filename, content_type, content);
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/upload")
                .header("Content-Type", multipart_content_type())
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    json_body(response).await
}

pub async fn json_body(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

pub async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}

/// Poll `/api/file/:id/status` until it reports ready or failed; panics on
/// timeout.
pub async fn wait_for_file(app: &Router, file_id: &str) -> (StatusCode, Value) {
    for _ in 0..200 {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri(format!("/api/file/{}/status", file_id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let status = response.status();
        if status != StatusCode::ACCEPTED {
            return (status, json_body(response).await);
        }

        tokio::time::sleep(std::time::Duration::from_millis(25)).await;
    }
    panic!("file {} never left the processing state", file_id);
}
