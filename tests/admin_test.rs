mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::{Duration, Utc};
use common::*;
use ephemeral_share::create_app;
use sea_orm::{ActiveModelTrait, Set};
use tempfile::TempDir;
use tower::ServiceExt;

async fn admin_token(app: &Router) -> String {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/admin/auth")
                .header("Content-Type", "application/json")
                .body(Body::from(r#"{"admin_password": "test-admin"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    json["token"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_admin_auth() {
    let temp = TempDir::new().unwrap();
    let state = test_state(temp.path()).await;
    let app = create_app(state);

    // Wrong password
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/admin/auth")
                .header("Content-Type", "application/json")
                .body(Body::from(r#"{"admin_password": "nope"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // Correct password yields a token with a future expiry
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/admin/auth")
                .header("Content-Type", "application/json")
                .body(Body::from(r#"{"admin_password": "test-admin"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert!(json["token"].as_str().unwrap().len() > 20);
    assert!(json["expires_at"].as_i64().unwrap() > Utc::now().timestamp());
}

#[tokio::test]
async fn test_admin_surface_unconfigured() {
    let temp = TempDir::new().unwrap();
    let state = test_state_with(temp.path(), |config| {
        config.admin_password = None;
    })
    .await;
    let app = create_app(state);

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/admin/auth")
                .header("Content-Type", "application/json")
                .body(Body::from(r#"{"admin_password": "whatever"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_admin_token_bypasses_download_password() {
    let temp = TempDir::new().unwrap();
    let state = test_state(temp.path()).await;
    let app = create_app(state);

    let body = multipart_file_with_fields(
        "file",
        "locked.txt",
        b"for admin eyes",
        &[("download_password", "hunter2")],
    );
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
    let uploaded = json_body(response).await;
    let file_id = uploaded["file_id"].as_str().unwrap().to_string();

    let token = admin_token(&app).await;
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/api/file/{}?admin_token={}", file_id, token))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await, b"for admin eyes");

    // Garbage token does not
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/api/file/{}?admin_token=garbage", file_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_admin_expiry_extension() {
    let temp = TempDir::new().unwrap();
    let state = test_state(temp.path()).await;
    let app = create_app(state);

    let uploaded = upload_file(&app, "keepme.txt", "text/plain", b"extend me").await;
    let file_id = uploaded["file_id"].as_str().unwrap().to_string();

    let next_week = (Utc::now() + Duration::days(7)).to_rfc3339();
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri(format!("/api/admin/file/{}/expires", file_id))
                .header("Content-Type", "application/json")
                .body(Body::from(
                    serde_json::json!({
                        "admin_password": "test-admin",
                        "expires_at": next_week,
                    })
                    .to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // The new expiry is visible through the public descriptor
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/api/metadata/{}", file_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let metadata = json_body(response).await;
    let expires_at = metadata["expires_at"].as_str().unwrap();
    let parsed = chrono::DateTime::parse_from_rfc3339(expires_at).unwrap();
    assert!(parsed > Utc::now() + Duration::days(6));

    // Timestamps in the past are rejected
    let yesterday = (Utc::now() - Duration::days(1)).to_rfc3339();
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri(format!("/api/admin/file/{}/expires", file_id))
                .header("Content-Type", "application/json")
                .body(Body::from(
                    serde_json::json!({
                        "admin_password": "test-admin",
                        "expires_at": yesterday,
                    })
                    .to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_admin_force_delete_and_listing() {
    let temp = TempDir::new().unwrap();
    let state = test_state(temp.path()).await;
    let app = create_app(state);

    let first = upload_file(&app, "one.txt", "text/plain", b"first").await;
    let second = upload_file(&app, "two.txt", "text/plain", b"second").await;
    let first_id = first["file_id"].as_str().unwrap().to_string();

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/admin/files")
                .header("Content-Type", "application/json")
                .body(Body::from(r#"{"admin_password": "test-admin"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let listing = json_body(response).await;
    assert_eq!(listing["count"], 2);

    // Force delete without any delete token
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/api/admin/file/{}", first_id))
                .header("Content-Type", "application/json")
                .body(Body::from(r#"{"admin_password": "test-admin"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/api/file/{}", first_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // The other file survives
    let second_id = second["file_id"].as_str().unwrap();
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/api/file/{}", second_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_expired_files_are_hidden_and_swept() {
    let temp = TempDir::new().unwrap();
    let state = test_state(temp.path()).await;
    let app = create_app(state.clone());

    // Insert an already-expired descriptor with an external blob directly
    let blob_path = state.blobs.external_path("expired-file");
    tokio::fs::write(&blob_path, b"stale bytes").await.unwrap();

    let row = ephemeral_share::entities::files::ActiveModel {
        id: Set("expired-file".to_string()),
        filename: Set("old.txt".to_string()),
        mime_type: Set("text/plain".to_string()),
        original_size: Set(11),
        stored_size: Set(11),
        compression: Set("none".to_string()),
        storage_kind: Set("external".to_string()),
        storage_path: Set(Some(blob_path.to_string_lossy().into_owned())),
        content: Set(None),
        created_at: Set((Utc::now() - Duration::hours(25)).into()),
        expires_at: Set((Utc::now() - Duration::hours(1)).into()),
        delete_token: Set("tokentoken12".to_string()),
        download_token: Set(None),
        has_download_token: Set(false),
    };
    row.insert(&state.db).await.unwrap();

    // Expired rows are invisible to retrieval
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/file/expired-file")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // The sweep removes both the row and the external blob
    let report = state.metadata.sweep_expired(&state.blobs).await.unwrap();
    assert_eq!(report.files_removed, 1);
    assert!(!blob_path.exists());
}
