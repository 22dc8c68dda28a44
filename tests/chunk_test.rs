mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use common::*;
use ephemeral_share::create_app;
use sha2::{Digest, Sha256};
use tempfile::TempDir;
use tower::ServiceExt;

async fn initiate(app: &Router, payload: serde_json::Value) -> axum::response::Response {
    app.clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/chunk/initiate")
                .header("Content-Type", "application/json")
                .body(Body::from(payload.to_string()))
                .unwrap(),
        )
        .await
        .unwrap()
}

async fn put_chunk(
    app: &Router,
    upload_id: &str,
    index: usize,
    bytes: &[u8],
) -> axum::response::Response {
    let body = multipart_file("chunk", "blob", "application/octet-stream", bytes);
    app.clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/api/chunk/{}/{}", upload_id, index))
                .header("Content-Type", multipart_content_type())
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap()
}

async fn complete(app: &Router, upload_id: &str) -> axum::response::Response {
    app.clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/api/chunk/{}/complete", upload_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap()
}

#[tokio::test]
async fn test_chunked_upload_out_of_order() {
    let temp = TempDir::new().unwrap();
    let state = test_state(temp.path()).await;
    let app = create_app(state);

    let content: Vec<u8> = (0..2500u32).map(|i| (i % 241) as u8).collect();
    let chunk_size = 1024usize;

    let response = initiate(
        &app,
        serde_json::json!({
            "filename": "big.bin",
            "total_size": content.len(),
            "chunk_size": chunk_size,
        }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let session = json_body(response).await;
    let upload_id = session["upload_id"].as_str().unwrap().to_string();
    assert_eq!(session["total_chunks"], 3);

    // Chunks arrive out of order
    let mut received = Vec::new();
    for index in [2usize, 0, 1] {
        let start = index * chunk_size;
        let end = (start + chunk_size).min(content.len());
        let response = put_chunk(&app, &upload_id, index, &content[start..end]).await;
        assert_eq!(response.status(), StatusCode::OK);
        let json = json_body(response).await;
        received.push(json["received_chunks"].as_u64().unwrap());
    }
    assert_eq!(received, vec![1, 2, 3]);

    // Re-posting a received chunk is acknowledged without rewriting
    let response = put_chunk(&app, &upload_id, 0, &content[0..chunk_size]).await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["message"], "Chunk already received");
    assert_eq!(json["received_chunks"], 3);
    assert_eq!(json["complete"], true);

    // Session status reflects the full mask
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/api/chunk/{}/status", upload_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let status = json_body(response).await;
    assert_eq!(status["received_chunks"], 3);
    assert_eq!(status["complete"], true);

    // Finalize and wait for the pipeline
    let response = complete(&app, &upload_id).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let accepted = json_body(response).await;
    assert_eq!(accepted["status"], "pending");
    let file_id = accepted["file_id"].as_str().unwrap().to_string();
    assert!(accepted["job_id"].as_str().is_some());

    let (status, ready) = wait_for_file(&app, &file_id).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ready["status"], "ready");
    assert_eq!(ready["metadata"]["size"], content.len());
    assert_eq!(ready["download_url"], format!("/api/file/{}", file_id));

    // The reassembled artifact round-trips exactly
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/api/file/{}", file_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await, content);

    // The session was consumed by the pipeline
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/api/chunk/{}/status", upload_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_complete_reports_first_missing_chunk() {
    let temp = TempDir::new().unwrap();
    let state = test_state(temp.path()).await;
    let app = create_app(state);

    let response = initiate(
        &app,
        serde_json::json!({
            "filename": "partial.bin",
            "total_size": 3000,
            "chunk_size": 1024,
        }),
    )
    .await;
    let session = json_body(response).await;
    let upload_id = session["upload_id"].as_str().unwrap().to_string();

    put_chunk(&app, &upload_id, 0, &[1u8; 1024]).await;
    put_chunk(&app, &upload_id, 2, &[3u8; 952]).await;

    let response = complete(&app, &upload_id).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = json_body(response).await;
    assert_eq!(json["error"], "Missing chunks");
    assert_eq!(json["missing_chunk"], 1);
}

#[tokio::test]
async fn test_initiate_validation() {
    let temp = TempDir::new().unwrap();
    let state = test_state_with(temp.path(), |config| {
        config.max_file_size = 1024 * 1024;
        config.chunk_size = 1024;
        config.max_chunks_per_file = 4;
    })
    .await;
    let app = create_app(state);

    // File too large
    let response = initiate(
        &app,
        serde_json::json!({
            "filename": "huge.bin",
            "total_size": 2 * 1024 * 1024,
            "chunk_size": 1024,
        }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);

    // Chunk larger than allowed
    let response = initiate(
        &app,
        serde_json::json!({
            "filename": "chunky.bin",
            "total_size": 4096,
            "chunk_size": 2048,
        }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Too many chunks
    let response = initiate(
        &app,
        serde_json::json!({
            "filename": "many.bin",
            "total_size": 1024 * 1024,
            "chunk_size": 1024,
        }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_chunk_index_and_session_validation() {
    let temp = TempDir::new().unwrap();
    let state = test_state(temp.path()).await;
    let app = create_app(state);

    let response = initiate(
        &app,
        serde_json::json!({
            "filename": "x.bin",
            "total_size": 2048,
            "chunk_size": 1024,
        }),
    )
    .await;
    let session = json_body(response).await;
    let upload_id = session["upload_id"].as_str().unwrap().to_string();

    // Out-of-range index
    let response = put_chunk(&app, &upload_id, 5, &[0u8; 10]).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Unknown session
    let response = put_chunk(&app, "no-such-session", 0, &[0u8; 10]).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // Status of an unknown session
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/chunk/no-such-session/status")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // Completing an unknown session
    let response = complete(&app, "no-such-session").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_hash_verification_failure_fails_job() {
    let temp = TempDir::new().unwrap();
    let state = test_state(temp.path()).await;
    let app = create_app(state);

    let content = vec![9u8; 1500];
    let response = initiate(
        &app,
        serde_json::json!({
            "filename": "verify.bin",
            "total_size": content.len(),
            "chunk_size": 1024,
            "file_hash": "0000000000000000000000000000000000000000000000000000000000000000",
        }),
    )
    .await;
    let session = json_body(response).await;
    let upload_id = session["upload_id"].as_str().unwrap().to_string();

    put_chunk(&app, &upload_id, 0, &content[..1024]).await;
    put_chunk(&app, &upload_id, 1, &content[1024..]).await;

    let response = complete(&app, &upload_id).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let accepted = json_body(response).await;
    let file_id = accepted["file_id"].as_str().unwrap().to_string();

    let (status, body) = wait_for_file(&app, &file_id).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "failed");
    assert!(body["message"].as_str().unwrap().contains("Hash mismatch"));
}

#[tokio::test]
async fn test_hash_verification_success() {
    let temp = TempDir::new().unwrap();
    let state = test_state(temp.path()).await;
    let app = create_app(state);

    let content: Vec<u8> = (0..3000u32).map(|i| (i % 13) as u8).collect();
    let digest = hex::encode(Sha256::digest(&content));

    let response = initiate(
        &app,
        serde_json::json!({
            "filename": "verified.bin",
            "total_size": content.len(),
            "chunk_size": 1024,
            "file_hash": digest,
        }),
    )
    .await;
    let session = json_body(response).await;
    let upload_id = session["upload_id"].as_str().unwrap().to_string();

    for (index, chunk) in content.chunks(1024).enumerate() {
        let response = put_chunk(&app, &upload_id, index, chunk).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = complete(&app, &upload_id).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let accepted = json_body(response).await;
    let file_id = accepted["file_id"].as_str().unwrap().to_string();

    let (status, ready) = wait_for_file(&app, &file_id).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ready["status"], "ready");
}
