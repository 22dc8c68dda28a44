use crate::api::error::AppError;
use crate::services::upload_service::{CompleteOutcome, InitiateRequest};
use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use utoipa::ToSchema;

#[derive(Debug, Deserialize, ToSchema)]
pub struct InitiateUploadRequest {
    pub filename: String,
    pub total_size: i64,
    pub chunk_size: i64,
    #[serde(default)]
    pub file_hash: Option<String>,
    #[serde(default)]
    pub download_password: Option<String>,
}

/// Start a chunked-upload session.
#[utoipa::path(
    post,
    path = "/api/chunk/initiate",
    request_body = InitiateUploadRequest,
    responses(
        (status = 200, description = "Session created"),
        (status = 400, description = "Invalid sizes or too many chunks"),
        (status = 413, description = "File exceeds the size cap")
    )
)]
pub async fn initiate_upload(
    State(state): State<crate::AppState>,
    Json(req): Json<InitiateUploadRequest>,
) -> Result<Response, AppError> {
    if req.filename.is_empty() {
        return Err(AppError::BadRequest("filename is required".to_string()));
    }

    let receipt = state
        .uploads
        .initiate(InitiateRequest {
            filename: req.filename,
            total_size: req.total_size,
            chunk_size: req.chunk_size,
            file_hash: req.file_hash.filter(|h| !h.is_empty()),
            download_password: req.download_password.filter(|p| !p.is_empty()),
        })
        .await?;

    Ok(Json(json!({
        "upload_id": receipt.upload_id,
        "total_chunks": receipt.total_chunks,
        "chunk_size": receipt.chunk_size,
        "expires_at": receipt.expires_at,
    }))
    .into_response())
}

/// Receive one chunk of an active session.
#[utoipa::path(
    post,
    path = "/api/chunk/{upload_id}/{chunk_index}",
    params(
        ("upload_id" = String, Path, description = "Upload session ID"),
        ("chunk_index" = usize, Path, description = "Zero-based chunk index")
    ),
    responses(
        (status = 200, description = "Chunk received (idempotent)"),
        (status = 400, description = "Invalid chunk index or missing data"),
        (status = 404, description = "Session unknown or expired"),
        (status = 503, description = "Server busy")
    )
)]
pub async fn upload_chunk(
    State(state): State<crate::AppState>,
    Path((upload_id, chunk_index)): Path<(String, usize)>,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    let _permit = state.admission.acquire_upload().await?;

    let mut chunk: Option<Vec<u8>> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("Invalid multipart body: {}", e)))?
    {
        if field.name() == Some("chunk") {
            let bytes = field
                .bytes()
                .await
                .map_err(|e| AppError::BadRequest(format!("Failed to read chunk: {}", e)))?;
            chunk = Some(bytes.to_vec());
        }
    }

    let Some(chunk) = chunk else {
        return Err(AppError::BadRequest("No chunk data provided".to_string()));
    };

    let receipt = state
        .uploads
        .put_chunk(&upload_id, chunk_index, &chunk)
        .await?;

    let message = if receipt.already_received {
        "Chunk already received"
    } else {
        "Chunk uploaded successfully"
    };

    Ok(Json(json!({
        "message": message,
        "chunk_index": receipt.chunk_index,
        "received_chunks": receipt.received_chunks,
        "total_chunks": receipt.total_chunks,
        "complete": receipt.complete,
    }))
    .into_response())
}

/// Finalize a session; assembly continues in the background.
#[utoipa::path(
    post,
    path = "/api/chunk/{upload_id}/complete",
    params(("upload_id" = String, Path, description = "Upload session ID")),
    responses(
        (status = 202, description = "Processing job accepted"),
        (status = 400, description = "Chunks missing"),
        (status = 404, description = "Session unknown or expired")
    )
)]
pub async fn complete_upload(
    State(state): State<crate::AppState>,
    Path(upload_id): Path<String>,
) -> Result<Response, AppError> {
    match state.uploads.complete(&upload_id).await? {
        CompleteOutcome::Accepted { job_id, file_id } => Ok((
            StatusCode::ACCEPTED,
            Json(json!({
                "job_id": job_id,
                "file_id": file_id,
                "status": "pending",
                "message": "File processing started. Poll /api/file/{file_id}/status for readiness.",
            })),
        )
            .into_response()),
        CompleteOutcome::Incomplete { missing_chunk } => Ok((
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": "Missing chunks",
                "missing_chunk": missing_chunk,
            })),
        )
            .into_response()),
    }
}

/// Inspect a session's progress.
#[utoipa::path(
    get,
    path = "/api/chunk/{upload_id}/status",
    params(("upload_id" = String, Path, description = "Upload session ID")),
    responses(
        (status = 200, description = "Session state"),
        (status = 404, description = "Session unknown or expired")
    )
)]
pub async fn upload_status(
    State(state): State<crate::AppState>,
    Path(upload_id): Path<String>,
) -> Result<Response, AppError> {
    let session = state.uploads.status(&upload_id)?;

    Ok(Json(json!({
        "upload_id": session.upload_id,
        "filename": session.filename,
        "total_size": session.total_size,
        "total_chunks": session.total_chunks,
        "received_chunks": session.received_count(),
        "complete": session.is_complete(),
        "created_at": session.created_at,
        "last_activity": session.last_activity,
        "expires_at": session.expires_at,
    }))
    .into_response())
}
