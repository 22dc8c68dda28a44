use crate::api::error::AppError;
use crate::api::handlers::types::FileMetadataResponse;
use crate::utils::token;
use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Single-shot upload for files below the chunk threshold.
#[utoipa::path(
    post,
    path = "/api/upload",
    request_body(content = String, description = "Multipart form with a `file` field and optional `download_password`", content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "File stored", body = FileMetadataResponse),
        (status = 400, description = "No file provided"),
        (status = 413, description = "File exceeds the chunk threshold; use chunked upload"),
        (status = 503, description = "Server busy")
    )
)]
pub async fn upload_file(
    State(state): State<crate::AppState>,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    let _permit = state.admission.acquire_upload().await?;

    let mut filename = None;
    let mut content: Option<Vec<u8>> = None;
    let mut download_password = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("Invalid multipart body: {}", e)))?
    {
        match field.name() {
            Some("file") => {
                filename = Some(
                    field
                        .file_name()
                        .map(|name| name.to_string())
                        .unwrap_or_else(|| "file".to_string()),
                );
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::BadRequest(format!("Failed to read file: {}", e)))?;
                content = Some(bytes.to_vec());
            }
            Some("download_password") => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| AppError::BadRequest(format!("Invalid form field: {}", e)))?;
                if !value.is_empty() {
                    download_password = Some(value);
                }
            }
            _ => {}
        }
    }

    let (Some(filename), Some(content)) = (filename, content) else {
        return Err(AppError::BadRequest("No file uploaded".to_string()));
    };

    if content.len() as i64 > state.config.chunk_threshold {
        return Ok((
            StatusCode::PAYLOAD_TOO_LARGE,
            Json(json!({
                "error": "File too large for standard upload",
                "message": "Larger files must use the chunked upload endpoints",
                "max_size": state.config.chunk_threshold,
                "use_chunked": true,
            })),
        )
            .into_response());
    }

    let file_id = token::generate_id();
    let descriptor = state
        .pipeline
        .store_bytes(&file_id, &filename, content, download_password)
        .await
        .map_err(|e| AppError::Internal(format!("Failed to store file: {}", e)))?;

    tracing::info!(
        "📥 Stored {} as {} ({} -> {} bytes, {})",
        descriptor.filename,
        descriptor.id,
        descriptor.original_size,
        descriptor.stored_size,
        descriptor.compression
    );

    Ok(Json(json!({
        "message": "File uploaded successfully",
        "file_id": descriptor.id,
        "metadata": FileMetadataResponse::owner(&descriptor),
    }))
    .into_response())
}
