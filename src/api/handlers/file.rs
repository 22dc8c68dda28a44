use crate::api::error::AppError;
use crate::api::handlers::types::{AccessQuery, FileMetadataResponse};
use crate::entities::files;
use crate::services::blob_store::STORAGE_KIND_EXTERNAL;
use crate::services::cache::keys;
use crate::services::pipeline::ProcessingStatus;
use crate::utils::mime;
use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Download the full artifact.
#[utoipa::path(
    get,
    path = "/api/file/{id}",
    params(("id" = String, Path, description = "File ID"), AccessQuery),
    responses(
        (status = 200, description = "File content"),
        (status = 401, description = "Password required"),
        (status = 404, description = "Unknown or expired file"),
        (status = 503, description = "Server busy")
    )
)]
pub async fn download_file(
    State(state): State<crate::AppState>,
    Path(id): Path<String>,
    Query(query): Query<AccessQuery>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let _permit = state.admission.acquire_download().await?;

    let descriptor = state
        .metadata
        .get(&id)
        .await?
        .ok_or_else(|| AppError::NotFound("File not found".to_string()))?;

    authorize_download(&descriptor, &query, &state.config.jwt_secret)?;

    let body = state.retrieval.full_body(&descriptor).await?;

    let (remote, agent) = client_info(&headers);
    state.metadata.log_access(&id, "download", &remote, &agent);

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, &descriptor.mime_type)
        .header(header::CONTENT_LENGTH, descriptor.original_size)
        .header(
            header::CONTENT_DISPOSITION,
            mime::content_disposition(&descriptor.filename, false),
        )
        .body(body)
        .map_err(|e| AppError::Internal(format!("failed to build response: {}", e)))?)
}

/// Poll processing state or readiness of a file.
#[utoipa::path(
    get,
    path = "/api/file/{id}/status",
    params(("id" = String, Path, description = "File ID")),
    responses(
        (status = 200, description = "File is ready"),
        (status = 202, description = "Still processing"),
        (status = 400, description = "Processing failed"),
        (status = 404, description = "Unknown or expired file")
    )
)]
pub async fn file_status(
    State(state): State<crate::AppState>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    if let Some(status) = state.cache.get::<ProcessingStatus>(&keys::processing(&id)) {
        match status.status.as_str() {
            "processing" => {
                return Ok((
                    StatusCode::ACCEPTED,
                    Json(json!({
                        "status": "processing",
                        "message": "Your file is currently being processed. Please try again shortly.",
                        "filename": status.filename,
                    })),
                )
                    .into_response());
            }
            "failed" => {
                return Ok((
                    StatusCode::BAD_REQUEST,
                    Json(json!({
                        "status": "failed",
                        "message": status
                            .error
                            .unwrap_or_else(|| "File processing failed. Please upload again.".to_string()),
                        "error_type": "processing_failed",
                    })),
                )
                    .into_response());
            }
            // "completed" falls through to the metadata store
            _ => state.cache.del(&keys::processing(&id)),
        }
    }

    let Some(descriptor) = state.metadata.get_metadata(&id).await? else {
        return Ok((
            StatusCode::NOT_FOUND,
            Json(json!({
                "status": "not_found",
                "message": "File not found or may have expired",
            })),
        )
            .into_response());
    };

    if !state.retrieval.content_available(&descriptor).await {
        return Ok((
            StatusCode::ACCEPTED,
            Json(json!({
                "status": "processing",
                "message": "Your file is currently being processed. Please try again shortly.",
                "filename": descriptor.filename,
            })),
        )
            .into_response());
    }

    state.cache.del(&keys::processing(&id));

    Ok(Json(json!({
        "status": "ready",
        "message": "File is ready for download",
        "metadata": FileMetadataResponse::safe(&descriptor),
        "download_url": format!("/api/file/{}", id),
        "preview_url": format!("/api/preview/{}", id),
    }))
    .into_response())
}

/// Delete a file with its delete token (or as admin).
#[utoipa::path(
    delete,
    path = "/api/file/{id}",
    params(("id" = String, Path, description = "File ID"), AccessQuery),
    responses(
        (status = 200, description = "File deleted"),
        (status = 401, description = "Wrong delete token"),
        (status = 404, description = "Unknown or expired file")
    )
)]
pub async fn delete_file(
    State(state): State<crate::AppState>,
    Path(id): Path<String>,
    Query(query): Query<AccessQuery>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let descriptor = state
        .metadata
        .get_metadata(&id)
        .await?
        .ok_or_else(|| AppError::NotFound("File not found".to_string()))?;

    let is_admin = query.is_admin(&state.config.jwt_secret);
    let token_matches = query
        .delete_password
        .as_deref()
        .map(|provided| provided == descriptor.delete_token)
        .unwrap_or(false);

    if !is_admin && !token_matches {
        return Err(AppError::Unauthorized(
            "The provided delete password is incorrect".to_string(),
        ));
    }

    state.metadata.delete(&id).await?;
    purge_file_artifacts(&state, &descriptor).await;

    let (remote, agent) = client_info(&headers);
    state.metadata.log_access(&id, "delete", &remote, &agent);

    tracing::info!("🗑️  Deleted file {} ({})", id, descriptor.filename);

    Ok(Json(json!({ "message": "File deleted successfully" })).into_response())
}

/// Safe descriptor without secrets.
#[utoipa::path(
    get,
    path = "/api/metadata/{id}",
    params(("id" = String, Path, description = "File ID")),
    responses(
        (status = 200, description = "Descriptor", body = FileMetadataResponse),
        (status = 404, description = "Unknown or expired file")
    )
)]
pub async fn get_metadata(
    State(state): State<crate::AppState>,
    Path(id): Path<String>,
) -> Result<Json<FileMetadataResponse>, AppError> {
    let descriptor = state
        .metadata
        .get_metadata(&id)
        .await?
        .ok_or_else(|| AppError::NotFound("File not found or expired".to_string()))?;

    Ok(Json(FileMetadataResponse::safe(&descriptor)))
}

/// Password gate shared by the download, preview and stream paths. Admin
/// tokens bypass passwords.
pub(crate) fn authorize_download(
    descriptor: &files::Model,
    query: &AccessQuery,
    jwt_secret: &str,
) -> Result<(), AppError> {
    if !descriptor.has_download_token {
        return Ok(());
    }

    if query.is_admin(jwt_secret) {
        tracing::info!("Admin access granted for file {}", descriptor.id);
        return Ok(());
    }

    match (descriptor.download_token.as_deref(), query.password.as_deref()) {
        (Some(expected), Some(provided)) if provided == expected => Ok(()),
        _ => Err(AppError::Unauthorized(
            "This file is password protected. Please provide the correct password.".to_string(),
        )),
    }
}

/// Remove a deleted/expired file's blob and cache entries. Row removal is
/// the caller's business.
pub(crate) async fn purge_file_artifacts(state: &crate::AppState, descriptor: &files::Model) {
    if descriptor.storage_kind == STORAGE_KIND_EXTERNAL {
        if let Some(path) = &descriptor.storage_path {
            if let Err(e) = state.blobs.delete(std::path::Path::new(path)).await {
                tracing::error!("Failed to delete blob for {}: {}", descriptor.id, e);
            }
        }
    }

    state
        .cache
        .del_many([keys::file(&descriptor.id), keys::content(&descriptor.id)]);
    state.cache.zrem(&descriptor.id);
}

pub(crate) fn client_info(headers: &HeaderMap) -> (String, String) {
    let remote = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    let agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string();

    (remote, agent)
}
