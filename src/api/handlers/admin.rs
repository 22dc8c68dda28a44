use crate::api::error::AppError;
use crate::api::handlers::file::purge_file_artifacts;
use crate::services::cache::keys;
use crate::utils::auth;
use axum::{
    extract::{Path, State},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use utoipa::ToSchema;

#[derive(Debug, Deserialize, ToSchema)]
pub struct AdminRequest {
    pub admin_password: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateExpirationRequest {
    pub admin_password: String,
    /// RFC 3339 timestamp, strictly in the future
    pub expires_at: String,
}

/// Exchange the admin password for a signed, short-lived token.
#[utoipa::path(
    post,
    path = "/api/admin/auth",
    request_body = AdminRequest,
    responses(
        (status = 200, description = "Token issued"),
        (status = 401, description = "Wrong password"),
        (status = 503, description = "Admin surface not configured")
    )
)]
pub async fn admin_auth(
    State(state): State<crate::AppState>,
    Json(req): Json<AdminRequest>,
) -> Result<Response, AppError> {
    require_admin(&state, &req.admin_password)?;

    let (token, expires_at) = auth::create_admin_token(&state.config.jwt_secret)
        .map_err(|e| AppError::Internal(format!("failed to sign token: {}", e)))?;

    Ok(Json(json!({ "token": token, "expires_at": expires_at })).into_response())
}

/// Extend a file's expiry.
#[utoipa::path(
    put,
    path = "/api/admin/file/{id}/expires",
    params(("id" = String, Path, description = "File ID")),
    request_body = UpdateExpirationRequest,
    responses(
        (status = 200, description = "Expiry updated"),
        (status = 400, description = "Invalid timestamp"),
        (status = 401, description = "Wrong password"),
        (status = 404, description = "Unknown file"),
        (status = 503, description = "Admin surface not configured")
    )
)]
pub async fn update_expiration(
    State(state): State<crate::AppState>,
    Path(id): Path<String>,
    Json(req): Json<UpdateExpirationRequest>,
) -> Result<Response, AppError> {
    require_admin(&state, &req.admin_password)?;

    let new_expires_at = DateTime::parse_from_rfc3339(&req.expires_at)
        .map_err(|_| {
            AppError::BadRequest(
                "Invalid expiration time format, expected RFC 3339".to_string(),
            )
        })?
        .with_timezone(&Utc);

    let previous = state
        .metadata
        .get_metadata(&id)
        .await?
        .ok_or_else(|| AppError::NotFound("File not found".to_string()))?;
    let old_expires_at = previous.expires_at;

    let updated = state.metadata.update_expiry(&id, new_expires_at).await?;

    // Keep the cache view consistent with the new lifetime
    let mut mirror = updated.clone();
    mirror.content = None;
    let ttl = (new_expires_at - Utc::now())
        .to_std()
        .unwrap_or(std::time::Duration::from_secs(60));
    let _ = state.cache.set(&keys::file(&id), &mirror, ttl);
    state.cache.zadd(new_expires_at.timestamp(), &id);

    tracing::info!(
        "⏰ Expiry of {} moved from {} to {}",
        id,
        old_expires_at,
        new_expires_at
    );

    Ok(Json(json!({
        "message": "File expiration updated successfully",
        "file_id": id,
        "old_expires_at": old_expires_at,
        "new_expires_at": new_expires_at,
    }))
    .into_response())
}

/// Force-delete a file regardless of its delete token.
#[utoipa::path(
    delete,
    path = "/api/admin/file/{id}",
    params(("id" = String, Path, description = "File ID")),
    request_body = AdminRequest,
    responses(
        (status = 200, description = "File deleted"),
        (status = 401, description = "Wrong password"),
        (status = 404, description = "Unknown file"),
        (status = 503, description = "Admin surface not configured")
    )
)]
pub async fn admin_delete_file(
    State(state): State<crate::AppState>,
    Path(id): Path<String>,
    Json(req): Json<AdminRequest>,
) -> Result<Response, AppError> {
    require_admin(&state, &req.admin_password)?;

    let descriptor = state.metadata.delete(&id).await?;
    purge_file_artifacts(&state, &descriptor).await;

    tracing::info!("🗑️  Admin deleted file {} ({})", id, descriptor.filename);

    Ok(Json(json!({
        "message": "File deleted successfully",
        "file_id": id,
        "filename": descriptor.filename,
    }))
    .into_response())
}

/// List all live descriptors.
#[utoipa::path(
    post,
    path = "/api/admin/files",
    request_body = AdminRequest,
    responses(
        (status = 200, description = "Live files"),
        (status = 401, description = "Wrong password"),
        (status = 503, description = "Admin surface not configured")
    )
)]
pub async fn admin_list_files(
    State(state): State<crate::AppState>,
    Json(req): Json<AdminRequest>,
) -> Result<Response, AppError> {
    require_admin(&state, &req.admin_password)?;

    let descriptors = state.metadata.list_active(1000).await?;
    let files: Vec<_> = descriptors
        .iter()
        .map(|d| {
            json!({
                "file_id": d.id,
                "filename": d.filename,
                "size": d.stored_size,
                "original_size": d.original_size,
                "uploaded_at": d.created_at,
                "expires_at": d.expires_at,
                "storage_kind": d.storage_kind,
                "storage_path": d.storage_path,
                "compressed": d.compression != "none",
                "compression": d.compression,
                "mime_type": d.mime_type,
                "has_password": d.has_download_token,
            })
        })
        .collect();

    Ok(Json(json!({
        "message": "File list retrieved successfully",
        "count": files.len(),
        "files": files,
    }))
    .into_response())
}

fn require_admin(state: &crate::AppState, provided: &str) -> Result<(), AppError> {
    let Some(expected) = state.config.admin_password.as_deref() else {
        return Err(AppError::ServiceBusy(
            "Admin functionality not configured".to_string(),
        ));
    };

    if provided != expected {
        return Err(AppError::Unauthorized(
            "The provided admin password is incorrect".to_string(),
        ));
    }

    Ok(())
}
