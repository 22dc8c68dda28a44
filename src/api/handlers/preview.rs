use crate::api::error::AppError;
use crate::api::handlers::file::{authorize_download, client_info};
use crate::api::handlers::types::AccessQuery;
use crate::entities::files;
use crate::services::blob_store::STORAGE_KIND_EXTERNAL;
use crate::services::cache::keys;
use crate::utils::range::{parse_range, ByteRange};
use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::Utc;

const MEDIA_CACHE_THRESHOLD: i64 = 5 * 1024 * 1024;
const IMAGE_CACHE_THRESHOLD: i64 = 1024 * 1024;

/// Inline preview; honors Range, ETag and media cache headers.
#[utoipa::path(
    get,
    path = "/api/preview/{id}",
    params(("id" = String, Path, description = "File ID"), AccessQuery),
    responses(
        (status = 200, description = "Inline content"),
        (status = 206, description = "Partial content"),
        (status = 304, description = "Not modified"),
        (status = 401, description = "Password required"),
        (status = 404, description = "Unknown or expired file"),
        (status = 415, description = "Not previewable"),
        (status = 416, description = "Unsatisfiable range")
    )
)]
pub async fn preview_file(
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

    if !crate::utils::mime::is_previewable(&descriptor.mime_type) {
        return Err(AppError::UnsupportedMedia(format!(
            "File type {} cannot be previewed in the browser",
            descriptor.mime_type
        )));
    }

    let (remote, agent) = client_info(&headers);
    state.metadata.log_access(&id, "preview", &remote, &agent);

    if let Some(range_header) = headers.get(header::RANGE).and_then(|v| v.to_str().ok()) {
        let range = parse_range(range_header, descriptor.original_size)
            .ok_or(AppError::RangeNotSatisfiable(descriptor.original_size))?;
        return range_response(&state, &descriptor, range).await;
    }

    let cacheable = (crate::utils::mime::is_media(&descriptor.mime_type)
        && descriptor.original_size > MEDIA_CACHE_THRESHOLD)
        || (crate::utils::mime::is_image(&descriptor.mime_type)
            && descriptor.original_size > IMAGE_CACHE_THRESHOLD);

    if cacheable && etag_matches(&headers, &descriptor.id) {
        return Ok(not_modified(&descriptor.id));
    }

    let body = state.retrieval.full_body(&descriptor).await?;

    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, &descriptor.mime_type)
        .header(header::CONTENT_LENGTH, descriptor.original_size)
        .header(header::ACCEPT_RANGES, "bytes");

    if cacheable {
        builder = builder
            .header(header::CACHE_CONTROL, "public, max-age=3600")
            .header(header::ETAG, format!("\"{}\"", descriptor.id));
    }

    builder
        .body(body)
        .map_err(|e| AppError::Internal(format!("failed to build response: {}", e)))
}

/// Media-optimized streaming. Takes no download permit so long-lived
/// streams cannot starve admission for short requests.
#[utoipa::path(
    get,
    path = "/api/stream/{id}",
    params(("id" = String, Path, description = "File ID"), AccessQuery),
    responses(
        (status = 200, description = "Streamed content"),
        (status = 206, description = "Partial content"),
        (status = 304, description = "Not modified"),
        (status = 401, description = "Password required"),
        (status = 404, description = "Unknown or expired file")
    )
)]
pub async fn stream_file(
    State(state): State<crate::AppState>,
    Path(id): Path<String>,
    Query(query): Query<AccessQuery>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    // Mirror hit avoids the database for the checks; the authoritative row
    // is only fetched when the body actually needs it.
    let meta = match state.cache.get::<files::Model>(&keys::file(&id)) {
        Some(mirror) if mirror.expires_at > Utc::now() => mirror,
        _ => state
            .metadata
            .get_metadata(&id)
            .await?
            .ok_or_else(|| AppError::NotFound("File not found".to_string()))?,
    };

    authorize_download(&meta, &query, &state.config.jwt_secret)?;

    if etag_matches(&headers, &meta.id) {
        return Ok(not_modified(&meta.id));
    }

    let (remote, agent) = client_info(&headers);
    state.metadata.log_access(&id, "stream", &remote, &agent);

    // Inline blobs need the row's content column; external blobs do not.
    let descriptor = if meta.storage_kind == STORAGE_KIND_EXTERNAL {
        meta
    } else {
        state
            .metadata
            .get(&id)
            .await?
            .ok_or_else(|| AppError::NotFound("File not found".to_string()))?
    };

    if let Some(range_header) = headers.get(header::RANGE).and_then(|v| v.to_str().ok()) {
        let range = parse_range(range_header, descriptor.original_size)
            .ok_or(AppError::RangeNotSatisfiable(descriptor.original_size))?;
        return range_response(&state, &descriptor, range).await;
    }

    let body = state.retrieval.full_body(&descriptor).await?;

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, &descriptor.mime_type)
        .header(header::CONTENT_LENGTH, descriptor.original_size)
        .header(header::ACCEPT_RANGES, "bytes")
        .header(header::CACHE_CONTROL, "public, max-age=3600")
        .header(header::ETAG, format!("\"{}\"", descriptor.id))
        .body(body)
        .map_err(|e| AppError::Internal(format!("failed to build response: {}", e)))
}

async fn range_response(
    state: &crate::AppState,
    descriptor: &files::Model,
    range: ByteRange,
) -> Result<Response, AppError> {
    let body = state.retrieval.range_body(descriptor, range).await?;

    Response::builder()
        .status(StatusCode::PARTIAL_CONTENT)
        .header(
            header::CONTENT_RANGE,
            format!(
                "bytes {}-{}/{}",
                range.start, range.end, descriptor.original_size
            ),
        )
        .header(header::CONTENT_LENGTH, range.len())
        .header(header::CONTENT_TYPE, &descriptor.mime_type)
        .header(header::ACCEPT_RANGES, "bytes")
        .header(header::CACHE_CONTROL, "public, max-age=3600")
        .body(body)
        .map_err(|e| AppError::Internal(format!("failed to build response: {}", e)))
}

fn etag_matches(headers: &HeaderMap, id: &str) -> bool {
    headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().trim_matches('"') == id)
        .unwrap_or(false)
}

fn not_modified(id: &str) -> Response {
    (
        StatusCode::NOT_MODIFIED,
        [(header::ETAG, format!("\"{}\"", id))],
    )
        .into_response()
}
