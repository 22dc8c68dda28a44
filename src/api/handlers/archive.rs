use crate::api::error::AppError;
use crate::api::handlers::types::ZipEntry;
use crate::entities::files;
use crate::utils::{encoding, mime};
use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use std::io::Read;

#[derive(Debug, Deserialize)]
pub struct ExtractQuery {
    pub filename: Option<String>,
}

/// List the entries of a stored ZIP archive.
#[utoipa::path(
    get,
    path = "/api/zip/{id}",
    params(("id" = String, Path, description = "File ID")),
    responses(
        (status = 200, description = "Archive entries", body = Vec<ZipEntry>),
        (status = 400, description = "Not a ZIP archive"),
        (status = 404, description = "Unknown or expired file")
    )
)]
pub async fn browse_zip(
    State(state): State<crate::AppState>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let descriptor = load_zip_descriptor(&state, &id).await?;
    let content = state.retrieval.read_all(&descriptor).await?;

    let entries = tokio::task::spawn_blocking(move || list_entries(content))
        .await
        .map_err(|e| AppError::Internal(format!("archive task panicked: {}", e)))??;

    Ok(Json(json!({
        "filename": descriptor.filename,
        "total": entries.len(),
        "files": entries,
    }))
    .into_response())
}

/// Extract and preview a single archive entry.
#[utoipa::path(
    get,
    path = "/api/zip/{id}/extract",
    params(
        ("id" = String, Path, description = "File ID"),
        ("filename" = String, Query, description = "Decoded entry name")
    ),
    responses(
        (status = 200, description = "Entry content"),
        (status = 400, description = "Missing filename or entry is a directory"),
        (status = 404, description = "File or entry not found"),
        (status = 415, description = "Entry not previewable")
    )
)]
pub async fn extract_zip_entry(
    State(state): State<crate::AppState>,
    Path(id): Path<String>,
    Query(query): Query<ExtractQuery>,
) -> Result<Response, AppError> {
    let Some(wanted) = query.filename.filter(|f| !f.is_empty()) else {
        return Err(AppError::BadRequest(
            "filename parameter is required".to_string(),
        ));
    };

    let descriptor = load_zip_descriptor(&state, &id).await?;
    let content = state.retrieval.read_all(&descriptor).await?;

    let extraction = tokio::task::spawn_blocking(move || extract_entry(content, &wanted))
        .await
        .map_err(|e| AppError::Internal(format!("archive task panicked: {}", e)))??;

    let (entry_name, bytes) = match extraction {
        Extraction::Found { name, bytes } => (name, bytes),
        Extraction::IsDirectory => {
            return Err(AppError::BadRequest(
                "Cannot preview a directory".to_string(),
            ));
        }
        Extraction::Missing { available } => {
            return Ok((
                StatusCode::NOT_FOUND,
                Json(json!({
                    "error": "File not found in ZIP archive",
                    "available_files": available,
                })),
            )
                .into_response());
        }
    };

    let mime_type = mime::mime_type_for(&entry_name);
    if !mime::is_previewable(&mime_type) {
        return Err(AppError::UnsupportedMedia(format!(
            "File type {} cannot be previewed in the browser",
            mime_type
        )));
    }

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, mime_type)
        .header(header::CONTENT_LENGTH, bytes.len())
        .header(
            header::CONTENT_DISPOSITION,
            mime::content_disposition(&entry_name, true),
        )
        .body(axum::body::Body::from(bytes))
        .map_err(|e| AppError::Internal(format!("failed to build response: {}", e)))?)
}

async fn load_zip_descriptor(
    state: &crate::AppState,
    id: &str,
) -> Result<files::Model, AppError> {
    let descriptor = state
        .metadata
        .get(id)
        .await?
        .ok_or_else(|| AppError::NotFound("File not found".to_string()))?;

    if !descriptor.filename.to_ascii_lowercase().ends_with(".zip") {
        return Err(AppError::BadRequest(
            "File is not a ZIP archive".to_string(),
        ));
    }

    Ok(descriptor)
}

fn open_archive(
    content: Vec<u8>,
) -> Result<zip::ZipArchive<std::io::Cursor<Vec<u8>>>, AppError> {
    zip::ZipArchive::new(std::io::Cursor::new(content))
        .map_err(|e| AppError::BadRequest(format!("Failed to read ZIP archive: {}", e)))
}

fn list_entries(content: Vec<u8>) -> Result<Vec<ZipEntry>, AppError> {
    let mut archive = open_archive(content)?;

    let mut entries = Vec::with_capacity(archive.len());
    for index in 0..archive.len() {
        let entry = match archive.by_index(index) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("Failed to read ZIP entry {}: {}", index, e);
                continue;
            }
        };

        entries.push(ZipEntry {
            name: encoding::decode_entry_name(entry.name_raw()),
            size: entry.size(),
            compressed: entry.compressed_size(),
            is_dir: entry.is_dir(),
        });
    }

    Ok(entries)
}

enum Extraction {
    Found { name: String, bytes: Vec<u8> },
    IsDirectory,
    Missing { available: Vec<String> },
}

fn extract_entry(content: Vec<u8>, wanted: &str) -> Result<Extraction, AppError> {
    let mut archive = open_archive(content)?;

    let mut available = Vec::with_capacity(archive.len());
    let mut target = None;
    for index in 0..archive.len() {
        let entry = match archive.by_index(index) {
            Ok(entry) => entry,
            Err(_) => continue,
        };

        let decoded = encoding::decode_entry_name(entry.name_raw());
        if target.is_none() && (decoded == wanted || entry.name() == wanted) {
            target = Some((index, decoded.clone()));
        }
        available.push(decoded);
    }

    let Some((index, name)) = target else {
        return Ok(Extraction::Missing { available });
    };

    let mut entry = archive
        .by_index(index)
        .map_err(|e| AppError::Internal(format!("Failed to open ZIP entry: {}", e)))?;

    if entry.is_dir() {
        return Ok(Extraction::IsDirectory);
    }

    let mut bytes = Vec::with_capacity(entry.size() as usize);
    entry
        .read_to_end(&mut bytes)
        .map_err(|e| AppError::Internal(format!("Failed to read ZIP entry: {}", e)))?;

    Ok(Extraction::Found { name, bytes })
}
