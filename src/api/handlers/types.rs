use crate::entities::files;
use crate::utils::auth;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

/// Query parameters accepted by the retrieval and deletion endpoints.
#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct AccessQuery {
    /// Download password for protected files
    pub password: Option<String>,
    /// Delete token issued at upload time
    pub delete_password: Option<String>,
    /// Admin bearer token; bypasses passwords when valid
    pub admin_token: Option<String>,
}

impl AccessQuery {
    pub fn is_admin(&self, jwt_secret: &str) -> bool {
        self.admin_token
            .as_deref()
            .map(|token| auth::validate_admin_token(token, jwt_secret).is_ok())
            .unwrap_or(false)
    }
}

/// Descriptor view returned over HTTP. `delete_password` is only populated
/// for the uploader's own response.
#[derive(Debug, Serialize, ToSchema)]
pub struct FileMetadataResponse {
    pub id: String,
    pub filename: String,
    pub size: i64,
    pub compressed_size: i64,
    pub mime_type: String,
    pub compression: String,
    pub storage_kind: String,
    pub upload_time: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub has_download_password: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delete_password: Option<String>,
}

impl FileMetadataResponse {
    /// Public view: no secrets.
    pub fn safe(model: &files::Model) -> Self {
        Self::build(model, false)
    }

    /// Uploader view: includes the delete token.
    pub fn owner(model: &files::Model) -> Self {
        Self::build(model, true)
    }

    fn build(model: &files::Model, with_delete_token: bool) -> Self {
        Self {
            id: model.id.clone(),
            filename: model.filename.clone(),
            size: model.original_size,
            compressed_size: model.stored_size,
            mime_type: model.mime_type.clone(),
            compression: model.compression.clone(),
            storage_kind: model.storage_kind.clone(),
            upload_time: model.created_at.with_timezone(&Utc),
            expires_at: model.expires_at.with_timezone(&Utc),
            has_download_password: model.has_download_token,
            delete_password: with_delete_token.then(|| model.delete_token.clone()),
        }
    }
}

/// Entry in a browsed ZIP archive.
#[derive(Debug, Serialize, ToSchema)]
pub struct ZipEntry {
    pub name: String,
    pub size: u64,
    pub compressed: u64,
    pub is_dir: bool,
}
