use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Canonical record of a stored artifact. Immutable after creation except
/// `expires_at`, which may only move forward.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "files")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub filename: String,
    pub mime_type: String,
    pub original_size: i64,
    pub stored_size: i64,
    pub compression: String,
    /// "inline" or "external"
    pub storage_kind: String,
    /// Filesystem path for external blobs, None for inline
    pub storage_path: Option<String>,
    /// Compressed bytes for inline blobs, None for external
    pub content: Option<Vec<u8>>,
    pub created_at: DateTimeWithTimeZone,
    #[sea_orm(indexed)]
    pub expires_at: DateTimeWithTimeZone,
    pub delete_token: String,
    pub download_token: Option<String>,
    pub has_download_token: bool,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
