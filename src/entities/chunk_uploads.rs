use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Registration row for an in-flight chunked upload. The authoritative chunk
/// bitmap lives in the ephemeral cache; this row exists so the hourly sweep
/// can account for sessions that outlived their cache entry.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "chunk_uploads")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub upload_id: String,
    pub filename: String,
    pub total_size: i64,
    pub total_chunks: i32,
    pub chunk_size: i64,
    pub file_hash: Option<String>,
    pub has_download_password: bool,
    pub status: String,
    pub created_at: DateTimeWithTimeZone,
    #[sea_orm(indexed)]
    pub expires_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
