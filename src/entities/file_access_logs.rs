use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Append-only access log. Writes are fire-and-forget; rows older than the
/// retention window are pruned by the hourly sweep.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "file_access_logs")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub file_id: String,
    /// download | preview | stream | delete
    pub access_type: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    #[sea_orm(indexed)]
    pub accessed_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
