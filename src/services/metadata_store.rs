use crate::api::error::AppError;
use crate::entities::{prelude::*, *};
use crate::services::blob_store::{BlobStore, STORAGE_KIND_EXTERNAL};
use chrono::{DateTime, Duration, Utc};
use sea_orm::ActiveValue::{NotSet, Set};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect,
};

/// Access-log rows older than this are pruned by the hourly sweep.
const ACCESS_LOG_RETENTION_DAYS: i64 = 30;
/// Finished processing jobs are kept this long for post-hoc inspection.
const JOB_RETENTION_DAYS: i64 = 7;
/// Upper bound on rows handled per sweep pass.
const SWEEP_BATCH: u64 = 1000;

#[derive(Debug, Default)]
pub struct SweepReport {
    pub files_removed: u64,
    pub logs_removed: u64,
    pub jobs_removed: u64,
    pub sessions_removed: u64,
}

/// Durable, indexed store of file descriptors plus the bookkeeping tables
/// (processing jobs, session registrations, access logs).
pub struct MetadataStore {
    db: DatabaseConnection,
}

impl MetadataStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Insert a new descriptor. Duplicate IDs are a `Conflict`; a failed
    /// insert leaves no partial row (single statement).
    pub async fn save(&self, descriptor: files::ActiveModel) -> Result<files::Model, AppError> {
        let id = match &descriptor.id {
            Set(id) => id.clone(),
            _ => return Err(AppError::Internal("descriptor without id".to_string())),
        };

        if Files::find_by_id(&id).one(&self.db).await?.is_some() {
            return Err(AppError::Conflict(format!("file {} already exists", id)));
        }

        Ok(descriptor.insert(&self.db).await?)
    }

    /// Full row including inline content. Expired rows are invisible.
    pub async fn get(&self, id: &str) -> Result<Option<files::Model>, AppError> {
        Ok(Files::find_by_id(id)
            .filter(files::Column::ExpiresAt.gt(Utc::now()))
            .one(&self.db)
            .await?)
    }

    /// Like `get`, with inline content stripped for cheap descriptor reads.
    pub async fn get_metadata(&self, id: &str) -> Result<Option<files::Model>, AppError> {
        Ok(self.get(id).await?.map(|mut model| {
            model.content = None;
            model
        }))
    }

    /// Remove a descriptor row, returning it so the caller can clean up the
    /// blob. Absent (or already expired) rows are `NotFound`.
    pub async fn delete(&self, id: &str) -> Result<files::Model, AppError> {
        let descriptor = self
            .get_metadata(id)
            .await?
            .ok_or_else(|| AppError::NotFound("File not found".to_string()))?;

        Files::delete_by_id(id).exec(&self.db).await?;
        Ok(descriptor)
    }

    /// Live descriptors, newest first, bounded page. Inline content is
    /// stripped.
    pub async fn list_active(&self, limit: u64) -> Result<Vec<files::Model>, AppError> {
        let rows = Files::find()
            .filter(files::Column::ExpiresAt.gt(Utc::now()))
            .order_by_desc(files::Column::CreatedAt)
            .limit(limit)
            .all(&self.db)
            .await?;

        Ok(rows
            .into_iter()
            .map(|mut model| {
                model.content = None;
                model
            })
            .collect())
    }

    /// Move a descriptor's expiry, strictly into the future.
    pub async fn update_expiry(
        &self,
        id: &str,
        new_expires_at: DateTime<Utc>,
    ) -> Result<files::Model, AppError> {
        if new_expires_at <= Utc::now() {
            return Err(AppError::BadRequest(
                "Expiration time must be in the future".to_string(),
            ));
        }

        let descriptor = self
            .get_metadata(id)
            .await?
            .ok_or_else(|| AppError::NotFound("File not found".to_string()))?;

        let mut active: files::ActiveModel = descriptor.into();
        active.expires_at = Set(new_expires_at.into());
        Ok(active.update(&self.db).await?)
    }

    /// Remove everything past its lifetime: expired descriptors (and their
    /// external blobs), stale access logs, finished jobs past retention and
    /// expired session registrations.
    pub async fn sweep_expired(&self, blobs: &BlobStore) -> Result<SweepReport, AppError> {
        let now = Utc::now();
        let mut report = SweepReport::default();

        let expired = Files::find()
            .filter(files::Column::ExpiresAt.lte(now))
            .limit(SWEEP_BATCH)
            .all(&self.db)
            .await?;

        for descriptor in expired {
            Files::delete_by_id(&descriptor.id).exec(&self.db).await?;
            report.files_removed += 1;

            if descriptor.storage_kind == STORAGE_KIND_EXTERNAL {
                if let Some(path) = &descriptor.storage_path {
                    if let Err(e) = blobs.delete(std::path::Path::new(path)).await {
                        tracing::error!("Failed to delete expired blob {}: {}", path, e);
                    }
                }
            }
        }

        let log_cutoff = now - Duration::days(ACCESS_LOG_RETENTION_DAYS);
        report.logs_removed = FileAccessLogs::delete_many()
            .filter(file_access_logs::Column::AccessedAt.lt(log_cutoff))
            .exec(&self.db)
            .await?
            .rows_affected;

        let job_cutoff = now - Duration::days(JOB_RETENTION_DAYS);
        report.jobs_removed = ProcessingJobs::delete_many()
            .filter(processing_jobs::Column::Status.is_in(["completed", "failed"]))
            .filter(processing_jobs::Column::UpdatedAt.lt(job_cutoff))
            .exec(&self.db)
            .await?
            .rows_affected;

        report.sessions_removed = ChunkUploads::delete_many()
            .filter(chunk_uploads::Column::ExpiresAt.lte(now))
            .exec(&self.db)
            .await?
            .rows_affected;

        Ok(report)
    }

    /// Append an access-log row. Fire-and-forget: runs on its own task and
    /// never affects the foreground request.
    pub fn log_access(&self, file_id: &str, access_type: &str, remote: &str, agent: &str) {
        let db = self.db.clone();
        let row = file_access_logs::ActiveModel {
            id: NotSet,
            file_id: Set(file_id.to_string()),
            access_type: Set(access_type.to_string()),
            ip_address: Set(Some(remote.to_string())),
            user_agent: Set(Some(agent.to_string())),
            accessed_at: Set(Utc::now().into()),
        };

        tokio::spawn(async move {
            if let Err(e) = row.insert(&db).await {
                tracing::warn!("Failed to log file access: {}", e);
            }
        });
    }

    /// Upsert a processing-job row (write-through behind the cache mirror).
    pub async fn save_job(&self, row: processing_jobs::ActiveModel) -> Result<(), AppError> {
        let job_id = match &row.job_id {
            Set(id) => id.clone(),
            _ => return Err(AppError::Internal("job without id".to_string())),
        };

        if ProcessingJobs::find_by_id(&job_id)
            .one(&self.db)
            .await?
            .is_some()
        {
            row.update(&self.db).await?;
        } else {
            row.insert(&self.db).await?;
        }
        Ok(())
    }

    /// Record a chunked-upload session. The cache copy stays authoritative;
    /// this row only keeps the sweep honest.
    pub async fn register_session(
        &self,
        row: chunk_uploads::ActiveModel,
    ) -> Result<(), AppError> {
        row.insert(&self.db).await?;
        Ok(())
    }

    pub async fn remove_session(&self, upload_id: &str) -> Result<(), AppError> {
        ChunkUploads::delete_by_id(upload_id).exec(&self.db).await?;
        Ok(())
    }
}
